use sha2::{Digest, Sha256};

/// Stable dedup key for a post: SHA-256 over normalized text plus the sorted
/// set of media locators. Returns None when there is nothing to fingerprint.
///
/// Two posts with identical normalized text and identical media sets collide
/// on purpose; the hash is the identity the dedup store keys on.
pub fn content_hash(text: Option<&str>, media_urls: &[String]) -> Option<String> {
    let mut parts: Vec<String> = Vec::with_capacity(2);

    if let Some(text) = text {
        let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.is_empty() {
            parts.push(normalized);
        }
    }

    let mut urls: Vec<&str> = media_urls
        .iter()
        .map(String::as_str)
        .filter(|u| !u.is_empty())
        .collect();
    if !urls.is_empty() {
        urls.sort_unstable();
        parts.push(urls.join("|"));
    }

    if parts.is_empty() {
        return None;
    }

    let mut hasher = Sha256::new();
    hasher.update(parts.concat().as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

/// Collapse runs of three or more newlines down to a blank line and trim.
/// Returns None when nothing readable remains.
pub fn sanitize_text(text: Option<&str>) -> Option<String> {
    let text = text?;
    static RE_NEWLINES: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re = RE_NEWLINES.get_or_init(|| regex::Regex::new(r"\n{3,}").unwrap());
    let cleaned = re.replace_all(text, "\n\n");
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
