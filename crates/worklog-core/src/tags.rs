//! Tags are stored as a single comma-separated TEXT column.

/// Split a stored tag string into trimmed, non-empty tags (order preserved).
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Join tags back into the stored form, dropping duplicates but keeping first-seen order.
pub fn join_tags<S: AsRef<str>>(tags: &[S]) -> String {
    let mut seen: Vec<&str> = Vec::with_capacity(tags.len());
    for t in tags {
        let t = t.as_ref().trim();
        if !t.is_empty() && !seen.contains(&t) {
            seen.push(t);
        }
    }
    seen.join(",")
}
