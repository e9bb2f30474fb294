//! Glob-style matching for key scans.
//!
//! Backends expose `scan_keys` with the same wildcard grammar a Redis-style
//! `SCAN MATCH` understands: `*` matches any run of characters (including
//! none) and `?` matches exactly one.

/// Returns true when `text` matches the glob `pattern`.
///
/// Matching is case-sensitive and operates on Unicode scalar values, so a
/// `?` consumes one character rather than one byte.
pub fn matches_pattern(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    let mut t = 0;
    let mut p = 0;
    // Position to resume from when a `*` needs to swallow one more character.
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, star_t + 1));
        } else {
            return false;
        }
    }

    // Only trailing stars may remain unconsumed.
    pattern[p..].iter().all(|&c| c == '*')
}

/// Splits a pattern into its literal prefix, up to the first wildcard.
///
/// Lets ordered backends narrow a scan to a key range before applying the
/// full glob to each candidate.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}
