//! URL patterns in the ABP subset understood by the parser.
//!
//! Patterns are stored lowercase and matched against the lowercased request
//! URL. `*` matches any run of characters, `^` matches a separator character
//! or the end of the URL, and a trailing `|` anchors the end.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    /// `||host/path`: the request host equals `host` or is a subdomain of it,
    /// and the URL remainder after the host starts with `path`.
    Host { host: String, path: String },
    /// `|http://...`: matches at the start of the URL.
    Anchored(String),
    /// Matches anywhere in the URL.
    Substring(String),
}

impl Pattern {
    #[must_use]
    pub fn host(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Host {
            host: host.into(),
            path: path.into(),
        }
    }

    /// Whether the pattern matches. `url` must already be lowercase.
    #[must_use]
    pub fn matches(&self, url: &str, host: &str) -> bool {
        match self {
            Self::Host {
                host: pattern_host,
                path,
            } => {
                if !host_covers(pattern_host, host) {
                    return false;
                }
                if path.is_empty() {
                    return true;
                }
                let Some(rest) = remainder_after_host(url, host) else {
                    return false;
                };
                match_at(path.as_bytes(), rest.as_bytes(), Start::Front)
            }
            Self::Anchored(pattern) => match_at(pattern.as_bytes(), url.as_bytes(), Start::Front),
            Self::Substring(pattern) => {
                match_at(pattern.as_bytes(), url.as_bytes(), Start::Anywhere)
            }
        }
    }

    /// Rough measure of how specific a pattern is; longer wins.
    #[must_use]
    pub fn specificity(&self) -> usize {
        match self {
            Self::Host { host, path } => host.len() + path.len() + 2,
            Self::Anchored(pattern) => pattern.len() + 1,
            Self::Substring(pattern) => pattern.len(),
        }
    }

    /// The host a `Host` pattern is indexed under.
    #[must_use]
    pub fn index_host(&self) -> Option<&str> {
        match self {
            Self::Host { host, .. } => Some(host),
            Self::Anchored(_) | Self::Substring(_) => None,
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host { host, path } => write!(f, "{host}{path}"),
            Self::Anchored(pattern) => write!(f, "|{pattern}"),
            Self::Substring(pattern) => f.write_str(pattern),
        }
    }
}

fn host_covers(pattern_host: &str, host: &str) -> bool {
    host == pattern_host
        || (host.len() > pattern_host.len()
            && host.ends_with(pattern_host)
            && host.as_bytes()[host.len() - pattern_host.len() - 1] == b'.')
}

/// Everything after the host in `url`, e.g. `:8080/a/b?c`.
fn remainder_after_host<'a>(url: &'a str, host: &str) -> Option<&'a str> {
    let authority_start = url.find("://").map_or(0, |idx| idx + 3);
    let after_scheme = &url[authority_start..];
    let host_start = after_scheme.find(host)?;
    Some(&after_scheme[host_start + host.len()..])
}

fn is_separator(byte: u8) -> bool {
    !(byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b'%'))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Start {
    Front,
    Anywhere,
}

/// Whether `pattern` matches `text` beginning at the front or at any offset.
///
/// Tracks the set of text offsets reachable after each pattern byte, so the
/// cost is bounded by `pattern.len() * text.len()` whatever the wildcards.
fn match_at(pattern: &[u8], text: &[u8], start: Start) -> bool {
    if !pattern.iter().any(|byte| matches!(byte, b'*' | b'^' | b'|')) {
        return match start {
            Start::Front => text.starts_with(pattern),
            Start::Anywhere => {
                pattern.is_empty() || text.windows(pattern.len()).any(|window| window == pattern)
            }
        };
    }

    let end = text.len();
    let mut current = vec![start == Start::Anywhere; end + 1];
    current[0] = true;
    let mut next = vec![false; end + 1];

    for (idx, &token) in pattern.iter().enumerate() {
        next.fill(false);
        match token {
            b'*' => {
                if let Some(first) = current.iter().position(|&reached| reached) {
                    next[first..].fill(true);
                }
            }
            b'|' if idx + 1 == pattern.len() => next[end] = current[end],
            b'^' => {
                next[end] = current[end];
                for (offset, &byte) in text.iter().enumerate() {
                    if current[offset] && is_separator(byte) {
                        next[offset + 1] = true;
                    }
                }
            }
            literal => {
                for (offset, &byte) in text.iter().enumerate() {
                    if current[offset] && byte == literal {
                        next[offset + 1] = true;
                    }
                }
            }
        }
        std::mem::swap(&mut current, &mut next);
        if !current.contains(&true) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_match_host_and_subdomains() {
        let pattern = Pattern::host("ads.example.com", "");

        assert!(pattern.matches("http://ads.example.com/banner.png", "ads.example.com"));
        assert!(pattern.matches("http://x.ads.example.com/", "x.ads.example.com"));
        assert!(!pattern.matches("http://badads.example.com/", "badads.example.com"));
        assert!(!pattern.matches("http://example.com/", "example.com"));
    }

    #[test]
    fn should_match_host_path_prefix() {
        let pattern = Pattern::host("example.com", "/ads/*.gif");

        assert!(pattern.matches("https://example.com/ads/x/banner.gif", "example.com"));
        assert!(!pattern.matches("https://example.com/content/banner.gif", "example.com"));
    }

    #[test]
    fn should_treat_caret_as_separator_or_end() {
        let pattern = Pattern::host("example.com", "^");

        assert!(pattern.matches("https://example.com/", "example.com"));
        assert!(pattern.matches("https://example.com:8080/x", "example.com"));

        let substring = Pattern::Substring("/track^".into());
        assert!(substring.matches("https://a.com/track?id=1", "a.com"));
        assert!(substring.matches("https://a.com/track", "a.com"));
        assert!(!substring.matches("https://a.com/tracker", "a.com"));
    }

    #[test]
    fn should_match_substring_with_wildcards() {
        let pattern = Pattern::Substring("/banner/*/img".into());

        assert!(pattern.matches("http://a.com/banner/123/img.png", "a.com"));
        assert!(!pattern.matches("http://a.com/banner.png", "a.com"));
    }

    #[test]
    fn should_anchor_start_and_end() {
        let pattern = Pattern::Anchored("http://example.com/script.js|".into());

        assert!(pattern.matches("http://example.com/script.js", "example.com"));
        assert!(!pattern.matches("http://example.com/script.js?x", "example.com"));
        assert!(!pattern.matches("https://cdn.com/?http://example.com/script.js", "cdn.com"));
    }

    #[test]
    fn should_match_wildcards_in_bounded_time() {
        let url = format!("https://cdn.example.com/{}", "a/".repeat(2_000));
        let host = "cdn.example.com";
        let started = std::time::Instant::now();

        let stacked = Pattern::Substring("/a*a*a*a*a*a*a*a*a*a*a*a*b".into());
        assert!(!stacked.matches(&url, host));
        let anchored = Pattern::Anchored("https://*a*a*a*a*a*a*a*a*b".into());
        assert!(!anchored.matches(&url, host));
        let hosted = Pattern::host(host, "/*a*a*a*a*a*a*a*a*b");
        assert!(!hosted.matches(&url, host));

        assert!(started.elapsed() < std::time::Duration::from_millis(500));

        let ending = format!("{url}b");
        assert!(stacked.matches(&ending, host));
    }

    #[test]
    fn should_handle_literal_and_edge_patterns() {
        assert!(Pattern::Substring(String::new()).matches("http://a.com/", "a.com"));
        assert!(Pattern::Substring("/ads/".into()).matches("http://a.com/x/ads/1", "a.com"));
        assert!(!Pattern::Substring("/ads/".into()).matches("http://a.com/ads", "a.com"));
        assert!(Pattern::Substring("a|b".into()).matches("http://x.com/a|b", "x.com"));
        assert!(Pattern::Substring("*".into()).matches("", ""));
        assert!(Pattern::Substring("^ads^".into()).matches("http://x.com/ads?", "x.com"));
    }

    #[test]
    fn should_display_pattern_text() {
        assert_eq!(Pattern::host("malware.biz", "").to_string(), "malware.biz");
        assert_eq!(Pattern::host("a.com", "/x").to_string(), "a.com/x");
        assert_eq!(Pattern::Anchored("http://a".into()).to_string(), "|http://a");
    }

    #[test]
    fn should_prefer_longer_patterns() {
        assert!(
            Pattern::host("ads.example.com", "/x").specificity()
                > Pattern::host("example.com", "").specificity()
        );
    }
}
