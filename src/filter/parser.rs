//! `AdBlock` Plus filter syntax parser.
//!
//! Parses the network-filter subset of ABP syntax into [`FilterEntry`]
//! values filed under their [`FilterTag`]. Cosmetic filters are skipped.

use std::io::BufRead;

use super::{
    ContentType, ContentTypes, FilterCategory, FilterEntry, FilterTag, ModifyAction, Pattern,
    ThirdPartyMode,
};

/// Error type for filter list parsing operations.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// I/O error during reading.
    #[error("I/O error")]
    Io(#[from] std::io::Error),
}

/// A filter together with the tag it is filed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilter {
    pub tag: FilterTag,
    pub entry: FilterEntry,
}

/// Trait for filter list parsers.
pub trait FilterParser: Send + Sync {
    /// Parse list content into tagged filters.
    ///
    /// Lines that are not network filters, or that use unsupported options,
    /// are skipped rather than reported.
    ///
    /// # Errors
    ///
    /// Returns a [`ParseError`] if reading fails.
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<ParsedFilter>, ParseError>;
}

/// Parser for `AdBlock` filter syntax.
///
/// # Supported Syntax
///
/// - `||domain.com^`, `||domain.com/path` - host-anchored filters
/// - `|http://...` - start-anchored filters, plain substrings with `*` and `^`
/// - `@@` exceptions
/// - Options: `third-party`, `~third-party`, content types (and `~` negations),
///   `domain=`, `important`, `badfilter`, `match-case`, `redirect=`,
///   `rewrite=`, `requestheader=`, `removerequestheader=`, `responseheader=`,
///   `removeheader=`
///
/// # Ignored
///
/// - Comments (`!`) and list headers (`[Adblock Plus 2.0]`)
/// - Element hiding rules (`##`, `#@#`, `#?#`, `#$#`)
/// - Regular expression filters (`/.../`)
/// - Filters carrying any other option
#[derive(Debug, Clone, Copy, Default)]
pub struct AbpParser;

impl FilterParser for AbpParser {
    fn parse(&self, reader: &mut dyn BufRead) -> Result<Vec<ParsedFilter>, ParseError> {
        let mut filters = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line)?;
            if bytes_read == 0 {
                break;
            }

            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('!') || trimmed.starts_with('[') {
                continue;
            }

            if is_cosmetic(trimmed) {
                continue;
            }

            if let Some(filter) = parse_filter(trimmed) {
                filters.push(filter);
            } else {
                tracing::trace!(line = trimmed, "skipping unsupported filter");
            }
        }

        Ok(filters)
    }
}

fn is_cosmetic(rule: &str) -> bool {
    rule.contains("##") || rule.contains("#@#") || rule.contains("#?#") || rule.contains("#$#")
}

#[derive(Default)]
struct Options {
    include_types: ContentTypes,
    exclude_types: ContentTypes,
    third_party: ThirdPartyMode,
    domains: Vec<(String, bool)>,
    important: bool,
    badfilter: bool,
    redirect: Option<String>,
    modify: ModifyAction,
}

/// Parse a single network filter line.
fn parse_filter(rule: &str) -> Option<ParsedFilter> {
    let (exception, rule) = match rule.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, rule),
    };

    let (pattern_text, options) = match rule.rfind('$') {
        Some(idx) if idx + 1 < rule.len() => (&rule[..idx], parse_options(&rule[idx + 1..])?),
        _ => (rule, Options::default()),
    };

    let pattern = parse_pattern(pattern_text)?;
    let category = categorize(exception, &options);

    let content_types = if options.include_types.is_empty() {
        ContentTypes::all().difference(options.exclude_types)
    } else {
        options.include_types.difference(options.exclude_types)
    };
    if content_types.is_empty() {
        return None;
    }

    let mut entry = FilterEntry::new(pattern)
        .with_content_types(content_types)
        .with_third_party(options.third_party);
    for (domain, include) in options.domains {
        entry = entry.with_domain(domain, include);
    }

    if category.carries_action() {
        let action = match category {
            FilterCategory::Redirect => ModifyAction {
                destination: options.redirect,
                ..ModifyAction::default()
            },
            _ => options.modify,
        };
        entry = entry.with_action(action);
    }

    let tag = if options.badfilter {
        FilterTag::BadFilter(category)
    } else {
        FilterTag::Active(category)
    };

    Some(ParsedFilter { tag, entry })
}

fn categorize(exception: bool, options: &Options) -> FilterCategory {
    let modifies = !options.modify.is_empty();
    match (exception, options.important, options.redirect.is_some(), modifies) {
        (true, true, _, _) => FilterCategory::ImportantAllow,
        (true, false, true, _) => FilterCategory::RedirectException,
        (true, false, false, true) => FilterCategory::ModifyException,
        (true, false, false, false) => FilterCategory::Allow,
        (false, _, true, _) => FilterCategory::Redirect,
        (false, _, false, true) => FilterCategory::Modify,
        (false, true, false, false) => FilterCategory::Important,
        (false, false, false, false) => FilterCategory::Deny,
    }
}

/// Parse the comma-separated option list. Returns `None` when an
/// unsupported option is present, which drops the whole filter.
fn parse_options(raw: &str) -> Option<Options> {
    let mut options = Options::default();

    for option in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        let (name, value) = match option.split_once('=') {
            Some((name, value)) => (name.to_ascii_lowercase(), Some(value)),
            None => (option.to_ascii_lowercase(), None),
        };

        match (name.as_str(), value) {
            ("third-party" | "3p" | "~first-party" | "~1p", None) => {
                options.third_party = ThirdPartyMode::ThirdPartyOnly;
            }
            ("~third-party" | "~3p" | "first-party" | "1p", None) => {
                options.third_party = ThirdPartyMode::FirstPartyOnly;
            }
            ("important", None) => options.important = true,
            ("badfilter", None) => options.badfilter = true,
            ("match-case", None) => {}
            ("domain", Some(value)) => {
                for domain in value.split('|').filter(|d| !d.is_empty()) {
                    match domain.strip_prefix('~') {
                        Some(excluded) => {
                            options.domains.push((excluded.to_ascii_lowercase(), false));
                        }
                        None => options.domains.push((domain.to_ascii_lowercase(), true)),
                    }
                }
            }
            ("redirect" | "redirect-rule", Some(value)) if !value.is_empty() => {
                options.redirect = Some(value.to_string());
            }
            ("rewrite", Some(value)) if !value.is_empty() => {
                options.modify.destination = Some(value.to_string());
            }
            ("requestheader", Some(value)) => {
                options.modify.set_request_headers.push(split_header(value)?);
            }
            ("removerequestheader", Some(value)) if !value.is_empty() => {
                options.modify.remove_request_headers.push(value.to_string());
            }
            ("responseheader", Some(value)) => {
                options.modify.add_response_headers.push(split_header(value)?);
            }
            ("removeheader", Some(value)) if !value.is_empty() => {
                options.modify.remove_response_headers.push(value.to_string());
            }
            (type_name, None) => {
                let (negated, type_name) = match type_name.strip_prefix('~') {
                    Some(rest) => (true, rest),
                    None => (false, type_name),
                };
                let content_type = ContentType::from_option(type_name)?;
                if negated {
                    options.exclude_types |= content_type.mask();
                } else {
                    options.include_types |= content_type.mask();
                }
            }
            _ => return None,
        }
    }

    Some(options)
}

fn split_header(value: &str) -> Option<(String, String)> {
    let (name, header_value) = value.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), header_value.trim().to_string()))
}

/// Parse the pattern part of a filter.
fn parse_pattern(raw: &str) -> Option<Pattern> {
    // Regular expression filters are not supported.
    if raw.len() > 1 && raw.starts_with('/') && raw.ends_with('/') {
        return None;
    }

    let raw = raw.to_ascii_lowercase();

    if let Some(rest) = raw.strip_prefix("||") {
        let host_end = rest.find(['^', '/', '*', '|', ':', '?']).unwrap_or(rest.len());
        let host = &rest[..host_end];
        if host.is_empty() || !host.contains('.') {
            return None;
        }
        let path = rest[host_end..].trim_end_matches(['^', '|']);
        return Some(Pattern::host(host, path));
    }

    if let Some(rest) = raw.strip_prefix('|') {
        if rest.is_empty() {
            return None;
        }
        return Some(Pattern::Anchored(rest.to_string()));
    }

    let trimmed = raw.trim_matches('*');
    if trimmed.is_empty() {
        return None;
    }
    Some(Pattern::Substring(trimmed.to_string()))
}
