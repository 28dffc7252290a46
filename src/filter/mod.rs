//! Filter model, parsing, sanitizing and per-category storage.
//!
//! A filter list line is parsed into a [`FilterEntry`] filed under a
//! [`FilterTag`]. Active tags map one-to-one onto the [`FilterCategory`]
//! containers consulted at dispatch time; `BadFilter` tags only live long
//! enough to cancel their counterparts during a rebuild.
//!
//! # Example
//!
//! ```
//! use netsieve::filter::{AbpParser, FilterCategory, FilterParser, FilterTag};
//! use std::io::BufReader;
//!
//! let content = "||ads.example.com^$image\n@@||ads.example.com/ok.png";
//! let filters = AbpParser.parse(&mut BufReader::new(content.as_bytes())).unwrap();
//! assert_eq!(filters[0].tag, FilterTag::Active(FilterCategory::Deny));
//! assert_eq!(filters[1].tag, FilterTag::Active(FilterCategory::Allow));
//! ```

mod parser;
mod pattern;
pub mod sanitize;
pub mod store;

use std::collections::BTreeMap;
use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

pub use parser::{AbpParser, FilterParser, ParseError, ParsedFilter};
pub use pattern::Pattern;
pub use store::{CategorySet, FilterContainer, FilterStore};

use crate::request::ContentRequest;

/// The categories a filter can be stored under at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FilterCategory {
    Allow,
    Deny,
    Modify,
    ModifyException,
    Important,
    ImportantAllow,
    Redirect,
    RedirectException,
}

impl FilterCategory {
    /// Every category, in on-disk tag order.
    pub const ALL: [Self; 8] = [
        Self::Allow,
        Self::Deny,
        Self::Modify,
        Self::ModifyException,
        Self::Important,
        Self::ImportantAllow,
        Self::Redirect,
        Self::RedirectException,
    ];

    /// Stable name, used for joint file names and metric labels.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Modify => "modify",
            Self::ModifyException => "modify_exception",
            Self::Important => "important",
            Self::ImportantAllow => "important_allow",
            Self::Redirect => "redirect",
            Self::RedirectException => "redirect_exception",
        }
    }

    /// On-disk tag byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Allow => 0,
            Self::Deny => 1,
            Self::Modify => 2,
            Self::ModifyException => 3,
            Self::Important => 4,
            Self::ImportantAllow => 5,
            Self::Redirect => 6,
            Self::RedirectException => 7,
        }
    }

    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Allow),
            1 => Some(Self::Deny),
            2 => Some(Self::Modify),
            3 => Some(Self::ModifyException),
            4 => Some(Self::Important),
            5 => Some(Self::ImportantAllow),
            6 => Some(Self::Redirect),
            7 => Some(Self::RedirectException),
            _ => None,
        }
    }

    /// Whether entries of this category carry a [`ModifyAction`] payload.
    #[must_use]
    pub const fn carries_action(self) -> bool {
        matches!(self, Self::Modify | Self::Redirect)
    }
}

impl fmt::Display for FilterCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The tag a parsed filter is filed under while a list is being loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterTag {
    Active(FilterCategory),
    /// A `$badfilter` cancelling an exact counterpart in the given category.
    BadFilter(FilterCategory),
}

impl FilterTag {
    #[must_use]
    pub const fn category(self) -> FilterCategory {
        match self {
            Self::Active(category) | Self::BadFilter(category) => category,
        }
    }
}

/// Resource type of a request, as used for content-type filter options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Other,
    Script,
    Image,
    Stylesheet,
    Object,
    SubDocument,
    XmlHttpRequest,
    Media,
    Font,
    WebSocket,
    Document,
    All,
}

impl ContentType {
    #[must_use]
    pub const fn mask(self) -> ContentTypes {
        match self {
            Self::Other => ContentTypes::OTHER,
            Self::Script => ContentTypes::SCRIPT,
            Self::Image => ContentTypes::IMAGE,
            Self::Stylesheet => ContentTypes::STYLESHEET,
            Self::Object => ContentTypes::OBJECT,
            Self::SubDocument => ContentTypes::SUBDOCUMENT,
            Self::XmlHttpRequest => ContentTypes::XMLHTTPREQUEST,
            Self::Media => ContentTypes::MEDIA,
            Self::Font => ContentTypes::FONT,
            Self::WebSocket => ContentTypes::WEBSOCKET,
            Self::Document => ContentTypes::DOCUMENT,
            Self::All => ContentTypes::all(),
        }
    }

    /// Maps an ABP option name onto a content type.
    #[must_use]
    pub fn from_option(name: &str) -> Option<Self> {
        let content_type = match name {
            "other" => Self::Other,
            "script" => Self::Script,
            "image" => Self::Image,
            "stylesheet" | "css" => Self::Stylesheet,
            "object" => Self::Object,
            "subdocument" | "frame" => Self::SubDocument,
            "xmlhttprequest" | "xhr" => Self::XmlHttpRequest,
            "media" => Self::Media,
            "font" => Self::Font,
            "websocket" => Self::WebSocket,
            "document" | "doc" => Self::Document,
            _ => return None,
        };
        Some(content_type)
    }
}

bitflags! {
    /// Set of content types a filter applies to.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ContentTypes: u16 {
        const OTHER = 1;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;
        const XMLHTTPREQUEST = 1 << 6;
        const MEDIA = 1 << 7;
        const FONT = 1 << 8;
        const WEBSOCKET = 1 << 9;
        const DOCUMENT = 1 << 10;
    }
}

/// Which side of the first/third-party split a filter applies to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThirdPartyMode {
    #[default]
    Either,
    FirstPartyOnly,
    ThirdPartyOnly,
}

impl ThirdPartyMode {
    #[must_use]
    pub const fn admits(self, third_party: bool) -> bool {
        match self {
            Self::Either => true,
            Self::FirstPartyOnly => !third_party,
            Self::ThirdPartyOnly => third_party,
        }
    }
}

/// Rewrite instructions carried by `Modify` and `Redirect` filters.
///
/// For `Redirect` filters `destination` names a bundled resource; for
/// `Modify` filters it is the rewritten URL (or `None` to keep the original).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModifyAction {
    pub destination: Option<String>,
    pub set_request_headers: Vec<(String, String)>,
    pub remove_request_headers: Vec<String>,
    pub add_response_headers: Vec<(String, String)>,
    pub remove_response_headers: Vec<String>,
}

impl ModifyAction {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destination.is_none()
            && self.set_request_headers.is_empty()
            && self.remove_request_headers.is_empty()
            && self.add_response_headers.is_empty()
            && self.remove_response_headers.is_empty()
    }
}

/// A single parsed filter. Immutable once added to a container.
///
/// Equality is structural over every field, which is what `$badfilter`
/// cancellation relies on. The action payload is not part of the serde
/// representation: joint files write it as a separate record section.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterEntry {
    pub pattern: Pattern,
    pub content_types: ContentTypes,
    /// Page domain restrictions: `true` includes, `false` excludes.
    pub domains: BTreeMap<String, bool>,
    pub third_party: ThirdPartyMode,
    #[serde(skip)]
    pub action: Option<ModifyAction>,
}

impl FilterEntry {
    /// A filter for `pattern` applying to every request.
    #[must_use]
    pub fn new(pattern: Pattern) -> Self {
        Self {
            pattern,
            content_types: ContentTypes::all(),
            domains: BTreeMap::new(),
            third_party: ThirdPartyMode::Either,
            action: None,
        }
    }

    #[must_use]
    pub fn with_content_types(mut self, content_types: ContentTypes) -> Self {
        self.content_types = content_types;
        self
    }

    #[must_use]
    pub fn with_third_party(mut self, mode: ThirdPartyMode) -> Self {
        self.third_party = mode;
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>, include: bool) -> Self {
        self.domains.insert(domain.into(), include);
        self
    }

    #[must_use]
    pub fn with_action(mut self, action: ModifyAction) -> Self {
        self.action = Some(action);
        self
    }

    /// Whether this filter applies to `request`.
    #[must_use]
    pub fn matches(&self, request: &ContentRequest) -> bool {
        if request.content_type != ContentType::All
            && !self.content_types.intersects(request.content_type.mask())
        {
            return false;
        }
        if !self
            .third_party
            .admits(request.third_party_status.is_third_party())
        {
            return false;
        }
        if !self.admits_page(request.page_host.as_deref()) {
            return false;
        }
        self.pattern.matches(request.match_url(), &request.host)
    }

    /// Applies the `domain=` restriction: the most specific listed domain
    /// covering the page decides, otherwise the filter applies only when it
    /// has no include entries.
    fn admits_page(&self, page_host: Option<&str>) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let has_includes = self.domains.values().any(|include| *include);
        let Some(mut candidate) = page_host else {
            return !has_includes;
        };
        loop {
            if let Some(include) = self.domains.get(candidate) {
                return *include;
            }
            match candidate.find('.') {
                Some(idx) => candidate = &candidate[idx + 1..],
                None => return !has_includes,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ThirdPartyStatus;

    fn request(url: &str, page: Option<&str>, content_type: ContentType) -> ContentRequest {
        ContentRequest::for_test(url, page, content_type, ThirdPartyStatus::ThirdParty)
    }

    #[test]
    fn should_round_trip_category_tag_bytes() {
        for category in FilterCategory::ALL {
            assert_eq!(FilterCategory::from_u8(category.as_u8()), Some(category));
        }
        assert_eq!(FilterCategory::from_u8(8), None);
    }

    #[test]
    fn should_only_carry_actions_for_modify_and_redirect() {
        let carrying: Vec<_> = FilterCategory::ALL
            .into_iter()
            .filter(|c| c.carries_action())
            .collect();
        assert_eq!(carrying, vec![FilterCategory::Modify, FilterCategory::Redirect]);
    }

    #[test]
    fn should_respect_content_type_mask() {
        let entry = FilterEntry::new(Pattern::host("ads.example.com", ""))
            .with_content_types(ContentTypes::IMAGE);

        assert!(entry.matches(&request(
            "http://ads.example.com/a.png",
            Some("example.com"),
            ContentType::Image
        )));
        assert!(!entry.matches(&request(
            "http://ads.example.com/a.js",
            Some("example.com"),
            ContentType::Script
        )));
    }

    #[test]
    fn should_respect_third_party_mode() {
        let entry = FilterEntry::new(Pattern::host("cdn.example.com", ""))
            .with_third_party(ThirdPartyMode::ThirdPartyOnly);
        let mut req = request("https://cdn.example.com/x.js", Some("news.org"), ContentType::Script);
        assert!(entry.matches(&req));

        req.third_party_status = ThirdPartyStatus::FirstParty;
        assert!(!entry.matches(&req));
    }

    #[test]
    fn should_apply_most_specific_domain_restriction() {
        let entry = FilterEntry::new(Pattern::host("tracker.net", ""))
            .with_domain("example.com", true)
            .with_domain("safe.example.com", false);

        let url = "https://tracker.net/t.gif";
        assert!(entry.matches(&request(url, Some("www.example.com"), ContentType::Image)));
        assert!(!entry.matches(&request(url, Some("safe.example.com"), ContentType::Image)));
        assert!(!entry.matches(&request(url, Some("other.org"), ContentType::Image)));
        assert!(!entry.matches(&request(url, None, ContentType::Image)));
    }

    #[test]
    fn should_apply_exclude_only_domain_restriction() {
        let entry = FilterEntry::new(Pattern::host("tracker.net", "")).with_domain("example.com", false);
        let url = "https://tracker.net/t.gif";

        assert!(!entry.matches(&request(url, Some("example.com"), ContentType::Image)));
        assert!(entry.matches(&request(url, Some("other.org"), ContentType::Image)));
        assert!(entry.matches(&request(url, None, ContentType::Image)));
    }

    #[test]
    fn should_compare_filters_structurally() {
        let a = FilterEntry::new(Pattern::host("ads.example.com", "")).with_domain("a.com", true);
        let b = FilterEntry::new(Pattern::host("ads.example.com", "")).with_domain("a.com", true);
        let c = FilterEntry::new(Pattern::host("ads.example.com", "")).with_domain("b.com", true);

        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
