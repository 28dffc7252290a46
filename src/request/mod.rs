//! Request normalization.
//!
//! The page-rendering layer hands over a raw [`WebRequest`] plus the URL of
//! the page issuing it; [`ContentRequestBuilder`] turns that pair into the
//! [`ContentRequest`] the dispatcher works on.

pub mod third_party;

use std::sync::Arc;

use http::header::{ACCEPT, HeaderMap};
use http::Method;
use url::Url;

pub use third_party::{PublicSuffixComparator, SiteComparator, ThirdPartyClassifier};

use crate::filter::ContentType;

/// A request as issued by the page-rendering layer.
#[derive(Debug, Clone)]
pub struct WebRequest {
    pub url: String,
    pub is_main_frame: bool,
    pub headers: HeaderMap,
    pub method: Method,
}

impl WebRequest {
    /// A `GET` request without headers.
    #[must_use]
    pub fn get(url: impl Into<String>, is_main_frame: bool) -> Self {
        Self {
            url: url.into(),
            is_main_frame,
            headers: HeaderMap::new(),
            method: Method::GET,
        }
    }
}

/// Relationship between the request host and the page host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThirdPartyStatus {
    /// The hosts are identical.
    StrictFirstParty,
    /// Different hosts sharing a registrable domain.
    FirstParty,
    ThirdParty,
}

impl ThirdPartyStatus {
    #[must_use]
    pub const fn is_third_party(self) -> bool {
        matches!(self, Self::ThirdParty)
    }
}

/// A normalized request, created per lookup and never persisted.
#[derive(Debug, Clone)]
pub struct ContentRequest {
    pub url: Url,
    /// Lowercase host of `url`.
    pub host: String,
    pub page_host: Option<String>,
    pub content_type: ContentType,
    pub third_party_status: ThirdPartyStatus,
    pub headers: HeaderMap,
    pub method: Method,
    pub is_main_frame: bool,
    /// Scoping keys for user rules: the page host, then the global tag `""`.
    pub tags: Vec<String>,
    match_url: String,
}

impl ContentRequest {
    /// The lowercased URL filters are matched against.
    #[must_use]
    pub fn match_url(&self) -> &str {
        &self.match_url
    }

    #[cfg(test)]
    pub(crate) fn for_test(
        url: &str,
        page_host: Option<&str>,
        content_type: ContentType,
        third_party_status: ThirdPartyStatus,
    ) -> Self {
        let url = Url::parse(url).unwrap();
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        Self {
            match_url: url.as_str().to_ascii_lowercase(),
            tags: page_host
                .map(str::to_string)
                .into_iter()
                .chain([String::new()])
                .collect(),
            url,
            host,
            page_host: page_host.map(str::to_string),
            content_type,
            third_party_status,
            headers: HeaderMap::new(),
            method: Method::GET,
            is_main_frame: false,
        }
    }
}

/// Builds [`ContentRequest`]s, classifying content type and party status.
#[derive(Clone)]
pub struct ContentRequestBuilder {
    classifier: Arc<ThirdPartyClassifier>,
}

impl ContentRequestBuilder {
    #[must_use]
    pub const fn new(classifier: Arc<ThirdPartyClassifier>) -> Self {
        Self { classifier }
    }

    /// Normalize `request` issued from the page at `page_url`.
    ///
    /// Returns `None` when the request URL has no host (e.g. `data:` URLs),
    /// in which case the request is not subject to filtering.
    #[must_use]
    pub fn build(&self, request: &WebRequest, page_url: &str) -> Option<ContentRequest> {
        let url = Url::parse(&request.url).ok()?;
        let host = url.host_str()?.to_ascii_lowercase();

        let page_host = if request.is_main_frame {
            Some(host.clone())
        } else {
            Url::parse(page_url)
                .ok()
                .and_then(|page| page.host_str().map(str::to_ascii_lowercase))
        };

        let third_party_status = match page_host.as_deref() {
            Some(page) => self.classifier.classify(&host, page),
            None => ThirdPartyStatus::FirstParty,
        };

        let content_type = infer_content_type(&url, &request.headers, request.is_main_frame);

        let tags = page_host
            .iter()
            .cloned()
            .chain([String::new()])
            .collect();

        Some(ContentRequest {
            match_url: url.as_str().to_ascii_lowercase(),
            url,
            host,
            page_host,
            content_type,
            third_party_status,
            headers: request.headers.clone(),
            method: request.method.clone(),
            is_main_frame: request.is_main_frame,
            tags,
        })
    }
}

/// Guess the resource type from the URL, `Accept` header and frame flag.
#[must_use]
pub fn infer_content_type(url: &Url, headers: &HeaderMap, is_main_frame: bool) -> ContentType {
    if is_main_frame {
        return ContentType::Document;
    }
    if matches!(url.scheme(), "ws" | "wss") {
        return ContentType::WebSocket;
    }
    if headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("xmlhttprequest"))
    {
        return ContentType::XmlHttpRequest;
    }

    let extension = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());

    if let Some(content_type) = extension.as_deref().and_then(content_type_for_extension) {
        return content_type;
    }

    let accept = headers
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if accept.starts_with("image/") {
        ContentType::Image
    } else if accept.starts_with("text/css") {
        ContentType::Stylesheet
    } else if accept.starts_with("text/html") {
        ContentType::SubDocument
    } else if accept.starts_with("audio/") || accept.starts_with("video/") {
        ContentType::Media
    } else {
        ContentType::Other
    }
}

fn content_type_for_extension(extension: &str) -> Option<ContentType> {
    let content_type = match extension {
        "js" | "mjs" => ContentType::Script,
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "svg" | "ico" | "bmp" | "avif" => {
            ContentType::Image
        }
        "css" => ContentType::Stylesheet,
        "mp4" | "webm" | "mp3" | "ogg" | "wav" | "m4a" | "m3u8" | "aac" => ContentType::Media,
        "woff" | "woff2" | "ttf" | "otf" | "eot" => ContentType::Font,
        "html" | "htm" => ContentType::SubDocument,
        "swf" => ContentType::Object,
        _ => return None,
    };
    Some(content_type)
}
