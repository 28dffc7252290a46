//! Turns block decisions into substitute responses.

use bytes::Bytes;
use http::header::{CACHE_CONTROL, HeaderValue};

use super::resources::{NOOP_HTML, NOOP_JS, ResourceLibrary, SILENT_MP3, TRANSPARENT_GIF};
use super::InterceptResult;
use crate::config::Theme;
use crate::dispatch::{BlockSource, Decision};
use crate::filter::{ContentType, FilterCategory};
use crate::request::ContentRequest;

const USER_RULE_REASON: &str = "This page was blocked by one of your own rules.";
const MALWARE_REASON: &str =
    "This page appears on a list of known malicious or deceptive sites and was blocked to protect you.";
const AD_REASON: &str = "This page appears on an ad and tracker blocking list.";

/// Builds the responses served for `Block` and `BlockResource` decisions.
#[derive(Debug, Clone)]
pub struct ResponseSynthesizer {
    theme: Theme,
    resources: ResourceLibrary,
}

impl ResponseSynthesizer {
    #[must_use]
    pub const fn new(theme: Theme, resources: ResourceLibrary) -> Self {
        Self { theme, resources }
    }

    /// The response to serve for `decision`, or `None` to let the request
    /// proceed.
    #[must_use]
    pub fn synthesize(
        &self,
        decision: &Decision,
        request: &ContentRequest,
    ) -> Option<InterceptResult> {
        match decision {
            Decision::None | Decision::Modify(_) => None,
            Decision::Block { source, pattern } if request.is_main_frame => {
                Some(self.block_page(request.url.as_str(), pattern, *source))
            }
            Decision::Block { .. } => Some(stub_for(request.content_type)),
            Decision::BlockResource { resource_name } => {
                let Some(resource) = self.resources.get(resource_name) else {
                    tracing::warn!(name = ?resource_name, "unknown redirect resource, serving stub");
                    return Some(stub_for(request.content_type));
                };
                Some(InterceptResult::ok(resource.mime_type, None, resource.body))
            }
        }
    }

    fn block_page(&self, url: &str, pattern: &str, source: BlockSource) -> InterceptResult {
        let reason = match source {
            BlockSource::UserRule => USER_RULE_REASON,
            BlockSource::List(FilterCategory::Important) => MALWARE_REASON,
            BlockSource::List(FilterCategory::Deny) => AD_REASON,
            BlockSource::List(category) => {
                tracing::warn!(category = %category, "unexpected category for blocked page");
                AD_REASON
            }
        };

        let Theme {
            background,
            foreground,
            accent,
        } = &self.theme;
        let url = escape_html(url);
        let pattern = escape_html(pattern);
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Page blocked</title>
<style>
body {{ background: {background}; color: {foreground}; font-family: sans-serif; margin: 2em; }}
h1 {{ color: {accent}; }}
code {{ word-break: break-all; }}
</style>
</head>
<body>
<h1>Page blocked</h1>
<p>{reason}</p>
<p>Address: <code>{url}</code></p>
<p>Matched filter: <code>{pattern}</code></p>
</body>
</html>
"#
        );

        InterceptResult::ok("text/html", Some("utf-8"), Bytes::from(html))
            .with_header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
    }
}

/// Stub body for a blocked sub-resource.
fn stub_for(content_type: ContentType) -> InterceptResult {
    match content_type {
        ContentType::Image => {
            InterceptResult::ok("image/gif", None, Bytes::from_static(TRANSPARENT_GIF))
        }
        ContentType::Script => InterceptResult::ok(
            "application/javascript",
            Some("utf-8"),
            Bytes::from_static(NOOP_JS.as_bytes()),
        ),
        ContentType::SubDocument => InterceptResult::ok(
            "text/html",
            Some("utf-8"),
            Bytes::from_static(NOOP_HTML.as_bytes()),
        ),
        ContentType::Media => {
            InterceptResult::ok("audio/mpeg", None, Bytes::from_static(&SILENT_MP3))
        }
        _ => InterceptResult::ok("text/plain", None, Bytes::new()),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
