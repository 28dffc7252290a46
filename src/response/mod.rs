//! Substitute responses handed back to the page-rendering layer.

pub mod modify;
pub mod resources;
pub mod synth;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

pub use modify::ModifyExecutor;
pub use resources::{Resource, ResourceLibrary};
pub use synth::ResponseSynthesizer;

/// A response served in place of the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptResult {
    pub status: StatusCode,
    pub reason_phrase: String,
    pub mime_type: String,
    pub charset: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptResult {
    /// A `200 OK` response with the given body.
    #[must_use]
    pub fn ok(mime_type: impl Into<String>, charset: Option<&str>, body: Bytes) -> Self {
        Self {
            status: StatusCode::OK,
            reason_phrase: "OK".into(),
            mime_type: mime_type.into(),
            charset: charset.map(str::to_string),
            headers: HeaderMap::new(),
            body,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: http::header::HeaderName, value: http::HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}
