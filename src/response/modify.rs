//! Re-issues rewritten requests and hands the answer back to the page.
//!
//! Every failure here falls open: the caller gets `None` and the original
//! request proceeds as if no modify filter had matched.

use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::Method;
use reqwest::cookie::Jar;
use reqwest::Client;

use super::InterceptResult;
use crate::blocklist::remote::USER_AGENT;
use crate::config::ModifySettings;
use crate::dispatch::ModifyRequest;
use crate::request::ContentRequest;

#[derive(Debug, thiserror::Error)]
pub enum ModifyError {
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Issues [`ModifyRequest`]s, sharing one cookie jar across requests.
#[derive(Debug, Clone)]
pub struct ModifyExecutor {
    client: Client,
    settings: ModifySettings,
}

impl ModifyExecutor {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        settings: ModifySettings,
        timeout: Duration,
        cookies: Arc<Jar>,
    ) -> Result<Self, ModifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .cookie_provider(cookies)
            .gzip(true)
            .build()
            .map_err(ModifyError::ClientBuild)?;

        Ok(Self { client, settings })
    }

    /// Whether `modify` may be issued on behalf of `original` at all.
    #[must_use]
    pub fn accepts(&self, modify: &ModifyRequest, original: &ContentRequest) -> bool {
        if !self.settings.enabled {
            return false;
        }
        if self.settings.sub_resources_only && original.is_main_frame {
            return false;
        }
        if [Method::POST, Method::PUT, Method::PATCH, Method::DELETE].contains(&modify.method) {
            return false;
        }
        matches!(modify.url.scheme(), "http" | "https" | "ws" | "wss")
    }

    /// Issue `modify` and return the response to serve, or `None` to let the
    /// original request proceed.
    pub async fn execute(
        &self,
        modify: &ModifyRequest,
        original: &ContentRequest,
    ) -> Option<InterceptResult> {
        if !self.accepts(modify, original) {
            tracing::debug!(
                url = %modify.url,
                method = %modify.method,
                "modify request not eligible, passing through"
            );
            return None;
        }

        match self.send(modify).await {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(url = %modify.url, error = %err, "modify request failed, passing through");
                crate::metrics::record_modify_failure();
                None
            }
        }
    }

    async fn send(&self, modify: &ModifyRequest) -> Result<InterceptResult, ModifyError> {
        let mut url = modify.url.clone();
        // The upgrade handshake is a plain HTTP GET.
        let scheme = match url.scheme() {
            "ws" => Some("http"),
            "wss" => Some("https"),
            _ => None,
        };
        if let Some(scheme) = scheme {
            let _ = url.set_scheme(scheme);
        }

        let response = self
            .client
            .request(modify.method.clone(), url.clone())
            .headers(modify.headers.clone())
            .send()
            .await
            .map_err(|source| ModifyError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let mut headers = response.headers().clone();
        let body = response.bytes().await.map_err(|source| ModifyError::Body {
            url: url.to_string(),
            source,
        })?;

        edit_response_headers(
            &mut headers,
            &modify.remove_response_headers,
            &modify.add_response_headers,
        );
        let (mime_type, charset) = split_content_type(&headers);

        Ok(InterceptResult {
            status,
            reason_phrase: status.canonical_reason().unwrap_or_default().to_string(),
            mime_type,
            charset,
            headers,
            body,
        })
    }
}

fn edit_response_headers(headers: &mut HeaderMap, remove: &[String], add: &[(String, String)]) {
    for name in remove {
        headers.remove(name.as_str());
    }
    for (name, value) in add {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid response header edit"),
        }
    }
}

/// MIME type and charset from the `Content-Type` header.
fn split_content_type(headers: &HeaderMap) -> (String, Option<String>) {
    let Some(value) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return ("application/octet-stream".into(), None);
    };

    let mut parts = value.split(';');
    let mime_type = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
    let charset = parts.find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    });
    (mime_type, charset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ContentType;
    use crate::request::ThirdPartyStatus;
    use url::Url;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor(settings: ModifySettings) -> ModifyExecutor {
        ModifyExecutor::new(settings, Duration::from_secs(5), Arc::new(Jar::default())).unwrap()
    }

    fn original(main_frame: bool) -> ContentRequest {
        let mut request = ContentRequest::for_test(
            "http://tracker.example.com/pixel",
            Some("example.com"),
            ContentType::Image,
            ThirdPartyStatus::ThirdParty,
        );
        request.is_main_frame = main_frame;
        request
    }

    fn modify(url: &str, method: Method) -> ModifyRequest {
        let mut headers = HeaderMap::new();
        headers.insert("dnt", HeaderValue::from_static("1"));
        ModifyRequest {
            url: Url::parse(url).unwrap(),
            method,
            headers,
            add_response_headers: vec![("x-filtered".into(), "yes".into())],
            remove_response_headers: vec!["set-cookie".into()],
        }
    }

    #[tokio::test]
    async fn should_issue_rewritten_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/clean"))
            .and(header("dnt", "1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/plain; charset=UTF-8")
                    .insert_header("set-cookie", "id=1")
                    .set_body_string("clean"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let result = executor(ModifySettings::default())
            .execute(
                &modify(&format!("{}/clean", server.uri()), Method::GET),
                &original(false),
            )
            .await
            .unwrap();

        assert_eq!(result.status, http::StatusCode::OK);
        assert_eq!(result.reason_phrase, "OK");
        assert_eq!(result.mime_type, "text/plain");
        assert_eq!(result.charset.as_deref(), Some("UTF-8"));
        assert_eq!(result.body, bytes::Bytes::from_static(b"clean"));
        assert_eq!(result.headers["x-filtered"], "yes");
        assert!(result.headers.get("set-cookie").is_none());
    }

    #[tokio::test]
    async fn should_never_reissue_body_methods() {
        let server = MockServer::start().await;
        Mock::given(path("/submit"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let exec = executor(ModifySettings::default());
        for verb in [Method::POST, Method::PUT, Method::PATCH, Method::DELETE] {
            let request = modify(&format!("{}/submit", server.uri()), verb);
            assert!(exec.execute(&request, &original(false)).await.is_none());
        }
    }

    #[tokio::test]
    async fn should_fail_open_on_network_error() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let result = executor(ModifySettings::default())
            .execute(&modify(&format!("{uri}/gone"), Method::GET), &original(false))
            .await;

        assert!(result.is_none());
    }

    #[test]
    fn should_respect_settings_and_scheme() {
        let request = modify("https://example.com/a", Method::GET);

        let disabled = executor(ModifySettings {
            enabled: false,
            sub_resources_only: false,
        });
        assert!(!disabled.accepts(&request, &original(false)));

        let sub_only = executor(ModifySettings {
            enabled: true,
            sub_resources_only: true,
        });
        assert!(!sub_only.accepts(&request, &original(true)));
        assert!(sub_only.accepts(&request, &original(false)));

        let exec = executor(ModifySettings::default());
        assert!(exec.accepts(&modify("wss://example.com/socket", Method::GET), &original(false)));
        assert!(!exec.accepts(&modify("ftp://example.com/file", Method::GET), &original(false)));
        assert!(!exec.accepts(&modify("data:text/plain,hi", Method::GET), &original(false)));
    }

    #[test]
    fn test_split_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            split_content_type(&headers),
            ("application/octet-stream".to_string(), None)
        );

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("Text/HTML; Charset=\"iso-8859-1\""));
        assert_eq!(
            split_content_type(&headers),
            ("text/html".to_string(), Some("iso-8859-1".to_string()))
        );
    }
}
