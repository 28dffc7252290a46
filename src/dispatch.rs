//! Block/allow/modify decisions for normalized requests.
//!
//! Precedence, highest first:
//!
//! 1. user rules: a `Block` is final; an `Allow` is final unless an
//!    `Important` filter matches without an `ImportantAllow` exception
//! 2. `Important`, cancelled only by `ImportantAllow`
//! 3. `ImportantAllow` and `Allow` exceptions
//! 4. `Redirect` (unless a `RedirectException` matches), which turns a
//!    block, or an otherwise unmatched request, into a resource substitution
//! 5. `Deny`
//! 6. `Modify`, for requests that were not blocked, unless a
//!    `ModifyException` matches

use std::fmt;
use std::sync::Arc;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use url::Url;

use crate::filter::{CategorySet, FilterCategory, FilterEntry, FilterStore, ModifyAction};
use crate::gate::LoadGate;
use crate::request::ContentRequest;
use crate::rules::{RuleRepository, RuleResponse, UserRuleStore};

/// Why a request was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSource {
    UserRule,
    List(FilterCategory),
}

impl fmt::Display for BlockSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRule => f.write_str("user_rule"),
            Self::List(category) => write!(f, "{category}"),
        }
    }
}

/// A rewritten request to issue in place of the original.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifyRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    pub add_response_headers: Vec<(String, String)>,
    pub remove_response_headers: Vec<String>,
}

/// What to do with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Let the request through untouched.
    None,
    Block {
        source: BlockSource,
        pattern: String,
    },
    /// Answer with the named bundled resource.
    BlockResource {
        resource_name: String,
    },
    Modify(Box<ModifyRequest>),
}

impl Decision {
    /// Label used for metrics and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Block { .. } => "block",
            Self::BlockResource { .. } => "block_resource",
            Self::Modify(_) => "modify",
        }
    }
}

/// User rule lookup consulted ahead of the filter lists.
pub trait RuleLookup: Send + Sync {
    fn response(&self, request: &ContentRequest) -> RuleResponse;
}

impl<R: RuleRepository> RuleLookup for UserRuleStore<R> {
    fn response(&self, request: &ContentRequest) -> RuleResponse {
        UserRuleStore::response(self, request)
    }
}

/// Resolves a [`Decision`] for each request against the published filter
/// categories and the user rules.
#[derive(Clone)]
pub struct BlockingDispatcher {
    store: Arc<FilterStore>,
    rules: Arc<dyn RuleLookup>,
    gate: Arc<LoadGate>,
}

impl BlockingDispatcher {
    #[must_use]
    pub fn new(store: Arc<FilterStore>, rules: Arc<dyn RuleLookup>, gate: Arc<LoadGate>) -> Self {
        Self { store, rules, gate }
    }

    /// Decide for `request`, blocking the calling thread until the initial
    /// load has completed.
    #[must_use]
    pub fn decide(&self, request: &ContentRequest) -> Decision {
        self.gate.wait();
        self.decide_ready(request)
    }

    /// Decide for `request` without consulting the gate.
    #[must_use]
    pub fn decide_ready(&self, request: &ContentRequest) -> Decision {
        let set = self.store.snapshot();
        let decision = resolve(&set, self.rules.response(request), request);
        tracing::trace!(url = %request.url, decision = decision.kind(), "decided");
        crate::metrics::record_decision(decision.kind());
        decision
    }
}

fn resolve(set: &CategorySet, user: RuleResponse, request: &ContentRequest) -> Decision {
    let matching = |category| set.best_match(category, request);

    let important_allow = matching(FilterCategory::ImportantAllow);
    let important = if important_allow.is_some() {
        None
    } else {
        matching(FilterCategory::Important)
    };

    match user {
        RuleResponse::Block => {
            return Decision::Block {
                source: BlockSource::UserRule,
                pattern: request.host.clone(),
            };
        }
        RuleResponse::Allow => {
            return important.map_or(Decision::None, |entry| {
                block(FilterCategory::Important, entry)
            });
        }
        RuleResponse::NoOverride => {}
    }

    if let Some(entry) = important {
        return block(FilterCategory::Important, entry);
    }

    let allowed = important_allow.is_some() || matching(FilterCategory::Allow).is_some();

    if !allowed {
        let redirect = matching(FilterCategory::Redirect)
            .filter(|_| matching(FilterCategory::RedirectException).is_none())
            .and_then(|entry| entry.action.as_ref()?.destination.clone());
        if let Some(resource_name) = redirect {
            return Decision::BlockResource { resource_name };
        }
        if let Some(entry) = matching(FilterCategory::Deny) {
            return block(FilterCategory::Deny, entry);
        }
    }

    if matching(FilterCategory::ModifyException).is_some() {
        return Decision::None;
    }
    matching(FilterCategory::Modify)
        .and_then(|entry| entry.action.as_ref())
        .and_then(|action| modify_request(action, request))
        .map_or(Decision::None, |modify| Decision::Modify(Box::new(modify)))
}

fn block(category: FilterCategory, entry: &FilterEntry) -> Decision {
    Decision::Block {
        source: BlockSource::List(category),
        pattern: entry.pattern.to_string(),
    }
}

fn modify_request(action: &ModifyAction, request: &ContentRequest) -> Option<ModifyRequest> {
    let url = match action.destination.as_deref() {
        Some(destination) => match request.url.join(destination) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(destination, error = %err, "ignoring modify filter with bad destination");
                return None;
            }
        },
        None => request.url.clone(),
    };

    let mut headers = request.headers.clone();
    for name in &action.remove_request_headers {
        headers.remove(name.as_str());
    }
    for (name, value) in &action.set_request_headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "skipping invalid request header edit"),
        }
    }

    Some(ModifyRequest {
        url,
        method: request.method.clone(),
        headers,
        add_response_headers: action.add_response_headers.clone(),
        remove_response_headers: action.remove_response_headers.clone(),
    })
}
