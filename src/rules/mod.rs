//! User-authored dynamic rules.
//!
//! Each rule scopes one filter to a page (or to every page) and carries a
//! directive. Rules are consulted before any filter list. A rule without a
//! directive never influences a decision; it only reserves its slot so the
//! rule list stays displayable one-to-one.
//!
//! Mutations update the in-memory snapshot immediately and are persisted in
//! mutation order by a single background worker. A persistence failure is
//! logged and does not roll back the in-memory state.

pub mod repository;

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use url::Url;

pub use repository::{JsonRuleRepository, MemoryRuleRepository, RuleRepository, RuleStoreError};

use crate::filter::{ContentType, FilterEntry, Pattern, ThirdPartyMode};
use crate::request::ContentRequest;

/// What a user rule asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Directive {
    Block,
    Allow,
}

/// Outcome of a user rule lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleResponse {
    Block,
    Allow,
    NoOverride,
}

/// One user rule.
///
/// An empty `request_domain` makes the rule page-wide, an empty
/// `page_domain` makes it global.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRule {
    pub page_domain: String,
    pub request_domain: String,
    pub content_type: ContentType,
    /// `true` restricts the rule to third-party requests.
    pub third_party: bool,
    pub directive: Option<Directive>,
}

/// Identity of a rule within the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RuleKey {
    pub page_domain: String,
    pub request_domain: String,
    pub content_type: ContentType,
    pub third_party: bool,
}

impl UserRule {
    #[must_use]
    pub fn key(&self) -> RuleKey {
        RuleKey {
            page_domain: self.page_domain.to_ascii_lowercase(),
            request_domain: self.request_domain.to_ascii_lowercase(),
            content_type: self.content_type,
            third_party: self.third_party,
        }
    }

    /// The single filter this rule stands for.
    #[must_use]
    pub fn filter(&self) -> FilterEntry {
        let pattern = if self.request_domain.is_empty() {
            Pattern::Substring(String::new())
        } else {
            Pattern::host(self.request_domain.to_ascii_lowercase(), "")
        };
        let mut entry = FilterEntry::new(pattern)
            .with_content_types(self.content_type.mask())
            .with_third_party(if self.third_party {
                ThirdPartyMode::ThirdPartyOnly
            } else {
                ThirdPartyMode::Either
            });
        if !self.page_domain.is_empty() {
            entry = entry.with_domain(self.page_domain.to_ascii_lowercase(), true);
        }
        entry
    }

    /// The page-wide rule toggled by [`UserRuleStore::allow_page`].
    #[must_use]
    pub fn page_allow(page_domain: impl Into<String>, enabled: bool) -> Self {
        Self {
            page_domain: page_domain.into(),
            request_domain: String::new(),
            content_type: ContentType::All,
            third_party: false,
            directive: enabled.then_some(Directive::Allow),
        }
    }
}

type RuleMap = HashMap<RuleKey, UserRule>;

enum PersistOp {
    Add(Vec<UserRule>),
    Remove(UserRule),
    Flush(oneshot::Sender<()>),
}

/// In-memory user rules with asynchronous persistence.
pub struct UserRuleStore<R> {
    rules: ArcSwap<RuleMap>,
    writer: Mutex<()>,
    repository: Arc<R>,
    persist_tx: mpsc::UnboundedSender<PersistOp>,
}

impl<R: RuleRepository> UserRuleStore<R> {
    /// Create an empty store persisting through `repository`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime, which hosts the
    /// persistence worker.
    #[must_use]
    pub fn new(repository: R) -> Self {
        let repository = Arc::new(repository);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();
        tokio::spawn(persist_worker(Arc::clone(&repository), persist_rx));
        Self {
            rules: ArcSwap::from_pointee(RuleMap::new()),
            writer: Mutex::new(()),
            repository,
            persist_tx,
        }
    }

    /// Replace the in-memory rules with the persisted ones.
    ///
    /// Pending writes are flushed first so the repository reflects them.
    ///
    /// # Errors
    ///
    /// Returns the repository error; the in-memory rules are left untouched.
    pub async fn load(&self) -> Result<usize, RuleStoreError> {
        self.flush().await?;
        let rules = self.repository.load_all().await?;
        let count = rules.len();
        self.replace_all(rules);
        Ok(count)
    }

    /// Replace the in-memory rules with `rules`.
    pub fn replace_all(&self, rules: Vec<UserRule>) {
        let _guard = self.writer.lock();
        let map: RuleMap = rules.into_iter().map(|rule| (rule.key(), rule)).collect();
        tracing::info!(count = map.len(), "loaded user rules");
        self.rules.store(Arc::new(map));
    }

    /// Insert or replace a rule.
    pub fn upsert(&self, rule: UserRule) {
        let key = rule.key();
        self.mutate(PersistOp::Add(vec![rule.clone()]), |map| {
            map.insert(key, rule);
        });
    }

    /// Remove the rule with the same key as `rule`.
    pub fn remove(&self, rule: &UserRule) {
        let key = rule.key();
        self.mutate(PersistOp::Remove(rule.clone()), |map| {
            map.remove(&key);
        });
    }

    /// Allow (or stop allowing) every request made from the page at `url`.
    ///
    /// URLs without a host are ignored.
    pub fn allow_page(&self, url: &str, enable: bool) {
        let Some(host) = page_host(url) else {
            tracing::debug!(url, "ignoring page allow for URL without host");
            return;
        };
        let rule = UserRule::page_allow(host, true);
        if enable {
            self.upsert(rule);
        } else {
            self.remove(&rule);
        }
    }

    /// Whether the page at `url` is allowed by a page-wide rule.
    #[must_use]
    pub fn is_page_allowed(&self, url: &str) -> bool {
        let Some(host) = page_host(url) else {
            return false;
        };
        let key = UserRule::page_allow(host, true).key();
        self.rules
            .load()
            .get(&key)
            .is_some_and(|rule| rule.directive == Some(Directive::Allow))
    }

    /// Every rule currently held, in no particular order.
    #[must_use]
    pub fn rules(&self) -> Vec<UserRule> {
        self.rules.load().values().cloned().collect()
    }

    /// Resolve the user rules applying to `request`.
    ///
    /// Candidates are visited from most to least specific: page-scoped before
    /// global, request host before its parent domains before page-wide,
    /// exact content type before all types, third-party before either side.
    /// Rules without a directive are skipped.
    #[must_use]
    pub fn response(&self, request: &ContentRequest) -> RuleResponse {
        let rules = self.rules.load();
        if rules.is_empty() {
            return RuleResponse::NoOverride;
        }

        let domains: Vec<&str> = std::iter::successors(Some(request.host.as_str()), |part| {
            part.find('.').map(|idx| &part[idx + 1..])
        })
        .chain([""])
        .collect();
        let content_types = [request.content_type, ContentType::All];
        let third_party: &[bool] = if request.third_party_status.is_third_party() {
            &[true, false]
        } else {
            &[false]
        };

        for page in &request.tags {
            for request_domain in &domains {
                for content_type in content_types {
                    for &third_party in third_party {
                        let key = RuleKey {
                            page_domain: page.clone(),
                            request_domain: (*request_domain).to_string(),
                            content_type,
                            third_party,
                        };
                        match rules.get(&key).and_then(|rule| rule.directive) {
                            Some(Directive::Block) => return RuleResponse::Block,
                            Some(Directive::Allow) => return RuleResponse::Allow,
                            None => {}
                        }
                    }
                }
            }
        }
        RuleResponse::NoOverride
    }

    /// Wait until every mutation made so far has been handed to the
    /// repository.
    ///
    /// # Errors
    ///
    /// Returns [`RuleStoreError::WorkerStopped`] if the worker is gone.
    pub async fn flush(&self) -> Result<(), RuleStoreError> {
        let (tx, rx) = oneshot::channel();
        self.persist_tx
            .send(PersistOp::Flush(tx))
            .map_err(|_| RuleStoreError::WorkerStopped)?;
        rx.await.map_err(|_| RuleStoreError::WorkerStopped)
    }

    /// Apply a change and queue its persistence under the same lock, so the
    /// worker sees changes in the order they were made.
    fn mutate(&self, op: PersistOp, apply: impl FnOnce(&mut RuleMap)) {
        let _guard = self.writer.lock();
        let mut next = RuleMap::clone(&self.rules.load());
        apply(&mut next);
        self.rules.store(Arc::new(next));
        if self.persist_tx.send(op).is_err() {
            tracing::warn!("rule persistence worker stopped, change kept in memory only");
        }
    }
}

fn page_host(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
}

async fn persist_worker<R: RuleRepository>(
    repository: Arc<R>,
    mut rx: mpsc::UnboundedReceiver<PersistOp>,
) {
    while let Some(op) = rx.recv().await {
        let result = match op {
            PersistOp::Add(rules) => repository.add_rules(rules).await,
            PersistOp::Remove(rule) => repository.remove_rule(rule).await,
            PersistOp::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };
        if let Err(err) = result {
            tracing::warn!(error = ?err, "failed to persist user rule change");
        }
    }
    tracing::debug!("rule persistence worker stopped");
}
