//! Persistence of user rules.

use std::future::Future;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tokio::fs;

use super::UserRule;

/// Error type for user rule persistence.
#[derive(Debug, thiserror::Error)]
pub enum RuleStoreError {
    #[error("I/O error on rule file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed rule file {path:?}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The persistence worker is no longer running.
    #[error("rule persistence worker stopped")]
    WorkerStopped,
}

/// Storage for user rules.
///
/// Rules are identified by their key (page domain, request domain, content
/// type, third-party flag): adding a rule whose key already exists replaces
/// the stored one.
pub trait RuleRepository: Send + Sync + 'static {
    fn load_all(&self) -> impl Future<Output = Result<Vec<UserRule>, RuleStoreError>> + Send;

    fn add_rules(
        &self,
        rules: Vec<UserRule>,
    ) -> impl Future<Output = Result<(), RuleStoreError>> + Send;

    fn remove_rule(&self, rule: UserRule)
    -> impl Future<Output = Result<(), RuleStoreError>> + Send;
}

fn upsert_all(stored: &mut Vec<UserRule>, rules: Vec<UserRule>) {
    for rule in rules {
        match stored.iter_mut().find(|r| r.key() == rule.key()) {
            Some(existing) => *existing = rule,
            None => stored.push(rule),
        }
    }
}

/// Rules kept in memory only, lost on restart.
#[derive(Debug, Default)]
pub struct MemoryRuleRepository {
    rules: Mutex<Vec<UserRule>>,
}

impl MemoryRuleRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RuleRepository for MemoryRuleRepository {
    async fn load_all(&self) -> Result<Vec<UserRule>, RuleStoreError> {
        Ok(self.rules.lock().clone())
    }

    async fn add_rules(&self, rules: Vec<UserRule>) -> Result<(), RuleStoreError> {
        upsert_all(&mut self.rules.lock(), rules);
        Ok(())
    }

    async fn remove_rule(&self, rule: UserRule) -> Result<(), RuleStoreError> {
        self.rules.lock().retain(|r| r.key() != rule.key());
        Ok(())
    }
}

/// Rules stored as a JSON array in a single file.
#[derive(Debug, Clone)]
pub struct JsonRuleRepository {
    path: PathBuf,
}

impl JsonRuleRepository {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Vec<UserRule>, RuleStoreError> {
        let bytes = match fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RuleStoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| RuleStoreError::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn write(&self, rules: &[UserRule]) -> Result<(), RuleStoreError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| RuleStoreError::Io { path, source }
        };

        let bytes = serde_json::to_vec_pretty(rules).map_err(|source| RuleStoreError::Json {
            path: self.path.clone(),
            source,
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err(parent))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, bytes).await.map_err(io_err(&tmp))?;
        fs::rename(&tmp, &self.path)
            .await
            .map_err(io_err(&self.path))?;
        Ok(())
    }
}

impl RuleRepository for JsonRuleRepository {
    async fn load_all(&self) -> Result<Vec<UserRule>, RuleStoreError> {
        self.read().await
    }

    async fn add_rules(&self, rules: Vec<UserRule>) -> Result<(), RuleStoreError> {
        let mut stored = self.read().await?;
        upsert_all(&mut stored, rules);
        self.write(&stored).await
    }

    async fn remove_rule(&self, rule: UserRule) -> Result<(), RuleStoreError> {
        let mut stored = self.read().await?;
        stored.retain(|r| r.key() != rule.key());
        self.write(&stored).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ContentType;
    use crate::rules::Directive;
    use tempfile::TempDir;

    fn rule(page: &str, directive: Option<Directive>) -> UserRule {
        UserRule {
            page_domain: page.into(),
            request_domain: "tracker.net".into(),
            content_type: ContentType::All,
            third_party: false,
            directive,
        }
    }

    #[tokio::test]
    async fn should_return_empty_when_file_is_missing() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRuleRepository::new(dir.path().join("rules.json"));

        assert!(repo.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_persist_upsert_and_remove() {
        let dir = TempDir::new().unwrap();
        let repo = JsonRuleRepository::new(dir.path().join("nested").join("rules.json"));

        repo.add_rules(vec![rule("a.com", Some(Directive::Block)), rule("b.com", None)])
            .await
            .unwrap();
        repo.add_rules(vec![rule("a.com", Some(Directive::Allow))])
            .await
            .unwrap();
        repo.remove_rule(rule("b.com", None)).await.unwrap();

        let reopened = JsonRuleRepository::new(repo.path());
        assert_eq!(
            reopened.load_all().await.unwrap(),
            vec![rule("a.com", Some(Directive::Allow))]
        );
    }

    #[tokio::test]
    async fn should_report_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();

        let result = JsonRuleRepository::new(&path).load_all().await;

        assert!(matches!(result, Err(RuleStoreError::Json { .. })));
    }

    #[tokio::test]
    async fn should_keep_rules_in_memory() {
        let repo = MemoryRuleRepository::new();
        repo.add_rules(vec![rule("a.com", None)]).await.unwrap();
        repo.add_rules(vec![rule("a.com", Some(Directive::Block))])
            .await
            .unwrap();

        assert_eq!(
            repo.load_all().await.unwrap(),
            vec![rule("a.com", Some(Directive::Block))]
        );
    }
}
