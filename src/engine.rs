//! The engine facade wiring loading, classification, dispatch and response
//! materialization together.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use tokio::sync::Mutex;

use crate::blocklist::{ListCatalog, ListLoader, LoadResult};
use crate::config::Config;
use crate::dispatch::{BlockingDispatcher, Decision, RuleLookup};
use crate::error::Result;
use crate::filter::FilterStore;
use crate::gate::LoadGate;
use crate::request::{ContentRequest, ContentRequestBuilder, ThirdPartyClassifier, WebRequest};
use crate::response::{InterceptResult, ModifyExecutor, ResourceLibrary, ResponseSynthesizer};
use crate::rules::{RuleRepository, UserRuleStore};

/// A decision together with the response materialized for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub decision: Decision,
    /// `None` when the request goes to the network untouched.
    pub response: Option<InterceptResult>,
}

impl Default for Evaluation {
    fn default() -> Self {
        Self {
            decision: Decision::None,
            response: None,
        }
    }
}

/// Request filtering engine.
///
/// Requests are held back until [`FilterEngine::start`] has published the
/// first set of filter categories.
pub struct FilterEngine<C, R> {
    store: Arc<FilterStore>,
    gate: Arc<LoadGate>,
    loader: ListLoader<C>,
    load_lock: Mutex<()>,
    builder: ContentRequestBuilder,
    rules: Arc<UserRuleStore<R>>,
    dispatcher: BlockingDispatcher,
    synthesizer: ResponseSynthesizer,
    modifier: ModifyExecutor,
}

impl<C, R> FilterEngine<C, R>
where
    C: ListCatalog,
    R: RuleRepository,
{
    /// Build an engine; nothing is loaded until [`start`](Self::start).
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &Config, catalog: C, repository: R) -> Result<Self> {
        Self::with_cookies(config, catalog, repository, Arc::new(Jar::default()))
    }

    /// Like [`new`](Self::new), issuing modified requests with the given
    /// cookie store.
    ///
    /// # Errors
    ///
    /// Returns an error if an HTTP client cannot be created.
    pub fn with_cookies(
        config: &Config,
        catalog: C,
        repository: R,
        cookies: Arc<Jar>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let store = Arc::new(FilterStore::new());
        let gate = Arc::new(LoadGate::new());
        let classifier = Arc::new(ThirdPartyClassifier::new(config.third_party_cache_capacity));
        let rules = Arc::new(UserRuleStore::new(repository));

        let dispatcher = BlockingDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&rules) as Arc<dyn RuleLookup>,
            Arc::clone(&gate),
        );

        Ok(Self {
            loader: ListLoader::new(catalog, config.cache_dir(), timeout)?,
            load_lock: Mutex::new(()),
            builder: ContentRequestBuilder::new(classifier),
            synthesizer: ResponseSynthesizer::new(
                config.theme.clone(),
                ResourceLibrary::new(config.resources_dir.as_deref()),
            ),
            modifier: ModifyExecutor::new(config.modify.clone(), timeout, cookies)?,
            store,
            gate,
            rules,
            dispatcher,
        })
    }

    /// Load user rules and filter categories, then release waiting requests.
    ///
    /// The gate opens even when loading fails, so callers are never held
    /// back indefinitely; requests then pass through unfiltered.
    ///
    /// # Errors
    ///
    /// Returns the list loading error.
    pub async fn start(&self) -> Result<LoadResult> {
        if let Err(err) = self.rules.load().await {
            tracing::warn!(error = %err, "failed to load user rules, starting without them");
        }

        let result = self.load().await;
        self.gate.open();
        result
    }

    /// Drop the joint files and rebuild every category from the lists.
    ///
    /// Requests keep being served from the previous categories until the
    /// rebuilt set is swapped in.
    ///
    /// # Errors
    ///
    /// Returns the list loading error; the previous categories stay live.
    pub async fn reload(&self) -> Result<LoadResult> {
        let _guard = self.load_lock.lock().await;
        self.loader.remove_joint_lists().await?;
        Ok(self.loader.load(&self.store).await?)
    }

    async fn load(&self) -> Result<LoadResult> {
        let _guard = self.load_lock.lock().await;
        match self.loader.load(&self.store).await {
            Ok(result) => {
                if !result.failed_lists.is_empty() {
                    tracing::warn!(failed = ?result.failed_lists, "some filter lists failed to load");
                }
                Ok(result)
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to load filter lists");
                Err(err.into())
            }
        }
    }

    /// Whether the initial load has completed.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.gate.is_open()
    }

    /// Normalize a request issued from the page at `page_url`.
    #[must_use]
    pub fn content_request(&self, request: &WebRequest, page_url: &str) -> Option<ContentRequest> {
        self.builder.build(request, page_url)
    }

    /// Decide for `request`, blocking the calling thread until the initial
    /// load has completed.
    ///
    /// Do not call from an async context; use
    /// [`should_block`](Self::should_block) there.
    #[must_use]
    pub fn decide(&self, request: &WebRequest, page_url: &str) -> Decision {
        self.builder
            .build(request, page_url)
            .map_or(Decision::None, |content| self.dispatcher.decide(&content))
    }

    /// Resolve `request` to the response to serve in its place, or `None` to
    /// let it go to the network untouched.
    pub async fn should_block(
        &self,
        request: &WebRequest,
        page_url: &str,
    ) -> Option<InterceptResult> {
        self.evaluate(request, page_url).await.response
    }

    /// Like [`should_block`](Self::should_block), also reporting the
    /// decision behind the response.
    pub async fn evaluate(&self, request: &WebRequest, page_url: &str) -> Evaluation {
        let Some(content) = self.builder.build(request, page_url) else {
            return Evaluation::default();
        };
        self.gate.opened().await;

        let decision = self.dispatcher.decide_ready(&content);
        let response = match &decision {
            Decision::Modify(modify) => self.modifier.execute(modify, &content).await,
            decision => self.synthesizer.synthesize(decision, &content),
        };
        Evaluation { decision, response }
    }

    /// The user rule store, for rule management.
    #[must_use]
    pub fn user_rules(&self) -> &UserRuleStore<R> {
        &self.rules
    }

    /// Number of filters in the live set.
    #[must_use]
    pub fn filter_count(&self) -> usize {
        self.store.snapshot().total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocklist::ListMetadata;
    use crate::config::ListSource;
    use crate::rules::MemoryRuleRepository;
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// Catalog of a single file list, counting reads.
    struct OneListCatalog {
        path: std::path::PathBuf,
        reads: Arc<AtomicU64>,
    }

    impl ListCatalog for OneListCatalog {
        async fn get_all(&self) -> io::Result<Vec<ListMetadata>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ListMetadata {
                id: "local".into(),
                title: "Local".into(),
                source: ListSource::File {
                    path: self.path.clone(),
                },
                enabled: true,
                last_local_update: None,
            }])
        }
    }

    type TestEngine = FilterEngine<OneListCatalog, MemoryRuleRepository>;

    fn engine(dir: &TempDir, rules: &str) -> (TestEngine, Arc<AtomicU64>) {
        std::fs::write(dir.path().join("list.txt"), rules).unwrap();
        engine_with_cache(dir)
    }

    /// An engine over the list already written to `dir`, sharing its cache.
    fn engine_with_cache(dir: &TempDir) -> (TestEngine, Arc<AtomicU64>) {
        let config = Config::parse(&format!(
            "cache_dir = {:?}\n",
            dir.path().join("cache").to_string_lossy()
        ))
        .unwrap();
        let reads = Arc::new(AtomicU64::new(0));
        let catalog = OneListCatalog {
            path: dir.path().join("list.txt"),
            reads: Arc::clone(&reads),
        };
        let engine = FilterEngine::new(&config, catalog, MemoryRuleRepository::new()).unwrap();
        (engine, reads)
    }

    #[tokio::test]
    async fn should_hold_requests_until_started() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, "||ads.example.com^\n");
        let engine = Arc::new(engine);
        assert!(!engine.is_ready());

        let pending = tokio::spawn({
            let engine = Arc::clone(&engine);
            async move {
                engine
                    .should_block(
                        &WebRequest::get("http://ads.example.com/pixel.gif", false),
                        "http://news.com/",
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        engine.start().await.unwrap();

        let response = pending.await.unwrap().unwrap();
        assert_eq!(response.mime_type, "image/gif");
    }

    #[tokio::test]
    async fn should_reuse_joint_files_until_reload() {
        let dir = TempDir::new().unwrap();
        let (engine, reads) = engine(&dir, "||ads.example.com^\n");
        let first = engine.start().await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(reads.load(Ordering::SeqCst), 1);

        let (again, again_reads) = engine_with_cache(&dir);
        let second = again.start().await.unwrap();
        assert!(second.from_cache);
        assert_eq!(again_reads.load(Ordering::SeqCst), 0);

        let reloaded = engine.reload().await.unwrap();
        assert!(!reloaded.from_cache);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(engine.filter_count(), 1);
    }

    #[tokio::test]
    async fn should_let_page_allow_override_lists() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, "||ads.example.com^\n");
        engine.start().await.unwrap();

        let request = WebRequest::get("http://ads.example.com/pixel.gif", false);
        assert!(engine.should_block(&request, "http://news.com/").await.is_some());

        engine.user_rules().allow_page("http://news.com/article", true);
        assert!(engine.should_block(&request, "http://news.com/").await.is_none());
        assert!(engine.user_rules().is_page_allowed("http://news.com/"));
    }

    #[tokio::test]
    async fn should_ignore_requests_without_host() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, "||ads.example.com^\n");
        engine.start().await.unwrap();

        let request = WebRequest::get("data:text/plain,hello", false);
        assert!(engine.should_block(&request, "http://news.com/").await.is_none());
    }
}
