//! Shared test helpers for creating ControlCenter instances in tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use crate::artifact::{ArtifactWriter, JsonArtifactStore};
use crate::config::Config;
use crate::error::Result;
use crate::progress::StageProgress;
use crate::scraper::{Scraper, ScraperContext, ScraperFactory};
use crate::types::{BatchId, Event, LinkId, ScrapeResult, ScrapeTask, ScraperType};

use super::ControlCenter;

/// Scripted outcome for one link id
#[derive(Clone)]
pub(crate) struct MockBehavior {
    pub(crate) success: bool,
    pub(crate) word_count: u64,
    pub(crate) error: Option<String>,
    pub(crate) delay: Duration,
    pub(crate) stages: Vec<StageProgress>,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            success: true,
            word_count: 100,
            error: None,
            delay: Duration::ZERO,
            stages: Vec::new(),
        }
    }
}

impl MockBehavior {
    pub(crate) fn failing(error: &str) -> Self {
        Self {
            success: false,
            word_count: 0,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

/// Per-link script plus concurrency accounting shared by all mock scrapers
#[derive(Default)]
pub(crate) struct MockPlan {
    pub(crate) by_link: HashMap<String, MockBehavior>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockPlan {
    pub(crate) fn new(by_link: HashMap<String, MockBehavior>) -> Arc<Self> {
        Arc::new(Self {
            by_link,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scraper that follows the plan entry for its link id
pub(crate) struct ScriptedScraper {
    plan: Arc<MockPlan>,
    context: ScraperContext,
}

#[async_trait]
impl Scraper for ScriptedScraper {
    async fn extract(
        &self,
        url: &str,
        batch_id: &BatchId,
        link_id: &LinkId,
    ) -> Result<ScrapeResult> {
        self.plan.enter();

        let behavior = self
            .plan
            .by_link
            .get(link_id.as_str())
            .cloned()
            .unwrap_or_default();

        for stage in &behavior.stages {
            self.context.progress.report(stage.clone()).await;
        }

        if !behavior.delay.is_zero() {
            tokio::time::sleep(behavior.delay).await;
        }

        self.plan.exit();

        Ok(ScrapeResult {
            success: behavior.success,
            url: url.to_string(),
            link_id: link_id.clone(),
            batch_id: batch_id.clone(),
            content: behavior.success.then(|| "extracted text".to_string()),
            word_count: behavior.word_count,
            error: behavior.error,
            title: None,
            author: None,
            publish_date: None,
            language: None,
            source: None,
        })
    }
}

/// Artifact writer that refuses configured link ids and delegates the rest
pub(crate) struct FailingArtifactWriter {
    inner: JsonArtifactStore,
    fail_links: HashSet<String>,
}

impl FailingArtifactWriter {
    pub(crate) fn new(config: &crate::config::PersistenceConfig, fail_links: &[&str]) -> Self {
        Self {
            inner: JsonArtifactStore::new(config),
            fail_links: fail_links.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[async_trait]
impl ArtifactWriter for FailingArtifactWriter {
    async fn persist(&self, result: &ScrapeResult, scraper_type: ScraperType) -> Option<PathBuf> {
        if self.fail_links.contains(result.link_id.as_str()) {
            return None;
        }
        self.inner.persist(result, scraper_type).await
    }
}

/// Factory with every scraper type registered to the scripted mock
pub(crate) fn scripted_factory(plan: Arc<MockPlan>) -> ScraperFactory {
    let mut factory = ScraperFactory::new();
    for scraper_type in [
        ScraperType::YoutubeTranscript,
        ScraperType::YoutubeComments,
        ScraperType::BilibiliTranscript,
        ScraperType::BilibiliComments,
        ScraperType::Article,
        ScraperType::Reddit,
    ] {
        let plan = plan.clone();
        factory.register(scraper_type, move |context| {
            Box::new(ScriptedScraper {
                plan: plan.clone(),
                context,
            })
        });
    }
    factory
}

/// Fast-polling config rooted in a temp directory
pub(crate) fn test_config(root: &std::path::Path, pool_size: usize) -> Config {
    let mut config = Config::default();
    config.pool.worker_pool_size = pool_size;
    config.pool.idle_poll_interval_ms = 10;
    config.persistence.results_root = root.join("results");
    config.persistence.verify_delay_ms = 10;
    config
}

/// Helper to create a test ControlCenter with scripted scrapers.
/// Returns the center, the plan, and the tempdir (which must be kept alive).
pub(crate) async fn create_test_center(
    pool_size: usize,
    behaviors: HashMap<String, MockBehavior>,
) -> (ControlCenter, Arc<MockPlan>, tempfile::TempDir) {
    let temp_dir = tempdir().unwrap();
    let config = test_config(temp_dir.path(), pool_size);
    let plan = MockPlan::new(behaviors);
    let center = ControlCenter::new(config, scripted_factory(plan.clone()))
        .await
        .unwrap();
    (center, plan, temp_dir)
}

/// Background collector of broadcast events
pub(crate) struct EventCollector {
    events: Arc<tokio::sync::Mutex<Vec<Event>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventCollector {
    /// Subscribe to the center and start collecting
    pub(crate) fn start(center: &ControlCenter) -> Self {
        let mut rx = center.subscribe();
        let events = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let sink = events.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().await.push(event),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event collector lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Self { events, handle }
    }

    /// Snapshot of everything collected so far
    ///
    /// Yields briefly first so in-flight broadcasts land.
    pub(crate) async fn snapshot(&self) -> Vec<Event> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.events.lock().await.clone()
    }

    pub(crate) async fn complete_link_events(&self) -> Vec<Event> {
        self.snapshot()
            .await
            .into_iter()
            .filter(|e| matches!(e, Event::CompleteLink { .. }))
            .collect()
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// A pending task for link `L{i}` of the given batch
pub(crate) fn make_task(i: usize, batch: &str) -> ScrapeTask {
    ScrapeTask::new(
        format!("task_{i}"),
        batch,
        format!("L{i}"),
        format!("https://example.com/{i}"),
        ScraperType::Article,
    )
}

/// Pending tasks `L1..=count` for a batch
pub(crate) fn make_tasks(count: usize, batch: &str) -> Vec<ScrapeTask> {
    (1..=count).map(|i| make_task(i, batch)).collect()
}

/// Link descriptors matching [`make_tasks`]
pub(crate) fn make_descriptors(count: usize) -> Vec<crate::types::LinkDescriptor> {
    (1..=count)
        .map(|i| crate::types::LinkDescriptor {
            link_id: LinkId::new(format!("L{i}")),
            url: format!("https://example.com/{i}"),
            scraper_type: ScraperType::Article,
        })
        .collect()
}
