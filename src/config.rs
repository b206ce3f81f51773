//! Configuration types for scrape-control

use crate::error::{Error, Result};
use crate::types::{ScraperType, Stage};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

/// Worker pool behavior configuration
///
/// Groups settings for pool sizing, assignment retries, and polling cadence.
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of parallel workers (default: 8)
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Sleep between idle polls of the queue, in milliseconds (default: 100)
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_interval_ms: u64,

    /// Dequeue-and-assign retry bound before the full-queue sweep kicks in (default: 50)
    ///
    /// Pathological races can pack the queue with already-terminal tasks;
    /// after this many consecutive invalid dequeues the worker drains and
    /// revalidates the entire queue instead of retrying one item at a time.
    #[serde(default = "default_assign_retry_limit")]
    pub assign_retry_limit: usize,

    /// Default shutdown wait, in seconds (default: 30)
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl PoolConfig {
    /// Idle poll interval as a [`Duration`]
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Shutdown timeout as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            idle_poll_interval_ms: default_idle_poll_ms(),
            assign_retry_limit: default_assign_retry_limit(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

/// Artifact persistence configuration
///
/// Controls where results land on disk and how writes are verified.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Root directory for persisted results (default: "./results")
    ///
    /// Each batch gets a `run_<batch_id>` subdirectory.
    #[serde(default = "default_results_root")]
    pub results_root: PathBuf,

    /// Post-rename verification attempts (default: 5)
    #[serde(default = "default_verify_attempts")]
    pub verify_attempts: u32,

    /// Delay between verification attempts, in milliseconds (default: 100)
    #[serde(default = "default_verify_delay_ms")]
    pub verify_delay_ms: u64,
}

impl PersistenceConfig {
    /// Verification retry delay as a [`Duration`]
    pub fn verify_delay(&self) -> Duration {
        Duration::from_millis(self.verify_delay_ms)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            results_root: default_results_root(),
            verify_attempts: default_verify_attempts(),
            verify_delay_ms: default_verify_delay_ms(),
        }
    }
}

/// Weight of one pipeline stage within a scraper's overall progress
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct StageWeight {
    /// The stage this weight applies to
    pub stage: Stage,
    /// Share of overall progress, 0-100; a scraper's weights sum to 100
    pub weight: u32,
}

/// Progress aggregation configuration
///
/// The stage-weight tables decide how each extractor's stage reports map to
/// a single 0-100 overall number. Weights are configuration, not hard-coded
/// behavior: a deployment with a slower transcription backend can shift
/// weight onto the transcribing stage without touching code.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Minimum interval between `scraping:status` emissions per batch, in
    /// milliseconds (default: 250). Terminal transitions always emit.
    #[serde(default = "default_status_interval_ms")]
    pub status_interval_ms: u64,

    /// Ordered per-scraper stage weight tables
    #[serde(default = "default_stage_weights")]
    pub stage_weights: HashMap<ScraperType, Vec<StageWeight>>,
}

impl ProgressConfig {
    /// Status throttle interval as a [`Duration`]
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            status_interval_ms: default_status_interval_ms(),
            stage_weights: default_stage_weights(),
        }
    }
}

/// Per-scraper construction options passed through to the factory
///
/// Keys are scraper types; values are opaque JSON handed to the registered
/// builder (e.g. `{"headless": true}` for browser-backed extractors).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapersConfig {
    /// Scraper-specific option maps
    #[serde(default = "default_scraper_options")]
    pub options: HashMap<ScraperType, serde_json::Value>,
}

impl Default for ScrapersConfig {
    fn default() -> Self {
        Self {
            options: default_scraper_options(),
        }
    }
}

impl ScrapersConfig {
    /// Options for one scraper type (empty object when unset)
    pub fn options_for(&self, scraper_type: ScraperType) -> serde_json::Value {
        self.options
            .get(&scraper_type)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}))
    }
}

/// Main configuration for the control center
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool behavior
    #[serde(default)]
    pub pool: PoolConfig,

    /// Artifact persistence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Progress aggregation
    #[serde(default)]
    pub progress: ProgressConfig,

    /// Per-scraper construction options
    #[serde(default)]
    pub scrapers: ScrapersConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// Checks pool sizing, retry bounds, and that every stage-weight table
    /// sums to exactly 100.
    pub fn validate(&self) -> Result<()> {
        if self.pool.worker_pool_size == 0 {
            return Err(Error::Config {
                message: "worker_pool_size must be at least 1".to_string(),
                key: Some("pool.worker_pool_size".to_string()),
            });
        }

        if self.pool.assign_retry_limit == 0 {
            return Err(Error::Config {
                message: "assign_retry_limit must be at least 1".to_string(),
                key: Some("pool.assign_retry_limit".to_string()),
            });
        }

        if self.persistence.verify_attempts == 0 {
            return Err(Error::Config {
                message: "verify_attempts must be at least 1".to_string(),
                key: Some("persistence.verify_attempts".to_string()),
            });
        }

        for (scraper_type, weights) in &self.progress.stage_weights {
            let sum: u32 = weights.iter().map(|w| w.weight).sum();
            if sum != 100 {
                return Err(Error::Config {
                    message: format!(
                        "stage weights for {} sum to {}, expected 100",
                        scraper_type, sum
                    ),
                    key: Some("progress.stage_weights".to_string()),
                });
            }
        }

        Ok(())
    }
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_idle_poll_ms() -> u64 {
    100
}

fn default_assign_retry_limit() -> usize {
    50
}

fn default_shutdown_timeout_secs() -> u64 {
    30
}

fn default_results_root() -> PathBuf {
    PathBuf::from("./results")
}

fn default_verify_attempts() -> u32 {
    5
}

fn default_verify_delay_ms() -> u64 {
    100
}

fn default_status_interval_ms() -> u64 {
    250
}

/// Default stage-weight tables per scraper type
///
/// Video transcripts are dominated by the download and transcription legs;
/// page-oriented scrapers split between loading and extraction.
fn default_stage_weights() -> HashMap<ScraperType, Vec<StageWeight>> {
    let video_transcript = vec![
        StageWeight {
            stage: Stage::Downloading,
            weight: 45,
        },
        StageWeight {
            stage: Stage::Converting,
            weight: 10,
        },
        StageWeight {
            stage: Stage::Uploading,
            weight: 5,
        },
        StageWeight {
            stage: Stage::Transcribing,
            weight: 30,
        },
        StageWeight {
            stage: Stage::Extracting,
            weight: 10,
        },
    ];

    let page = vec![
        StageWeight {
            stage: Stage::Loading,
            weight: 30,
        },
        StageWeight {
            stage: Stage::Extracting,
            weight: 70,
        },
    ];

    let comments = vec![
        StageWeight {
            stage: Stage::Loading,
            weight: 20,
        },
        StageWeight {
            stage: Stage::Extracting,
            weight: 80,
        },
    ];

    HashMap::from([
        (ScraperType::YoutubeTranscript, video_transcript.clone()),
        (ScraperType::BilibiliTranscript, video_transcript),
        (ScraperType::Article, page.clone()),
        (ScraperType::Reddit, page),
        (ScraperType::YoutubeComments, comments.clone()),
        (ScraperType::BilibiliComments, comments),
    ])
}

/// Default per-scraper options
///
/// Browser-backed scrapers differ on headless mode: article extraction runs
/// headless, video and forum scrapers keep a visible browser for bot checks.
fn default_scraper_options() -> HashMap<ScraperType, serde_json::Value> {
    HashMap::from([
        (
            ScraperType::YoutubeTranscript,
            serde_json::json!({"headless": false}),
        ),
        (
            ScraperType::Article,
            serde_json::json!({"headless": true}),
        ),
        (
            ScraperType::Reddit,
            serde_json::json!({"headless": false}),
        ),
    ])
}
