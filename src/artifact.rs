//! Artifact persistence — results on disk before completion is announced.
//!
//! Every successful extraction is written to a content-addressed JSON file
//! *before* the corresponding `scraping:complete_link` event is emitted, so
//! downstream consumers may rely on the artifact existing when they see the
//! event. Writes are atomic (temp file + fsync + rename) and verified by
//! re-opening and parsing the renamed file, retrying briefly to tolerate
//! transient I/O.
//!
//! The writer is a trait object so embedders (and tests) can substitute
//! their own persistence backend.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::config::PersistenceConfig;
use crate::error::{Error, Result};
use crate::types::{ScrapeResult, ScraperType};

/// Persistence contract consumed by the worker pool
#[async_trait]
pub trait ArtifactWriter: Send + Sync {
    /// Persist a successful result; returns the verified path, or `None`
    /// when the result was not persisted (failure results, write errors,
    /// verification failures)
    async fn persist(&self, result: &ScrapeResult, scraper_type: ScraperType) -> Option<PathBuf>;
}

/// JSON-file artifact store
///
/// Layout: `<root>/run_<batch_id>/<batch_id>_<PREFIX>_<link_id>_<SUFFIX>.json`
/// where `PREFIX` is the link-type tag (`YT`, `BILI`, `AR`, `RD`) and
/// `SUFFIX` is `tsct` for transcript and article results, `cmts`/`cmt` for
/// comment bundles. Comment results are additionally merged into one
/// aggregated `<batch_id>_comments.json` per batch.
pub struct JsonArtifactStore {
    root: PathBuf,
    verify_attempts: u32,
    verify_delay: std::time::Duration,
    /// Serializes read-modify-write cycles on per-batch comment bundles
    bundle_lock: Mutex<()>,
}

impl JsonArtifactStore {
    /// Create a store rooted at the configured results directory
    pub fn new(config: &PersistenceConfig) -> Self {
        Self {
            root: config.results_root.clone(),
            verify_attempts: config.verify_attempts,
            verify_delay: config.verify_delay(),
            bundle_lock: Mutex::new(()),
        }
    }

    /// The artifact path a result would be written to
    pub fn artifact_path(&self, result: &ScrapeResult, scraper_type: ScraperType) -> PathBuf {
        let prefix = scraper_type.link_type().artifact_prefix();
        let suffix = scraper_type.artifact_suffix();
        self.batch_dir(result.batch_id.as_str()).join(format!(
            "{}_{}_{}_{}.json",
            result.batch_id, prefix, result.link_id, suffix
        ))
    }

    fn batch_dir(&self, batch_id: &str) -> PathBuf {
        self.root.join(format!("run_{batch_id}"))
    }

    fn bundle_path(&self, batch_id: &str) -> PathBuf {
        self.batch_dir(batch_id).join(format!("{batch_id}_comments.json"))
    }

    /// Write bytes to a temp path in the same directory, fsync, then rename
    /// over the target
    async fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp_name = match path.file_name() {
            Some(name) => {
                let mut tmp = name.to_os_string();
                tmp.push(".tmp");
                tmp
            }
            None => return Err(Error::Persistence(format!("invalid path: {}", path.display()))),
        };
        let tmp_path = path.with_file_name(tmp_name);

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    /// Re-open the renamed file and parse it, retrying briefly
    async fn verify_readable(&self, path: &Path) -> bool {
        for attempt in 1..=self.verify_attempts {
            match tokio::fs::read(path).await {
                Ok(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(_) => return true,
                    Err(e) => {
                        if attempt == self.verify_attempts {
                            tracing::warn!(
                                path = %path.display(),
                                attempts = attempt,
                                error = %e,
                                "Artifact verification failed: file is not valid JSON"
                            );
                            return false;
                        }
                    }
                },
                Err(e) => {
                    if attempt == self.verify_attempts {
                        tracing::warn!(
                            path = %path.display(),
                            attempts = attempt,
                            error = %e,
                            "Artifact verification failed: file unreadable"
                        );
                        return false;
                    }
                }
            }
            tokio::time::sleep(self.verify_delay).await;
        }
        false
    }

    /// Merge a comment result into the per-batch aggregated bundle
    ///
    /// One bundle file per batch, keyed by link id. Runs under the bundle
    /// lock so concurrent comment completions do not clobber each other.
    async fn merge_into_bundle(&self, result: &ScrapeResult) -> Result<()> {
        let _guard = self.bundle_lock.lock().await;

        let path = self.bundle_path(result.batch_id.as_str());
        let mut bundle: serde_json::Map<String, serde_json::Value> =
            match tokio::fs::read(&path).await {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
                Err(_) => serde_json::Map::new(),
            };

        bundle.insert(
            result.link_id.to_string(),
            serde_json::to_value(result)?,
        );

        let bytes = serde_json::to_vec_pretty(&serde_json::Value::Object(bundle))?;
        self.write_atomic(&path, &bytes).await
    }
}

#[async_trait]
impl ArtifactWriter for JsonArtifactStore {
    async fn persist(&self, result: &ScrapeResult, scraper_type: ScraperType) -> Option<PathBuf> {
        if !result.success {
            return None;
        }

        let batch_dir = self.batch_dir(result.batch_id.as_str());
        if let Err(e) = tokio::fs::create_dir_all(&batch_dir).await {
            tracing::error!(
                dir = %batch_dir.display(),
                error = %e,
                "Failed to create batch results directory"
            );
            return None;
        }

        let path = self.artifact_path(result, scraper_type);

        let bytes = match serde_json::to_vec_pretty(result) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(link_id = %result.link_id, error = %e, "Failed to serialize result");
                return None;
            }
        };

        if let Err(e) = self.write_atomic(&path, &bytes).await {
            tracing::error!(path = %path.display(), error = %e, "Failed to write artifact");
            return None;
        }

        if !self.verify_readable(&path).await {
            return None;
        }

        if scraper_type.is_comments()
            && let Err(e) = self.merge_into_bundle(result).await
        {
            // The per-task artifact is already safe on disk; a bundle miss
            // is recoverable from the individual files
            tracing::error!(
                batch_id = %result.batch_id,
                link_id = %result.link_id,
                error = %e,
                "Failed to merge comment result into batch bundle"
            );
        }

        tracing::debug!(path = %path.display(), "Artifact saved and verified");
        Some(path)
    }
}
