//! Scraper contract and factory.
//!
//! Extractors are black boxes behind the [`Scraper`] trait: given a URL
//! they synchronously (from the worker's perspective) produce a
//! [`ScrapeResult`], reporting intermediate stage progress through the
//! [`ProgressSink`] they were constructed with and polling their
//! [`CancelProbe`] at coarse checkpoints. The factory maps each
//! [`ScraperType`] tag to a registered constructor; dispatch is a closed
//! enum plus a registration table, so new scraper types are added by
//! extending the enum and registering a builder.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::progress::{CancelProbe, ProgressSink};
use crate::types::{BatchId, LinkId, ScrapeResult, ScraperType};

/// Everything a scraper constructor receives from the control center
pub struct ScraperContext {
    /// Stage progress reporting handle, task context pre-bound
    pub progress: ProgressSink,
    /// Cooperative cancellation predicate
    pub cancel: CancelProbe,
    /// Scraper-specific options from [`crate::config::ScrapersConfig`]
    pub options: serde_json::Value,
}

/// Content extractor contract
///
/// Implementations should prefer returning `success=false` with an error
/// string over returning `Err` — an `Err` is treated by the worker as an
/// extractor crash and synthesized into a failed result.
#[async_trait]
pub trait Scraper: Send + Sync {
    /// Extract content from a URL
    ///
    /// Runs to completion from the worker's point of view; intermediate
    /// progress goes through the sink the scraper was constructed with.
    /// Implementations must respect their own deadlines — the control
    /// center imposes no wall-clock task timeout.
    async fn extract(
        &self,
        url: &str,
        batch_id: &BatchId,
        link_id: &LinkId,
    ) -> Result<ScrapeResult>;

    /// Pre-flight check that a URL is shaped right for this scraper
    fn validate_url(&self, url: &str) -> bool {
        url::Url::parse(url).is_ok()
    }

    /// Release held resources (browser sessions, sockets)
    ///
    /// Called by the worker in a guaranteed-release path after every
    /// extraction, successful or not.
    async fn close(&self) {}
}

/// Constructor registered for one scraper type
pub type ScraperBuilder = Box<dyn Fn(ScraperContext) -> Box<dyn Scraper> + Send + Sync>;

/// Registration table mapping scraper types to constructors
#[derive(Default)]
pub struct ScraperFactory {
    builders: HashMap<ScraperType, ScraperBuilder>,
}

impl ScraperFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Register a constructor for a scraper type
    ///
    /// A later registration for the same type replaces the earlier one.
    pub fn register<F>(&mut self, scraper_type: ScraperType, builder: F)
    where
        F: Fn(ScraperContext) -> Box<dyn Scraper> + Send + Sync + 'static,
    {
        tracing::debug!(scraper = %scraper_type, "Registering scraper builder");
        self.builders.insert(scraper_type, Box::new(builder));
    }

    /// Construct a scraper for a type
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownScraperType`] when no constructor is
    /// registered for the tag.
    pub fn create(
        &self,
        scraper_type: ScraperType,
        context: ScraperContext,
    ) -> Result<Box<dyn Scraper>> {
        let builder = self
            .builders
            .get(&scraper_type)
            .ok_or_else(|| Error::UnknownScraperType(scraper_type.as_str().to_string()))?;
        Ok(builder(context))
    }

    /// Whether a constructor is registered for a type
    pub fn is_registered(&self, scraper_type: ScraperType) -> bool {
        self.builders.contains_key(&scraper_type)
    }

    /// All registered scraper types
    pub fn registered_types(&self) -> Vec<ScraperType> {
        self.builders.keys().copied().collect()
    }
}
