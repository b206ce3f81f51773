//! Core types and events for scrape-control

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Unique identifier for a scraping task
///
/// Task ids are supplied by the workflow layer that creates the tasks and
/// must be globally unique within a control center instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of the batch a task belongs to (externally supplied)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub String);

impl BatchId {
    /// Create a new BatchId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BatchId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Logical link identifier, stable across related tasks for the same URL
///
/// A transcript task and a comments task for the same video share the URL
/// but carry distinct link ids (`X` and `X_comments`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub String);

impl LinkId {
    /// Create a new LinkId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for LinkId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier for a worker slot in the pool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker_{}", self.0)
    }
}

/// Source site family a link belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkType {
    /// YouTube videos
    Youtube,
    /// Bilibili videos
    Bilibili,
    /// Generic web articles
    Article,
    /// Reddit threads
    Reddit,
}

impl LinkType {
    /// Wire tag used in events and filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Youtube => "youtube",
            LinkType::Bilibili => "bilibili",
            LinkType::Article => "article",
            LinkType::Reddit => "reddit",
        }
    }

    /// Short tag used in artifact filenames
    pub fn artifact_prefix(&self) -> &'static str {
        match self {
            LinkType::Youtube => "YT",
            LinkType::Bilibili => "BILI",
            LinkType::Article => "AR",
            LinkType::Reddit => "RD",
        }
    }
}

/// Which extractor to invoke for a task: site family plus modality
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScraperType {
    /// YouTube transcript extraction
    #[serde(rename = "youtube")]
    YoutubeTranscript,
    /// YouTube comment collection
    #[serde(rename = "youtubecomments")]
    YoutubeComments,
    /// Bilibili transcript extraction
    #[serde(rename = "bilibili")]
    BilibiliTranscript,
    /// Bilibili comment collection
    #[serde(rename = "bilibilicomments")]
    BilibiliComments,
    /// Article body extraction
    #[serde(rename = "article")]
    Article,
    /// Reddit thread extraction
    #[serde(rename = "reddit")]
    Reddit,
}

impl ScraperType {
    /// Wire tag used in events and artifact filenames
    pub fn as_str(&self) -> &'static str {
        match self {
            ScraperType::YoutubeTranscript => "youtube",
            ScraperType::YoutubeComments => "youtubecomments",
            ScraperType::BilibiliTranscript => "bilibili",
            ScraperType::BilibiliComments => "bilibilicomments",
            ScraperType::Article => "article",
            ScraperType::Reddit => "reddit",
        }
    }

    /// The site family this scraper handles
    pub fn link_type(&self) -> LinkType {
        match self {
            ScraperType::YoutubeTranscript | ScraperType::YoutubeComments => LinkType::Youtube,
            ScraperType::BilibiliTranscript | ScraperType::BilibiliComments => LinkType::Bilibili,
            ScraperType::Article => LinkType::Article,
            ScraperType::Reddit => LinkType::Reddit,
        }
    }

    /// Whether this scraper collects comments (comment results are
    /// additionally merged into a per-batch bundle)
    pub fn is_comments(&self) -> bool {
        matches!(
            self,
            ScraperType::YoutubeComments | ScraperType::BilibiliComments
        )
    }

    /// Filename suffix for persisted artifacts
    pub fn artifact_suffix(&self) -> &'static str {
        match self {
            ScraperType::YoutubeComments => "cmts",
            ScraperType::BilibiliComments => "cmt",
            _ => "tsct",
        }
    }
}

impl std::fmt::Display for ScraperType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting in the queue
    Pending,
    /// Assigned to a worker and being extracted
    Processing,
    /// Extraction finished successfully
    Completed,
    /// Extraction failed
    Failed,
    /// Refused or cancelled before extraction
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal (never changes once reached)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// Worker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Waiting for work
    Idle,
    /// Extracting a task
    Processing,
    /// Exited its loop (shutdown or cancellation)
    Terminated,
}

/// Pipeline stage reported by extractors
///
/// Stage tags are scraper-specific; the weight tables in
/// [`crate::config::ProgressConfig`] decide how each contributes to the
/// overall 0-100 progress number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// Not yet started
    Pending,
    /// Started, no finer-grained stage reported yet
    InProgress,
    /// Fetching the page or player payload
    Loading,
    /// Downloading media
    Downloading,
    /// Converting media (e.g. mp4 to mp3)
    Converting,
    /// Uploading media to the transcription backend
    Uploading,
    /// Waiting on transcription
    Transcribing,
    /// Extracting and cleaning text
    Extracting,
    /// Terminal success
    Completed,
    /// Terminal failure
    Failed,
}

impl Stage {
    /// Wire tag for this stage
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::InProgress => "in-progress",
            Stage::Loading => "loading",
            Stage::Downloading => "downloading",
            Stage::Converting => "converting",
            Stage::Uploading => "uploading",
            Stage::Transcribing => "transcribing",
            Stage::Extracting => "extracting",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

/// One unit of extraction work: one URL crossed with one scraper modality
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeTask {
    /// Globally unique task identifier
    pub task_id: TaskId,
    /// Owning batch
    pub batch_id: BatchId,
    /// Logical link identifier (stable across related tasks of one URL)
    pub link_id: LinkId,
    /// Target URL
    pub url: String,
    /// Site family
    pub link_type: LinkType,
    /// Extractor to invoke
    pub scraper_type: ScraperType,
    /// Current status (authoritative copy lives in the state tracker)
    pub status: TaskStatus,
    /// Worker currently processing the task, if any
    pub assigned_worker_id: Option<WorkerId>,
    /// When the task was created
    pub created_at: DateTime<Utc>,
    /// When a worker picked the task up
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Extraction result, present once terminal
    pub result: Option<ScrapeResult>,
    /// Error string for failed tasks
    pub error: Option<String>,
}

impl ScrapeTask {
    /// Create a pending task
    ///
    /// The link type is derived from the scraper type.
    pub fn new(
        task_id: impl Into<TaskId>,
        batch_id: impl Into<BatchId>,
        link_id: impl Into<LinkId>,
        url: impl Into<String>,
        scraper_type: ScraperType,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            batch_id: batch_id.into(),
            link_id: link_id.into(),
            url: url.into(),
            link_type: scraper_type.link_type(),
            scraper_type,
            status: TaskStatus::Pending,
            assigned_worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<String> for BatchId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<String> for LinkId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Structured result returned by an extractor
///
/// This is also the payload persisted to disk for successful tasks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScrapeResult {
    /// Whether extraction succeeded
    pub success: bool,
    /// Target URL
    pub url: String,
    /// Logical link identifier
    pub link_id: LinkId,
    /// Owning batch
    pub batch_id: BatchId,
    /// Extracted content (transcript text, article body, comment dump)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Word count of the extracted content
    #[serde(default)]
    pub word_count: u64,
    /// Error string for failed extractions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Content title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Content author
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Publish date as reported by the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_date: Option<String>,
    /// Detected content language
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Source tag (scraper wire tag)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ScrapeResult {
    /// Build a failed result for a task
    pub fn failed(task: &ScrapeTask, error: impl Into<String>) -> Self {
        Self {
            success: false,
            url: task.url.clone(),
            link_id: task.link_id.clone(),
            batch_id: task.batch_id.clone(),
            content: None,
            word_count: 0,
            error: Some(error.into()),
            title: None,
            author: None,
            publish_date: None,
            language: None,
            source: Some(task.scraper_type.as_str().to_string()),
        }
    }
}

/// Terminal outcome of a link as carried on `scraping:complete_link`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkOutcome {
    /// Extraction succeeded
    Success,
    /// Extraction failed
    Failed,
}

/// Metadata block on `scraping:complete_link` events
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompletionMetadata {
    /// Scraper wire tag
    pub source: String,
    /// Task that produced this completion
    pub task_id: TaskId,
    /// Terminal timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the artifact file was persisted and verified before this event
    pub file_saved: bool,
}

/// Declares one expected link of a batch at initialization time
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LinkDescriptor {
    /// Logical link identifier
    pub link_id: LinkId,
    /// Target URL
    pub url: String,
    /// Extractor to invoke
    pub scraper_type: ScraperType,
}

/// Reason and timestamp recorded when a batch is cancelled
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CancellationInfo {
    /// Reason supplied by the caller
    pub reason: String,
    /// When cancellation was requested
    pub cancelled_at: DateTime<Utc>,
}

/// Event emitted during the scraping lifecycle
///
/// Subscribers receive these via the control center's broadcast channel.
/// Serialized form carries a `type` field with the wire names consumed by
/// the UI collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// A batch's expected link set was declared
    #[serde(rename = "batch:initialized")]
    BatchInitialized {
        /// Batch identifier
        batch_id: BatchId,
        /// Number of tasks the batch is expected to comprise
        expected_total: usize,
        /// Number of scrape processes scheduled (same unit as expected_total)
        total_processes: usize,
        /// Number of distinct URLs across the declared links
        total_links: usize,
        /// Count of declared links per scraper wire tag
        breakdown: HashMap<String, usize>,
    },

    /// Throttled aggregate progress snapshot for a batch
    #[serde(rename = "scraping:status")]
    Status {
        /// Batch identifier
        batch_id: BatchId,
        /// Expected task total (0 = never declared)
        expected_total: usize,
        /// Number of registered links
        total: usize,
        /// Links that reached terminal success
        completed: usize,
        /// Links that reached terminal failure
        failed: usize,
        /// Links currently being extracted
        in_progress: usize,
        /// terminal / max(expected, registered, 1)
        completion_rate: f64,
        /// Mean overall progress across registered links (0-100)
        overall_progress: f64,
        /// Whether the batch has reached its completion floor
        is_100_percent: bool,
    },

    /// A worker began extracting a link
    #[serde(rename = "scraping:start_link")]
    StartLink {
        /// Batch identifier
        batch_id: BatchId,
        /// Logical link identifier
        link_id: LinkId,
        /// Target URL
        url: String,
        /// Scraper wire tag
        scraper: ScraperType,
        /// Worker that picked the task up
        worker_id: WorkerId,
        /// Human-readable status line
        message: String,
    },

    /// Stage-level progress for one link
    #[serde(rename = "scraping:progress")]
    Progress {
        /// Batch identifier
        batch_id: BatchId,
        /// Logical link identifier
        link_id: LinkId,
        /// Target URL
        url: String,
        /// Scraper wire tag
        scraper: ScraperType,
        /// Current pipeline stage
        stage: Stage,
        /// Stage-local progress (0-100)
        progress: f64,
        /// Normalized overall progress (0-100)
        overall_progress: f64,
        /// Human-readable status line
        message: String,
        /// Bytes downloaded so far, when the stage reports them
        #[serde(skip_serializing_if = "Option::is_none")]
        bytes_downloaded: Option<u64>,
        /// Total bytes expected, when known
        #[serde(skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Worker processing the link
        worker_id: WorkerId,
    },

    /// A link reached a terminal state — emitted exactly once per task
    #[serde(rename = "scraping:complete_link")]
    CompleteLink {
        /// Batch identifier
        batch_id: BatchId,
        /// Logical link identifier
        link_id: LinkId,
        /// Target URL
        url: String,
        /// Scraper wire tag
        scraper: ScraperType,
        /// Terminal outcome
        status: LinkOutcome,
        /// Human-readable completion line
        message: String,
        /// Word count for successful extractions
        word_count: u64,
        /// Error string for failures
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// Worker that processed the task
        worker_id: WorkerId,
        /// Completion metadata (task id, persistence flag)
        metadata: CompletionMetadata,
    },

    /// All expected work of a batch reached a terminal state
    #[serde(rename = "scraping:100_percent_complete")]
    AllComplete {
        /// Batch identifier
        batch_id: BatchId,
        /// Expected task total at confirmation time
        expected_total: usize,
        /// Tasks that completed successfully
        completed_count: usize,
        /// Tasks that failed
        failed_count: usize,
    },

    /// A batch was cancelled
    #[serde(rename = "scraping:cancelled")]
    Cancelled {
        /// Batch identifier
        batch_id: BatchId,
        /// Reason supplied by the caller
        reason: String,
    },

    /// Graceful shutdown initiated
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// Verdict returned by the completion arbiter
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Confirmation {
    /// Whether the downstream phase may begin
    pub confirmed: bool,
    /// Expected task total after reconciliation
    pub expected_total: usize,
    /// Number of registered links
    pub registered_count: usize,
    /// Tasks that completed successfully
    pub completed_count: usize,
    /// Tasks that failed
    pub failed_count: usize,
    /// completed + failed
    pub total_final: usize,
    /// total_final / max(expected_total, 1)
    pub completion_rate: f64,
    /// Whether the completion floor was reached
    pub is_100_percent: bool,
    /// True when confirmation short-circuited on cancellation
    #[serde(default)]
    pub cancelled: bool,
    /// Cancellation details, when cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancellation_info: Option<CancellationInfo>,
}

/// Queue statistics
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks currently waiting in the queue
    pub queue_size: usize,
    /// Total tasks ever enqueued
    pub total_added: u64,
    /// Total dequeues minus retractions
    pub total_processed: u64,
    /// added - processed
    pub pending: u64,
}

/// State tracker statistics
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct TrackerStats {
    /// Tasks in Pending
    pub pending: usize,
    /// Tasks in Processing
    pub processing: usize,
    /// Tasks in Completed
    pub completed: usize,
    /// Tasks in Failed
    pub failed: usize,
    /// Tasks in Cancelled
    pub cancelled: usize,
    /// All tracked tasks
    pub total: usize,
}

/// Worker pool statistics
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct WorkerPoolStats {
    /// Workers waiting for work
    pub idle: usize,
    /// Workers extracting a task
    pub processing: usize,
    /// Workers that exited their loop
    pub terminated: usize,
    /// Tasks completed across all workers
    pub total_completed: u64,
    /// Tasks failed across all workers
    pub total_failed: u64,
}

/// Composite control center statistics
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CenterStats {
    /// Queue counters
    pub queue: QueueStats,
    /// Tracker counters
    pub tasks: TrackerStats,
    /// Worker counters
    pub workers: WorkerPoolStats,
    /// Times a worker dequeued a task that turned out terminal or taken
    pub race_conditions_detected: u64,
    /// Seconds between start and end (or now, while running)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<f64>,
    /// When the pool was started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the pool finished or shut down
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}
