//! Batch configuration and the orchestrator that drives books through the
//! pipeline.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, watch};
use tokio::task::{AbortHandle, JoinSet};

use crate::discovery::{discover_books, should_skip};
use crate::error::{Error, Result};
use crate::filter::ContentFilter;
use crate::path_utils::validate_path;
use crate::pipeline::{self, Services};
use crate::report::{BatchReport, BatchResult};
use crate::synthesis::{ChapterSelection, Packager, PostProcessor, Synthesizer};
use crate::task::BookTask;
use crate::types::{DetectionMethod, HierarchyStyle, ProcessingStatus, ResumePolicy};

/// Voice used when none is configured.
pub const DEFAULT_VOICE: &str = "en-US-AndrewNeural";

/// File name of the persisted batch state inside the output directory.
pub const STATE_FILE_NAME: &str = ".chapterhouse_state.json";

fn default_concurrency() -> usize {
    num_cpus::get().clamp(1, 4)
}

/// Immutable parameters of one batch invocation.
///
/// ```rust,no_run
/// # use chapterhouse::prelude::*;
/// let config = BatchConfig::builder()
///     .input_path("./library")
///     .recursive(true)
///     .output_dir("./audiobooks")
///     .detection_method(DetectionMethod::Auto)
///     .build()
///     .expect("Invalid configuration");
/// ```
#[derive(Debug, Clone, PartialEq, derive_builder::Builder, Serialize, Deserialize)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct BatchConfig {
    /// A single book or a directory of books.
    pub input_path: PathBuf,

    /// Descend into subdirectories during discovery.
    #[builder(default = "false")]
    pub recursive: bool,

    /// Where outputs are written. Defaults to each book's own directory.
    #[builder(default)]
    pub output_dir: Option<PathBuf>,

    #[builder(default = "DEFAULT_VOICE.to_string()")]
    pub voice: String,

    #[builder(default)]
    pub detection_method: DetectionMethod,

    #[builder(default)]
    pub hierarchy_style: HierarchyStyle,

    /// Deepest chapter level included in the plan.
    #[builder(default)]
    pub max_depth: Option<usize>,

    /// Skip books whose audio output already exists.
    #[builder(default = "true")]
    pub skip_existing: bool,

    /// Stop after writing the text and structure exports.
    #[builder(default = "false")]
    pub export_only: bool,

    /// Run each book in its own worker task with a fault boundary.
    #[builder(default = "false")]
    pub job_isolation: bool,

    /// Speaking rate adjustment passed to the synthesizer, e.g. `"+10%"`.
    #[builder(default)]
    pub rate: Option<String>,

    /// Volume adjustment passed to the synthesizer, e.g. `"-5%"`.
    #[builder(default)]
    pub volume: Option<String>,

    /// Front matter, back matter and trailing notes to leave out of the plan.
    #[builder(default)]
    pub content_filter: ContentFilter,

    /// Chapter selection such as `"1-5"` or `"2,4,6"`.
    #[builder(default)]
    pub chapters: Option<String>,

    /// Only file names matching this regex are discovered.
    #[builder(default)]
    pub include_pattern: Option<String>,

    /// File names matching this regex are never discovered.
    #[builder(default)]
    pub exclude_pattern: Option<String>,

    #[builder(default = "\"mp3\".to_string()")]
    pub output_extension: String,

    /// Per-book time budget; an overrunning book is stopped and marked FAILED.
    #[builder(default)]
    pub task_timeout: Option<Duration>,

    /// Books processed at once in isolated mode.
    #[builder(default = "default_concurrency()")]
    pub max_concurrent_jobs: usize,

    /// Persist the report to the state file after every book.
    #[builder(default = "true")]
    pub save_state: bool,
}

impl BatchConfigBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        if let Some(voice) = &self.voice
            && voice.trim().is_empty()
        {
            return Err("Voice must not be empty".to_string());
        }
        if let Some(Some(0)) = self.max_depth {
            return Err("max_depth must be at least 1".to_string());
        }
        if let Some(0) = self.max_concurrent_jobs {
            return Err("max_concurrent_jobs must be at least 1".to_string());
        }
        if let Some(Some(timeout)) = self.task_timeout
            && timeout.is_zero()
        {
            return Err("task_timeout must be greater than zero".to_string());
        }
        if let Some(Some(pattern)) = &self.include_pattern
            && Regex::new(pattern).is_err()
        {
            return Err(format!("Invalid include_pattern: {}", pattern));
        }
        if let Some(Some(pattern)) = &self.exclude_pattern
            && Regex::new(pattern).is_err()
        {
            return Err(format!("Invalid exclude_pattern: {}", pattern));
        }
        if let Some(Some(chapters)) = &self.chapters
            && let Err(e) = chapters.parse::<ChapterSelection>()
        {
            return Err(e.to_string());
        }
        if let Some(extension) = &self.output_extension
            && extension.trim_start_matches('.').is_empty()
        {
            return Err("output_extension must not be empty".to_string());
        }
        Ok(())
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder::default()
    }

    /// Checks the input path before any task is created. A missing or
    /// unusable input is fatal for the whole batch.
    pub fn preflight_check(&self) -> Result<&Self> {
        if self.input_path.as_os_str().is_empty() {
            return Err(Error::Other("`input_path` must be set".to_string()));
        }
        validate_path(&self.input_path)?;
        if !self.input_path.exists() {
            return Err(Error::NotFound(format!(
                "Input path does not exist: {:?}",
                self.input_path
            )));
        }
        if let Some(output_dir) = &self.output_dir
            && output_dir.exists()
            && !output_dir.is_dir()
        {
            return Err(Error::InvalidPath(
                output_dir.clone(),
                "Output path is not a directory.".to_string(),
            ));
        }
        Ok(self)
    }

    /// The parsed chapter selection, if one is configured.
    pub fn chapter_selection(&self) -> Result<Option<ChapterSelection>> {
        self.chapters.as_deref().map(str::parse).transpose()
    }

    /// Directory holding the state file: the output directory, else the
    /// input directory (or the input file's directory).
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.output_dir {
            return dir.clone();
        }
        if self.input_path.is_dir() {
            self.input_path.clone()
        } else {
            self.input_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."))
        }
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.state_dir().join(STATE_FILE_NAME)
    }
}

/// Requests cancellation of a running batch from another task.
///
/// Books already finished keep their status; books not yet finished stay
/// PENDING so the batch can be resumed.
#[derive(Clone)]
pub struct CancelHandle {
    sender: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    fn reset(&self) {
        self.sender.send_replace(false);
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Called after each book finishes with the task, the number of books
/// finished in this run and the number scheduled.
pub type ProgressCallback = Arc<dyn Fn(&BookTask, usize, usize) + Send + Sync>;

/// Aborts a spawned worker when the supervising future is dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Discovers books, applies the skip policy and runs each pending book's
/// pipeline, containing failures to the book that caused them.
///
/// Only the processor writes to its [`BatchResult`]; workers hand their
/// finished [`BookTask`] back and it is stored by id.
pub struct BatchProcessor {
    config: Arc<BatchConfig>,
    services: Services,
    result: BatchResult,
    cancel: CancelHandle,
    progress: Option<ProgressCallback>,
}

impl BatchProcessor {
    pub fn new(config: BatchConfig) -> Self {
        let result = BatchResult::new(config.clone());
        Self {
            config: Arc::new(config),
            services: Services::default(),
            result,
            cancel: CancelHandle::new(),
            progress: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: impl Synthesizer + 'static) -> Self {
        self.services.synthesizer = Some(Arc::new(synthesizer));
        self
    }

    /// Adds a post-processor; they run in the order they were added.
    pub fn with_post_processor(mut self, processor: impl PostProcessor + 'static) -> Self {
        self.services.post_processors.push(Arc::new(processor));
        self
    }

    /// Replaces the default [`crate::synthesis::ConcatPackager`].
    pub fn with_packager(mut self, packager: impl Packager + 'static) -> Self {
        self.services.packager = Arc::new(packager);
        self
    }

    pub fn on_progress(
        mut self,
        callback: impl Fn(&BookTask, usize, usize) + Send + Sync + 'static,
    ) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn result(&self) -> &BatchResult {
        &self.result
    }

    pub fn into_result(self) -> BatchResult {
        self.result
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Discovers the input and creates one task per book. Books that
    /// [`should_skip`] are marked SKIPPED right away; the returned list holds
    /// only the pending tasks, while the result keeps all of them.
    pub async fn prepare(&mut self) -> Result<Vec<BookTask>> {
        self.config.preflight_check()?;
        let books = discover_books(&self.config).await?;
        info!(
            "Discovered {} book(s) in {:?}",
            books.len(),
            self.config.input_path
        );

        let mut tasks = Vec::with_capacity(books.len());
        for (id, path) in books.into_iter().enumerate() {
            let mut task = BookTask::new(id, path);
            if should_skip(&task.source_path, &self.config) {
                debug!("Skipping {:?}: output already exists", task.source_path);
                task.skip()?;
            }
            tasks.push(task);
        }

        self.result = BatchResult::new((*self.config).clone());
        self.result.tasks = tasks;
        Ok(self.pending_tasks())
    }

    /// Rebuilds the task list from a persisted report. FAILED and unfinished
    /// tasks become PENDING again (and are re-checked against the skip
    /// policy); COMPLETED and SKIPPED tasks are kept as they are.
    ///
    /// With [`ResumePolicy::Reconcile`] the input is rediscovered: reported
    /// books that no longer exist are dropped and new books are appended.
    pub async fn resume(
        &mut self,
        report: BatchReport,
        policy: ResumePolicy,
    ) -> Result<Vec<BookTask>> {
        let mut tasks: Vec<BookTask> = report
            .tasks
            .into_iter()
            .map(|task| match task.status() {
                ProcessingStatus::Completed | ProcessingStatus::Skipped => task,
                _ => task.reset(),
            })
            .collect();

        if policy == ResumePolicy::Reconcile {
            self.config.preflight_check()?;
            let discovered = discover_books(&self.config).await?;
            let present: HashSet<&PathBuf> = discovered.iter().collect();
            let before = tasks.len();
            tasks.retain(|task| present.contains(&task.source_path));
            if tasks.len() != before {
                info!("Dropped {} book(s) no longer present", before - tasks.len());
            }

            let known: HashSet<PathBuf> = tasks.iter().map(|t| t.source_path.clone()).collect();
            let mut next_id = tasks.iter().map(|t| t.id + 1).max().unwrap_or(0);
            for path in discovered {
                if !known.contains(&path) {
                    debug!("New book since last run: {:?}", path);
                    tasks.push(BookTask::new(next_id, path));
                    next_id += 1;
                }
            }
        }

        for task in tasks.iter_mut() {
            if task.status() == ProcessingStatus::Pending
                && should_skip(&task.source_path, &self.config)
            {
                task.skip()?;
            }
        }

        self.result = BatchResult::new((*self.config).clone());
        self.result.tasks = tasks;
        info!(
            "Resuming batch: {} of {} book(s) pending",
            self.result.pending(),
            self.result.total()
        );
        Ok(self.pending_tasks())
    }

    /// Reads the state file left by an earlier run, if any.
    pub async fn load_state(&self) -> Result<Option<BatchReport>> {
        let path = self.config.state_file_path();
        if !path.is_file() {
            return Ok(None);
        }
        Ok(Some(BatchReport::load(&path).await?))
    }

    fn pending_tasks(&self) -> Vec<BookTask> {
        self.result
            .tasks
            .iter()
            .filter(|t| t.status() == ProcessingStatus::Pending)
            .cloned()
            .collect()
    }

    /// Runs the pipeline of every pending task in `tasks`.
    ///
    /// A failing book is recorded as FAILED and the batch moves on. Only
    /// errors that prevent the batch itself from running are returned.
    pub async fn run(&mut self, tasks: Vec<BookTask>) -> Result<&BatchResult> {
        let tasks: Vec<BookTask> = tasks
            .into_iter()
            .filter(|task| match self.result.task(task.id) {
                Some(known) if known.status() == ProcessingStatus::Pending => true,
                Some(known) => {
                    debug!("Not running {:?}: already {}", known.source_path, known.status());
                    false
                }
                None => {
                    warn!("Not running {:?}: unknown task id {}", task.source_path, task.id);
                    false
                }
            })
            .collect();

        self.cancel.reset();
        self.result.start_time.get_or_insert_with(Utc::now);
        self.result.end_time = None;

        let mode = if self.config.job_isolation {
            "isolated"
        } else {
            "sequential"
        };
        info!("Processing {} book(s) ({} mode)", tasks.len(), mode);

        if self.config.job_isolation {
            self.run_isolated(tasks).await;
        } else {
            self.run_sequential(tasks).await;
        }

        self.result.end_time = Some(Utc::now());
        self.persist_state().await;
        info!(
            "Batch finished: {} completed, {} failed, {} skipped, {} pending",
            self.result.completed(),
            self.result.failed(),
            self.result.skipped(),
            self.result.pending()
        );
        Ok(&self.result)
    }

    /// [`prepare`](Self::prepare) followed by [`run`](Self::run).
    pub async fn process(&mut self) -> Result<&BatchResult> {
        let tasks = self.prepare().await?;
        self.run(tasks).await
    }

    async fn run_sequential(&mut self, tasks: Vec<BookTask>) {
        let total = tasks.len();
        for (index, task) in tasks.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let fallback = task.clone();
            let pipeline = AssertUnwindSafe(pipeline::process_book(
                task,
                Arc::clone(&self.config),
                self.services.clone(),
            ))
            .catch_unwind();
            let bounded = with_timeout(pipeline, self.config.task_timeout);

            let finished = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                outcome = bounded => Some(match outcome {
                    Ok(Ok(task)) => task,
                    Ok(Err(panic)) => failed(fallback, panic_message(panic.as_ref())),
                    Err(e) => failed(fallback, e),
                }),
            };

            match finished {
                Some(task) => self.record(task, index + 1, total).await,
                None => {
                    info!("Batch cancelled; remaining books stay pending");
                    break;
                }
            }
        }
    }

    async fn run_isolated(&mut self, tasks: Vec<BookTask>) {
        let total = tasks.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_jobs));
        let timeout = self.config.task_timeout;
        let mut workers = JoinSet::new();
        let mut book_ids = HashMap::new();

        for task in tasks {
            let id = task.id;
            let semaphore = Arc::clone(&semaphore);
            let config = Arc::clone(&self.config);
            let services = self.services.clone();

            let handle = workers.spawn(async move {
                let fallback = task.clone();
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return failed(fallback, Error::from(e)),
                };

                let worker = tokio::spawn(pipeline::process_book(task, config, services));
                let _guard = AbortOnDrop(worker.abort_handle());
                match with_timeout(worker, timeout).await {
                    Ok(Ok(task)) => task,
                    Ok(Err(join_error)) if join_error.is_panic() => {
                        failed(fallback, panic_message(join_error.into_panic().as_ref()))
                    }
                    Ok(Err(join_error)) => failed(fallback, Error::from(join_error)),
                    Err(e) => failed(fallback, e),
                }
            });
            book_ids.insert(handle.id(), id);
        }

        let mut finished = 0;
        loop {
            let joined = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("Batch cancelled; stopping {} running book(s)", workers.len());
                    workers.abort_all();
                    break;
                }
                joined = workers.join_next_with_id() => joined,
            };

            let task = match joined {
                None => break,
                Some(Ok((_, task))) => task,
                Some(Err(join_error)) => {
                    // The supervisor itself died; fail the book it was watching.
                    let Some(task) = book_ids
                        .get(&join_error.id())
                        .and_then(|id| self.result.task(*id))
                        .cloned()
                    else {
                        warn!("Lost track of a worker: {}", join_error);
                        continue;
                    };
                    failed(task, Error::from(join_error))
                }
            };
            finished += 1;
            self.record(task, finished, total).await;
        }
    }

    /// Stores a finished task, reports progress and persists state.
    async fn record(&mut self, task: BookTask, finished: usize, total: usize) {
        match task.status() {
            ProcessingStatus::Completed => info!(
                "[{}/{}] Completed {:?} ({} chapters)",
                finished, total, task.source_path, task.chapter_count
            ),
            ProcessingStatus::Failed => warn!(
                "[{}/{}] Failed {:?}: {}",
                finished,
                total,
                task.source_path,
                task.error_message().unwrap_or("Unknown error")
            ),
            status => debug!("[{}/{}] {:?} is {}", finished, total, task.source_path, status),
        }

        let id = task.id;
        match self.result.task_mut(id) {
            Some(slot) => *slot = task,
            None => warn!("Finished task {} is not part of this batch", id),
        }

        if let (Some(callback), Some(task)) = (&self.progress, self.result.task(id)) {
            callback(task, finished, total);
        }
        self.persist_state().await;
    }

    /// Writes the state file while work remains, removes it once none does.
    async fn persist_state(&self) {
        if !self.config.save_state {
            return;
        }
        let path = self.config.state_file_path();
        if self.result.has_unfinished() {
            if let Err(e) = self.result.save_report(&path).await {
                warn!("Failed to save batch state to {:?}: {}", path, e);
            }
        } else if path.is_file()
            && let Err(e) = tokio::fs::remove_file(&path).await
        {
            warn!("Failed to remove batch state {:?}: {}", path, e);
        }
    }
}

async fn with_timeout<F: Future>(future: F, timeout: Option<Duration>) -> Result<F::Output> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, future)
            .await
            .map_err(|_| Error::Timeout(limit)),
        None => Ok(future.await),
    }
}

/// Marks a not-yet-finished copy of a task as FAILED with `cause`.
fn failed(mut task: BookTask, cause: impl fmt::Display) -> BookTask {
    task.start_time.get_or_insert_with(Utc::now);
    if let Err(e) = task.fail(cause.to_string()) {
        warn!("Could not mark {:?} as failed: {}", task.source_path, e);
    }
    task
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("Pipeline panicked: {}", detail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = BatchConfig::builder().input_path("books").build().unwrap();
        assert_eq!(config.voice, DEFAULT_VOICE);
        assert_eq!(config.detection_method, DetectionMethod::Combined);
        assert_eq!(config.hierarchy_style, HierarchyStyle::Flat);
        assert!(config.skip_existing);
        assert!(!config.export_only);
        assert!(!config.job_isolation);
        assert!(config.save_state);
        assert_eq!(config.output_extension, "mp3");
        assert!((1..=4).contains(&config.max_concurrent_jobs));
        assert_eq!(config.chapter_selection().unwrap(), None);
    }

    #[test]
    fn test_builder_validation() {
        assert!(BatchConfig::builder().build().is_err());
        assert!(
            BatchConfig::builder()
                .input_path("books")
                .max_depth(0usize)
                .build()
                .is_err()
        );
        assert!(
            BatchConfig::builder()
                .input_path("books")
                .include_pattern("([")
                .build()
                .is_err()
        );
        assert!(
            BatchConfig::builder()
                .input_path("books")
                .chapters("3-1")
                .build()
                .is_err()
        );
        assert!(
            BatchConfig::builder()
                .input_path("books")
                .voice("  ")
                .build()
                .is_err()
        );
        assert!(
            BatchConfig::builder()
                .input_path("books")
                .task_timeout(Duration::ZERO)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_builder_error_converts() {
        let err: Error = BatchConfig::builder().build().unwrap_err().into();
        assert!(matches!(err, Error::ConfigBuilder(_)));
    }

    #[test]
    fn test_state_dir_prefers_output_dir() {
        let config = BatchConfig::builder()
            .input_path("books/one.epub")
            .output_dir("out")
            .build()
            .unwrap();
        assert_eq!(config.state_file_path(), Path::new("out").join(STATE_FILE_NAME));

        let config = BatchConfig::builder()
            .input_path("books/one.epub")
            .build()
            .unwrap();
        assert_eq!(config.state_dir(), Path::new("books"));
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = BatchConfig::builder()
            .input_path("books")
            .task_timeout(Duration::from_secs(30))
            .chapters("1-3")
            .build()
            .unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: BatchConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "Pipeline panicked: boom");
    }
}
