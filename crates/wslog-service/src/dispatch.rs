//! Upload targets and the worker pool that feeds them.
//!
//! Each target gets its own worker task and bounded queue. Jobs that fail
//! stay in a per-target backlog and are retried, oldest first, when the
//! next job for that target arrives.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use wslog_store::SummaryRecord;
use wslog_types::Reading;

use crate::config::{DispatchConfig, FileFormat, TargetConfig, TargetKind};

/// Kinds of data a target can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Live readings between log entries.
    Live,
    /// Readings logged by the station.
    Logged,
    /// Completed hourly summaries.
    Hourly,
}

/// A unit of work for an upload target.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchJob {
    /// A live reading.
    Live { reading: Reading },
    /// A logged reading.
    Logged { reading: Reading },
    /// An hourly summary.
    Hourly { summary: SummaryRecord },
}

impl DispatchJob {
    /// The subscription this job belongs to.
    pub fn kind(&self) -> EventKind {
        match self {
            DispatchJob::Live { .. } => EventKind::Live,
            DispatchJob::Logged { .. } => EventKind::Logged,
            DispatchJob::Hourly { .. } => EventKind::Hourly,
        }
    }
}

/// Upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Server returned error {status}: {body}")]
    Response { status: u16, body: String },
}

/// Something that can deliver a [`DispatchJob`].
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Target name used in logs.
    fn name(&self) -> &str;

    /// Deliver one job.
    async fn upload(&self, job: &DispatchJob) -> Result<(), UploadError>;
}

/// Writes jobs to a local file.
#[derive(Debug, Clone)]
pub struct FileUploader {
    name: String,
    path: PathBuf,
    format: FileFormat,
}

impl FileUploader {
    /// Create a file target.
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            format,
        }
    }

    fn io_error(&self, source: std::io::Error) -> UploadError {
        UploadError::Io {
            path: self.path.clone(),
            source,
        }
    }

    async fn replace(&self, job: &DispatchJob) -> Result<(), UploadError> {
        let json = serde_json::to_vec_pretty(job)?;
        let tmp = self.path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&json).await.map_err(|e| self.io_error(e))?;
        file.sync_all().await.map_err(|e| self.io_error(e))?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))
    }

    async fn append(&self, job: &DispatchJob) -> Result<(), UploadError> {
        let mut line = serde_json::to_vec(job)?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| self.io_error(e))?;
        file.write_all(&line).await.map_err(|e| self.io_error(e))?;
        file.flush().await.map_err(|e| self.io_error(e))
    }
}

#[async_trait]
impl Uploader for FileUploader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, job: &DispatchJob) -> Result<(), UploadError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }
        match self.format {
            FileFormat::Latest => self.replace(job).await,
            FileFormat::Lines => self.append(job).await,
        }
    }
}

/// POSTs jobs as JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpUploader {
    name: String,
    url: String,
    client: Client,
}

impl HttpUploader {
    /// Create an HTTP target with a 30 second request timeout.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Result<Self, UploadError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| UploadError::Request(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Uploader for HttpUploader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, job: &DispatchJob) -> Result<(), UploadError> {
        let response = self
            .client
            .post(&self.url)
            .json(job)
            .send()
            .await
            .map_err(|e| UploadError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Response {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// Build the uploader a target configuration describes.
pub fn uploader_for(target: &TargetConfig) -> Result<Arc<dyn Uploader>, UploadError> {
    match target.kind {
        TargetKind::File => {
            let path = target.path.clone().unwrap_or_default();
            Ok(Arc::new(FileUploader::new(&target.name, path, target.format)))
        }
        TargetKind::Http => {
            let url = target.url.clone().unwrap_or_default();
            Ok(Arc::new(HttpUploader::new(&target.name, url)?))
        }
    }
}

struct Route {
    name: String,
    events: Vec<EventKind>,
    tx: mpsc::Sender<DispatchJob>,
}

/// Fans jobs out to per-target workers.
pub struct Dispatcher {
    routes: Vec<Route>,
    tracker: TaskTracker,
    queue_depth: usize,
    backlog: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field(
                "targets",
                &self.routes.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(),
            )
            .field("queue_depth", &self.queue_depth)
            .field("backlog", &self.backlog)
            .finish()
    }
}

impl Dispatcher {
    /// Create a dispatcher with no targets.
    pub fn new(queue_depth: usize, backlog: usize) -> Self {
        Self {
            routes: Vec::new(),
            tracker: TaskTracker::new(),
            queue_depth: queue_depth.max(1),
            backlog: backlog.max(1),
        }
    }

    /// Create a dispatcher with a worker for every configured target.
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(config: &DispatchConfig) -> Result<Self, UploadError> {
        let mut dispatcher = Self::new(config.queue_depth, config.backlog);
        for target in &config.targets {
            dispatcher.add_target(uploader_for(target)?, &target.events);
        }
        Ok(dispatcher)
    }

    /// Start a worker for `uploader`, subscribed to `events`.
    pub fn add_target(&mut self, uploader: Arc<dyn Uploader>, events: &[EventKind]) {
        let (tx, rx) = mpsc::channel(self.queue_depth);
        let name = uploader.name().to_string();
        info!("Starting upload worker for {} ({:?})", name, events);
        self.tracker.spawn(run_worker(uploader, rx, self.backlog));
        self.routes.push(Route {
            name,
            events: events.to_vec(),
            tx,
        });
    }

    /// Number of targets.
    pub fn target_count(&self) -> usize {
        self.routes.len()
    }

    /// Whether any target subscribes to `kind`.
    pub fn wants(&self, kind: EventKind) -> bool {
        self.routes.iter().any(|r| r.events.contains(&kind))
    }

    /// Queue `job` for every subscribed target without waiting.
    ///
    /// A target whose queue is full misses the job.
    pub fn dispatch(&self, job: DispatchJob) {
        let kind = job.kind();
        for route in self.routes.iter().filter(|r| r.events.contains(&kind)) {
            match route.tx.try_send(job.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("Upload queue for {} is full, dropping {:?} job", route.name, kind);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Upload worker for {} has stopped", route.name);
                }
            }
        }
    }

    /// Close all queues and wait for the workers to drain them.
    ///
    /// Returns `false` if the deadline passed with uploads still running.
    pub async fn shutdown(self, deadline: Duration) -> bool {
        let Self { routes, tracker, .. } = self;
        drop(routes);
        tracker.close();
        match tokio::time::timeout(deadline, tracker.wait()).await {
            Ok(()) => {
                debug!("Upload workers finished");
                true
            }
            Err(_) => {
                warn!(
                    "{} upload worker(s) still busy after {:?}, abandoning",
                    tracker.len(),
                    deadline
                );
                false
            }
        }
    }
}

/// Deliver jobs for one target until its queue closes.
async fn run_worker(
    uploader: Arc<dyn Uploader>,
    mut rx: mpsc::Receiver<DispatchJob>,
    backlog_limit: usize,
) {
    let name = uploader.name().to_string();
    let mut backlog: VecDeque<DispatchJob> = VecDeque::new();
    let mut last_error: Option<String> = None;

    while let Some(job) = rx.recv().await {
        backlog.push_back(job);
        while backlog.len() > backlog_limit {
            if let Some(dropped) = backlog.pop_front() {
                warn!("{}: backlog full, dropping oldest {:?} job", name, dropped.kind());
            }
        }

        while let Some(job) = backlog.front() {
            match uploader.upload(job).await {
                Ok(()) => {
                    backlog.pop_front();
                    if last_error.take().is_some() {
                        info!("{}: upload recovered", name);
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    if last_error.as_deref() == Some(message.as_str()) {
                        debug!("{}: upload failed again: {}", name, message);
                    } else {
                        error!("{}: upload failed: {}", name, message);
                        last_error = Some(message);
                    }
                    break;
                }
            }
        }
    }

    if !backlog.is_empty() {
        warn!("{}: {} job(s) undelivered at shutdown", name, backlog.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use time::macros::datetime;
    use wslog_types::Sample;

    fn logged(minute: u8) -> DispatchJob {
        DispatchJob::Logged {
            reading: Sample {
                delay: Some(5),
                temp_out: Some(f64::from(minute)),
                ..Default::default()
            }
            .at(datetime!(2024-06-01 12:00:00) + time::Duration::minutes(i64::from(minute))),
        }
    }

    /// Records delivered jobs and fails while `failing` is set.
    #[derive(Default)]
    struct Recorder {
        failing: AtomicBool,
        delivered: Mutex<Vec<EventKind>>,
        attempts: Mutex<u32>,
    }

    #[async_trait]
    impl Uploader for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn upload(&self, job: &DispatchJob) -> Result<(), UploadError> {
            *self.attempts.lock().unwrap() += 1;
            if self.failing.load(Ordering::SeqCst) {
                return Err(UploadError::Request("connection refused".to_string()));
            }
            self.delivered.lock().unwrap().push(job.kind());
            Ok(())
        }
    }

    #[test]
    fn test_job_serialization_is_tagged() {
        let json = serde_json::to_value(logged(5)).unwrap();
        assert_eq!(json["type"], "logged");
        assert_eq!(json["reading"]["timestamp"], "2024-06-01 12:05:00");
        assert_eq!(json["reading"]["temp_out"], 5.0);
    }

    #[tokio::test]
    async fn test_jobs_are_routed_by_kind() {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = Dispatcher::new(8, 8);
        dispatcher.add_target(recorder.clone(), &[EventKind::Logged]);
        assert!(dispatcher.wants(EventKind::Logged));
        assert!(!dispatcher.wants(EventKind::Live));

        dispatcher.dispatch(DispatchJob::Live {
            reading: Sample::default().at(datetime!(2024-06-01 12:00:00)),
        });
        dispatcher.dispatch(logged(1));
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

        assert_eq!(*recorder.delivered.lock().unwrap(), vec![EventKind::Logged]);
    }

    #[tokio::test]
    async fn test_failed_jobs_are_retried_with_next_job() {
        let recorder = Arc::new(Recorder::default());
        recorder.failing.store(true, Ordering::SeqCst);
        let mut dispatcher = Dispatcher::new(8, 8);
        dispatcher.add_target(recorder.clone(), &[EventKind::Logged]);

        dispatcher.dispatch(logged(1));
        dispatcher.dispatch(logged(2));
        while *recorder.attempts.lock().unwrap() < 2 {
            tokio::task::yield_now().await;
        }

        recorder.failing.store(false, Ordering::SeqCst);
        dispatcher.dispatch(logged(3));
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

        assert_eq!(recorder.delivered.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_backlog_drops_oldest_when_full() {
        let recorder = Arc::new(Recorder::default());
        recorder.failing.store(true, Ordering::SeqCst);
        let mut dispatcher = Dispatcher::new(16, 2);
        dispatcher.add_target(recorder.clone(), &[EventKind::Logged]);

        for minute in 0..5 {
            dispatcher.dispatch(logged(minute));
        }
        while *recorder.attempts.lock().unwrap() < 5 {
            tokio::task::yield_now().await;
        }
        recorder.failing.store(false, Ordering::SeqCst);
        dispatcher.dispatch(logged(5));
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);

        // only the two newest jobs survive in the backlog
        assert_eq!(recorder.delivered.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_file_uploader_latest_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("latest.json");
        let uploader = FileUploader::new("latest", &path, FileFormat::Latest);

        uploader.upload(&logged(1)).await.unwrap();
        uploader.upload(&logged(2)).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["reading"]["temp_out"], 2.0);
        assert!(!path.with_extension("tmp").exists());
    }

    #[tokio::test]
    async fn test_file_uploader_lines_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("readings.jsonl");
        let uploader = FileUploader::new("lines", &path, FileFormat::Lines);

        for minute in 1..=3 {
            uploader.upload(&logged(minute)).await.unwrap();
        }

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        let last: serde_json::Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(last["reading"]["timestamp"], "2024-06-01 12:03:00");
    }

    #[tokio::test]
    async fn test_from_config_builds_targets() {
        let dir = tempfile::tempdir().unwrap();
        let config = DispatchConfig {
            targets: vec![
                TargetConfig {
                    name: "file".to_string(),
                    kind: TargetKind::File,
                    path: Some(dir.path().join("latest.json")),
                    url: None,
                    format: FileFormat::Latest,
                    events: vec![EventKind::Hourly],
                },
                TargetConfig {
                    name: "http".to_string(),
                    kind: TargetKind::Http,
                    path: None,
                    url: Some("http://127.0.0.1:9/ingest".to_string()),
                    format: FileFormat::Latest,
                    events: vec![EventKind::Live],
                },
            ],
            ..Default::default()
        };
        let dispatcher = Dispatcher::from_config(&config).unwrap();
        assert_eq!(dispatcher.target_count(), 2);
        assert!(dispatcher.wants(EventKind::Hourly));
        assert!(!dispatcher.wants(EventKind::Logged));
        assert!(dispatcher.shutdown(Duration::from_secs(5)).await);
    }
}
