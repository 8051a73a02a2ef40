//! Batch scheduler: runs one job from raw rows to a finished archive.
//!
//! Records are processed in contiguous groups of `group_size`. Members of a
//! group run concurrently; the next group starts only after every member has
//! settled and the cooldown has elapsed. The template is decoded once and the
//! delivery channel acquired once per job, both before the first group.

use std::sync::Arc;

use certdrop_core::{RawFields, normalize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{BatchSummary, JobId, JobSnapshot, JobStatus, RecordFailure, RecordOutcome};
use crate::archive::{self, ArchiveError};
use crate::config::EngineConfig;
use crate::delivery::{
    Attachment, ChannelProvider, DeliveryChannel, DeliveryError, OutgoingMail, personalize,
    subject_line,
};
use crate::render::{RenderOptions, TemplateEngine, TemplateError, TemplateUpload};
use crate::source::{CsvRecordSource, RecordSource, SourceError};
use crate::storage::{ArtifactStore, StorageError};

/// Rows of a batch, either already split into fields or still encoded.
#[derive(Debug, Clone)]
pub enum RecordInput {
    Parsed(Vec<RawFields>),
    Csv(Vec<u8>),
}

/// Per-job settings supplied with the upload.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Sender identity the channel authenticates as
    pub sender: String,
    /// Credential exchanged for channel access
    pub credential: String,
    pub subject: Option<String>,
    /// Body with an optional `[Name]` placeholder
    pub body_template: Option<String>,
    pub render: RenderOptions,
}

impl BatchSettings {
    pub fn new(sender: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            credential: credential.into(),
            subject: None,
            body_template: None,
            render: RenderOptions::default(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_template = Some(body.into());
        self
    }

    pub fn with_render(mut self, render: RenderOptions) -> Self {
        self.render = render;
        self
    }
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors that end a job in `error`.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("parsing records failed: {0}")]
    Source(#[from] SourceError),
    #[error("template could not be loaded: {0}")]
    Template(#[from] TemplateError),
    #[error("delivery channel unavailable: {0}")]
    Channel(#[from] DeliveryError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("archive failed: {0}")]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("{0} task failed: {1}")]
    Task(&'static str, String),
}

/// What the transport layer needs from the engine.
#[async_trait::async_trait]
pub trait BatchService: Send + Sync {
    /// Accept a batch and start it in the background.
    async fn submit(
        &self,
        input: RecordInput,
        template: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<JobId, EngineError>;

    async fn status(&self, job_id: JobId) -> Result<Option<JobSnapshot>, EngineError>;

    /// Archive bytes of a completed job.
    async fn archive(&self, job_id: JobId) -> Result<Vec<u8>, EngineError>;
}

struct Inner<T, C, S> {
    templates: T,
    channels: C,
    jobs: S,
    artifacts: ArtifactStore,
    source: CsvRecordSource,
    config: EngineConfig,
}

/// The batch engine. Cheap to clone; clones share one registry.
pub struct BatchEngine<T, C, S> {
    inner: Arc<Inner<T, C, S>>,
}

impl<T, C, S> Clone for BatchEngine<T, C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, C, S> BatchEngine<T, C, S>
where
    T: TemplateEngine,
    C: ChannelProvider,
    S: JobStore + 'static,
{
    pub fn new(config: EngineConfig, templates: T, channels: C, jobs: S) -> Self {
        let artifacts = ArtifactStore::new(config.storage_root.clone());
        Self {
            inner: Arc::new(Inner {
                templates,
                channels,
                jobs,
                artifacts,
                source: CsvRecordSource::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn jobs(&self) -> &S {
        &self.inner.jobs
    }

    /// Register the job in `parsing` and run it on the tokio runtime.
    ///
    /// Returns as soon as the job is registered. Must be called from within a
    /// runtime. A run that panics is recorded as `error`.
    pub fn submit(
        &self,
        input: RecordInput,
        template: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<JobId, EngineError> {
        let job_id = JobId::new();
        self.inner.jobs.create(job_id)?;
        info!(job_id = %job_id, "batch accepted");

        let engine = self.clone();
        let run = tokio::spawn(async move { engine.run(job_id, input, template, settings).await });

        let supervisor = self.clone();
        tokio::spawn(async move {
            if let Err(e) = run.await {
                error!(job_id = %job_id, error = %e, "batch run aborted");
                supervisor.record_failure(job_id, &format!("batch run aborted: {e}"));
            }
        });

        Ok(job_id)
    }

    /// Run an already registered job to a terminal status.
    ///
    /// Any job-level error moves the job to `error` before it is returned.
    pub async fn run(
        &self,
        job_id: JobId,
        input: RecordInput,
        template: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<BatchSummary, JobError> {
        let result = self.execute(job_id, input, template, settings).await;
        match &result {
            Ok(summary) => info!(
                job_id = %job_id,
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                groups = summary.groups,
                "batch completed"
            ),
            Err(e) => {
                error!(job_id = %job_id, error = %e, "batch failed");
                self.record_failure(job_id, &e.to_string());
            }
        }
        if result.is_err() {
            if let Err(e) = self.inner.artifacts.remove_job_dir(job_id).await {
                warn!(job_id = %job_id, error = %e, "failed to remove artifact directory");
            }
        }
        result
    }

    pub fn status(&self, job_id: JobId) -> Result<Option<JobSnapshot>, EngineError> {
        Ok(self.inner.jobs.get(job_id)?)
    }

    /// Archive bytes, or `NotFound` unless the job completed and its archive
    /// is still on disk.
    pub async fn archive(&self, job_id: JobId) -> Result<Vec<u8>, EngineError> {
        let snapshot = self
            .inner
            .jobs
            .get(job_id)?
            .ok_or(EngineError::NotFound(job_id))?;
        if snapshot.status != JobStatus::Completed {
            return Err(EngineError::NotFound(job_id));
        }
        self.inner
            .artifacts
            .read_archive(job_id)
            .await?
            .ok_or(EngineError::NotFound(job_id))
    }

    fn record_failure(&self, job_id: JobId, reason: &str) {
        if let Err(e) = self.inner.jobs.fail(job_id, reason.to_string()) {
            warn!(job_id = %job_id, error = %e, "could not mark job as failed");
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        input: RecordInput,
        template: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<BatchSummary, JobError> {
        let rows = match input {
            RecordInput::Parsed(rows) => rows,
            RecordInput::Csv(bytes) => self.inner.source.read_records(&bytes)?,
        };
        let total = rows.len() as u64;
        self.inner.jobs.begin_processing(job_id, total)?;
        info!(job_id = %job_id, total, "processing started");

        self.inner.artifacts.prepare(job_id).await?;

        let summary = if rows.is_empty() {
            BatchSummary::default()
        } else {
            self.process(job_id, rows, template, settings).await?
        };

        archive::finalize(&self.inner.artifacts, job_id).await?;
        let location = format!(
            "{}/{}",
            self.inner.config.download_prefix.trim_end_matches('/'),
            job_id
        );
        self.inner.jobs.complete(job_id, location)?;
        Ok(summary)
    }

    async fn process(
        &self,
        job_id: JobId,
        rows: Vec<RawFields>,
        upload: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<BatchSummary, JobError> {
        let template = {
            let inner = Arc::clone(&self.inner);
            tokio::task::spawn_blocking(move || inner.templates.decode(&upload.bytes, upload.kind))
                .await
                .map_err(|e| JobError::Task("template decode", e.to_string()))??
        };
        let template = Arc::new(template);
        debug!(job_id = %job_id, "template decoded");

        let channel = self
            .inner
            .channels
            .acquire(&settings.sender, &settings.credential)
            .await?;
        let channel = Arc::new(channel);
        debug!(job_id = %job_id, sender = %settings.sender, "delivery channel acquired");

        let letter = Arc::new(Letter::new(&settings, self.inner.config.default_font_size));
        let summary = self
            .run_groups(job_id, rows, &template, &channel, &letter)
            .await;

        match Arc::try_unwrap(channel) {
            Ok(channel) => channel.close().await,
            Err(_) => warn!(job_id = %job_id, "delivery channel still shared at close"),
        }
        summary
    }

    async fn run_groups(
        &self,
        job_id: JobId,
        rows: Vec<RawFields>,
        template: &Arc<T::Template>,
        channel: &Arc<C::Channel>,
        letter: &Arc<Letter>,
    ) -> Result<BatchSummary, JobError> {
        let group_size = self.inner.config.group_size.max(1);
        let mut summary = BatchSummary::default();
        let mut rows = rows.into_iter().peekable();

        while rows.peek().is_some() {
            if summary.groups > 0 {
                debug!(
                    job_id = %job_id,
                    cooldown_ms = self.inner.config.cooldown.as_millis() as u64,
                    "cooling down before next group"
                );
                tokio::time::sleep(self.inner.config.cooldown).await;
                summary.cooldowns += 1;
            }
            summary.groups += 1;

            let mut tasks = JoinSet::new();
            for raw in rows.by_ref().take(group_size) {
                tasks.spawn(process_record(
                    Arc::clone(&self.inner),
                    job_id,
                    raw,
                    Arc::clone(template),
                    Arc::clone(channel),
                    Arc::clone(letter),
                ));
            }

            while let Some(joined) = tasks.join_next().await {
                let outcome = joined.unwrap_or_else(|e| {
                    warn!(job_id = %job_id, error = %e, "record task aborted");
                    RecordOutcome::Failed(RecordFailure::Aborted(e.to_string()))
                });
                let snapshot = match self.inner.jobs.record_outcome(job_id, outcome.is_success()) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        // Settle the rest of the group so no task keeps the channel alive.
                        tasks.shutdown().await;
                        return Err(e.into());
                    }
                };
                debug!(
                    job_id = %job_id,
                    processed = snapshot.processed,
                    total = snapshot.total,
                    "record settled"
                );
                summary.outcomes.push(outcome);
            }
        }

        Ok(summary)
    }
}

/// Mail settings resolved once per job.
#[derive(Debug)]
struct Letter {
    subject: String,
    body_template: Option<String>,
    render: RenderOptions,
}

impl Letter {
    fn new(settings: &BatchSettings, default_font_size: f32) -> Self {
        let mut render = settings.render;
        if !(render.font_size.is_finite() && render.font_size > 0.0) {
            render.font_size = default_font_size;
        }
        Self {
            subject: subject_line(settings.subject.as_deref()),
            body_template: settings.body_template.clone(),
            render,
        }
    }
}

async fn process_record<T, C, S>(
    inner: Arc<Inner<T, C, S>>,
    job_id: JobId,
    raw: RawFields,
    template: Arc<T::Template>,
    channel: Arc<C::Channel>,
    letter: Arc<Letter>,
) -> RecordOutcome
where
    T: TemplateEngine,
    C: ChannelProvider,
    S: JobStore + 'static,
{
    match deliver_record(&inner, job_id, raw, template, &channel, &letter).await {
        Ok(file_name) => {
            debug!(job_id = %job_id, file_name = %file_name, "record delivered");
            RecordOutcome::Delivered { file_name }
        }
        Err(failure) => {
            warn!(job_id = %job_id, error = %failure, "record failed");
            RecordOutcome::Failed(failure)
        }
    }
}

/// Render, persist and dispatch one record. The artifact stays on disk even
/// when dispatch fails.
async fn deliver_record<T, C, S>(
    inner: &Arc<Inner<T, C, S>>,
    job_id: JobId,
    raw: RawFields,
    template: Arc<T::Template>,
    channel: &C::Channel,
    letter: &Letter,
) -> Result<String, RecordFailure>
where
    T: TemplateEngine,
    C: ChannelProvider,
    S: JobStore + 'static,
{
    let record = normalize(raw)?;

    let bytes = {
        let inner = Arc::clone(inner);
        let name = record.display_name().to_string();
        let options = letter.render;
        tokio::task::spawn_blocking(move || inner.templates.render(&template, &name, &options))
            .await
            .map_err(|e| RecordFailure::Render(format!("render task failed: {e}")))?
            .map_err(|e| RecordFailure::Render(e.to_string()))?
    };

    let file_name = inner
        .artifacts
        .write_artifact(job_id, &record.artifact_file_name(), &bytes)
        .await
        .map_err(|e| RecordFailure::Storage(e.to_string()))?;

    let mail = OutgoingMail {
        to: record.delivery_address().to_string(),
        subject: letter.subject.clone(),
        body: personalize(letter.body_template.as_deref(), record.display_name()),
        attachment: Attachment::pdf(file_name.clone(), bytes),
    };
    channel
        .send(mail)
        .await
        .map_err(|e| RecordFailure::Dispatch(e.to_string()))?;

    Ok(file_name)
}

#[async_trait::async_trait]
impl<T, C, S> BatchService for BatchEngine<T, C, S>
where
    T: TemplateEngine,
    C: ChannelProvider,
    S: JobStore + 'static,
{
    async fn submit(
        &self,
        input: RecordInput,
        template: TemplateUpload,
        settings: BatchSettings,
    ) -> Result<JobId, EngineError> {
        BatchEngine::submit(self, input, template, settings)
    }

    async fn status(&self, job_id: JobId) -> Result<Option<JobSnapshot>, EngineError> {
        BatchEngine::status(self, job_id)
    }

    async fn archive(&self, job_id: JobId) -> Result<Vec<u8>, EngineError> {
        BatchEngine::archive(self, job_id).await
    }
}
