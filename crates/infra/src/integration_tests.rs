//! Integration tests for the full batch pipeline.
//!
//! Tests: submit → parse → render (PDF) → store → dispatch → archive → poll
//!
//! Verifies:
//! - Counters always settle at `processed == total == success + failed`
//! - Per-record failures never stop the batch
//! - Job-level failures end in `error` without exposing an archive

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::io::{Cursor, Read};
    use std::sync::Arc;
    use std::time::Duration;

    use zip::ZipArchive;

    use crate::config::EngineConfig;
    use crate::jobs::{
        BatchEngine, BatchService, BatchSettings, EngineError, InMemoryJobStore, JobError, JobId,
        JobSnapshot, JobStatus, JobStore, RecordInput,
    };
    use crate::render::pdf::tests::{sample_pdf, sample_png};
    use crate::render::{PdfTemplateEngine, TemplateKind, TemplateUpload};
    use crate::testing::{FakeProvider, row, rows};

    type Engine = BatchEngine<PdfTemplateEngine, FakeProvider, Arc<InMemoryJobStore>>;

    fn setup(root: &std::path::Path, provider: FakeProvider) -> Engine {
        let config = EngineConfig::default()
            .with_group_size(3)
            .with_cooldown(Duration::from_millis(5))
            .with_storage_root(root);
        BatchEngine::new(config, PdfTemplateEngine::new(), provider, InMemoryJobStore::arc())
    }

    fn png_template() -> TemplateUpload {
        TemplateUpload::new(sample_png(300, 200), TemplateKind::Image)
    }

    fn settings() -> BatchSettings {
        BatchSettings::new("events@example.com", "refresh-token")
    }

    async fn wait_for_terminal(engine: &Engine, job_id: JobId) -> JobSnapshot {
        for _ in 0..1000 {
            let snapshot = engine.status(job_id).unwrap().expect("job is registered");
            if snapshot.status.is_terminal() {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} did not finish");
    }

    fn archive_entries(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut contents = Vec::new();
                entry.read_to_end(&mut contents).unwrap();
                (entry.name().to_string(), contents)
            })
            .collect()
    }

    fn assert_settled(snapshot: &JobSnapshot) {
        assert_eq!(snapshot.processed, snapshot.total);
        assert_eq!(snapshot.processed, snapshot.success + snapshot.failed);
    }

    #[tokio::test]
    async fn nine_records_in_groups_of_three_are_all_counted() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default().with_send_delay(Duration::from_millis(2));
        let state = provider.state();
        let engine = setup(tmp.path(), provider);

        let job_id = engine
            .submit(RecordInput::Parsed(rows(9)), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total, 9);
        assert_eq!(snapshot.processed, 9);
        assert_eq!(snapshot.success, 9);
        assert_settled(&snapshot);
        assert!(state.max_in_flight() <= 3);

        let entries = archive_entries(engine.archive(job_id).await.unwrap());
        assert_eq!(entries.len(), 9);
        for (name, bytes) in &entries {
            assert!(name.ends_with("_certificate.pdf"), "{name}");
            lopdf::Document::load_mem(bytes).unwrap();
        }
        assert!(!tmp.path().join(job_id.to_string()).exists());
    }

    #[tokio::test]
    async fn empty_batch_completes_with_an_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());

        let job_id = engine
            .submit(RecordInput::Csv(b"Name,Email\n".to_vec()), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total, 0);
        assert_settled(&snapshot);
        assert!(archive_entries(engine.archive(job_id).await.unwrap()).is_empty());
    }

    #[tokio::test]
    async fn blank_name_fails_only_its_record() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);
        let records = vec![
            row("Alice", "a@x.com"),
            row("", "b@x.com"),
            row("Carl", "c@x.com"),
        ];

        let job_id = engine
            .submit(RecordInput::Parsed(records), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.success, 2);
        assert_eq!(snapshot.failed, 1);
        assert_settled(&snapshot);

        let recipients: BTreeSet<_> = state.sent().into_iter().map(|s| s.mail.to).collect();
        assert_eq!(recipients, BTreeSet::from(["a@x.com".to_string(), "c@x.com".to_string()]));

        let names: Vec<_> = archive_entries(engine.archive(job_id).await.unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["Alice_certificate.pdf", "Carl_certificate.pdf"]);
    }

    #[tokio::test]
    async fn channel_down_still_completes_and_archives_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default().failing_sends();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);

        let job_id = engine
            .submit(RecordInput::Parsed(rows(4)), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.success, 0);
        assert_eq!(snapshot.failed, 4);
        assert_settled(&snapshot);
        assert_eq!(state.attempts(), 4);
        assert_eq!(state.closed(), 1);
        assert_eq!(archive_entries(engine.archive(job_id).await.unwrap()).len(), 4);
    }

    #[tokio::test]
    async fn missing_address_is_never_dispatched() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);
        let records = vec![
            row("Alice", "a@x.com"),
            [("name", "Bob")].into_iter().collect(),
            row("Dana", "   "),
        ];

        let job_id = engine
            .submit(RecordInput::Parsed(records), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.failed, 2);
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.sent()[0].mail.to, "a@x.com");
    }

    #[tokio::test]
    async fn unencodable_name_fails_its_render_only() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());
        let records = vec![row("Alice", "a@x.com"), row("李雷", "li@x.com")];

        let job_id = engine
            .submit(RecordInput::Parsed(records), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.success, 1);
        assert_eq!(snapshot.failed, 1);
    }

    #[tokio::test]
    async fn mail_is_personalized_and_carries_the_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);
        let settings = settings()
            .with_subject("Thanks for coming")
            .with_body("Hello [NAME], see attached.");

        let job_id = engine
            .submit(
                RecordInput::Csv(b"Name,Email\nAlice,alice@example.com\n".to_vec()),
                TemplateUpload::new(sample_pdf(2), TemplateKind::Document),
                settings,
            )
            .unwrap();
        wait_for_terminal(&engine, job_id).await;

        let sent = state.sent();
        assert_eq!(sent.len(), 1);
        let mail = &sent[0].mail;
        assert_eq!(mail.subject, "Thanks for coming");
        assert_eq!(mail.body, "Hello Alice, see attached.");
        assert_eq!(mail.attachment.file_name, "Alice_certificate.pdf");
        assert_eq!(mail.attachment.content_type, "application/pdf");
        let document = lopdf::Document::load_mem(&mail.attachment.bytes).unwrap();
        assert_eq!(document.get_pages().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_keep_both_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());
        let records = vec![row("Bob", "bob1@x.com"), row("Bob", "bob2@x.com")];

        let job_id = engine
            .submit(RecordInput::Parsed(records), png_template(), settings())
            .unwrap();
        wait_for_terminal(&engine, job_id).await;

        let names: Vec<_> = archive_entries(engine.archive(job_id).await.unwrap())
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["Bob_certificate.pdf", "Bob_certificate_2.pdf"]);
    }

    #[tokio::test]
    async fn corrupt_template_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);

        let job_id = engine
            .submit(
                RecordInput::Parsed(rows(5)),
                TemplateUpload::new(b"not an image".to_vec(), TemplateKind::Image),
                settings(),
            )
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.failed, 5);
        assert_settled(&snapshot);
        assert!(snapshot.archive_location.is_none());
        assert!(snapshot.error.is_some());
        assert_eq!(state.acquired(), 0);
        assert!(matches!(
            engine.archive(job_id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn refused_credential_fails_the_job() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = FakeProvider::default().refusing();
        let state = provider.state();
        let engine = setup(tmp.path(), provider);

        let job_id = engine
            .submit(RecordInput::Parsed(rows(4)), png_template(), settings())
            .unwrap();
        let snapshot = wait_for_terminal(&engine, job_id).await;

        assert_eq!(snapshot.status, JobStatus::Error);
        assert_settled(&snapshot);
        assert_eq!(state.attempts(), 0);
        assert!(!tmp.path().join(format!("{job_id}.zip")).exists());
        assert!(!tmp.path().join(job_id.to_string()).exists());
    }

    #[tokio::test]
    async fn archive_failure_ends_in_error_without_a_location() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());
        let job_id = JobId::new();
        engine.jobs().create(job_id).unwrap();

        // A non-empty directory where the archive should land blocks the rename.
        let blocker = tmp.path().join(format!("{job_id}.zip"));
        std::fs::create_dir_all(blocker.join("occupied")).unwrap();

        let err = engine
            .run(job_id, RecordInput::Parsed(rows(4)), png_template(), settings())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::Archive(_)));
        let snapshot = engine.status(job_id).unwrap().unwrap();
        assert_eq!(snapshot.status, JobStatus::Error);
        assert_eq!(snapshot.total, 4);
        assert_settled(&snapshot);
        assert!(snapshot.archive_location.is_none());
        assert!(!tmp.path().join(job_id.to_string()).exists());
        assert!(!tmp.path().join(format!("{job_id}.zip.partial")).exists());
        assert!(matches!(
            engine.archive(job_id).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn polling_a_finished_job_is_stable() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());

        let job_id = engine
            .submit(RecordInput::Parsed(rows(2)), png_template(), settings())
            .unwrap();
        let first = wait_for_terminal(&engine, job_id).await;

        for _ in 0..5 {
            assert_eq!(engine.status(job_id).unwrap().unwrap(), first);
        }
    }

    #[tokio::test]
    async fn service_trait_object_drives_the_engine() {
        let tmp = tempfile::tempdir().unwrap();
        let engine = setup(tmp.path(), FakeProvider::default());
        let service: Arc<dyn BatchService> = Arc::new(engine.clone());

        let job_id = service
            .submit(RecordInput::Parsed(rows(1)), png_template(), settings())
            .await
            .unwrap();
        wait_for_terminal(&engine, job_id).await;

        let snapshot = service.status(job_id).await.unwrap().unwrap();
        assert_eq!(snapshot.success, 1);
        assert!(!service.archive(job_id).await.unwrap().is_empty());
        assert!(service.status(JobId::new()).await.unwrap().is_none());
    }
}
