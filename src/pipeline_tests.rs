use super::*;
use crate::collab::fakes::{other, EchoSpeech, FakeSource, RecordingPublisher, ScriptedLm};
use crate::config::default_config;
use crate::record::Status;
use crate::stage::StageStatus;
use std::fs;

const SUMMARY: &str =
    "## Main Talking Points\n- Budget approved\n\n## Action Items\n- Send the report\n";

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    lm: Rc<ScriptedLm>,
    publisher: Rc<RecordingPublisher>,
    collaborators: Collaborators,
}

impl Harness {
    fn new(source: FakeSource) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = default_config().with_base_dir(dir.path().to_path_buf());
        let lm = Rc::new(ScriptedLm::default());
        let publisher = Rc::new(RecordingPublisher::default());
        let collaborators = Collaborators {
            source: Rc::new(source),
            speech: Rc::new(EchoSpeech::new("en")),
            lm: lm.clone(),
            publisher: publisher.clone(),
        };
        Harness {
            _dir: dir,
            config,
            lm,
            publisher,
            collaborators,
        }
    }

    fn lock(&self) -> LockManager {
        LockManager::new(self.config.lock_path())
    }

    fn run(&self) -> PipelineRun {
        execute(&self.lock(), || {
            let store = JsonStore::open(&self.config.store_path())?;
            let runner = StageRunner::new(build_stages(&self.config, &self.collaborators)?);
            Ok((runner, store))
        })
        .expect("pipeline run")
    }

    fn records(&self) -> Vec<crate::record::WorkItem> {
        JsonStore::open(&self.config.store_path())
            .expect("open store")
            .select(&Status::ALL)
            .expect("select")
    }
}

#[test]
fn recording_recovers_from_a_cleanup_failure_on_the_next_run() {
    let harness = Harness::new(FakeSource::default().with_file("a.m4a", b"helo wrld"));
    harness
        .lm
        .replies
        .borrow_mut()
        .push_back(Err(other("gpt-4", "service unavailable")));

    let first = harness.run();
    assert_eq!(first.outcome, RunOutcome::Completed);
    assert_eq!(
        first.stages,
        vec![
            "ingest",
            "detect_language",
            "transcribe",
            "cleanup",
            "summarize",
            "publish"
        ]
    );
    let cleanup = &first.reports[3];
    assert_eq!(cleanup.status, StageStatus::PartialFailure);
    let records = harness.records();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.status, Status::Error);
    assert_eq!(record.failed_from, Some(Status::Transcribed));
    assert!(record.error_message.contains("service unavailable"));
    assert_eq!(record.payload.language.as_deref(), Some("en"));
    assert_eq!(record.payload.transcription.as_deref(), Some("helo wrld"));
    assert!(!harness.lock().path().exists());

    {
        let mut replies = harness.lm.replies.borrow_mut();
        replies.push_back(Ok("hello world".to_string()));
        replies.push_back(Ok(SUMMARY.to_string()));
    }
    let second = harness.run();
    assert_eq!(second.outcome, RunOutcome::Completed);
    let records = harness.records();
    let record = &records[0];
    assert_eq!(record.status, Status::Published);
    assert!(record.error_message.is_empty());
    assert_eq!(record.failed_from, None);
    assert_eq!(record.attempts, 0);
    assert_eq!(record.payload.cleaned_text.as_deref(), Some("hello world"));
    assert_eq!(record.payload.publish_reference.as_deref(), Some("doc-1"));
    assert_eq!(harness.publisher.documents.borrow()[0].0, "Summary - a.m4a");
}

#[test]
fn held_lock_means_no_work_and_no_writes() {
    let harness = Harness::new(FakeSource::default().with_file("a.m4a", b"audio"));
    let lock = harness.lock();
    let Acquire::Acquired(held) = lock.acquire().expect("acquire") else {
        panic!("lock should be free");
    };

    let run = execute(&lock, || -> Result<(StageRunner, JsonStore)> {
        panic!("init must not run while another run holds the lock")
    })
    .expect("already running is not an error");
    assert_eq!(run.outcome, RunOutcome::AlreadyRunning);
    assert!(run.reports.is_empty());
    assert!(!harness.config.store_path().exists());
    assert!(lock.path().exists());
    held.release().expect("release");
}

#[test]
fn unreachable_source_halts_before_later_stages() {
    let source = FakeSource {
        unreachable: true,
        ..FakeSource::default()
    };
    let harness = Harness::new(source);
    let run = harness.run();
    assert_eq!(
        run.outcome,
        RunOutcome::Halted {
            index: 0,
            stage: "ingest".to_string()
        }
    );
    assert_eq!(run.reports.len(), 1);
    assert!(harness.lm.calls.borrow().is_empty());
    assert!(!harness.lock().path().exists());
}

#[test]
fn initialization_failure_releases_the_lock() {
    let harness = Harness::new(FakeSource::default());
    let lock = harness.lock();
    let err = execute(&lock, || -> Result<(StageRunner, JsonStore)> {
        Err(anyhow!("audio inbox missing"))
    })
    .expect_err("init failure");
    assert!(format!("{err:#}").contains("audio inbox missing"));
    assert!(!lock.path().exists());
}

#[test]
fn unreadable_store_is_an_initialization_failure() {
    let harness = Harness::new(FakeSource::default());
    let store_path = harness.config.store_path();
    fs::create_dir_all(store_path.parent().expect("parent")).expect("mkdir");
    fs::write(&store_path, "not json").expect("corrupt store");

    let err = execute(&harness.lock(), || {
        let store = JsonStore::open(&store_path)?;
        let runner = StageRunner::new(build_stages(&harness.config, &harness.collaborators)?);
        Ok((runner, store))
    })
    .expect_err("corrupt store");
    assert!(format!("{err:#}").contains("parse record store"));
    assert!(!harness.lock().path().exists());
}

#[test]
fn missing_inbox_fails_collaborator_setup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = default_config().with_base_dir(dir.path().to_path_buf());
    let err = Collaborators::from_config(&config)
        .err()
        .expect("inbox is missing");
    assert!(format!("{err:#}").contains("audio inbox"), "{err:#}");
}

#[test]
fn command_lookup_reports_missing_programs() {
    assert!(require_program("/definitely/not/here --flag", "speech.command").is_err());
    let err = require_program("recap-no-such-program-xyz {audio}", "speech.command")
        .expect_err("not on PATH");
    assert!(err.to_string().contains("speech.command"));
}
