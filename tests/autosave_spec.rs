use std::fs;
use std::time::Duration;

use tempfile::TempDir;
use thesisflow::autosave::{AutosaveScheduler, DirtyFlag, SaveRequest};
use thesisflow::config::{AppConfig, ToolConfig};
use thesisflow::pipeline::BuildErrorKind;
use thesisflow::session::{AutosaveOutcome, DocumentRef, Session, SessionError};
use tokio::sync::mpsc;

const TICK: Duration = Duration::from_millis(30);

fn session() -> (TempDir, Session) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = AppConfig {
        projects_root: dir.path().to_path_buf(),
        autosave_interval_secs: 1,
        ..AppConfig::default()
    };
    let mut session = Session::new(config);
    session.create_project("Thesis", "Ada").expect("Failed to create project");
    (dir, session)
}

fn first_chapter(session: &Session) -> String {
    session.project().expect("Project is open").manifest().chapters[0].id.clone()
}

mod scheduler {
    use super::*;

    #[tokio::test]
    async fn posts_a_request_when_dirty() {
        let (tx, mut rx) = mpsc::channel(4);
        let dirty = DirtyFlag::default();
        let scheduler = AutosaveScheduler::start(TICK, dirty.clone(), tx);

        dirty.mark();
        let request = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("No autosave request");
        assert_eq!(request, Some(SaveRequest::Autosave));
        // The scheduler only asks; clearing is the session's job.
        assert!(dirty.is_dirty());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stays_quiet_while_clean() {
        let (tx, mut rx) = mpsc::channel(4);
        let scheduler = AutosaveScheduler::start(TICK, DirtyFlag::default(), tx);

        tokio::time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent_and_final() {
        let (tx, mut rx) = mpsc::channel(4);
        let dirty = DirtyFlag::default();
        let scheduler = AutosaveScheduler::start(TICK, dirty.clone(), tx);
        assert!(scheduler.is_running());

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.is_running());

        dirty.mark();
        tokio::time::sleep(TICK * 5).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn exits_when_the_session_is_gone() {
        let (tx, rx) = mpsc::channel(4);
        let dirty = DirtyFlag::default();
        let scheduler = AutosaveScheduler::start(TICK, dirty.clone(), tx);
        drop(rx);

        dirty.mark();
        tokio::time::sleep(TICK * 5).await;
        assert!(!scheduler.is_running());
        scheduler.stop().await;
    }
}

mod session_autosave {
    use super::*;

    #[tokio::test]
    async fn writes_the_document_and_clears_the_flag() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter: chapter.clone() })
            .expect("Failed to open document");
        session.edit_document("# Rewritten\n").expect("Failed to edit");
        assert!(session.is_dirty());

        assert!(matches!(session.handle_request(SaveRequest::Autosave), AutosaveOutcome::Saved));
        assert!(!session.is_dirty());

        let written = session.project().expect("Project is open").read_chapter(&chapter).expect("Failed to read");
        assert_eq!(written, "# Rewritten\n");
    }

    #[tokio::test]
    async fn does_nothing_when_clean() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter })
            .expect("Failed to open document");

        assert!(matches!(session.handle_request(SaveRequest::Autosave), AutosaveOutcome::Clean));
    }

    #[tokio::test]
    async fn keeps_the_flag_when_the_write_fails() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter })
            .expect("Failed to open document");
        session.edit_document("unsaved").expect("Failed to edit");

        let chapters_dir = session.project().expect("Project is open").layout().chapters_dir();
        fs::remove_dir_all(chapters_dir).expect("Failed to remove chapters");

        assert!(matches!(
            session.handle_request(SaveRequest::Autosave),
            AutosaveOutcome::Failed(SessionError::Store(_))
        ));
        assert!(session.is_dirty());
        assert_eq!(session.document_text(), Some("unsaved"));
    }

    #[tokio::test]
    async fn timer_requests_reach_the_session() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter })
            .expect("Failed to open document");
        session.start_autosave().await;
        session.edit_document("from the timer").expect("Failed to edit");

        let request = tokio::time::timeout(Duration::from_secs(5), session.next_request())
            .await
            .expect("No autosave request")
            .expect("Channel closed");
        assert!(matches!(session.handle_request(request), AutosaveOutcome::Saved));
        assert!(!session.is_dirty());

        tokio_test::assert_ok!(session.close_project().await);
        assert!(matches!(session.project(), Err(SessionError::NoProject)));
    }

    #[tokio::test]
    async fn no_autosave_runs_after_stop() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        let original = session
            .open_document(DocumentRef::Chapter { chapter: chapter.clone() })
            .expect("Failed to open document")
            .to_string();
        session.start_autosave().await;
        session.edit_document("posted before stop").expect("Failed to edit");

        // Let the one-second timer post a request that nobody consumes yet.
        tokio::time::sleep(Duration::from_millis(1300)).await;
        session.stop_autosave().await;

        let pending = tokio::time::timeout(Duration::from_millis(200), session.next_request()).await;
        assert!(pending.is_err(), "a request survived stop: {:?}", pending);
        assert!(session.is_dirty());
        let on_disk = session.project().expect("Project is open").read_chapter(&chapter).expect("Failed to read");
        assert_eq!(on_disk, original);
    }

    #[tokio::test]
    async fn closing_saves_the_open_document() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        let root = session.project_root().expect("Project is open");
        session
            .open_document(DocumentRef::Chapter { chapter: chapter.clone() })
            .expect("Failed to open document");
        session.edit_document("kept on close").expect("Failed to edit");

        tokio_test::assert_ok!(session.close_project().await);
        assert!(!session.is_dirty());

        let reopened = session.open_project(&root).expect("Failed to reopen");
        assert_eq!(reopened.read_chapter(&chapter).expect("Failed to read"), "kept on close");
    }

    #[tokio::test]
    async fn build_flushes_pending_edits_first() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = AppConfig {
            projects_root: dir.path().to_path_buf(),
            converter: ToolConfig::new(dir.path().join("no-converter")),
            ..AppConfig::default()
        };
        let mut session = Session::new(config);
        session.create_project("Thesis", "Ada").expect("Failed to create project");
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter: chapter.clone() })
            .expect("Failed to open document");
        session.edit_document("flushed").expect("Failed to edit");

        let handle = session.build().expect("Failed to start build");
        assert!(!session.is_dirty());
        let error = tokio_test::assert_err!(handle.wait().await);
        assert_eq!(error.kind(), BuildErrorKind::MissingExecutable);

        let written = session.project().expect("Project is open").read_chapter(&chapter).expect("Failed to read");
        assert_eq!(written, "flushed");
    }

    #[tokio::test]
    async fn switching_documents_saves_the_previous_one() {
        let (_dir, mut session) = session();
        let first = first_chapter(&session);
        let second = session
            .project_mut()
            .expect("Project is open")
            .add_chapter("Chapter 2: Methods")
            .expect("Failed to add chapter")
            .id
            .clone();
        session
            .open_document(DocumentRef::Chapter { chapter: first.clone() })
            .expect("Failed to open document");
        session.edit_document("# Introduction, revised\n").expect("Failed to edit");

        session
            .open_document(DocumentRef::Chapter { chapter: second })
            .expect("Failed to switch document");
        assert!(!session.is_dirty());

        let written = session.project().expect("Project is open").read_chapter(&first).expect("Failed to read");
        assert_eq!(written, "# Introduction, revised\n");
    }

    #[tokio::test]
    async fn switching_documents_keeps_the_edit_when_saving_fails() {
        let (_dir, mut session) = session();
        let chapter = first_chapter(&session);
        session
            .open_document(DocumentRef::Chapter { chapter: chapter.clone() })
            .expect("Failed to open document");
        session.edit_document("unsaved").expect("Failed to edit");

        let chapters_dir = session.project().expect("Project is open").layout().chapters_dir();
        fs::remove_dir_all(chapters_dir).expect("Failed to remove chapters");

        assert!(matches!(
            session.open_document(DocumentRef::Chapter { chapter }),
            Err(SessionError::Store(_))
        ));
        assert!(session.is_dirty());
        assert_eq!(session.document_text(), Some("unsaved"));
    }

    #[tokio::test]
    async fn editing_without_a_document_is_an_error() {
        let (_dir, mut session) = session();
        assert!(matches!(session.edit_document("text"), Err(SessionError::NoDocument)));
        assert!(matches!(session.save(), Err(SessionError::NoDocument)));
    }
}
