use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::session_service::SessionMachine;
use crate::models::events::ServerEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("Too many pending requests. Please wait for the current one to finish.")]
    Busy,

    #[error("Session is closed")]
    Closed,
}

/// Runs one connection's `SessionMachine` on its own task.
///
/// Frames are applied strictly in arrival order; a frame queued behind a slow
/// feedback call waits for it. Dropping the worker aborts the task, which
/// discards any in-flight intent without touching the session.
pub struct SessionWorker {
    frames: mpsc::Sender<String>,
    task: JoinHandle<()>,
}

impl SessionWorker {
    pub fn spawn(
        mut machine: SessionMachine,
        queue_capacity: usize,
        events: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let (frames, mut inbox) = mpsc::channel::<String>(queue_capacity.max(1));
        let span = tracing::info_span!("session", session_id = %machine.session().id);

        let task = tokio::spawn(
            async move {
                while let Some(frame) = inbox.recv().await {
                    for event in machine.handle_frame(&frame).await {
                        if events.send(event).await.is_err() {
                            tracing::debug!("Outbound channel closed, stopping session worker");
                            return;
                        }
                    }
                }
                tracing::debug!("Inbound queue closed, stopping session worker");
            }
            .instrument(span),
        );

        Self { frames, task }
    }

    /// Queues a raw client frame without waiting.
    pub fn try_submit(&self, frame: String) -> Result<(), SubmitError> {
        self.frames.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::Busy,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedbackConfig;
    use crate::models::case::seed_catalog;
    use crate::services::case_store::InMemoryCaseStore;
    use crate::services::feedback_generator::{FeedbackError, FeedbackGenerator};
    use crate::services::feedback_service::FeedbackService;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct DelayedGenerator(Duration);

    #[async_trait]
    impl FeedbackGenerator for DelayedGenerator {
        fn name(&self) -> &'static str {
            "delayed"
        }

        async fn generate(&self, _: &str, _: u32, _: f32) -> Result<String, FeedbackError> {
            tokio::time::sleep(self.0).await;
            Ok("Narration".to_string())
        }
    }

    fn worker(delay: Duration, capacity: usize) -> (SessionWorker, mpsc::Receiver<ServerEvent>) {
        let case = seed_catalog()
            .into_iter()
            .find(|c| c.correct_test == "Skin biopsy")
            .unwrap();
        let feedback = Arc::new(FeedbackService::new(
            Arc::new(DelayedGenerator(delay)),
            &FeedbackConfig::default(),
        ));
        let machine = SessionMachine::new(
            "worker-test",
            Arc::new(InMemoryCaseStore::new(vec![case])),
            feedback,
        );
        let (tx, rx) = mpsc::channel(16);
        (SessionWorker::spawn(machine, capacity, tx), rx)
    }

    #[tokio::test]
    async fn test_frames_are_processed_in_order() {
        let (worker, mut rx) = worker(Duration::from_millis(20), 8);

        worker
            .try_submit(r#"{"event":"request_patient"}"#.to_string())
            .unwrap();
        worker
            .try_submit(r#"{"event":"submit_test","payload":{"selectedTest":"CT"}}"#.to_string())
            .unwrap();
        worker.try_submit("garbage".to_string()).unwrap();
        worker
            .try_submit(
                r#"{"event":"submit_test","payload":{"selectedTest":"Skin biopsy"}}"#.to_string(),
            )
            .unwrap();

        let mut names = Vec::new();
        for _ in 0..5 {
            let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            names.push(event.event_name());
        }

        assert_eq!(
            names,
            vec!["patient_case", "test_result", "error", "test_result", "next_step"]
        );
    }

    #[tokio::test]
    async fn test_full_queue_reports_busy() {
        let (worker, _rx) = worker(Duration::from_secs(5), 1);

        // First frame is picked up by the worker and blocks on feedback
        worker
            .try_submit(r#"{"event":"request_patient"}"#.to_string())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        worker
            .try_submit(r#"{"event":"view_results"}"#.to_string())
            .unwrap();
        assert_eq!(
            worker.try_submit(r#"{"event":"view_results"}"#.to_string()),
            Err(SubmitError::Busy)
        );
    }

    #[tokio::test]
    async fn test_drop_stops_worker() {
        let (worker, mut rx) = worker(Duration::from_secs(5), 4);
        worker
            .try_submit(r#"{"event":"request_patient"}"#.to_string())
            .unwrap();
        drop(worker);

        let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap();
        assert!(next.is_none());
    }
}
