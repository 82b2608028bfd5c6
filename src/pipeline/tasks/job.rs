//! One processing attempt for one document, with progress reporting.

use std::sync::Arc;

use uuid::Uuid;

use super::progress::{ProgressStore, TaskProgress};
use crate::db::{repository, Database};
use crate::pipeline::processor::{ExtractionOrchestrator, ProcessingError};

/// Runs attempts on the blocking pool. Each attempt opens its own connection.
pub struct DocumentTaskRunner {
    db: Database,
    orchestrator: ExtractionOrchestrator,
    progress: Arc<dyn ProgressStore>,
}

impl DocumentTaskRunner {
    pub fn new(
        db: Database,
        orchestrator: ExtractionOrchestrator,
        progress: Arc<dyn ProgressStore>,
    ) -> Self {
        Self {
            db,
            orchestrator,
            progress,
        }
    }

    /// Run the pipeline once. On failure the progress entry and the
    /// document are both marked failed before the error is returned, so a
    /// document never sits in `processing` between attempts.
    pub fn run_attempt(&self, task_id: Uuid, document_id: Uuid) -> Result<Uuid, ProcessingError> {
        self.progress
            .set(TaskProgress::processing(task_id, 0, "Starting processing"));

        let mut step = 0;
        match self.execute(task_id, document_id, &mut step) {
            Ok(result_id) => {
                self.progress
                    .set(TaskProgress::completed(task_id, result_id));
                Ok(result_id)
            }
            Err(e) => {
                self.record_failure(task_id, document_id, step, &e);
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        task_id: Uuid,
        document_id: Uuid,
        step: &mut u32,
    ) -> Result<Uuid, ProcessingError> {
        *step = 1;
        self.progress
            .set(TaskProgress::processing(task_id, 1, "Fetching document"));
        let conn = self.db.connect()?;
        repository::get_document(&conn, &document_id)?
            .ok_or(ProcessingError::DocumentNotFound(document_id))?;
        if !repository::mark_document_processing(&conn, &document_id)? {
            tracing::info!(
                task_id = %task_id,
                document_id = %document_id,
                "Document already completed, skipping"
            );
            return Ok(document_id);
        }

        *step = 2;
        self.progress
            .set(TaskProgress::processing(task_id, 2, "Running pipeline"));
        let record = self.orchestrator.run(&conn, &document_id)?;

        Ok(record.document_id)
    }

    /// Mark progress and document failed. Also used by the queue when an
    /// attempt dies without returning.
    pub fn record_failure(
        &self,
        task_id: Uuid,
        document_id: Uuid,
        step: u32,
        error: &ProcessingError,
    ) {
        let message = error.to_string();
        tracing::error!(
            task_id = %task_id,
            document_id = %document_id,
            step,
            error = %message,
            "Processing attempt failed"
        );
        self.progress
            .set(TaskProgress::failed(task_id, step, &message));

        if matches!(error, ProcessingError::DocumentNotFound(_)) {
            return;
        }
        let marked = self
            .db
            .connect()
            .and_then(|conn| repository::mark_document_failed(&conn, &document_id, &message));
        if let Err(e) = marked {
            tracing::warn!(
                document_id = %document_id,
                error = %e,
                "Could not mark document failed"
            );
        }
    }

    /// Step last reported for `task_id`, 0 if unknown.
    pub fn last_step(&self, task_id: &Uuid) -> u32 {
        self.progress
            .get(task_id)
            .map(|p| p.current_step)
            .unwrap_or(0)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::harness;
    use super::*;
    use crate::models::{DocumentStatus, TaskStatus};
    use crate::pipeline::structuring::MockLlmClient;

    #[test]
    fn successful_attempt_completes_progress_and_document() {
        let h = harness(MockLlmClient::new(r#"{"document_type": "invoice", "confidence_score": 0.9}"#));
        let doc = h.insert_text_document("Facture 12");
        let task = Uuid::new_v4();

        let result = h.runner.run_attempt(task, doc).unwrap();

        assert_eq!(result, doc);
        let p = h.progress.get(&task).unwrap();
        assert_eq!(p.status, TaskStatus::Completed);
        assert_eq!(p.current_step, 5);
        assert_eq!(p.result_id, Some(doc));

        let conn = h.db.connect().unwrap();
        let stored = repository::get_document(&conn, &doc).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
    }

    #[test]
    fn missing_document_fails_at_fetch_step() {
        let h = harness(MockLlmClient::new("{}"));
        let task = Uuid::new_v4();

        let err = h.runner.run_attempt(task, Uuid::new_v4()).unwrap_err();

        assert!(!err.is_retryable());
        let p = h.progress.get(&task).unwrap();
        assert_eq!(p.status, TaskStatus::Failed);
        assert_eq!(p.current_step, 1);
        assert!(p.message.unwrap().contains("not found"));
        assert_eq!(h.llm.calls(), 0);
    }

    #[test]
    fn persistence_failure_marks_document_failed() {
        let h = harness(MockLlmClient::new("{}"));
        let doc = h.insert_text_document("Bail commercial");
        h.break_extractions_table();
        let task = Uuid::new_v4();

        let err = h.runner.run_attempt(task, doc).unwrap_err();

        assert!(err.is_retryable());
        let p = h.progress.get(&task).unwrap();
        assert_eq!(p.status, TaskStatus::Failed);
        assert_eq!(p.current_step, 2);
        assert!(p.message.is_some());
        assert!(p.result_id.is_none());

        let conn = h.db.connect().unwrap();
        let stored = repository::get_document(&conn, &doc).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Failed);
        assert!(stored.error_message.is_some());
    }

    #[test]
    fn completed_document_is_not_processed_again() {
        let h = harness(MockLlmClient::new(r#"{"document_type": "invoice", "confidence_score": 0.9}"#));
        let doc = h.insert_text_document("Facture 12");
        h.runner.run_attempt(Uuid::new_v4(), doc).unwrap();

        let task = Uuid::new_v4();
        let result = h.runner.run_attempt(task, doc).unwrap();

        assert_eq!(result, doc);
        assert_eq!(h.llm.calls(), 1);
        assert_eq!(h.progress.get(&task).unwrap().status, TaskStatus::Completed);
        let conn = h.db.connect().unwrap();
        let stored = repository::get_document(&conn, &doc).unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Completed);
        assert!(stored.error_message.is_none());
    }

    #[test]
    fn last_step_follows_progress() {
        let h = harness(MockLlmClient::new("{}"));
        let task = Uuid::new_v4();
        assert_eq!(h.runner.last_step(&task), 0);
        h.progress.set(TaskProgress::processing(task, 2, "Running pipeline"));
        assert_eq!(h.runner.last_step(&task), 2);
    }
}
