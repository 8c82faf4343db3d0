use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;

use super::case_store::CaseStore;
use super::feedback_service::FeedbackService;
use crate::metrics::{record_submission, INTENTS_TOTAL, SESSIONS_TOTAL};
use crate::models::events::{
    ClientIntent, FinalResultsPayload, MessagePayload, PatientCasePayload, ServerEvent,
    StageResultPayload,
};
use crate::models::session::{Phase, Session};

const NEXT_STEP_MESSAGE: &str =
    "The test is correct. Based on the results, what should be the diagnosis?";
const RESULTS_AVAILABLE_MESSAGE: &str = "Ready to see your final results?";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No patient case available.")]
    NoCaseAvailable,

    #[error("No active patient case. Please request a new case.")]
    NoActiveCase,

    #[error("Diagnosis already confirmed. Request your final results or a new case.")]
    DiagnosisAlreadyConfirmed,

    #[error("Final results are available after a correct diagnosis.")]
    ResultsNotReady,

    #[error("Failed to fetch patient case")]
    CaseStore,

    #[error("Invalid request: {0}")]
    InvalidIntent(String),
}

/// Owns one connection's `Session` and applies client intents to it.
///
/// Callers must feed intents one at a time; `SessionWorker` does this per connection.
pub struct SessionMachine {
    session: Session,
    cases: Arc<dyn CaseStore>,
    feedback: Arc<FeedbackService>,
}

impl SessionMachine {
    pub fn new(
        session_id: impl Into<String>,
        cases: Arc<dyn CaseStore>,
        feedback: Arc<FeedbackService>,
    ) -> Self {
        Self {
            session: Session::new(session_id),
            cases,
            feedback,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Parses a raw inbound frame and applies it. Malformed frames become `error` events.
    pub async fn handle_frame(&mut self, frame: &str) -> Vec<ServerEvent> {
        match serde_json::from_str::<ClientIntent>(frame) {
            Ok(intent) => self.handle(intent).await,
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, "Malformed frame: {}", e);
                INTENTS_TOTAL
                    .with_label_values(&["unknown", "rejected"])
                    .inc();
                vec![ServerEvent::error(
                    SessionError::InvalidIntent(e.to_string()).to_string(),
                )]
            }
        }
    }

    /// Applies one intent. Failures are reported as an `error` event and leave the session unchanged.
    pub async fn handle(&mut self, intent: ClientIntent) -> Vec<ServerEvent> {
        let name = intent.event_name();

        let result = match intent.validate_payload() {
            Err(e) => Err(SessionError::InvalidIntent(e.to_string())),
            Ok(()) => match intent {
                ClientIntent::RequestPatient => self.request_case().await,
                ClientIntent::SubmitTest(payload) => self.submit_test(&payload.selected_test).await,
                ClientIntent::SubmitDiagnosis(payload) => {
                    self.submit_diagnosis(&payload.selected_diagnosis).await
                }
                ClientIntent::ViewResults => self.view_results(),
            },
        };

        match result {
            Ok(events) => {
                INTENTS_TOTAL.with_label_values(&[name, "ok"]).inc();
                events
            }
            Err(e) => {
                tracing::info!(
                    session_id = %self.session.id,
                    phase = self.session.phase.as_str(),
                    "Rejected {}: {}",
                    name,
                    e
                );
                INTENTS_TOTAL.with_label_values(&[name, "rejected"]).inc();
                vec![ServerEvent::error(e.to_string())]
            }
        }
    }

    /// Valid in any phase. Discards the current case, if any, and starts a fresh one.
    pub async fn request_case(&mut self) -> Result<Vec<ServerEvent>, SessionError> {
        tracing::info!(session_id = %self.session.id, "Fetching a patient case");

        let case = match self.cases.fetch_random_case().await {
            Ok(Some(case)) => case,
            Ok(None) => {
                tracing::warn!("No patient case found in catalog");
                return Err(SessionError::NoCaseAvailable);
            }
            Err(e) => {
                tracing::error!("Case store error: {:#}", e);
                return Err(SessionError::CaseStore);
            }
        };

        let analysis = self.feedback.case_analysis(&case).await;
        let patient_dialogue = case.patient_dialogue();

        if self.session.active_case.is_some() && self.session.phase != Phase::Completed {
            SESSIONS_TOTAL.with_label_values(&["abandoned"]).inc();
        }
        tracing::info!(
            session_id = %self.session.id,
            case_id = %case.id,
            analysis_source = ?analysis.source,
            "Patient case assigned"
        );
        self.session.assign_case(case);
        SESSIONS_TOTAL.with_label_values(&["case_started"]).inc();

        Ok(vec![ServerEvent::PatientCase(PatientCasePayload {
            patient_dialogue,
            ai_analysis: analysis.text,
        })])
    }

    /// Valid only in `TestPhase`.
    pub async fn submit_test(&mut self, selected: &str) -> Result<Vec<ServerEvent>, SessionError> {
        let case = match (&self.session.active_case, self.session.phase) {
            (Some(case), Phase::TestPhase) => case,
            _ => return Err(SessionError::NoActiveCase),
        };

        let correct = case.is_correct_test(selected);
        let feedback = self.feedback.test_feedback(case, selected, correct).await;

        self.session.record_test_attempt(correct);
        record_submission("test", correct);

        tracing::info!(
            session_id = %self.session.id,
            correct,
            score = self.session.test_score,
            attempts = self.session.test_attempts,
            "Test submitted"
        );

        let mut events = vec![ServerEvent::TestResult(StageResultPayload {
            correct,
            score: self.session.test_score,
            ai_message: feedback.text,
            attempts: self.session.test_attempts,
        })];

        if correct {
            events.push(ServerEvent::NextStep(MessagePayload {
                message: NEXT_STEP_MESSAGE.to_string(),
            }));
        }

        Ok(events)
    }

    /// Valid only in `DiagnosisPhase` before the diagnosis has been confirmed.
    pub async fn submit_diagnosis(
        &mut self,
        selected: &str,
    ) -> Result<Vec<ServerEvent>, SessionError> {
        let case = match (&self.session.active_case, self.session.phase) {
            (Some(case), Phase::DiagnosisPhase) => case,
            _ => return Err(SessionError::NoActiveCase),
        };
        if self.session.diagnosis_confirmed {
            return Err(SessionError::DiagnosisAlreadyConfirmed);
        }

        let correct = case.is_correct_diagnosis(selected);
        let feedback = self
            .feedback
            .diagnosis_feedback(case, selected, correct)
            .await;

        self.session.record_diagnosis_attempt(correct);
        record_submission("diagnosis", correct);

        tracing::info!(
            session_id = %self.session.id,
            correct,
            score = self.session.diagnosis_score,
            attempts = self.session.diagnosis_attempts,
            "Diagnosis submitted"
        );

        let mut events = vec![ServerEvent::DiagnosisResult(StageResultPayload {
            correct,
            score: self.session.diagnosis_score,
            ai_message: feedback.text,
            attempts: self.session.diagnosis_attempts,
        })];

        if correct {
            events.push(ServerEvent::ResultsAvailable(MessagePayload {
                message: RESULTS_AVAILABLE_MESSAGE.to_string(),
            }));
        }

        Ok(events)
    }

    /// Client acknowledgment after a correct diagnosis; moves the session to `Completed`.
    pub fn view_results(&mut self) -> Result<Vec<ServerEvent>, SessionError> {
        match self.session.phase {
            Phase::NoCase => return Err(SessionError::NoActiveCase),
            Phase::TestPhase => return Err(SessionError::ResultsNotReady),
            Phase::DiagnosisPhase if !self.session.diagnosis_confirmed => {
                return Err(SessionError::ResultsNotReady)
            }
            Phase::DiagnosisPhase => {
                self.session.complete();
                SESSIONS_TOTAL.with_label_values(&["completed"]).inc();
                let elapsed_seconds = self
                    .session
                    .case_duration(Utc::now())
                    .map(|d| d.num_seconds())
                    .unwrap_or_default();
                tracing::info!(
                    session_id = %self.session.id,
                    total_score = self.session.total_score(),
                    elapsed_seconds,
                    "Case completed"
                );
            }
            Phase::Completed => {}
        }

        Ok(vec![ServerEvent::FinalResults(FinalResultsPayload {
            test_score: self.session.test_score,
            diagnosis_score: self.session.diagnosis_score,
            total_score: self.session.total_score(),
            test_attempts: self.session.test_attempts,
            diagnosis_attempts: self.session.diagnosis_attempts,
        })])
    }
}
