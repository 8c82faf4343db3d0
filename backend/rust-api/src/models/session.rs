use chrono::{DateTime, Utc};

use super::case::PatientCase;

/// Starting (and maximum) score for each stage of a case.
pub const MAX_STAGE_SCORE: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NoCase,
    TestPhase,
    DiagnosisPhase,
    Completed,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoCase => "no_case",
            Phase::TestPhase => "test_phase",
            Phase::DiagnosisPhase => "diagnosis_phase",
            Phase::Completed => "completed",
        }
    }
}

/// Progress of one connection through its current case.
///
/// Mutated only by `SessionMachine`; dropped with the connection.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub active_case: Option<PatientCase>,
    pub phase: Phase,
    pub test_attempts: u32,
    pub diagnosis_attempts: u32,
    pub test_score: u32,
    pub diagnosis_score: u32,
    /// Set by a correct diagnosis; the scoreboard is only shown after this.
    pub diagnosis_confirmed: bool,
    pub case_started_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            active_case: None,
            phase: Phase::NoCase,
            test_attempts: 0,
            diagnosis_attempts: 0,
            test_score: MAX_STAGE_SCORE,
            diagnosis_score: MAX_STAGE_SCORE,
            diagnosis_confirmed: false,
            case_started_at: None,
        }
    }

    /// Replaces any previous case and resets all counters.
    pub fn assign_case(&mut self, case: PatientCase) {
        self.active_case = Some(case);
        self.phase = Phase::TestPhase;
        self.test_attempts = 0;
        self.diagnosis_attempts = 0;
        self.test_score = MAX_STAGE_SCORE;
        self.diagnosis_score = MAX_STAGE_SCORE;
        self.diagnosis_confirmed = false;
        self.case_started_at = Some(Utc::now());
    }

    pub fn record_test_attempt(&mut self, correct: bool) {
        self.test_attempts += 1;
        if correct {
            self.phase = Phase::DiagnosisPhase;
        } else {
            self.test_score = self.test_score.saturating_sub(1);
        }
    }

    pub fn record_diagnosis_attempt(&mut self, correct: bool) {
        self.diagnosis_attempts += 1;
        if correct {
            self.diagnosis_confirmed = true;
        } else {
            self.diagnosis_score = self.diagnosis_score.saturating_sub(1);
        }
    }

    pub fn complete(&mut self) {
        self.phase = Phase::Completed;
    }

    pub fn total_score(&self) -> u32 {
        self.test_score + self.diagnosis_score
    }

    /// Time spent on the current case so far, `None` before the first case.
    pub fn case_duration(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.case_started_at.map(|started| now - started)
    }
}
