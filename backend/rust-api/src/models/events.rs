use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use validator::Validate;

const INTENT_NAMES: &[&str] = &[
    "request_patient",
    "submit_test",
    "submit_diagnosis",
    "view_results",
];

/// Client → server intents. Wire form: `{"event": "...", "payload": {...}}`.
///
/// Intents without data ignore `payload`, so it may be absent, `null` or `{}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientIntent {
    RequestPatient,
    SubmitTest(SubmitTestPayload),
    SubmitDiagnosis(SubmitDiagnosisPayload),
    ViewResults,
}

#[derive(Deserialize)]
struct RawIntent {
    event: String,
    #[serde(default)]
    payload: Value,
}

impl<'de> Deserialize<'de> for ClientIntent {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawIntent::deserialize(deserializer)?;
        match raw.event.as_str() {
            "request_patient" => Ok(ClientIntent::RequestPatient),
            "view_results" => Ok(ClientIntent::ViewResults),
            "submit_test" => serde_json::from_value(raw.payload)
                .map(ClientIntent::SubmitTest)
                .map_err(de::Error::custom),
            "submit_diagnosis" => serde_json::from_value(raw.payload)
                .map(ClientIntent::SubmitDiagnosis)
                .map_err(de::Error::custom),
            other => Err(de::Error::unknown_variant(other, INTENT_NAMES)),
        }
    }
}

impl ClientIntent {
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientIntent::RequestPatient => "request_patient",
            ClientIntent::SubmitTest(_) => "submit_test",
            ClientIntent::SubmitDiagnosis(_) => "submit_diagnosis",
            ClientIntent::ViewResults => "view_results",
        }
    }

    pub fn validate_payload(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            ClientIntent::SubmitTest(payload) => payload.validate(),
            ClientIntent::SubmitDiagnosis(payload) => payload.validate(),
            ClientIntent::RequestPatient | ClientIntent::ViewResults => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitTestPayload {
    #[validate(length(min = 1, max = 200))]
    pub selected_test: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitDiagnosisPayload {
    #[validate(length(min = 1, max = 200))]
    pub selected_diagnosis: String,
}

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    PatientCase(PatientCasePayload),
    TestResult(StageResultPayload),
    NextStep(MessagePayload),
    DiagnosisResult(StageResultPayload),
    ResultsAvailable(MessagePayload),
    FinalResults(FinalResultsPayload),
    Error(MessagePayload),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientCasePayload {
    pub patient_dialogue: String,
    pub ai_analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResultPayload {
    pub correct: bool,
    pub score: u32,
    pub ai_message: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalResultsPayload {
    pub test_score: u32,
    pub diagnosis_score: u32,
    pub total_score: u32,
    pub test_attempts: u32,
    pub diagnosis_attempts: u32,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::Error(MessagePayload {
            message: message.into(),
        })
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::PatientCase(_) => "patient_case",
            ServerEvent::TestResult(_) => "test_result",
            ServerEvent::NextStep(_) => "next_step",
            ServerEvent::DiagnosisResult(_) => "diagnosis_result",
            ServerEvent::ResultsAvailable(_) => "results_available",
            ServerEvent::FinalResults(_) => "final_results",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
