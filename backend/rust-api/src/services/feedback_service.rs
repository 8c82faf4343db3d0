use std::sync::Arc;
use std::time::{Duration, Instant};

use super::feedback_generator::{FeedbackError, FeedbackGenerator};
use crate::config::FeedbackConfig;
use crate::metrics::{FEEDBACK_DURATION_SECONDS, FEEDBACK_REQUESTS_TOTAL};
use crate::models::case::PatientCase;
use crate::utils::retry::{retry_async_if, RetryConfig};

const MEDICAL_PREAMBLE: &str = "You are a medical AI assistant with expertise in clinical \
diagnostics and patient care. Please respond to the following medical query with accurate, \
professional medical information. Keep your response concise and focused on the medical aspects.";

const ANALYSIS_FALLBACK: &str = "Based on the symptoms and history, this could indicate several \
possible conditions that require further investigation. What test should we run?";
const TEST_FALLBACK: &str = "This test selection is a reasonable approach given the symptoms. \
It will help narrow down the potential diagnoses.";
const DIAGNOSIS_FALLBACK: &str = "This diagnosis aligns with the patient's symptoms and test \
results. Continue to monitor and provide appropriate treatment.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Analysis,
    TestFeedback,
    DiagnosisFeedback,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Analysis => "analysis",
            PromptKind::TestFeedback => "test_feedback",
            PromptKind::DiagnosisFeedback => "diagnosis_feedback",
        }
    }

    /// Generic narration used when the provider fails. Never names an answer.
    pub fn fallback_text(&self) -> &'static str {
        match self {
            PromptKind::Analysis => ANALYSIS_FALLBACK,
            PromptKind::TestFeedback => TEST_FALLBACK,
            PromptKind::DiagnosisFeedback => DIAGNOSIS_FALLBACK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationSource {
    Provider,
    Fallback,
}

impl NarrationSource {
    fn as_str(&self) -> &'static str {
        match self {
            NarrationSource::Provider => "provider",
            NarrationSource::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    pub text: String,
    pub source: NarrationSource,
}

/// Builds prompts for each protocol event and shields callers from provider failures.
pub struct FeedbackService {
    generator: Arc<dyn FeedbackGenerator>,
    max_tokens: u32,
    temperature: f32,
    timeout: Duration,
    retry: RetryConfig,
}

impl FeedbackService {
    pub fn new(generator: Arc<dyn FeedbackGenerator>, config: &FeedbackConfig) -> Self {
        Self {
            generator,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: Duration::from_secs(config.timeout_seconds),
            retry: RetryConfig::with_attempts(config.retry_attempts),
        }
    }

    /// Overrides the deadline for one narration, retries included.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.generator.name()
    }

    pub async fn case_analysis(&self, case: &PatientCase) -> Narration {
        self.narrate(PromptKind::Analysis, analysis_prompt(case)).await
    }

    pub async fn test_feedback(
        &self,
        case: &PatientCase,
        selected: &str,
        correct: bool,
    ) -> Narration {
        self.narrate(
            PromptKind::TestFeedback,
            test_feedback_prompt(case, selected, correct),
        )
        .await
    }

    pub async fn diagnosis_feedback(
        &self,
        case: &PatientCase,
        selected: &str,
        correct: bool,
    ) -> Narration {
        self.narrate(
            PromptKind::DiagnosisFeedback,
            diagnosis_feedback_prompt(case, selected, correct),
        )
        .await
    }

    /// Always resolves to text: provider output, or the kind's fallback sentence.
    pub async fn narrate(&self, kind: PromptKind, prompt: String) -> Narration {
        let start = Instant::now();
        let prompt = format!("{}\n\n{}", MEDICAL_PREAMBLE, prompt);

        let attempt = retry_async_if(self.retry.clone(), FeedbackError::is_retryable, || {
            self.generator
                .generate(&prompt, self.max_tokens, self.temperature)
        });

        let result = match tokio::time::timeout(self.timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(FeedbackError::Timeout),
        };

        let narration = match result {
            Ok(text) => Narration {
                text,
                source: NarrationSource::Provider,
            },
            Err(e) => {
                tracing::warn!(
                    "Feedback provider {} failed for {}: {}; using fallback text",
                    self.generator.name(),
                    kind.as_str(),
                    e
                );
                Narration {
                    text: kind.fallback_text().to_string(),
                    source: NarrationSource::Fallback,
                }
            }
        };

        FEEDBACK_REQUESTS_TOTAL
            .with_label_values(&[kind.as_str(), narration.source.as_str()])
            .inc();
        FEEDBACK_DURATION_SECONDS
            .with_label_values(&[kind.as_str()])
            .observe(start.elapsed().as_secs_f64());

        narration
    }
}

pub fn analysis_prompt(case: &PatientCase) -> String {
    let additional = case
        .additional_info()
        .map(|info| format!("Additional information: {}\n", info))
        .unwrap_or_default();

    format!(
        "Medical case analysis:\n\
         Patient: {}-year-old {}\n\
         Medical history: {}\n\
         Presenting symptoms: {}\n\
         {}\n\
         Based on this information, provide a professional medical assessment in 1-2 sentences. \
         Make sure your response is clinically accurate and relevant to the symptoms described. \
         Conclude with: \"What test should we run?\"",
        case.age, case.gender, case.history, case.symptoms, additional
    )
}

pub fn test_feedback_prompt(case: &PatientCase, selected: &str, correct: bool) -> String {
    let verdict = if correct {
        "This is the correct test for this case."
    } else {
        "This is not the optimal test for this case."
    };

    format!(
        "Medical education scenario:\n\
         A medical student selected \"{}\" as the diagnostic test for a {}-year-old {} patient \
         presenting with: \"{}\"\n\
         The patient's history includes: \"{}\"\n\
         {}\n\n\
         Provide educational feedback as a medical instructor in 2 sentences or less. \
         Be professional and concise.",
        selected, case.age, case.gender, case.symptoms, case.history, verdict
    )
}

pub fn diagnosis_feedback_prompt(case: &PatientCase, selected: &str, correct: bool) -> String {
    let verdict = if correct {
        "This diagnosis is correct."
    } else {
        "This diagnosis is not correct."
    };
    let additional = case
        .additional_info()
        .map(|info| format!("Additional findings: \"{}\"\n", info))
        .unwrap_or_default();

    format!(
        "Medical education feedback:\n\
         A medical student diagnosed a {}-year-old {} patient with \"{}\" after running the \
         appropriate diagnostic test.\n\
         Patient symptoms: \"{}\"\n\
         Patient history: \"{}\"\n\
         {}\
         {}\n\n\
         As a senior physician educator, provide professional feedback on this diagnosis in 2-3 \
         sentences. Include clinical reasoning in your response.",
        case.age, case.gender, selected, case.symptoms, case.history, additional, verdict
    )
}
