use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::{FeedbackConfig, FeedbackProvider};

const HF_BASE_URL: &str = "https://api-inference.huggingface.co/models";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("provider timed out")]
    Timeout,

    #[error("provider request failed: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider returned empty text")]
    EmptyResponse,

    #[error("feedback generation is disabled")]
    Disabled,
}

impl FeedbackError {
    /// Transient failures worth another try within the caller's deadline.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedbackError::Timeout | FeedbackError::Transport(_) => true,
            // 503 is returned while a hosted model is still loading
            FeedbackError::Status { status, .. } => *status == 429 || *status >= 500,
            FeedbackError::MalformedResponse(_)
            | FeedbackError::EmptyResponse
            | FeedbackError::Disabled => false,
        }
    }
}

impl From<reqwest::Error> for FeedbackError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FeedbackError::Timeout
        } else {
            FeedbackError::Transport(err.to_string())
        }
    }
}

/// Text-generation backend used for narration.
#[async_trait]
pub trait FeedbackGenerator: Send + Sync {
    fn name(&self) -> &'static str;

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, FeedbackError>;
}

/// Builds the generator selected by `feedback.provider`.
pub fn build_generator(config: &FeedbackConfig) -> anyhow::Result<Arc<dyn FeedbackGenerator>> {
    let generator: Arc<dyn FeedbackGenerator> = match config.provider {
        FeedbackProvider::HuggingFace => Arc::new(HuggingFaceGenerator::new(config)?),
        FeedbackProvider::Gemini => Arc::new(GeminiGenerator::new(config)?),
        FeedbackProvider::Disabled => Arc::new(DisabledGenerator),
    };

    if config.provider != FeedbackProvider::Disabled && config.api_key.is_none() {
        tracing::warn!(
            "No API key configured for feedback provider {}; requests will likely fail and use fallback text",
            config.provider.as_str()
        );
    }

    Ok(generator)
}

fn http_client(config: &FeedbackConfig) -> anyhow::Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()?;
    Ok(client)
}

async fn read_json(response: reqwest::Response) -> Result<Value, FeedbackError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(FeedbackError::Status {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| FeedbackError::MalformedResponse(e.to_string()))
}

fn non_empty(text: &str) -> Result<String, FeedbackError> {
    let text = text.trim();
    if text.is_empty() {
        Err(FeedbackError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}

/// Hosted inference API serving an instruction-tuned model.
pub struct HuggingFaceGenerator {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HuggingFaceGenerator {
    pub fn new(config: &FeedbackConfig) -> anyhow::Result<Self> {
        let base = config.endpoint.as_deref().unwrap_or(HF_BASE_URL);
        Ok(Self {
            client: http_client(config)?,
            url: format!("{}/{}", base.trim_end_matches('/'), config.model),
            api_key: config.api_key.clone(),
        })
    }

    fn instruct_prompt(prompt: &str) -> String {
        format!("<s>[INST] {} [/INST]</s>", prompt)
    }

    fn extract_text(body: &Value) -> Result<String, FeedbackError> {
        let text = body
            .get(0)
            .and_then(|item| item.get("generated_text"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FeedbackError::MalformedResponse("missing [0].generated_text".to_string())
            })?;

        let text = text.trim_end();
        non_empty(text.strip_suffix("</s>").unwrap_or(text))
    }
}

#[async_trait]
impl FeedbackGenerator for HuggingFaceGenerator {
    fn name(&self) -> &'static str {
        "huggingface"
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, FeedbackError> {
        let body = json!({
            "inputs": Self::instruct_prompt(prompt),
            "parameters": {
                "max_new_tokens": max_tokens,
                "temperature": temperature,
                "top_p": 0.9,
                "return_full_text": false,
            }
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let body = read_json(response).await?;
        Self::extract_text(&body)
    }
}

/// Google Generative Language API.
pub struct GeminiGenerator {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl GeminiGenerator {
    pub fn new(config: &FeedbackConfig) -> anyhow::Result<Self> {
        let base = config.endpoint.as_deref().unwrap_or(GEMINI_BASE_URL);
        Ok(Self {
            client: http_client(config)?,
            url: format!(
                "{}/{}:generateContent",
                base.trim_end_matches('/'),
                config.model
            ),
            api_key: config.api_key.clone(),
        })
    }

    fn extract_text(body: &Value) -> Result<String, FeedbackError> {
        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FeedbackError::MalformedResponse(
                    "missing candidates[0].content.parts[0].text".to_string(),
                )
            })?;
        non_empty(text)
    }
}

#[async_trait]
impl FeedbackGenerator for GeminiGenerator {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn generate(
        &self,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, FeedbackError> {
        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "maxOutputTokens": max_tokens,
                "temperature": temperature,
            }
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-goog-api-key", key);
        }

        let response = request.send().await?;
        let body = read_json(response).await?;
        Self::extract_text(&body)
    }
}

/// Always fails, so every narration uses fallback text.
pub struct DisabledGenerator;

#[async_trait]
impl FeedbackGenerator for DisabledGenerator {
    fn name(&self) -> &'static str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str, _: u32, _: f32) -> Result<String, FeedbackError> {
        Err(FeedbackError::Disabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::State,
        http::{HeaderMap, StatusCode, Uri},
        Router,
    };
    use std::sync::Mutex;

    struct CapturedRequest {
        path: String,
        headers: HeaderMap,
        body: Value,
    }

    /// Upstream stand-in that answers every request with a canned response.
    struct FakeProvider {
        status: StatusCode,
        body: &'static str,
        captured: Mutex<Option<CapturedRequest>>,
    }

    impl FakeProvider {
        fn captured(&self) -> CapturedRequest {
            self.captured.lock().unwrap().take().expect("no request captured")
        }
    }

    async fn answer(
        State(fake): State<Arc<FakeProvider>>,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, &'static str) {
        *fake.captured.lock().unwrap() = Some(CapturedRequest {
            path: uri.path().to_string(),
            headers,
            body: serde_json::from_slice(&body).unwrap_or(Value::Null),
        });
        (fake.status, fake.body)
    }

    async fn serve_fake(status: StatusCode, body: &'static str) -> (Arc<FakeProvider>, String) {
        let fake = Arc::new(FakeProvider {
            status,
            body,
            captured: Mutex::new(None),
        });
        let app = Router::new().fallback(answer).with_state(fake.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (fake, format!("http://{}", addr))
    }

    fn config_for(provider: FeedbackProvider, endpoint: String, api_key: &str) -> FeedbackConfig {
        FeedbackConfig {
            provider,
            api_key: Some(api_key.to_string()),
            model: "test-model".to_string(),
            endpoint: Some(endpoint),
            timeout_seconds: 5,
            ..FeedbackConfig::default()
        }
    }

    #[tokio::test]
    async fn test_huggingface_request_contract() {
        let (fake, endpoint) =
            serve_fake(StatusCode::OK, r#"[{"generated_text":" Hello</s>"}]"#).await;
        let generator =
            HuggingFaceGenerator::new(&config_for(FeedbackProvider::HuggingFace, endpoint, "hf-key"))
                .unwrap();

        let text = generator.generate("Assess", 64, 0.5).await.unwrap();
        assert_eq!(text, "Hello");

        let request = fake.captured();
        assert_eq!(request.path, "/test-model");
        assert_eq!(request.headers["authorization"], "Bearer hf-key");
        assert!(request.headers.get("x-goog-api-key").is_none());
        assert_eq!(request.body["inputs"], "<s>[INST] Assess [/INST]</s>");
        assert_eq!(request.body["parameters"]["max_new_tokens"], 64);
        assert_eq!(request.body["parameters"]["temperature"], 0.5);
        assert_eq!(request.body["parameters"]["top_p"], 0.9);
        assert_eq!(request.body["parameters"]["return_full_text"], false);
    }

    #[tokio::test]
    async fn test_huggingface_error_status_is_reported() {
        let (_fake, endpoint) = serve_fake(StatusCode::SERVICE_UNAVAILABLE, "loading").await;
        let generator =
            HuggingFaceGenerator::new(&config_for(FeedbackProvider::HuggingFace, endpoint, "hf-key"))
                .unwrap();

        let err = generator.generate("Assess", 64, 0.5).await.unwrap_err();
        match &err {
            FeedbackError::Status { status, body } => {
                assert_eq!(*status, 503);
                assert_eq!(body, "loading");
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_huggingface_non_json_body_is_malformed() {
        let (_fake, endpoint) = serve_fake(StatusCode::OK, "<html>gateway</html>").await;
        let generator =
            HuggingFaceGenerator::new(&config_for(FeedbackProvider::HuggingFace, endpoint, "hf-key"))
                .unwrap();

        let err = generator.generate("Assess", 64, 0.5).await.unwrap_err();
        assert!(matches!(err, FeedbackError::MalformedResponse(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_gemini_request_contract() {
        let (fake, endpoint) = serve_fake(
            StatusCode::OK,
            r#"{"candidates":[{"content":{"parts":[{"text":"Order a biopsy."}]}}]}"#,
        )
        .await;
        let generator =
            GeminiGenerator::new(&config_for(FeedbackProvider::Gemini, endpoint, "g-key")).unwrap();

        let text = generator.generate("Assess", 128, 0.5).await.unwrap();
        assert_eq!(text, "Order a biopsy.");

        let request = fake.captured();
        assert_eq!(request.path, "/test-model:generateContent");
        assert_eq!(request.headers["x-goog-api-key"], "g-key");
        assert!(request.headers.get("authorization").is_none());
        assert_eq!(request.body["contents"][0]["parts"][0]["text"], "Assess");
        assert_eq!(request.body["generationConfig"]["maxOutputTokens"], 128);
        assert_eq!(request.body["generationConfig"]["temperature"], 0.5);
    }

    #[tokio::test]
    async fn test_gemini_not_found_is_permanent() {
        let (_fake, endpoint) = serve_fake(StatusCode::NOT_FOUND, "").await;
        let generator =
            GeminiGenerator::new(&config_for(FeedbackProvider::Gemini, endpoint, "g-key")).unwrap();

        let err = generator.generate("Assess", 128, 0.5).await.unwrap_err();
        assert!(matches!(err, FeedbackError::Status { status: 404, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_huggingface_extracts_and_cleans_text() {
        let body = json!([{ "generated_text": "  Order a skin biopsy.</s>\n" }]);
        assert_eq!(
            HuggingFaceGenerator::extract_text(&body).unwrap(),
            "Order a skin biopsy."
        );
    }

    #[test]
    fn test_huggingface_rejects_missing_or_blank_text() {
        let body = json!({ "error": "Model is currently loading" });
        assert!(matches!(
            HuggingFaceGenerator::extract_text(&body),
            Err(FeedbackError::MalformedResponse(_))
        ));

        let body = json!([{ "generated_text": "   </s>" }]);
        assert!(matches!(
            HuggingFaceGenerator::extract_text(&body),
            Err(FeedbackError::EmptyResponse)
        ));
    }

    #[test]
    fn test_huggingface_wraps_prompt_in_instruct_tags() {
        assert_eq!(
            HuggingFaceGenerator::instruct_prompt("Assess"),
            "<s>[INST] Assess [/INST]</s>"
        );
    }

    #[test]
    fn test_gemini_extracts_first_candidate() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Consider imaging." }] } }]
        });
        assert_eq!(
            GeminiGenerator::extract_text(&body).unwrap(),
            "Consider imaging."
        );
        assert!(GeminiGenerator::extract_text(&json!({ "candidates": [] })).is_err());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(FeedbackError::Status {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(!FeedbackError::Status {
            status: 401,
            body: String::new()
        }
        .is_retryable());
        assert!(!FeedbackError::Disabled.is_retryable());
    }

    #[test]
    fn test_build_generator_follows_provider() {
        let mut config = FeedbackConfig::default();
        assert_eq!(build_generator(&config).unwrap().name(), "huggingface");

        config.provider = FeedbackProvider::Gemini;
        assert_eq!(build_generator(&config).unwrap().name(), "gemini");

        config.provider = FeedbackProvider::Disabled;
        assert_eq!(build_generator(&config).unwrap().name(), "disabled");
    }

    #[tokio::test]
    async fn test_disabled_generator_always_fails() {
        let result = DisabledGenerator.generate("prompt", 10, 0.5).await;
        assert!(matches!(result, Err(FeedbackError::Disabled)));
    }
}
