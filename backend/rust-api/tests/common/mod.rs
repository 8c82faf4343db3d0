#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use digital_opd_api::{
    config::Config,
    create_router,
    models::case::{seed_catalog, PatientCase},
    models::events::ServerEvent,
    services::{
        case_store::{CaseStore, InMemoryCaseStore},
        feedback_generator::{DisabledGenerator, FeedbackError, FeedbackGenerator},
        feedback_service::FeedbackService,
        AppState,
    },
};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

pub const SCRIPTED_FEEDBACK: &str = "Scripted instructor feedback";

pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Always answers with `SCRIPTED_FEEDBACK`.
pub struct ScriptedGenerator;

#[async_trait]
impl FeedbackGenerator for ScriptedGenerator {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, _: &str, _: u32, _: f32) -> Result<String, FeedbackError> {
        Ok(SCRIPTED_FEEDBACK.to_string())
    }
}

/// Case store whose backend is unreachable.
pub struct UnreachableCaseStore;

#[async_trait]
impl CaseStore for UnreachableCaseStore {
    async fn fetch_random_case(&self) -> anyhow::Result<Option<PatientCase>> {
        Err(anyhow::anyhow!("connection refused"))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Err(anyhow::anyhow!("connection refused"))
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn glomus_case() -> PatientCase {
    seed_catalog()
        .into_iter()
        .find(|c| c.correct_diagnosis == "Glomus tumor")
        .unwrap()
}

pub fn create_state(
    cases: Arc<dyn CaseStore>,
    generator: Arc<dyn FeedbackGenerator>,
) -> Arc<AppState> {
    create_state_with_config(Config::default(), cases, generator)
}

pub fn create_state_with_config(
    config: Config,
    cases: Arc<dyn CaseStore>,
    generator: Arc<dyn FeedbackGenerator>,
) -> Arc<AppState> {
    init_tracing();

    let feedback = Arc::new(
        FeedbackService::new(generator, &config.feedback).with_timeout(Duration::from_secs(2)),
    );
    Arc::new(AppState::with_components(config, cases, feedback))
}

/// App with a single-case catalog and a scripted provider.
pub fn create_test_app() -> Router {
    create_router(create_state(
        Arc::new(InMemoryCaseStore::new(vec![glomus_case()])),
        Arc::new(ScriptedGenerator),
    ))
}

/// Like `create_test_app`, with a short heartbeat period.
pub fn create_heartbeat_app(heartbeat_seconds: u64) -> Router {
    let mut config = Config::default();
    config.ws.heartbeat_seconds = heartbeat_seconds;
    create_router(create_state_with_config(
        config,
        Arc::new(InMemoryCaseStore::new(vec![glomus_case()])),
        Arc::new(ScriptedGenerator),
    ))
}

pub fn create_fallback_app() -> Router {
    create_router(create_state(
        Arc::new(InMemoryCaseStore::new(vec![glomus_case()])),
        Arc::new(DisabledGenerator),
    ))
}

pub fn create_unreachable_store_app() -> Router {
    create_router(create_state(
        Arc::new(UnreachableCaseStore),
        Arc::new(ScriptedGenerator),
    ))
}

/// Serves `app` on an ephemeral port.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn connect(addr: SocketAddr) -> TestSocket {
    let (socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();
    socket
}

pub async fn send_frame(socket: &mut TestSocket, frame: serde_json::Value) {
    socket
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next server event, skipping control frames.
pub async fn next_event(socket: &mut TestSocket) -> ServerEvent {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for server event")
            .expect("socket closed")
            .unwrap();

        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}
