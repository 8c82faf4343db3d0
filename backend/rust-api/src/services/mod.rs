use crate::config::Config;
use mongodb::Client as MongoClient;
use std::sync::Arc;
use std::time::Duration;

use case_store::{CaseStore, MongoCaseStore};
use feedback_service::FeedbackService;
use session_service::SessionMachine;

pub struct AppState {
    pub config: Config,
    pub cases: Arc<dyn CaseStore>,
    pub feedback: Arc<FeedbackService>,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);
        let store = MongoCaseStore::new(mongo, config.cases_collection.clone());

        // Startup still succeeds without MongoDB; /health reports it and request_patient fails
        match tokio::time::timeout(Duration::from_secs(5), store.ping()).await {
            Ok(Ok(())) => tracing::info!("MongoDB connection established successfully"),
            Ok(Err(e)) => tracing::warn!("MongoDB ping failed at startup: {:#}", e),
            Err(_) => tracing::warn!("MongoDB ping timeout after 5s at startup"),
        }

        let generator = feedback_generator::build_generator(&config.feedback)?;
        tracing::info!("Feedback provider: {}", generator.name());
        let feedback = Arc::new(FeedbackService::new(generator, &config.feedback));

        Ok(Self::with_components(config, Arc::new(store), feedback))
    }

    pub fn with_components(
        config: Config,
        cases: Arc<dyn CaseStore>,
        feedback: Arc<FeedbackService>,
    ) -> Self {
        Self {
            config,
            cases,
            feedback,
        }
    }

    /// Fresh state machine for a new connection.
    pub fn new_session(&self, connection_id: impl Into<String>) -> SessionMachine {
        SessionMachine::new(connection_id, self.cases.clone(), self.feedback.clone())
    }
}

pub mod case_store;
pub mod feedback_generator;
pub mod feedback_service;
pub mod session_service;
pub mod session_worker;
