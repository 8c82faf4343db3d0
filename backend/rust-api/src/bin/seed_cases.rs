use anyhow::Context;
use tracing_subscriber::fmt::init;

use digital_opd_api::{
    config::Config, models::case::seed_catalog, services::case_store::MongoCaseStore,
};

/// Loads the built-in patient cases into an empty catalog collection.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::load().context("Failed to load configuration")?;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .context("Failed to connect to MongoDB")?;
    let store = MongoCaseStore::new(
        mongo_client.database(&config.mongo_database),
        config.cases_collection.clone(),
    );

    let existing = store.count_cases().await?;
    if existing > 0 {
        tracing::info!(
            "Collection {}.{} already holds {} cases, skipping seed",
            config.mongo_database,
            config.cases_collection,
            existing
        );
        return Ok(());
    }

    let inserted = store.insert_cases(&seed_catalog()).await?;
    tracing::info!(
        "Seeded {} patient cases into {}.{}",
        inserted,
        config.mongo_database,
        config.cases_collection
    );

    Ok(())
}
