use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::{Collection, Database};
use rand::Rng;

use crate::models::case::PatientCase;

/// Read-mostly catalog of patient cases.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Uniformly random case, or `None` when the catalog is empty.
    async fn fetch_random_case(&self) -> Result<Option<PatientCase>>;

    async fn ping(&self) -> Result<()>;
}

pub struct MongoCaseStore {
    mongo: Database,
    collection: String,
}

impl MongoCaseStore {
    pub fn new(mongo: Database, collection: impl Into<String>) -> Self {
        Self {
            mongo,
            collection: collection.into(),
        }
    }

    fn cases(&self) -> Collection<Document> {
        self.mongo.collection::<Document>(&self.collection)
    }

    pub async fn count_cases(&self) -> Result<u64> {
        self.cases()
            .count_documents(doc! {})
            .await
            .context("Failed to count patient cases")
    }

    pub async fn insert_cases(&self, cases: &[PatientCase]) -> Result<usize> {
        let docs: Vec<Document> = cases.iter().map(case_to_document).collect();
        if docs.is_empty() {
            return Ok(0);
        }

        let result = self
            .cases()
            .insert_many(docs)
            .await
            .context("Failed to insert patient cases")?;

        Ok(result.inserted_ids.len())
    }
}

#[async_trait]
impl CaseStore for MongoCaseStore {
    async fn fetch_random_case(&self) -> Result<Option<PatientCase>> {
        let mut cursor = self
            .cases()
            .aggregate(vec![doc! { "$sample": { "size": 1 } }])
            .await
            .context("Failed to query patient cases")?;

        match cursor
            .try_next()
            .await
            .context("Failed to read sampled patient case")?
        {
            Some(document) => Ok(Some(case_from_document(&document)?)),
            None => Ok(None),
        }
    }

    async fn ping(&self) -> Result<()> {
        self.mongo
            .run_command(doc! { "ping": 1 })
            .await
            .context("MongoDB ping failed")?;
        Ok(())
    }
}

fn case_to_document(case: &PatientCase) -> Document {
    doc! {
        "_id": &case.id,
        "age": case.age as i32,
        "gender": &case.gender,
        "history": &case.history,
        "symptoms": &case.symptoms,
        "additional_info": case.additional_info.as_deref().map(str::to_string),
        "correct_test": &case.correct_test,
        "correct_diagnosis": &case.correct_diagnosis,
    }
}

fn case_from_document(document: &Document) -> Result<PatientCase> {
    let id = match document.get("_id") {
        Some(Bson::ObjectId(oid)) => oid.to_hex(),
        Some(Bson::String(value)) => value.to_string(),
        Some(Bson::Int32(value)) => value.to_string(),
        Some(Bson::Int64(value)) => value.to_string(),
        _ => return Err(anyhow!("Patient case has unsupported _id type")),
    };

    let age = match document.get("age") {
        Some(Bson::Int32(value)) => *value as i64,
        Some(Bson::Int64(value)) => *value,
        Some(Bson::Double(value)) => *value as i64,
        _ => return Err(anyhow!("Patient case {} has no age", id)),
    };
    let age = u32::try_from(age).map_err(|_| anyhow!("Patient case {} has invalid age", id))?;

    let text = |field: &str| -> Result<String> {
        document
            .get_str(field)
            .map(str::to_string)
            .map_err(|_| anyhow!("Patient case {} missing {}", id, field))
    };

    Ok(PatientCase {
        id: id.clone(),
        age,
        gender: text("gender")?,
        history: text("history")?,
        symptoms: text("symptoms")?,
        additional_info: document
            .get_str("additional_info")
            .ok()
            .filter(|info| !info.trim().is_empty())
            .map(str::to_string),
        correct_test: text("correct_test")?,
        correct_diagnosis: text("correct_diagnosis")?,
    })
}

/// Fixed in-process catalog.
#[derive(Debug, Default)]
pub struct InMemoryCaseStore {
    cases: Vec<PatientCase>,
}

impl InMemoryCaseStore {
    pub fn new(cases: Vec<PatientCase>) -> Self {
        Self { cases }
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn fetch_random_case(&self) -> Result<Option<PatientCase>> {
        if self.cases.is_empty() {
            return Ok(None);
        }
        let index = rand::rng().random_range(0..self.cases.len());
        Ok(self.cases.get(index).cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
