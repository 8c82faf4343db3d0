use serde::{Deserialize, Serialize};

/// A patient case from the catalog. Never mutated after it is fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientCase {
    pub id: String,
    pub age: u32,
    pub gender: String,
    pub history: String,
    pub symptoms: String,
    pub additional_info: Option<String>,
    pub correct_test: String,
    pub correct_diagnosis: String,
}

impl PatientCase {
    /// Opening line spoken by the patient when the case is presented.
    pub fn patient_dialogue(&self) -> String {
        let intro = format!(
            "Hi, Dr. Good to see you. I've been experiencing {}.",
            self.symptoms
        );
        match self.additional_info() {
            Some(info) => format!("{} {}", intro, info),
            None => intro,
        }
    }

    /// Additional info, treating blank strings as absent.
    pub fn additional_info(&self) -> Option<&str> {
        self.additional_info
            .as_deref()
            .map(str::trim)
            .filter(|info| !info.is_empty())
    }

    pub fn is_correct_test(&self, selected: &str) -> bool {
        answers_match(selected, &self.correct_test)
    }

    pub fn is_correct_diagnosis(&self, selected: &str) -> bool {
        answers_match(selected, &self.correct_diagnosis)
    }
}

/// Exact match after case folding. No trimming, no partial matches.
pub fn answers_match(selected: &str, reference: &str) -> bool {
    selected.to_lowercase() == reference.to_lowercase()
}

/// Built-in catalog used by the `seed_cases` binary.
pub fn seed_catalog() -> Vec<PatientCase> {
    vec![
        PatientCase {
            id: "seed-abruptio-placenta".to_string(),
            age: 32,
            gender: "Female".to_string(),
            history: "Pregnant".to_string(),
            symptoms: "Mild bleeding and pain".to_string(),
            additional_info: Some(
                "Uterus is tender, fetal heart sounds are absent".to_string(),
            ),
            correct_test: "Physical examination and ultrasound".to_string(),
            correct_diagnosis: "Abruptio placenta".to_string(),
        },
        PatientCase {
            id: "seed-csom-unsafe".to_string(),
            age: 5,
            gender: "Male".to_string(),
            history: "Diagnosed with posterior superior retraction pocket".to_string(),
            symptoms: "None specified".to_string(),
            additional_info: Some("Posterior superior retraction pocket present".to_string()),
            correct_test: "Otoscopy and audiometry".to_string(),
            correct_diagnosis: "Chronic suppurative otitis media (unsafe type)".to_string(),
        },
        PatientCase {
            id: "seed-glomus-tumor".to_string(),
            age: 48,
            gender: "Male".to_string(),
            history: "None specified".to_string(),
            symptoms: "Exquisitely painful, raised, red lesion on the dorsal surface of left hand"
                .to_string(),
            additional_info: Some(
                "Histologic examination shows nests of round, regular cells within connective \
                 tissue associated with branching vascular spaces"
                    .to_string(),
            ),
            correct_test: "Skin biopsy".to_string(),
            correct_diagnosis: "Glomus tumor".to_string(),
        },
        PatientCase {
            id: "seed-lung-cancer".to_string(),
            age: 45,
            gender: "Male".to_string(),
            history: "persistent cough".to_string(),
            symptoms: "weight loss".to_string(),
            additional_info: Some("smoker for many years".to_string()),
            correct_test: "Chest x-ray".to_string(),
            correct_diagnosis: "Lung cancer".to_string(),
        },
    ]
}
