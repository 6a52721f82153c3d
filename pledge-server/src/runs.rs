//! Class runs
//!
//! A run is one class session of one variant. Its class code names the queue
//! students join, and its token guards the instructor dashboard.

use chrono::{DateTime, Utc};
use pledge_core::{QueueKey, VariantId};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::sync::{PoisonError, RwLock};

const TOKEN_LEN: usize = 24;
const MAX_CLASS_CODE: usize = 32;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    /// Upper-cased class code
    pub run_id: String,
    pub variant: VariantId,
    #[serde(skip)]
    pub token: String,
    pub created_at: DateTime<Utc>,
}

impl Run {
    pub fn queue(&self) -> QueueKey {
        QueueKey::new(self.variant.clone(), self.run_id.clone())
    }

    pub fn dashboard_url(&self) -> String {
        format!("/dashboard.html?run={}&token={}", self.run_id, self.token)
    }
}

/// Why a run could not be created
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunRejection {
    InvalidClassCode,
    /// The class code already runs another variant
    VariantMismatch(VariantId),
}

/// Normalize a class code, or `None` if it is unusable
pub fn normalize_class_code(code: &str) -> Option<String> {
    let code = code.trim();
    let valid = !code.is_empty()
        && code.len() <= MAX_CLASS_CODE
        && code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then(|| code.to_ascii_uppercase())
}

#[derive(Default)]
pub struct Runs {
    runs: RwLock<FxHashMap<String, Run>>,
}

impl Runs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a run, or return the existing one for the same class and variant
    pub fn create(&self, class_code: &str, variant: VariantId) -> Result<(Run, bool), RunRejection> {
        let run_id = normalize_class_code(class_code).ok_or(RunRejection::InvalidClassCode)?;
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = runs.get(&run_id) {
            if existing.variant != variant {
                return Err(RunRejection::VariantMismatch(existing.variant.clone()));
            }
            return Ok((existing.clone(), false));
        }

        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();
        let run = Run {
            run_id: run_id.clone(),
            variant,
            token,
            created_at: Utc::now(),
        };
        runs.insert(run_id, run.clone());
        Ok((run, true))
    }

    /// Look up a run by class code (any case)
    pub fn get(&self, class_code: &str) -> Option<Run> {
        let run_id = normalize_class_code(class_code)?;
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&run_id)
            .cloned()
    }

    /// Look up a run and check its dashboard token
    pub fn authorize(&self, class_code: &str, token: &str) -> Option<Run> {
        self.get(class_code).filter(|run| run.token == token)
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_code_normalized() {
        assert_eq!(normalize_class_code(" econ101 "), Some("ECON101".to_string()));
        assert_eq!(normalize_class_code(""), None);
        assert_eq!(normalize_class_code("has space"), None);
        assert_eq!(normalize_class_code(&"x".repeat(40)), None);
    }

    #[test]
    fn test_create_is_idempotent_per_variant() {
        let runs = Runs::new();
        let (first, created) = runs.create("econ101", "win-as-much".into()).unwrap();
        assert!(created);
        assert_eq!(first.run_id, "ECON101");
        assert_eq!(first.token.len(), TOKEN_LEN);

        let (again, created) = runs.create("ECON101", "win-as-much".into()).unwrap();
        assert!(!created);
        assert_eq!(again.token, first.token);

        assert_eq!(
            runs.create("Econ101", "stag-hunt".into()),
            Err(RunRejection::VariantMismatch("win-as-much".into()))
        );
        assert_eq!(runs.len(), 1);
    }

    #[test]
    fn test_authorize_checks_token() {
        let runs = Runs::new();
        let (run, _) = runs.create("A1", "majority".into()).unwrap();
        assert!(runs.authorize("a1", &run.token).is_some());
        assert!(runs.authorize("a1", "wrong").is_none());
        assert!(run.dashboard_url().contains(&run.token));
        assert_eq!(run.queue(), QueueKey::new("majority", "A1"));
    }
}
