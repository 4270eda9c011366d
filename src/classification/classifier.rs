use serde::Serialize;

use crate::configuration::config::CategorizationOptions;
use crate::error_handling::types::ClassifyError;

/// Spam probability of one message and the clues that produced it, most
/// significant first.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    pub probability: f64,
    pub evidence: Vec<(String, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    Ham,
    Spam,
    Unsure,
}

impl Disposition {
    pub fn from_probability(probability: f64, cutoffs: &CategorizationOptions) -> Self {
        if probability < cutoffs.ham_cutoff {
            Disposition::Ham
        } else if probability > cutoffs.spam_cutoff {
            Disposition::Spam
        } else {
            Disposition::Unsure
        }
    }
}

/// The scoring engine behind the proxy.
pub trait Classifier: Send + Sync {
    fn classify(&self, tokens: &[String]) -> Result<ClassificationResult, ClassifyError>;
}

/// A classifier with an empty training database: it has no opinion about
/// anything, so every message comes out unsure.
#[derive(Debug, Default, Clone, Copy)]
pub struct UntrainedClassifier;

impl Classifier for UntrainedClassifier {
    fn classify(&self, _tokens: &[String]) -> Result<ClassificationResult, ClassifyError> {
        Ok(ClassificationResult {
            probability: 0.5,
            evidence: Vec::new(),
        })
    }
}
