use crate::model::{generate_id, CandidateOrigin, Id};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered map from a consumer variable name to a dot-path selector into the
/// producer's JSON response body (e.g. `"orderId" -> "data.id"`). Keys are
/// kept sorted so serialized mappings are deterministic.
pub type Mapping = BTreeMap<String, String>;

/// An unconfirmed, machine-proposed dependency with a confidence score.
/// Replaced wholesale per project on every analysis pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyCandidate {
    pub id: Id,
    pub source_api_id: Id,
    pub target_api_id: Id,
    pub mapping: Mapping,
    pub confidence: f64,
    pub reason: Option<String>,
    pub origin: CandidateOrigin,
    pub structural_type: Option<String>,
    pub dependency_type: Option<String>,
}

impl DependencyCandidate {
    pub fn new(
        source_api_id: Id,
        target_api_id: Id,
        mapping: Mapping,
        confidence: f64,
        reason: Option<String>,
        origin: CandidateOrigin,
    ) -> Self {
        Self {
            id: generate_id(),
            source_api_id,
            target_api_id,
            mapping,
            confidence,
            reason,
            origin,
            structural_type: None,
            dependency_type: None,
        }
    }
}

/// A human-confirmed edge from a producer endpoint to a consumer endpoint.
/// `(source_api_id, target_api_id)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiDependency {
    pub id: Id,
    pub source_api_id: Id,
    pub target_api_id: Id,
    pub mapping: Mapping,
    pub is_required: bool,
}

/// Input model for promoting a candidate (or a manually constructed mapping)
/// into a confirmed dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDependency {
    pub source_api_id: Id,
    pub target_api_id: Id,
    pub mapping: Mapping,
    #[serde(default = "default_required")]
    pub is_required: bool,
}

fn default_required() -> bool {
    true
}

impl NewDependency {
    pub fn into_dependency(self) -> ApiDependency {
        ApiDependency {
            id: generate_id(),
            source_api_id: self.source_api_id,
            target_api_id: self.target_api_id,
            mapping: self.mapping,
            is_required: self.is_required,
        }
    }
}
