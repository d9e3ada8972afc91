use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Where an input variable lives on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarLocation {
    Path,
    Query,
    Header,
    Body,
}

impl VarLocation {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarLocation::Path => "path",
            VarLocation::Query => "query",
            VarLocation::Header => "header",
            VarLocation::Body => "body",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "path" => Some(VarLocation::Path),
            "query" => Some(VarLocation::Query),
            "header" => Some(VarLocation::Header),
            "body" => Some(VarLocation::Body),
            _ => None,
        }
    }
}

/// Classification of an input variable. `UserInput` is the initial state for
/// anything a caller must supply; a confirmed dependency re-tags the variable
/// as `Dependent`. `Synthetic` marks variables implied by the spec rather than
/// declared in it (currently only `Authorization`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    UserInput,
    Dependent,
    DependentCandidate,
    Constant,
    Synthetic,
}

impl VarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VarType::UserInput => "user_input",
            VarType::Dependent => "dependent",
            VarType::DependentCandidate => "dependent_candidate",
            VarType::Constant => "constant",
            VarType::Synthetic => "synthetic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user_input" => Some(VarType::UserInput),
            "dependent" => Some(VarType::Dependent),
            "dependent_candidate" => Some(VarType::DependentCandidate),
            "constant" => Some(VarType::Constant),
            "synthetic" => Some(VarType::Synthetic),
            _ => None,
        }
    }
}

/// How a dependency candidate came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateOrigin {
    Deterministic,
    Inferred,
}

impl CandidateOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOrigin::Deterministic => "deterministic",
            CandidateOrigin::Inferred => "inferred",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deterministic" => Some(CandidateOrigin::Deterministic),
            "inferred" => Some(CandidateOrigin::Inferred),
            _ => None,
        }
    }
}
