use crate::model::{generate_id, now_rfc3339, Id};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub owner_ref: Option<String>,
    pub created_at: String, // ISO 8601 timestamp
}

impl Project {
    pub fn new(name: String, owner_ref: Option<String>) -> Self {
        Self {
            id: generate_id(),
            name,
            owner_ref,
            created_at: now_rfc3339(),
        }
    }
}

/// Input model for creating a new project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub owner_ref: Option<String>,
}

impl NewProject {
    pub fn into_project(self) -> Project {
        Project::new(self.name, self.owner_ref)
    }
}
