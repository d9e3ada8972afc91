//! Dependency registry: promotes candidates (or manually built mappings)
//! into confirmed dependencies and keeps variable classification in step.

use crate::error::CoreError;
use crate::model::{ApiDependency, Id, NewDependency, VarType};
use crate::store::traits::Store;
use anyhow::{anyhow, Result};

pub struct DependencyRegistry;

impl DependencyRegistry {
    /// Confirm a dependency. Upserts on (source, target) and re-tags every
    /// target variable named in the mapping keys as `dependent` -- the sole
    /// path by which a variable leaves the user_input/candidate state.
    pub async fn confirm<S: Store>(store: &S, new: NewDependency) -> Result<ApiDependency> {
        if new.source_api_id == new.target_api_id {
            return Err(CoreError::SelfDependency(new.source_api_id).into());
        }
        if store.get_api(&new.source_api_id).await?.is_none() {
            return Err(anyhow!("source api '{}' not found", new.source_api_id));
        }
        if store.get_api(&new.target_api_id).await?.is_none() {
            return Err(anyhow!("target api '{}' not found", new.target_api_id));
        }

        let dependency = store.upsert_dependency(new.into_dependency()).await?;

        for variable in dependency.mapping.keys() {
            let matched = store
                .set_variable_type(&dependency.target_api_id, variable, VarType::Dependent, None)
                .await?;
            if !matched {
                log::warn!(
                    "mapping names '{}' but target api {} has no such variable",
                    variable,
                    dependency.target_api_id
                );
            }
        }

        Ok(dependency)
    }

    pub async fn remove<S: Store>(store: &S, id: &Id) -> Result<bool> {
        store.delete_dependency(id).await
    }
}
