//! Deterministic dependency candidates: the auth chain and the `*Id`
//! producer map. These run before any LLM call.

use crate::logic::extract::VariableExtractor;
use crate::model::{
    Api, CandidateOrigin, DependencyCandidate, Id, Mapping, VarLocation, Variable,
};
use crate::store::traits::Store;
use anyhow::Result;
use std::collections::HashMap;

/// Token fields recognized on producer responses, in preference order.
const TOKEN_FIELDS: [&str; 4] = ["accessToken", "access_token", "refreshToken", "refresh_token"];

pub const AUTH_REASON: &str = "Deterministic Auth: Bearer Token";

/// Lookup of likely `*Id` producers derived from root-collection endpoints.
#[derive(Debug, Default, Clone)]
pub struct ProducerMap {
    entries: HashMap<String, Id>,
}

impl ProducerMap {
    pub fn get(&self, inferred_id: &str) -> Option<&Id> {
        self.entries.get(inferred_id)
    }

    pub fn matches(&self, inferred_id: &str, source_api_id: &Id) -> bool {
        self.get(inferred_id) == Some(source_api_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct DeterministicLinker;

impl DeterministicLinker {
    /// Trivial singularization: strip a trailing `s`.
    pub fn singularize(resource: &str) -> String {
        resource.strip_suffix('s').unwrap_or(resource).to_string()
    }

    /// Root-collection endpoints (`POST /orders`, `GET /users`) produce
    /// `<singular>Id` entries; `POST /register` additionally produces
    /// `userId`. When POST and GET both qualify, POST wins.
    pub fn producer_map(apis: &[Api]) -> ProducerMap {
        let mut map = ProducerMap::default();
        for preferred_method in ["GET", "POST"] {
            for api in apis {
                if api.method != preferred_method {
                    continue;
                }
                let segments: Vec<&str> =
                    api.path.split('/').filter(|s| !s.is_empty()).collect();
                if segments.len() != 1 {
                    continue;
                }
                let resource = segments[0];
                if api.method == "POST" && resource == "register" {
                    map.entries.insert("userId".to_string(), api.id.clone());
                    continue;
                }
                let inferred = format!("{}Id", Self::singularize(resource));
                map.entries.insert(inferred, api.id.clone());
            }
        }
        map
    }

    /// The effective producer-map key for a path variable: a literal `{id}`
    /// preceded by a resource segment `R` binds to `singular(R)Id`.
    pub fn effective_path_var(path: &str, var_name: &str) -> String {
        if !var_name.eq_ignore_ascii_case("id") {
            return var_name.to_string();
        }
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let placeholder = format!("{{{}}}", var_name);
        for (i, segment) in segments.iter().enumerate() {
            if *segment == placeholder && i > 0 && !segments[i - 1].starts_with('{') {
                return format!("{}Id", Self::singularize(segments[i - 1]));
            }
        }
        var_name.to_string()
    }

    /// Auth chain: every `Authorization` header consumer links to every
    /// producer whose response exposes a token field. The first token field
    /// in preference order wins per (producer, consumer) pair.
    pub async fn auth_candidates<S: Store>(
        store: &S,
        apis: &[Api],
        variables_by_api: &HashMap<Id, Vec<Variable>>,
    ) -> Result<Vec<DependencyCandidate>> {
        let consumers: Vec<&Api> = apis
            .iter()
            .filter(|api| {
                variables_by_api
                    .get(&api.id)
                    .map(|vars| {
                        vars.iter()
                            .any(|v| v.name == "Authorization" && v.location == VarLocation::Header)
                    })
                    .unwrap_or(false)
            })
            .collect();
        if consumers.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for producer in apis {
            let Some(token_path) = Self::token_field(store, &producer.id).await? else {
                continue;
            };
            for consumer in &consumers {
                if consumer.id == producer.id {
                    continue;
                }
                let mut mapping = Mapping::new();
                mapping.insert("Authorization".to_string(), token_path.clone());
                candidates.push(DependencyCandidate::new(
                    producer.id.clone(),
                    consumer.id.clone(),
                    mapping,
                    1.0,
                    Some(AUTH_REASON.to_string()),
                    CandidateOrigin::Deterministic,
                ));
            }
        }
        Ok(candidates)
    }

    /// Dot-path to the best token field across the producer's response
    /// schemas, if any.
    async fn token_field<S: Store>(store: &S, api_id: &Id) -> Result<Option<String>> {
        let responses = store.list_responses_for_api(api_id).await?;
        let mut fields = Vec::new();
        for response in &responses {
            fields.extend(VariableExtractor::output_fields(&response.schema));
        }
        for token in TOKEN_FIELDS {
            if let Some(field) = fields
                .iter()
                .find(|f| f.name.rsplit('.').next() == Some(token))
            {
                return Ok(Some(field.name.clone()));
            }
        }
        Ok(None)
    }

    /// Producer-map candidates for `*Id` path parameters. These flow through
    /// the standard post-processing, which caps them at 0.6.
    pub async fn id_candidates<S: Store>(
        store: &S,
        apis: &[Api],
        variables_by_api: &HashMap<Id, Vec<Variable>>,
        producer_map: &ProducerMap,
    ) -> Result<Vec<DependencyCandidate>> {
        if producer_map.is_empty() {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for consumer in apis {
            let Some(variables) = variables_by_api.get(&consumer.id) else {
                continue;
            };
            for variable in variables
                .iter()
                .filter(|v| v.location == VarLocation::Path)
            {
                let effective = Self::effective_path_var(&consumer.path, &variable.name);
                let Some(producer_id) = producer_map.get(&effective) else {
                    continue;
                };
                if *producer_id == consumer.id {
                    continue;
                }
                let selector = Self::id_selector(store, producer_id, &effective).await?;
                let mut mapping = Mapping::new();
                mapping.insert(variable.name.clone(), selector);
                candidates.push(DependencyCandidate::new(
                    producer_id.clone(),
                    consumer.id.clone(),
                    mapping,
                    1.0,
                    None,
                    CandidateOrigin::Deterministic,
                ));
            }
        }
        Ok(candidates)
    }

    /// Prefer a response field named after the inferred id (`orderId`); fall
    /// back to the conventional `id`.
    async fn id_selector<S: Store>(
        store: &S,
        producer_id: &Id,
        inferred_id: &str,
    ) -> Result<String> {
        let responses = store.list_responses_for_api(producer_id).await?;
        for response in &responses {
            let fields = VariableExtractor::output_fields(&response.schema);
            if let Some(field) = fields
                .iter()
                .find(|f| f.name.rsplit('.').next() == Some(inferred_id))
            {
                return Ok(field.name.clone());
            }
        }
        Ok("id".to_string())
    }
}
