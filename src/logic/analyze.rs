//! LLM-backed dependency analysis: prompt construction, reply parsing, and
//! the filtering/clamping pipeline every proposed candidate passes through.

use crate::error::CoreError;
use crate::llm::{ChatClient, ChatMessage, ChatRequest};
use crate::logic::linker::{DeterministicLinker, ProducerMap};
use crate::model::{
    Api, CandidateOrigin, DependencyCandidate, Id, Mapping, VarLocation, VarType, Variable,
};
use crate::store::traits::Store;
use anyhow::{anyhow, Result};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};

/// Consumers per LLM request.
const BATCH_SIZE: usize = 3;

const PATH_ID_REASON: &str = "[System Logic] Path Parameter ID override";

const LIFECYCLE_MARKERS: [&str; 5] = ["history", "status", "balance", "cancel", "pay"];

#[derive(Debug)]
pub struct AnalysisOutcome {
    pub candidates: Vec<DependencyCandidate>,
    pub failed_batches: usize,
}

/// Per-endpoint facts the filter pipeline needs.
#[derive(Debug, Clone)]
pub struct EndpointFacts {
    pub method: String,
    pub path: String,
    /// Path params parsed from `{..}`, extracted body keys, and query
    /// parameters. Anything else a candidate names is a hallucination.
    pub explicit_inputs: HashSet<String>,
    pub path_vars: HashSet<String>,
    /// Whether any 2xx response schema is an array.
    pub returns_array: bool,
}

impl EndpointFacts {
    fn build(api: &Api, variables: &[Variable], responses_2xx_array: bool) -> Self {
        let path_vars: HashSet<String> = path_placeholders(&api.path).collect();
        let mut explicit_inputs = path_vars.clone();
        for variable in variables {
            match variable.location {
                VarLocation::Body | VarLocation::Query => {
                    explicit_inputs.insert(variable.name.clone());
                }
                _ => {}
            }
        }
        Self {
            method: api.method.clone(),
            path: api.path.clone(),
            explicit_inputs,
            path_vars,
            returns_array: responses_2xx_array,
        }
    }
}

fn path_placeholders(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/')
        .filter_map(|segment| segment.strip_prefix('{'))
        .filter_map(|segment| segment.strip_suffix('}'))
        .map(str::to_string)
}

#[derive(Debug, Deserialize)]
struct LlmReply {
    #[serde(default)]
    candidates: Vec<LlmCandidate>,
}

#[derive(Debug, Deserialize)]
struct LlmCandidate {
    #[serde(alias = "sourceApiId", alias = "source")]
    source_api_id: Id,
    #[serde(alias = "targetApiId", alias = "target")]
    target_api_id: Id,
    #[serde(alias = "targetVariable", alias = "target_variable")]
    variable: String,
    #[serde(alias = "sourcePath")]
    source_path: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default, alias = "usesId")]
    uses_id: bool,
}

fn default_confidence() -> f64 {
    0.5
}

pub struct DependencyAnalyzer;

impl DependencyAnalyzer {
    /// Run the full analysis for a project: deterministic candidates first,
    /// then LLM proposals batch by batch, then the filter pipeline, then an
    /// atomic replacement of the project's candidate set.
    pub async fn analyze_project<S: Store>(
        store: &S,
        chat: &dyn ChatClient,
        model: &str,
        project_id: &Id,
    ) -> Result<AnalysisOutcome> {
        let apis = store.list_apis_for_project(project_id).await?;
        if apis.is_empty() {
            return Err(anyhow!("project '{}' has no ingested apis", project_id));
        }

        let mut variables_by_api: HashMap<Id, Vec<Variable>> = HashMap::new();
        let mut facts: HashMap<Id, EndpointFacts> = HashMap::new();
        let mut producers_context = Vec::with_capacity(apis.len());
        for api in &apis {
            let variables = store.list_variables_for_api(&api.id).await?;
            let responses = store.list_responses_for_api(&api.id).await?;
            let returns_array = responses.iter().any(|r| {
                (200..300).contains(&r.status_code)
                    && r.schema.get("type").and_then(Value::as_str) == Some("array")
            });
            facts.insert(
                api.id.clone(),
                EndpointFacts::build(api, &variables, returns_array),
            );
            producers_context.push(json!({
                "id": api.id,
                "method": api.method,
                "path": api.path,
                "responses": responses
                    .iter()
                    .map(|r| json!({"status": r.status_code, "schema": r.schema}))
                    .collect::<Vec<_>>(),
            }));
            variables_by_api.insert(api.id.clone(), variables);
        }

        let producer_map = DeterministicLinker::producer_map(&apis);
        let auth_candidates =
            DeterministicLinker::auth_candidates(store, &apis, &variables_by_api).await?;
        let id_candidates =
            DeterministicLinker::id_candidates(store, &apis, &variables_by_api, &producer_map)
                .await?;

        // Consumers for the LLM: at least one user_input variable after
        // stripping Authorization headers (those are deterministic).
        let consumers: Vec<&Api> = apis
            .iter()
            .filter(|api| {
                variables_by_api
                    .get(&api.id)
                    .map(|vars| {
                        vars.iter().any(|v| {
                            v.var_type == VarType::UserInput
                                && !(v.name == "Authorization" && v.location == VarLocation::Header)
                        })
                    })
                    .unwrap_or(false)
            })
            .collect();

        let producers_json = serde_json::to_string_pretty(&producers_context)?;
        let mut proposed = Vec::new();
        let mut failed_batches = 0;
        for batch in consumers.chunks(BATCH_SIZE) {
            match Self::analyze_batch(chat, model, &producers_json, batch, &variables_by_api).await
            {
                Ok(candidates) => proposed.extend(candidates),
                Err(err) => {
                    // Deterministic candidates survive; the batch is dropped.
                    log::warn!("{}", CoreError::LlmBatchFailed(format!("{:#}", err)));
                    failed_batches += 1;
                }
            }
        }

        let known_apis: HashSet<&Id> = apis.iter().map(|api| &api.id).collect();
        proposed.retain(|c: &DependencyCandidate| {
            known_apis.contains(&c.source_api_id) && known_apis.contains(&c.target_api_id)
        });

        let mut candidates = auth_candidates;
        candidates.extend(post_process(
            id_candidates.into_iter().chain(proposed).collect(),
            &facts,
            &producer_map,
        ));
        dedupe(&mut candidates);

        store
            .replace_candidates_for_project(project_id, candidates.clone())
            .await?;

        Ok(AnalysisOutcome {
            candidates,
            failed_batches,
        })
    }

    async fn analyze_batch(
        chat: &dyn ChatClient,
        model: &str,
        producers_json: &str,
        batch: &[&Api],
        variables_by_api: &HashMap<Id, Vec<Variable>>,
    ) -> Result<Vec<DependencyCandidate>> {
        let consumers_context: Vec<Value> = batch
            .iter()
            .map(|api| {
                let inputs: Vec<String> = variables_by_api
                    .get(&api.id)
                    .map(|vars| {
                        vars.iter()
                            .filter(|v| {
                                v.var_type == VarType::UserInput
                                    && !(v.name == "Authorization"
                                        && v.location == VarLocation::Header)
                            })
                            .map(|v| format!("{} ({})", v.name, v.data_type))
                            .collect()
                    })
                    .unwrap_or_default();
                json!({
                    "id": api.id,
                    "method": api.method,
                    "path": api.path,
                    "inputs": inputs,
                })
            })
            .collect();

        let system = "You analyze REST API catalogs and infer which producer endpoint supplies \
                      each consumer input. Reply with strict JSON only, shaped as \
                      {\"candidates\":[{\"source_api_id\":\"...\",\"target_api_id\":\"...\",\
                      \"variable\":\"...\",\"source_path\":\"...\",\"confidence\":0.0,\
                      \"reason\":\"...\"}]}. `variable` is an input name of the consumer; \
                      `source_path` is a dot-path into the producer's response body. Propose \
                      nothing when unsure.";
        let user = format!(
            "Producers:\n{}\n\nConsumers:\n{}",
            producers_json,
            serde_json::to_string_pretty(&consumers_context)?
        );

        let request = ChatRequest::json(
            model,
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        );
        let response = chat.chat(request).await?;
        let reply: LlmReply = serde_json::from_str(strip_code_fences(&response.message.content))
            .map_err(|err| anyhow!("unparseable LLM reply: {}", err))?;

        Ok(reply
            .candidates
            .into_iter()
            .map(|c| {
                let mut mapping = Mapping::new();
                mapping.insert(c.variable, c.source_path);
                let mut candidate = DependencyCandidate::new(
                    c.source_api_id,
                    c.target_api_id,
                    mapping,
                    c.confidence,
                    c.reason,
                    CandidateOrigin::Inferred,
                );
                if c.uses_id {
                    candidate.structural_type = Some("variable".to_string());
                }
                candidate
            })
            .collect())
    }
}

/// LLM replies are asked to be bare JSON but often arrive fenced.
pub fn strip_code_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn has_id_suffix(name: &str) -> bool {
    name.ends_with("Id") || name.eq_ignore_ascii_case("id")
}

/// The filtering and clamping pipeline. Applies to every candidate except the
/// deterministic auth chain, whose confidence may never be overridden.
pub fn post_process(
    candidates: Vec<DependencyCandidate>,
    facts: &HashMap<Id, EndpointFacts>,
    producer_map: &ProducerMap,
) -> Vec<DependencyCandidate> {
    let mut kept = Vec::with_capacity(candidates.len());

    'next: for mut candidate in candidates {
        // Self-reference refusal.
        if candidate.source_api_id == candidate.target_api_id {
            continue;
        }
        let Some(target) = facts.get(&candidate.target_api_id) else {
            continue;
        };
        let Some(source) = facts.get(&candidate.source_api_id) else {
            continue;
        };

        // Scope filter: a variable outside the target's explicit input set
        // is a hallucination.
        for variable in candidate.mapping.keys() {
            if !target.explicit_inputs.contains(variable) {
                continue 'next;
            }
        }

        // Path `*Id` override.
        let path_id_target = candidate
            .mapping
            .keys()
            .any(|variable| target.path_vars.contains(variable) && has_id_suffix(variable));
        if path_id_target {
            candidate.structural_type = Some("variable".to_string());
            candidate.dependency_type = Some("dependent".to_string());
            candidate.reason = Some(PATH_ID_REASON.to_string());
            candidate.confidence = candidate.confidence.min(0.6);
        }

        // Confidence clamps, lowest wins.
        let uses_id = candidate
            .mapping
            .values()
            .any(|selector| selector.rsplit('.').next().map(has_id_suffix).unwrap_or(false));
        let target_has_id = candidate.mapping.keys().any(|k| has_id_suffix(k));
        if uses_id || target_has_id {
            candidate.confidence = candidate.confidence.min(0.6);
        }
        if LIFECYCLE_MARKERS
            .iter()
            .any(|marker| source.path.contains(marker))
        {
            candidate.confidence = candidate.confidence.min(0.5);
        }
        let post_on_collection = source.method == "POST" && !source.path.contains('{');
        if !post_on_collection {
            candidate.confidence = candidate.confidence.min(0.6);
        }
        if source.method == "GET" && source.returns_array {
            candidate.confidence = candidate.confidence.min(0.7);
        }
        candidate.confidence = round2(candidate.confidence.min(0.8));

        // Origin tag against the deterministic producer map.
        let deterministic = candidate.mapping.keys().any(|variable| {
            let effective = DeterministicLinker::effective_path_var(&target.path, variable);
            producer_map.matches(&effective, &candidate.source_api_id)
        });
        candidate.origin = if deterministic {
            CandidateOrigin::Deterministic
        } else {
            CandidateOrigin::Inferred
        };

        kept.push(candidate);
    }

    kept
}

/// Keep the first candidate per (source, target, variable set); auth and
/// producer-map candidates are queued ahead of LLM proposals.
fn dedupe(candidates: &mut Vec<DependencyCandidate>) {
    let mut seen = HashSet::new();
    candidates.retain(|candidate| {
        let key = (
            candidate.source_api_id.clone(),
            candidate.target_api_id.clone(),
            candidate.mapping.keys().cloned().collect::<Vec<_>>(),
        );
        seen.insert(key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(
        id: &str,
        method: &str,
        path: &str,
        inputs: &[&str],
        returns_array: bool,
    ) -> (Id, EndpointFacts) {
        let path_vars: HashSet<String> = path_placeholders(path).collect();
        let mut explicit_inputs = path_vars.clone();
        explicit_inputs.extend(inputs.iter().map(|s| s.to_string()));
        (
            id.to_string(),
            EndpointFacts {
                method: method.to_string(),
                path: path.to_string(),
                explicit_inputs,
                path_vars,
                returns_array,
            },
        )
    }

    fn candidate(source: &str, target: &str, variable: &str, selector: &str) -> DependencyCandidate {
        let mut mapping = Mapping::new();
        mapping.insert(variable.to_string(), selector.to_string());
        DependencyCandidate::new(
            source.to_string(),
            target.to_string(),
            mapping,
            0.9,
            None,
            CandidateOrigin::Inferred,
        )
    }

    fn fixture() -> HashMap<Id, EndpointFacts> {
        [
            facts("post-orders", "POST", "/orders", &["total"], false),
            facts("get-order", "GET", "/orders/{id}", &[], false),
            facts("get-history", "GET", "/orders/history", &["page"], true),
            facts("post-pay", "POST", "/orders/{id}/pay", &["amount"], false),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn scope_filter_drops_hallucinated_variables() {
        let facts = fixture();
        let map = ProducerMap::default();
        let out = post_process(
            vec![candidate("post-orders", "get-order", "randomField", "id")],
            &facts,
            &map,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn self_references_are_refused() {
        let facts = fixture();
        let map = ProducerMap::default();
        let out = post_process(
            vec![candidate("get-order", "get-order", "id", "id")],
            &facts,
            &map,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn path_id_override_caps_and_tags() {
        let facts = fixture();
        let map = ProducerMap::default();
        let out = post_process(
            vec![candidate("post-orders", "get-order", "id", "id")],
            &facts,
            &map,
        );
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.structural_type.as_deref(), Some("variable"));
        assert_eq!(c.dependency_type.as_deref(), Some("dependent"));
        assert_eq!(c.reason.as_deref(), Some(PATH_ID_REASON));
        assert!(c.confidence <= 0.6);
    }

    #[test]
    fn lifecycle_source_paths_cap_at_half() {
        let facts = fixture();
        let map = ProducerMap::default();
        let out = post_process(
            vec![candidate("get-history", "post-orders", "total", "total")],
            &facts,
            &map,
        );
        assert_eq!(out[0].confidence, 0.5);
    }

    #[test]
    fn non_collection_posts_cap_at_point_six() {
        let facts = fixture();
        let map = ProducerMap::default();
        // /orders/{id}/pay is both lifecycle and non-collection; lowest wins.
        let out = post_process(
            vec![candidate("post-pay", "post-orders", "total", "receipt")],
            &facts,
            &map,
        );
        assert_eq!(out[0].confidence, 0.5);
    }

    #[test]
    fn soft_cap_and_rounding_apply_last() {
        let facts = fixture();
        let map = ProducerMap::default();
        let mut c = candidate("post-orders", "post-pay", "amount", "total");
        c.confidence = 0.987;
        let out = post_process(vec![c], &facts, &map);
        assert_eq!(out[0].confidence, 0.8);
    }

    #[test]
    fn origin_tags_against_the_producer_map() {
        let apis = vec![Api {
            id: "post-orders".to_string(),
            project_id: "p1".to_string(),
            method: "POST".to_string(),
            path: "/orders".to_string(),
            operation_id: None,
            summary: None,
            auth_scheme: None,
        }];
        let map = DeterministicLinker::producer_map(&apis);
        let facts = fixture();

        let out = post_process(
            vec![candidate("post-orders", "get-order", "id", "id")],
            &facts,
            &map,
        );
        assert_eq!(out[0].origin, CandidateOrigin::Deterministic);
    }
}
