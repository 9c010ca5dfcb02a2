//! Tools the analyst agent can call.
//!
//! A [`Tool`] has a name, a one-line description, a JSON Schema for its
//! parameters, and an async `execute`. The [`ToolRegistry`] holds the
//! tools offered to the agent; [`validate_params`] checks a call's
//! arguments against the schema and fills defaults before execution.
//!
//! Built-ins:
//! - `search`: the [`Retriever`] as a tool; always returns text.
//! - `ask_for_clarification`: records a question for the user.
//!
//! Each pipeline run gets a fresh [`ToolContext`] that records the
//! sources the search tool surfaced, so the review stage can build the
//! References section from what was actually retrieved.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

use crate::retriever::Retriever;

#[async_trait]
pub trait Tool: Send + Sync {
    /// Identifier used in the agent's `tool_call` JSON.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Run with parameters already passed through [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// One recorded tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallRecord {
    pub tool: String,
    pub args: Value,
    pub output: String,
}

/// Per-run state shared with tools.
#[derive(Default)]
pub struct ToolContext {
    sources: Mutex<Vec<String>>,
    clarifications: Mutex<Vec<String>>,
}

impl ToolContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a retrieved source, keeping first-seen order.
    pub fn record_source(&self, source: &str) {
        let mut sources = self.sources.lock().unwrap_or_else(|e| e.into_inner());
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn record_clarification(&self, question: &str) {
        self.clarifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(question.to_string());
    }

    pub fn clarifications(&self) -> Vec<String> {
        self.clarifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// ============ Built-in tools ============

/// The retriever exposed as a tool.
pub struct SearchTool {
    retriever: Arc<Retriever>,
}

impl SearchTool {
    pub fn new(retriever: Arc<Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "Search for relevant information in the knowledge base"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "k": {
                    "type": "integer",
                    "description": "Number of passages to return",
                    "default": self.retriever.default_k()
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = params["query"].as_str().unwrap_or("");
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        let k = params["k"]
            .as_u64()
            .map(|k| k as usize)
            .unwrap_or(self.retriever.default_k());
        if k == 0 {
            bail!("k must be >= 1");
        }

        let text = match self.retriever.search_hits(query, k).await {
            Ok(hits) => {
                for hit in &hits {
                    ctx.record_source(hit.source_filename());
                }
                markdown_rag_core::format::render_hits(&hits)
            }
            Err(e) => {
                tracing::warn!(query, error = %e, "search tool failed");
                markdown_rag_core::format::render_error(e)
            }
        };

        Ok(Value::String(text))
    }
}

/// Placeholder clarification tool: front ends relay the question to the
/// user between turns rather than mid-run.
pub struct ClarificationTool;

#[async_trait]
impl Tool for ClarificationTool {
    fn name(&self) -> &str {
        "ask_for_clarification"
    }

    fn description(&self) -> &str {
        "Ask the user for clarifications when the request is unclear"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": { "type": "string", "description": "The clarifying question" }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let question = params["question"].as_str().unwrap_or("").trim();
        if question.is_empty() {
            bail!("question must not be empty");
        }
        ctx.record_clarification(question);
        Ok(Value::String(format!(
            "[The clarification '{}' will be relayed to the user. Continue with the information available.]",
            question
        )))
    }
}

// ============ Registry ============

pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry with `search` and `ask_for_clarification`.
    pub fn with_builtins(retriever: Arc<Retriever>) -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchTool::new(retriever)));
        registry.register(Box::new(ClarificationTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Human-readable tool list for agent instructions.
    pub fn describe(&self) -> String {
        self.tools
            .iter()
            .map(|t| {
                format!(
                    "- {}: {}\n  parameters: {}",
                    t.name(),
                    t.description(),
                    t.parameters_schema()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate `args` and run the named tool. Unknown tools, invalid
    /// arguments, and execution errors all come back as `Err`.
    pub async fn call(&self, name: &str, args: &Value, ctx: &ToolContext) -> Result<Value> {
        let tool = match self.find(name) {
            Some(t) => t,
            None => bail!("no tool registered with name: {}", name),
        };
        let params = validate_params(&tool.parameters_schema(), args)?;
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check `params` against `schema`: required keys present and string or
/// integer properties of the declared type. Missing optional keys with a
/// `default` are filled in. Unknown keys pass through untouched.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        other => bail!("parameters must be an object, got {}", json_type_name(other)),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for req_field in &required {
        if !params_obj.contains_key(*req_field) {
            bail!("missing required parameter: {}", req_field);
        }
    }

    let mut result = params_obj.clone();

    for (name, prop) in &properties {
        let Some(value) = params_obj.get(name) else {
            if let Some(default) = prop.get("default") {
                result.insert(name.clone(), default.clone());
            }
            continue;
        };
        let expected = prop.get("type").and_then(|t| t.as_str());
        let type_ok = match expected {
            Some("string") => value.is_string(),
            Some("integer") => value.is_u64() || value.is_i64(),
            _ => true,
        };
        if !type_ok {
            bail!(
                "parameter '{}' must be of type '{}', got {}",
                name,
                expected.unwrap_or_default(),
                json_type_name(value)
            );
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use crate::retriever::build_cache;
    use crate::config::RetrievalConfig;
    use crate::test_support::WordEmbedder;
    use markdown_rag_core::cache::ManualClock;
    use markdown_rag_core::format::NO_RESULTS_MESSAGE;
    use markdown_rag_core::store::memory::InMemoryStore;
    use serde_json::json;

    fn empty_retriever() -> Arc<Retriever> {
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        Arc::new(Retriever::from_index(
            index,
            build_cache(&RetrievalConfig::default(), Arc::new(ManualClock::new())),
            4,
        ))
    }

    #[test]
    fn test_validate_required_and_defaults() {
        let schema = SearchTool::new(empty_retriever()).parameters_schema();
        assert!(validate_params(&schema, &json!({})).is_err());

        let params = validate_params(&schema, &json!({ "query": "x" })).unwrap();
        assert_eq!(params["k"], json!(4));
    }

    #[test]
    fn test_validate_type_mismatch() {
        let schema = json!({
            "type": "object",
            "properties": { "k": { "type": "integer" } }
        });
        let err = validate_params(&schema, &json!({ "k": "four" })).unwrap_err();
        assert!(err.to_string().contains("must be of type 'integer'"));
    }

    #[test]
    fn test_validate_question_must_be_string() {
        let schema = ClarificationTool.parameters_schema();
        let err = validate_params(&schema, &json!({ "question": 7 })).unwrap_err();
        assert!(err.to_string().contains("'question' must be of type 'string'"));
        assert!(validate_params(&schema, &json!({ "question": "Which year?" })).is_ok());
    }

    #[test]
    fn test_validate_rejects_non_object() {
        assert!(validate_params(&json!({}), &json!([1, 2])).is_err());
    }

    #[tokio::test]
    async fn test_registry_call_search_on_empty_store() {
        let registry = ToolRegistry::with_builtins(empty_retriever());
        let ctx = ToolContext::new();
        let out = registry
            .call("search", &json!({ "query": "X" }), &ctx)
            .await
            .unwrap();
        assert_eq!(out, json!(NO_RESULTS_MESSAGE));
        assert!(ctx.sources().is_empty());
    }

    #[tokio::test]
    async fn test_registry_unknown_tool() {
        let registry = ToolRegistry::with_builtins(empty_retriever());
        let err = registry
            .call("delete_everything", &json!({}), &ToolContext::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no tool registered"));
    }

    #[tokio::test]
    async fn test_search_rejects_blank_query() {
        let registry = ToolRegistry::with_builtins(empty_retriever());
        assert!(registry
            .call("search", &json!({ "query": "  " }), &ToolContext::new())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_clarification_recorded() {
        let ctx = ToolContext::new();
        let out = ClarificationTool
            .execute(json!({ "question": "Which year?" }), &ctx)
            .await
            .unwrap();
        assert!(out.as_str().unwrap().contains("Which year?"));
        assert_eq!(ctx.clarifications(), vec!["Which year?".to_string()]);
    }

    #[test]
    fn test_sources_dedup_in_order() {
        let ctx = ToolContext::new();
        ctx.record_source("b.md");
        ctx.record_source("a.md");
        ctx.record_source("b.md");
        assert_eq!(ctx.sources(), vec!["b.md", "a.md"]);
    }

    #[test]
    fn test_describe_lists_builtins() {
        let registry = ToolRegistry::with_builtins(empty_retriever());
        assert_eq!(registry.len(), 2);
        let text = registry.describe();
        assert!(text.contains("- search:"));
        assert!(text.contains("- ask_for_clarification:"));
    }
}
