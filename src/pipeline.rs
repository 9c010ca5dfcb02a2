//! Two-stage answer pipeline: draft, then review.
//!
//! **Draft.** The analyst agent receives the conversation history and the
//! request, calls tools one at a time through the JSON protocol in
//! [`crate::agents`], and finishes with a markdown draft.
//!
//! **Review.** The reviewer agent corrects the draft and appends a
//! References section. The result is normalized: a wrapping code fence is
//! removed, reference lines naming sources that were never retrieved are
//! dropped, and a References section built from the retrieved sources is
//! appended when none survives.
//!
//! Stages run strictly in sequence. A failing model call fails the whole
//! run with [`RagError::Pipeline`]; there is no retry. Tool failures do
//! not fail the run, they are shown to the analyst as text.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::agents::{self, AgentDecision, ANALYST, REVIEWER};
use crate::error::{RagError, RagResult};
use crate::llm::{ChatMessage, ChatModel};
use crate::tools::{ToolCallRecord, ToolContext, ToolRegistry};

/// Text used in the References section when nothing was retrieved.
pub const NO_REFERENCES_LINE: &str = "- No relevant documents were found in the knowledge base.";

/// Input contract shared by every front end.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PipelineInput {
    #[serde(default)]
    pub conversation_history: String,
    pub user_request: String,
}

/// The single result shape returned by a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    /// Final markdown, ending with a References section.
    pub answer: String,
    /// Sources listed in the References section.
    pub references: Vec<String>,
    /// The analyst's draft before review.
    pub draft: String,
    pub tool_calls: Vec<ToolCallRecord>,
    /// Clarifying questions the analyst asked for.
    pub clarifications: Vec<String>,
}

pub struct AnswerPipeline {
    chat: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    max_tool_calls: usize,
}

impl AnswerPipeline {
    pub fn new(chat: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>, max_tool_calls: usize) -> Self {
        Self {
            chat,
            tools,
            max_tool_calls,
        }
    }

    /// Name of the chat model both stages talk to.
    pub fn model_name(&self) -> &str {
        self.chat.model_name()
    }

    /// Run draft then review. Returns early with [`RagError::Pipeline`]
    /// when `cancel` fires.
    pub async fn run(
        &self,
        input: &PipelineInput,
        cancel: &CancellationToken,
    ) -> RagResult<PipelineOutput> {
        if input.user_request.trim().is_empty() {
            return Err(RagError::Pipeline("user_request must not be empty".into()));
        }

        let ctx = ToolContext::new();
        let (draft, tool_calls) = self.draft(input, &ctx, cancel).await?;
        tracing::info!(tool_calls = tool_calls.len(), "draft complete");

        let sources = ctx.sources();
        let reviewed = self
            .review(&input.user_request, &draft, &sources, cancel)
            .await?;
        let (answer, references) = normalize_answer(&reviewed, &sources);

        Ok(PipelineOutput {
            answer,
            references,
            draft,
            tool_calls,
            clarifications: ctx.clarifications(),
        })
    }

    async fn complete(
        &self,
        stage: &str,
        messages: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> RagResult<String> {
        tracing::debug!(stage, model = self.chat.model_name(), "chat request");
        tokio::select! {
            _ = cancel.cancelled() => Err(RagError::Pipeline(format!("{} stage cancelled", stage))),
            reply = self.chat.complete(messages) => {
                reply.map_err(|e| RagError::Pipeline(format!("{} stage: {:#}", stage, e)))
            }
        }
    }

    async fn draft(
        &self,
        input: &PipelineInput,
        ctx: &ToolContext,
        cancel: &CancellationToken,
    ) -> RagResult<(String, Vec<ToolCallRecord>)> {
        let system = format!(
            "{}\n\n{}",
            agents::system_prompt(&ANALYST),
            agents::tool_protocol(&self.tools.describe())
        );
        let mut messages = vec![
            ChatMessage::system(system),
            ChatMessage::user(agents::analyst_task(
                &input.conversation_history,
                &input.user_request,
            )),
        ];
        let mut records = Vec::new();
        let mut limit_notice_sent = false;

        loop {
            let reply = self.complete("draft", &messages, cancel).await?;

            match agents::parse_agent_decision(&reply) {
                AgentDecision::Final(content) => {
                    let content = strip_code_fence(&content);
                    if content.trim().is_empty() {
                        return Err(RagError::Pipeline(
                            "draft stage: analyst returned an empty answer".into(),
                        ));
                    }
                    return Ok((content, records));
                }
                AgentDecision::ToolCall { name, args } => {
                    messages.push(ChatMessage::assistant(reply.clone()));

                    if records.len() >= self.max_tool_calls {
                        if limit_notice_sent {
                            return Err(RagError::Pipeline(format!(
                                "draft stage: analyst exceeded {} tool calls",
                                self.max_tool_calls
                            )));
                        }
                        limit_notice_sent = true;
                        messages.push(ChatMessage::user(
                            "Tool call limit reached. Respond now with the final answer JSON using the information gathered so far.",
                        ));
                        continue;
                    }

                    let output = self.call_tool(&name, &args, ctx).await;
                    tracing::debug!(tool = %name, "tool call");
                    messages.push(ChatMessage::user(format!(
                        "Tool result ({}):\n{}",
                        name, output
                    )));
                    records.push(ToolCallRecord {
                        tool: name,
                        args,
                        output,
                    });
                }
            }
        }
    }

    async fn call_tool(&self, name: &str, args: &Value, ctx: &ToolContext) -> String {
        match self.tools.call(name, args, ctx).await {
            Ok(Value::String(text)) => text,
            Ok(other) => other.to_string(),
            Err(e) => format!("Tool error: {:#}", e),
        }
    }

    async fn review(
        &self,
        user_request: &str,
        draft: &str,
        sources: &[String],
        cancel: &CancellationToken,
    ) -> RagResult<String> {
        let messages = [
            ChatMessage::system(agents::system_prompt(&REVIEWER)),
            ChatMessage::user(agents::reviewer_task(user_request, draft, sources)),
        ];
        let reply = self.complete("review", &messages, cancel).await?;
        let reply = strip_code_fence(&reply);
        if reply.trim().is_empty() {
            return Err(RagError::Pipeline(
                "review stage: reviewer returned an empty answer".into(),
            ));
        }
        Ok(reply)
    }
}

/// Remove a code fence wrapping the whole text (e.g. "```markdown ... ```").
pub fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            // Drop the info string on the opening line
            let body = match inner.find('\n') {
                Some(pos) => &inner[pos + 1..],
                None => inner,
            };
            return body.trim().to_string();
        }
    }
    trimmed.to_string()
}

fn is_references_heading(line: &str) -> bool {
    let stripped = line
        .trim()
        .trim_start_matches('#')
        .trim()
        .trim_matches('*')
        .trim()
        .trim_end_matches(':')
        .trim();
    stripped.eq_ignore_ascii_case("references") || stripped.eq_ignore_ascii_case("sources")
}

fn is_list_item(line: &str) -> bool {
    let t = line.trim_start();
    t.starts_with("- ")
        || t.starts_with("* ")
        || t.split_once(". ")
            .map(|(n, _)| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
}

fn file_name(source: &str) -> &str {
    Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source)
}

/// Link targets and bare path-like words in a reference line.
fn reference_tokens(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();

    for quote in ["href='", "href=\""] {
        let close = if quote.ends_with('\'') { '\'' } else { '"' };
        let mut rest = line;
        while let Some(start) = rest.find(quote) {
            let value = &rest[start + quote.len()..];
            let end = value.find(close).unwrap_or(value.len());
            tokens.push(&value[..end]);
            rest = &value[end..];
        }
    }

    let mut rest = line;
    while let Some(start) = rest.find("](") {
        let value = &rest[start + 2..];
        let end = value.find(')').unwrap_or(value.len());
        tokens.push(&value[..end]);
        rest = &value[end..];
    }

    tokens.extend(
        line.split(|c: char| c.is_whitespace() || "<>()[]'\"`|,;*".contains(c))
            .map(|t| t.trim_start_matches("href=").trim_end_matches(['.', ':']))
            .filter(|t| !t.is_empty()),
    );

    tokens
        .into_iter()
        .map(|t| t.trim().trim_start_matches("./"))
        .collect()
}

/// The retrieved source a reference line points at, if any. A line counts
/// only when one of its tokens equals a source path or its file name.
fn matching_source<'a>(line: &str, sources: &'a [String]) -> Option<&'a String> {
    let tokens = reference_tokens(line);
    sources
        .iter()
        .find(|s| tokens.contains(&s.as_str()))
        .or_else(|| sources.iter().find(|s| tokens.contains(&file_name(s))))
}

/// Render a References section for `sources`.
pub fn references_section(sources: &[String]) -> String {
    let mut out = String::from("## References\n");
    if sources.is_empty() {
        out.push_str(NO_REFERENCES_LINE);
        out.push('\n');
    }
    for s in sources {
        out.push_str(&format!(
            "- <a href='{}' target='_blank'>{}</a>\n",
            s,
            file_name(s)
        ));
    }
    out
}

/// Validate the References section of `answer` against the sources that
/// were actually retrieved. Returns the final markdown and the sources it
/// cites.
pub fn normalize_answer(answer: &str, sources: &[String]) -> (String, Vec<String>) {
    let lines: Vec<&str> = answer.lines().collect();
    let heading = lines.iter().rposition(|l| is_references_heading(l));

    let (body_lines, ref_lines) = match heading {
        Some(pos) => (&lines[..pos], &lines[pos + 1..]),
        None => (&lines[..], &lines[lines.len()..]),
    };

    let mut cited: Vec<String> = Vec::new();
    let mut kept: Vec<&str> = Vec::new();
    for line in ref_lines.iter().filter(|l| is_list_item(l)) {
        match matching_source(line, sources) {
            Some(source) => {
                if !cited.contains(source) {
                    cited.push(source.clone());
                    kept.push(line.trim());
                }
            }
            None => tracing::debug!(line = %line.trim(), "dropping reference to unknown source"),
        }
    }

    let body = body_lines.join("\n").trim_end().to_string();
    let section = if kept.is_empty() {
        cited = sources.to_vec();
        references_section(sources)
    } else {
        format!("## References\n{}\n", kept.join("\n"))
    };

    let answer = if body.is_empty() {
        section
    } else {
        format!("{}\n\n{}", body, section)
    };
    (answer.trim_end().to_string(), cited)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetrievalConfig;
    use crate::index::{IndexBuilder, VectorIndex};
    use crate::progress::NoProgress;
    use crate::retriever::{build_cache, Retriever};
    use crate::test_support::{word_chunks, ScriptedChat, WordEmbedder};
    use markdown_rag_core::cache::ManualClock;
    use markdown_rag_core::format::NO_RESULTS_MESSAGE;
    use markdown_rag_core::store::memory::InMemoryStore;

    fn retriever_over(index: VectorIndex) -> Arc<Retriever> {
        Arc::new(Retriever::from_index(
            index,
            build_cache(&RetrievalConfig::default(), Arc::new(ManualClock::new())),
            4,
        ))
    }

    fn pipeline(chat: Arc<ScriptedChat>, retriever: Arc<Retriever>) -> AnswerPipeline {
        AnswerPipeline::new(chat, Arc::new(ToolRegistry::with_builtins(retriever)), 8)
    }

    fn input(req: &str) -> PipelineInput {
        PipelineInput {
            conversation_history: String::new(),
            user_request: req.to_string(),
        }
    }

    #[tokio::test]
    async fn test_empty_store_yields_sentinel_and_no_fabricated_references() {
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let chat = Arc::new(ScriptedChat::new(&[
            r#"{"type":"tool_call","tool_name":"search","tool_args":{"query":"X"}}"#,
            r#"{"type":"final","content":"No information about X was found in the knowledge base."}"#,
            "No information about X was found.\n\n## References\n- <a href='annual_report_2023.md' target='_blank'>Annual Report</a>",
        ]));

        let out = pipeline(chat.clone(), retriever_over(index))
            .run(&input("X"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.tool_calls.len(), 1);
        assert_eq!(out.tool_calls[0].output, NO_RESULTS_MESSAGE);
        assert!(out.references.is_empty());
        assert!(!out.answer.contains("annual_report_2023.md"));
        assert!(out.answer.ends_with(&format!("## References\n{}", NO_REFERENCES_LINE)));

        // The analyst saw the sentinel as a tool result
        let seen = chat.requests();
        assert!(seen[1].iter().any(|m| m.content.contains(NO_RESULTS_MESSAGE)));
    }

    #[tokio::test]
    async fn test_references_kept_for_retrieved_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let index = IndexBuilder::new(tmp.path().join("db"), Arc::new(WordEmbedder::default()))
            .build_and_save(
                &word_chunks(&[("docs/liabilities.md", "# Liabilities\n\nTotal liabilities rose in 2023.")]),
                &NoProgress,
            )
            .await
            .unwrap();

        let chat = Arc::new(ScriptedChat::new(&[
            r#"{"type":"tool_call","tool_name":"search","tool_args":{"query":"liabilities 2023","k":2}}"#,
            r#"{"type":"final","content":"Total liabilities rose in 2023."}"#,
            "```markdown\nTotal liabilities rose in 2023.\n\n## References\n- <a href='docs/liabilities.md' target='_blank'>Liabilities</a>\n- <a href='invented.md' target='_blank'>Invented</a>\n```",
        ]));

        let out = pipeline(chat, retriever_over(index))
            .run(&input("Tell me about liabilities in 2023"), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(out.references, vec!["docs/liabilities.md".to_string()]);
        assert!(out.answer.starts_with("Total liabilities rose in 2023."));
        assert!(out.answer.contains("docs/liabilities.md"));
        assert!(!out.answer.contains("invented.md"));
        assert!(!out.answer.contains("```"));
        assert_eq!(out.draft, "Total liabilities rose in 2023.");
    }

    #[test]
    fn test_missing_references_are_appended() {
        let (answer, refs) = normalize_answer("Body text.", &["a/b.md".to_string()]);
        assert_eq!(refs, vec!["a/b.md".to_string()]);
        assert_eq!(
            answer,
            "Body text.\n\n## References\n- <a href='a/b.md' target='_blank'>b.md</a>"
        );
    }

    #[tokio::test]
    async fn test_chat_failure_is_pipeline_error() {
        let chat = Arc::new(ScriptedChat::new(&[]));
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let err = pipeline(chat, retriever_over(index))
            .run(&input("X"), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RagError::Pipeline(ref m) if m.starts_with("draft stage")));
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back_as_text() {
        let chat = Arc::new(ScriptedChat::new(&[
            r#"{"type":"tool_call","tool_name":"nonexistent","tool_args":{}}"#,
            r#"{"type":"final","content":"Done."}"#,
            "Done.",
        ]));
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let out = pipeline(chat, retriever_over(index))
            .run(&input("X"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(out.tool_calls[0].output.starts_with("Tool error:"));
    }

    #[tokio::test]
    async fn test_tool_call_limit() {
        let call = r#"{"type":"tool_call","tool_name":"search","tool_args":{"query":"again"}}"#;
        let chat = Arc::new(ScriptedChat::new(&[call, call, call, call]));
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let p = AnswerPipeline::new(
            chat,
            Arc::new(ToolRegistry::with_builtins(retriever_over(index))),
            2,
        );
        let err = p
            .run(&input("X"), &CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("exceeded 2 tool calls"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let chat = Arc::new(ScriptedChat::hanging());
        let index = VectorIndex::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(WordEmbedder::default()),
        );
        let token = CancellationToken::new();
        token.cancel();
        let err = pipeline(chat, retriever_over(index))
            .run(&input("X"), &token)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```markdown\n# Hi\n```"), "# Hi");
        assert_eq!(strip_code_fence("```\nplain\n```"), "plain");
        assert_eq!(strip_code_fence("no fence"), "no fence");
    }

    #[test]
    fn test_similar_file_name_is_not_a_citation() {
        let sources = vec!["docs/report.md".to_string()];
        let (answer, refs) = normalize_answer(
            "Body.\n\n## References\n- <a href='annual_report.md' target='_blank'>Annual</a>",
            &sources,
        );
        assert!(!answer.contains("annual_report.md"), "answer: {}", answer);
        assert!(answer.contains("<a href='docs/report.md' target='_blank'>report.md</a>"));
        assert_eq!(refs, sources);
    }

    #[test]
    fn test_reference_matches_exact_path_or_file_name() {
        let sources = vec!["docs/report.md".to_string(), "notes/q3.md".to_string()];
        let (answer, refs) = normalize_answer(
            "Body.\n\n## References\n- [Report](./docs/report.md)\n- `q3.md`.\n- old_q3.md\n- docs/report.md.bak",
            &sources,
        );
        assert_eq!(refs, sources);
        assert!(answer.contains("- [Report](./docs/report.md)"));
        assert!(answer.contains("- `q3.md`."));
        assert!(!answer.contains("old_q3.md"));
        assert!(!answer.contains("report.md.bak"));
    }

    #[test]
    fn test_references_heading_variants() {
        assert!(is_references_heading("## References"));
        assert!(is_references_heading("**References:**"));
        assert!(is_references_heading("References"));
        assert!(!is_references_heading("## Referenced work"));
    }
}
