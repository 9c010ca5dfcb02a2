//! Agent roles, task descriptions, and the tool-call protocol.
//!
//! The pipeline has two agents. The analyst researches with tools and
//! drafts; the reviewer corrects the draft and adds references. Each agent
//! is a role/goal/backstory triple rendered into a system prompt.
//!
//! The analyst talks to tools through a small JSON protocol:
//!
//! ```json
//! {"type":"tool_call","tool_name":"search","tool_args":{"query":"..."}}
//! {"type":"final","content":"..."}
//! ```
//!
//! Replies that are not protocol JSON are taken as the final answer.

use serde_json::Value;

#[derive(Debug, Clone, Copy)]
pub struct AgentSpec {
    pub role: &'static str,
    pub goal: &'static str,
    pub backstory: &'static str,
}

pub const ANALYST: AgentSpec = AgentSpec {
    role: "Conversational Research and Analysis Specialist",
    goal: "Interpret user requests, perform detailed research using the search tool, and compile comprehensive answers with reference documents.",
    backstory: "With extensive experience in analytical research and data-driven insights, \
you excel at breaking down complex queries, conducting targeted searches, \
and synthesizing data into clear responses. Your methodical approach ensures \
accuracy and comprehensiveness in every answer.",
};

pub const REVIEWER: AgentSpec = AgentSpec {
    role: "Quality Assurance and Final Review Specialist",
    goal: "Carefully review and refine the initial responses, correct inaccuracies, and deliver a final answer meeting high standards of quality and clarity.",
    backstory: "With a keen eye for detail and extensive experience in quality control and content review, \
you detect inconsistencies, validate sources, and polish answers. \
Your meticulous approach ensures every final response is accurate, clear, and insightful.",
};

const ANALYST_EXPECTED_OUTPUT: &str = "A well-structured markdown-formatted answer, detailed and supported by reference documents and data. \
DO NOT include triple backticks around the markdown. DO NOT include additional comments. Just respond with markdown.";

const REVIEWER_INSTRUCTIONS: &str = "Follow these step-by-step instructions:
1. Review the Analyst's answer carefully.
2. Identify any errors, inconsistencies, or gaps.
3. Refine and correct the response to enhance clarity and accuracy.
4. Extract and format all document references used in the response.
5. Provide a polished final answer with a references section.";

const REVIEWER_EXPECTED_OUTPUT: &str = "A finalized markdown-formatted answer ready for delivery, including:
1. The main content with all corrections and improvements
2. A 'References' section at the end listing all documents used, formatted as:
   ## References
   - <a href='source_filename' target='_blank'>Document Title</a>
Only list documents that appear in the sources retrieved during research.
DO NOT include triple backticks around the markdown. DO NOT include additional comments. Just respond with markdown.";

/// Render an agent's persona as a system prompt.
pub fn system_prompt(agent: &AgentSpec) -> String {
    format!(
        "You are a {}.\n\nYour goal: {}\n\n{}",
        agent.role, agent.goal, agent.backstory
    )
}

/// The analyst's task for one request.
pub fn analyst_task(conversation_history: &str, user_request: &str) -> String {
    format!(
        "# Follow these step-by-step instructions:
1. Understand the user request: Read and analyze thoroughly, taking conversation history into account.
2. [OPTIONAL] Only ask for clarifications if the request is unclear or ambiguous.
3. Use the search tool repeatedly as needed to collect relevant information.
4. Perform any necessary calculations or analyses.
5. Synthesize gathered data into a comprehensive response.
6. Provide a detailed answer supported by references.

# Conversation history:
```{}```

# User request:
```{}```

# IMPORTANT:
- You MUST only use information found via the search tool.
- Do NOT rely on external knowledge.

# Expected output:
{}",
        conversation_history, user_request, ANALYST_EXPECTED_OUTPUT
    )
}

/// Tool-call protocol instructions appended to the analyst's system prompt.
pub fn tool_protocol(tool_descriptions: &str) -> String {
    format!(
        r#"You have access to the following tools:
{tools}

When you need to use a tool, respond ONLY with JSON in this format:
{{"type":"tool_call","tool_name":"<tool>","tool_args":{{...}}}}
When you have the final answer, respond ONLY with JSON in this format:
{{"type":"final","content":"<markdown answer>"}}
Do not include any extra text outside the JSON."#,
        tools = tool_descriptions
    )
}

/// The reviewer's task, given the analyst's draft and the retrieved sources.
pub fn reviewer_task(user_request: &str, draft: &str, sources: &[String]) -> String {
    let source_list = if sources.is_empty() {
        "(none: the search tool found no relevant documents)".to_string()
    } else {
        sources
            .iter()
            .map(|s| format!("- {}", s))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "{}\n\n# User request:\n{}\n\n# Analyst's answer:\n{}\n\n# Sources retrieved during research:\n{}\n\n# Expected output:\n{}",
        REVIEWER_INSTRUCTIONS, user_request, draft, source_list, REVIEWER_EXPECTED_OUTPUT
    )
}

/// What the analyst asked for in one reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentDecision {
    Final(String),
    ToolCall { name: String, args: Value },
}

/// Interpret an analyst reply. Anything that is not protocol JSON is a
/// final answer.
pub fn parse_agent_decision(text: &str) -> AgentDecision {
    if let Some(json_value) = parse_json_from_text(text) {
        if let Some(decision) = parse_decision_from_value(&json_value) {
            return decision;
        }
    }
    AgentDecision::Final(text.trim().to_string())
}

fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();

    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Some(v);
    }

    // JSON embedded in surrounding prose or a code fence
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

fn parse_decision_from_value(value: &Value) -> Option<AgentDecision> {
    let action_type = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    match action_type {
        "tool_call" => {
            let name = value
                .get("tool_name")
                .or_else(|| value.get("name"))
                .or_else(|| value.get("tool"))
                .and_then(|v| v.as_str())?;
            let args = value
                .get("tool_args")
                .or_else(|| value.get("args"))
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            Some(AgentDecision::ToolCall {
                name: name.to_string(),
                args,
            })
        }
        "final" => {
            let content = value
                .get("content")
                .or_else(|| value.get("response"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();
            Some(AgentDecision::Final(content))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_tool_call() {
        let d = parse_agent_decision(
            r#"{"type":"tool_call","tool_name":"search","tool_args":{"query":"revenue"}}"#,
        );
        assert_eq!(
            d,
            AgentDecision::ToolCall {
                name: "search".into(),
                args: json!({ "query": "revenue" })
            }
        );
    }

    #[test]
    fn test_parse_final_inside_prose() {
        let d = parse_agent_decision(
            "Here you go:\n```json\n{\"type\":\"final\",\"content\":\"# Answer\"}\n```",
        );
        assert_eq!(d, AgentDecision::Final("# Answer".into()));
    }

    #[test]
    fn test_plain_markdown_is_final() {
        let d = parse_agent_decision("  # Title\n\nSome {braces} text  ");
        assert_eq!(d, AgentDecision::Final("# Title\n\nSome {braces} text".into()));
    }

    #[test]
    fn test_tool_call_without_args() {
        let d = parse_agent_decision(r#"{"action":"tool_call","tool":"search"}"#);
        assert_eq!(
            d,
            AgentDecision::ToolCall {
                name: "search".into(),
                args: json!({})
            }
        );
    }

    #[test]
    fn test_analyst_task_embeds_inputs() {
        let task = analyst_task("User: hi\n\n", "What is X?");
        assert!(task.contains("```User: hi\n\n```"));
        assert!(task.contains("```What is X?```"));
        assert!(task.contains("Do NOT rely on external knowledge."));
    }

    #[test]
    fn test_reviewer_task_lists_sources() {
        let task = reviewer_task("q", "draft", &["a.md".to_string()]);
        assert!(task.contains("- a.md"));
        let task = reviewer_task("q", "draft", &[]);
        assert!(task.contains("(none"));
    }

    #[test]
    fn test_system_prompt_has_role() {
        assert!(system_prompt(&REVIEWER).contains("Quality Assurance and Final Review Specialist"));
    }
}
