//! Prompt construction and response parsing

use super::models::SessionState;
use crate::context::TokenCounter;
use once_cell::sync::Lazy;
use regex::Regex;

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[-*+]|\d+[.)])\s+(.+)$").expect("valid list item pattern"));

static HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:#{1,6}\s*(.+?)|\*\*(.+?)\*\*:?)\s*$").expect("valid heading pattern")
});

/// System prompt for the initial analysis
pub fn system_prompt(state: &SessionState) -> String {
    let repository = state
        .repository
        .as_ref()
        .map(|r| r.full_name.as_str())
        .unwrap_or(state.repository_url.as_str());

    let mut prompt = format!(
        "You are an expert GitHub repository analyst. Your task is to analyze the provided \
        repository data and generate a comprehensive {analysis} report.\n\n\
        Repository: {repository}\n\
        Analysis Type: {analysis}\n\n\
        Provide a detailed, professional analysis based on the repository data provided. \
        Structure the answer as a short overview followed by a \"## Findings\" section and a \
        \"## Recommendations\" section, each written as a bullet list.",
        analysis = state.analysis_type,
        repository = repository,
    );

    if !state.system_prompt.is_empty() {
        prompt.push_str("\n\nAdditional Instructions: ");
        prompt.push_str(&state.system_prompt);
    }

    prompt
}

/// User prompt carrying the request and fetched repository data
///
/// The serialized data of all tool responses together is truncated to
/// `data_budget` tokens.
pub fn user_prompt(state: &SessionState, counter: &TokenCounter, data_budget: usize) -> String {
    let mut parts = Vec::new();

    if !state.user_prompt.is_empty() {
        parts.push(format!("User Request: {}", state.user_prompt));
    }

    if !state.tool_responses.is_empty() {
        parts.push("Repository Data:".to_string());
        let per_response = data_budget / state.tool_responses.len();
        for response in &state.tool_responses {
            let data = response.data.to_string();
            parts.push(format!(
                "- {}: {}",
                response.action,
                counter.truncate_to_budget(&data, per_response)
            ));
        }
    }

    if parts.is_empty() {
        parts.push(format!("Analyze the repository at {}.", state.repository_url));
    }

    parts.join("\n\n")
}

/// Bullet items under the first heading that starts with `heading`
/// (case-insensitive), up to the next heading
pub fn extract_section(text: &str, heading: &str) -> Vec<String> {
    let heading = heading.to_lowercase();
    let mut items = Vec::new();
    let mut in_section = false;

    for line in text.lines() {
        let line = line.trim();

        if let Some(caps) = HEADING.captures(line) {
            let title = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim().to_lowercase())
                .unwrap_or_default();
            if in_section {
                break;
            }
            in_section = title.starts_with(&heading);
            continue;
        }

        if in_section {
            if let Some(caps) = LIST_ITEM.captures(line) {
                items.push(caps[1].trim().to_string());
            }
        }
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::models::{AnalysisRequest, AnalysisType, GitHubRepository, ToolResponse};
    use serde_json::json;

    fn state() -> SessionState {
        let url = "https://github.com/octocat/hello-world";
        let request = AnalysisRequest::new(url, AnalysisType::Security)
            .with_system_prompt("Focus on secrets handling.")
            .with_user_prompt("Is it safe to deploy?");
        let mut state = SessionState::new(request);
        state.repository = GitHubRepository::from_url(&state.repository_url).ok();
        state
    }

    #[test]
    fn test_system_prompt() {
        let prompt = system_prompt(&state());
        assert!(prompt.contains("comprehensive security report"));
        assert!(prompt.contains("Repository: octocat/hello-world"));
        assert!(prompt.contains("## Findings"));
        assert!(prompt.ends_with("Additional Instructions: Focus on secrets handling."));
    }

    #[test]
    fn test_user_prompt_includes_data() {
        let mut state = state();
        state
            .tool_responses
            .push(ToolResponse::new("get_repository_structure", json!({ "stars": 42 })));

        let prompt = user_prompt(&state, &TokenCounter::approximate(), 1_000);
        assert_eq!(
            prompt,
            "User Request: Is it safe to deploy?\n\n\
             Repository Data:\n\n\
             - get_repository_structure: {\"stars\":42}"
        );
    }

    #[test]
    fn test_user_prompt_truncates_data() {
        let mut state = state();
        state.user_prompt.clear();
        let data = json!({ "readme": "x".repeat(400) });
        state
            .tool_responses
            .push(ToolResponse::new("get_repository_structure", data));

        let prompt = user_prompt(&state, &TokenCounter::approximate(), 10);
        assert!(prompt.ends_with("..."));
        assert!(prompt.len() < 100);
    }

    #[test]
    fn test_user_prompt_fallback() {
        let mut state = state();
        state.user_prompt.clear();
        let prompt = user_prompt(&state, &TokenCounter::approximate(), 1_000);
        assert_eq!(prompt, "Analyze the repository at https://github.com/octocat/hello-world.");
    }

    #[test]
    fn test_extract_section() {
        let text = "Overview of the project.\n\n\
                    ## Findings\n\
                    - Uses tokio\n\
                    * No CI configured\n\
                    1. Tests are sparse\n\n\
                    ## Recommendations\n\
                    - Add CI\n\
                    2) Write integration tests\n";

        assert_eq!(
            extract_section(text, "Findings"),
            vec!["Uses tokio", "No CI configured", "Tests are sparse"]
        );
        assert_eq!(
            extract_section(text, "recommendations"),
            vec!["Add CI", "Write integration tests"]
        );
        assert!(extract_section(text, "risks").is_empty());
    }

    #[test]
    fn test_extract_section_bold_heading() {
        let text = "**Key Findings:**\n- One\n\n**Next steps**\n- Two";
        assert!(extract_section(text, "findings").is_empty());
        assert_eq!(extract_section(text, "key findings"), vec!["One"]);
    }
}
