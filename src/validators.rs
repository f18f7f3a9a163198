//! Input validation helpers

use crate::agent::models::AnalysisType;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;

/// GitHub's limit for user, organization and repository names
pub const MAX_NAME_LENGTH: usize = 39;

/// Default cap applied by `sanitize_input`
pub const MAX_INPUT_LENGTH: usize = 10_000;

const GITHUB_HOSTS: &[&str] = &["github.com", "www.github.com"];

static NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$").expect("valid name pattern")
});

static HARMFUL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?is)<script[^>]*>.*?</script>",
        r"(?i)javascript:",
        r"(?i)on\w+\s*=",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid sanitizer pattern"))
    .collect()
});

/// Owner, repository and branch extracted from a GitHub URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitHubInfo {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub full_name: String,
}

/// Path segments of a GitHub URL, or `None` if the host is not GitHub
fn github_segments(url: &str) -> Option<Vec<String>> {
    let parsed = Url::parse(url.trim()).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    if parsed.scheme().is_empty() || !GITHUB_HOSTS.contains(&host.as_str()) {
        return None;
    }

    // The authority must be the bare host name
    if parsed.port().is_some() || !parsed.username().is_empty() || parsed.password().is_some() {
        return None;
    }

    let segments: Vec<String> = parsed
        .path()
        .trim_matches('/')
        .split('/')
        .map(str::to_string)
        .collect();

    if segments.len() < 2 {
        return None;
    }
    Some(segments)
}

fn strip_git_suffix(repo: &str) -> &str {
    repo.strip_suffix(".git").unwrap_or(repo)
}

/// GitHub user, organization or repository name
pub fn is_valid_github_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_NAME_LENGTH && NAME_PATTERN.is_match(name)
}

/// Whether `url` points at a GitHub repository
pub fn validate_github_url(url: &str) -> bool {
    match github_segments(url) {
        Some(segments) => {
            is_valid_github_name(&segments[0])
                && is_valid_github_name(strip_git_suffix(&segments[1]))
        }
        None => false,
    }
}

/// Extract owner, repository and branch (`main` unless `/tree/<branch>`)
pub fn extract_github_info(url: &str) -> Option<GitHubInfo> {
    if !validate_github_url(url) {
        return None;
    }

    let segments = github_segments(url)?;
    let owner = segments[0].clone();
    let repo = strip_git_suffix(&segments[1]).to_string();
    let branch = match segments.get(2).map(String::as_str) {
        Some("tree") => segments
            .get(3)
            .filter(|b| !b.is_empty())
            .cloned()
            .unwrap_or_else(|| "main".to_string()),
        _ => "main".to_string(),
    };

    Some(GitHubInfo {
        full_name: format!("{}/{}", owner, repo),
        owner,
        repo,
        branch,
    })
}

/// Whether `analysis_type` names a known analysis, case-insensitively
pub fn validate_analysis_type(analysis_type: &str) -> bool {
    analysis_type.parse::<AnalysisType>().is_ok()
}

/// Trim, cap at `max_length` characters and strip script-like fragments
pub fn sanitize_input(text: &str, max_length: usize) -> String {
    let mut sanitized: String = text.trim().chars().take(max_length).collect();
    for pattern in HARMFUL_PATTERNS.iter() {
        sanitized = pattern.replace_all(&sanitized, "").into_owned();
    }
    sanitized
}

/// System prompts must be 10 to 5000 characters once trimmed
pub fn validate_system_prompt(prompt: &str) -> bool {
    let length = prompt.trim().chars().count();
    (10..=5000).contains(&length)
}
