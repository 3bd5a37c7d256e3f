//! Tier-1 deterministic routing: a small fixed grammar of verb phrases with
//! `owner/repo` token extraction.

use serde_json::json;

use super::ResolvedAction;

const REPO_GUIDANCE: &str = "Please specify repository in format 'owner/repo'";
const FILE_GUIDANCE: &str = "Please specify repository (owner/repo) and file path";
const QUERY_GUIDANCE: &str = "Please specify search query";

/// Resolve a message against the fixed phrase grammar. Unmatched input
/// yields the help text; this is a terminal outcome, not an error.
pub fn resolve(message: &str) -> ResolvedAction {
    let original = message.trim();
    let lowered = original.to_lowercase();

    if lowered.contains("repo info") || lowered.contains("repository info") {
        return repo_action("get_repo_info", "get_repository_info", original);
    }

    if lowered.contains("list issues") {
        return repo_action("list_issues", "list_issues", original);
    }

    if lowered.contains("list contents") || lowered.contains("show contents") {
        return repo_action("list_contents", "list_repository_contents", original);
    }

    if lowered.contains("get file") || lowered.contains("show file") {
        return file_action(original);
    }

    if lowered.contains("search repo") {
        return search_action(&lowered);
    }

    if lowered.contains("list prs") || lowered.contains("list pull requests") {
        return repo_action("list_prs", "list_pull_requests", original);
    }

    ResolvedAction::direct("help", help_message())
}

/// A repository reference is a single token containing exactly one slash
/// with non-empty sides. Scans the original (non-lowercased) message so the
/// owner/repo casing is preserved.
fn find_repo_token(message: &str) -> Option<(&str, &str)> {
    message.split_whitespace().find_map(split_repo)
}

fn split_repo(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.splitn(2, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return None;
    }
    Some((owner, repo))
}

fn repo_action(intent: &str, tool_name: &str, original: &str) -> ResolvedAction {
    match find_repo_token(original) {
        Some((owner, repo)) => ResolvedAction::dispatch(
            intent,
            "github",
            tool_name,
            json!({ "owner": owner, "repo": repo }),
        ),
        None => ResolvedAction::direct(intent, REPO_GUIDANCE),
    }
}

/// The file phrase needs two tokens: a repository (slash, no dot) and a
/// file path (contains a dot).
fn file_action(original: &str) -> ResolvedAction {
    let mut repo_token = None;
    let mut file_token = None;
    for token in original.split_whitespace() {
        if token.contains('/') && !token.contains('.') {
            repo_token = repo_token.or_else(|| split_repo(token));
        } else if token.contains('.') {
            file_token = file_token.or(Some(token));
        }
    }

    match (repo_token, file_token) {
        (Some((owner, repo)), Some(file_path)) => ResolvedAction::dispatch(
            "get_file",
            "github",
            "get_file_content",
            json!({ "owner": owner, "repo": repo, "file_path": file_path }),
        ),
        _ => ResolvedAction::direct("get_file", FILE_GUIDANCE),
    }
}

fn search_action(lowered: &str) -> ResolvedAction {
    let query = if let Some(idx) = lowered.find("search repository") {
        &lowered[idx + "search repository".len()..]
    } else if let Some(idx) = lowered.find("search repo") {
        &lowered[idx + "search repo".len()..]
    } else {
        ""
    };
    let query = query.trim();

    if query.is_empty() {
        ResolvedAction::direct("search_repos", QUERY_GUIDANCE)
    } else {
        ResolvedAction::dispatch(
            "search_repos",
            "github",
            "search_repositories",
            json!({ "query": query }),
        )
    }
}

fn help_message() -> String {
    "\
**Available GitHub Commands:**

- `repo info owner/repo` - Get repository information
- `list contents owner/repo` - List repository contents
- `get file owner/repo path/to/file` - Get file content
- `list issues owner/repo` - List repository issues
- `list prs owner/repo` - List pull requests
- `search repo query` - Search repositories

**Examples:**
- `repo info microsoft/vscode`
- `list issues rust-lang/rust`
- `get file microsoft/vscode README.md`
- `search repo python web framework`
"
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params<'a>(action: &'a ResolvedAction, key: &str) -> &'a str {
        action.parameters.get(key).and_then(|v| v.as_str()).unwrap()
    }

    #[test]
    fn repo_info_extracts_owner_and_repo() {
        let action = resolve("repo info octocat/Hello-World");
        assert!(action.requires_dispatch);
        assert_eq!(action.tool_name.as_deref(), Some("get_repository_info"));
        assert_eq!(params(&action, "owner"), "octocat");
        assert_eq!(params(&action, "repo"), "Hello-World");
    }

    #[test]
    fn repo_casing_is_preserved_despite_phrase_lowercasing() {
        let action = resolve("REPO INFO OctoCat/Hello-World");
        assert!(action.requires_dispatch);
        assert_eq!(params(&action, "owner"), "OctoCat");
        assert_eq!(params(&action, "repo"), "Hello-World");
    }

    #[test]
    fn list_issues_without_repo_returns_guidance() {
        let action = resolve("list issues");
        assert!(!action.requires_dispatch);
        assert_eq!(action.response.as_deref(), Some(REPO_GUIDANCE));
    }

    #[test]
    fn list_issues_with_repo_dispatches() {
        let action = resolve("list issues rust-lang/rust");
        assert_eq!(action.tool_name.as_deref(), Some("list_issues"));
        assert_eq!(params(&action, "owner"), "rust-lang");
    }

    #[test]
    fn contents_phrases_both_dispatch() {
        for msg in ["list contents octocat/Spoon-Knife", "show contents octocat/Spoon-Knife"] {
            let action = resolve(msg);
            assert_eq!(action.tool_name.as_deref(), Some("list_repository_contents"));
        }
    }

    #[test]
    fn get_file_distinguishes_repo_and_path() {
        let action = resolve("get file microsoft/vscode src/main.rs");
        assert_eq!(action.tool_name.as_deref(), Some("get_file_content"));
        assert_eq!(params(&action, "owner"), "microsoft");
        assert_eq!(params(&action, "repo"), "vscode");
        assert_eq!(params(&action, "file_path"), "src/main.rs");
    }

    #[test]
    fn get_file_without_path_returns_guidance() {
        let action = resolve("get file microsoft/vscode");
        assert!(!action.requires_dispatch);
        assert_eq!(action.response.as_deref(), Some(FILE_GUIDANCE));
    }

    #[test]
    fn search_repo_takes_remainder_as_query() {
        let action = resolve("search repo python web framework");
        assert_eq!(action.tool_name.as_deref(), Some("search_repositories"));
        assert_eq!(params(&action, "query"), "python web framework");
    }

    #[test]
    fn search_repository_phrase_is_not_double_counted() {
        let action = resolve("search repository terminal emulators");
        assert_eq!(params(&action, "query"), "terminal emulators");
    }

    #[test]
    fn search_without_query_returns_guidance() {
        let action = resolve("search repo");
        assert_eq!(action.response.as_deref(), Some(QUERY_GUIDANCE));
    }

    #[test]
    fn pull_request_phrases_dispatch() {
        for msg in ["list prs tokio-rs/tokio", "list pull requests tokio-rs/tokio"] {
            let action = resolve(msg);
            assert_eq!(action.tool_name.as_deref(), Some("list_pull_requests"));
        }
    }

    #[test]
    fn unmatched_input_yields_help_text() {
        let action = resolve("what is the meaning of life");
        assert!(!action.requires_dispatch);
        assert!(action.response.as_deref().unwrap().contains("Available GitHub Commands"));
    }

    #[test]
    fn malformed_repo_tokens_are_ignored() {
        // Trailing slash, leading slash, double slash: none are valid.
        for msg in ["repo info octocat/", "repo info /hello", "repo info a/b/c"] {
            let action = resolve(msg);
            assert!(!action.requires_dispatch, "{msg}");
            assert_eq!(action.response.as_deref(), Some(REPO_GUIDANCE));
        }
    }
}
