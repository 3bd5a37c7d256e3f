use std::collections::HashMap;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use super::Connector;
use crate::vault::DECRYPTION_ERROR_MARKER;

const GITHUB_API: &str = "https://api.github.com";

pub const GITHUB_TOOLS: &[&str] = &[
    "get_repository_info",
    "list_issues",
    "list_repository_contents",
    "get_file_content",
    "search_repositories",
    "list_pull_requests",
    "create_issue",
];

/// GitHub REST connector. The token is injected through
/// `apply_credentials` before each invocation.
pub struct GithubConnector {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl GithubConnector {
    pub fn new() -> Self {
        Self::with_base_url(GITHUB_API)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    /// Build from a connector config blob. Recognizes an optional
    /// `base_url` override (used against test fixtures and GHE installs).
    pub fn from_config(config: &Value) -> Self {
        match config.get("base_url").and_then(Value::as_str) {
            Some(base_url) => Self::with_base_url(base_url),
            None => Self::new(),
        }
    }

    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }

    async fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, endpoint))
            .header("Accept", "application/vnd.github.v3+json")
            .header("User-Agent", "switchboard-github-connector/1.0");
        if let Some(token) = self.token.read().await.as_deref() {
            req = req.header("Authorization", format!("token {}", token));
        }
        req
    }

    async fn get(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value> {
        let res = self
            .request(reqwest::Method::GET, endpoint)
            .await
            .query(query)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!("GitHub API error {}: {}", res.status(), endpoint));
        }
        Ok(res.json().await?)
    }

    async fn post(&self, endpoint: &str, body: &Value) -> Result<Value> {
        let res = self
            .request(reqwest::Method::POST, endpoint)
            .await
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(anyhow!("GitHub API error {}: {}", res.status(), endpoint));
        }
        Ok(res.json().await?)
    }

    async fn get_repository_info(&self, owner: &str, repo: &str) -> Result<String> {
        let info = self.get(&format!("/repos/{}/{}", owner, repo), &[]).await?;
        Ok(format!(
            "Repository: {}\nDescription: {}\nStars: {}\nForks: {}\nLanguage: {}\nCreated: {}\nLast Updated: {}\nClone URL: {}\n",
            str_field(&info, "full_name"),
            str_field(&info, "description"),
            num_field(&info, "stargazers_count"),
            num_field(&info, "forks_count"),
            str_field(&info, "language"),
            str_field(&info, "created_at"),
            str_field(&info, "updated_at"),
            str_field(&info, "clone_url"),
        ))
    }

    async fn list_repository_contents(&self, owner: &str, repo: &str, path: &str) -> Result<String> {
        let endpoint = if path.is_empty() {
            format!("/repos/{}/{}/contents", owner, repo)
        } else {
            format!("/repos/{}/{}/contents/{}", owner, repo, path)
        };
        let contents = self.get(&endpoint, &[]).await?;
        let items = contents
            .as_array()
            .ok_or_else(|| anyhow!("unexpected contents response for {}/{}", owner, repo))?;

        let mut result = format!("Contents of {}/{}/{}:\n\n", owner, repo, path);
        for item in items {
            let kind = str_field(item, "type");
            let marker = if kind == "dir" { "[dir]" } else { "[file]" };
            result.push_str(&format!("{} {} ({})\n", marker, str_field(item, "name"), kind));
        }
        Ok(result)
    }

    async fn get_file_content(&self, owner: &str, repo: &str, file_path: &str) -> Result<String> {
        let info = self
            .get(&format!("/repos/{}/{}/contents/{}", owner, repo, file_path), &[])
            .await?;
        let encoding = str_field(&info, "encoding");
        if encoding != "base64" {
            return Ok(format!(
                "File: {}\nContent encoding not supported: {}",
                file_path, encoding
            ));
        }
        let raw: String = str_field(&info, "content").chars().filter(|c| !c.is_whitespace()).collect();
        let decoded = STANDARD.decode(raw)?;
        let content = String::from_utf8(decoded)?;
        Ok(format!(
            "File: {}\nSize: {} bytes\n\n{}",
            file_path,
            num_field(&info, "size"),
            content
        ))
    }

    async fn list_issues(&self, owner: &str, repo: &str, state: &str) -> Result<String> {
        let issues = self
            .get(&format!("/repos/{}/{}/issues", owner, repo), &[("state", state)])
            .await?;
        let items = issues
            .as_array()
            .ok_or_else(|| anyhow!("unexpected issues response for {}/{}", owner, repo))?;

        let mut result = format!("Issues in {}/{} (state: {}):\n\n", owner, repo, state);
        for issue in items {
            result.push_str(&format!(
                "#{}: {}\n  State: {}\n  Author: {}\n  Created: {}\n\n",
                num_field(issue, "number"),
                str_field(issue, "title"),
                str_field(issue, "state"),
                str_field(&issue["user"], "login"),
                str_field(issue, "created_at"),
            ));
        }
        Ok(result)
    }

    async fn list_pull_requests(&self, owner: &str, repo: &str, state: &str) -> Result<String> {
        let prs = self
            .get(&format!("/repos/{}/{}/pulls", owner, repo), &[("state", state)])
            .await?;
        let items = prs
            .as_array()
            .ok_or_else(|| anyhow!("unexpected pulls response for {}/{}", owner, repo))?;

        let mut result = format!("Pull Requests in {}/{} (state: {}):\n\n", owner, repo, state);
        for pr in items {
            result.push_str(&format!(
                "#{}: {}\n  State: {}\n  Author: {}\n  Created: {}\n  Branch: {} -> {}\n\n",
                num_field(pr, "number"),
                str_field(pr, "title"),
                str_field(pr, "state"),
                str_field(&pr["user"], "login"),
                str_field(pr, "created_at"),
                str_field(&pr["head"], "ref"),
                str_field(&pr["base"], "ref"),
            ));
        }
        Ok(result)
    }

    async fn create_issue(&self, owner: &str, repo: &str, title: &str, body: &str, labels: Option<&Value>) -> Result<String> {
        let mut payload = serde_json::json!({ "title": title, "body": body });
        if let Some(labels) = labels {
            payload["labels"] = labels.clone();
        }
        let issue = self
            .post(&format!("/repos/{}/{}/issues", owner, repo), &payload)
            .await?;
        Ok(format!(
            "Created issue #{}: {}\nURL: {}",
            num_field(&issue, "number"),
            str_field(&issue, "title"),
            str_field(&issue, "html_url"),
        ))
    }

    async fn search_repositories(&self, query: &str) -> Result<String> {
        let results = self
            .get(
                "/search/repositories",
                &[("q", query), ("sort", "stars"), ("order", "desc")],
            )
            .await?;
        let mut result = format!(
            "Found {} repositories for '{}':\n\n",
            num_field(&results, "total_count"),
            query
        );
        if let Some(items) = results.get("items").and_then(Value::as_array) {
            for repo in items.iter().take(10) {
                result.push_str(&format!(
                    "{}\n  Description: {}\n  Stars: {}\n  Language: {}\n  URL: {}\n\n",
                    str_field(repo, "full_name"),
                    str_field(repo, "description"),
                    num_field(repo, "stargazers_count"),
                    str_field(repo, "language"),
                    str_field(repo, "html_url"),
                ));
            }
        }
        Ok(result)
    }
}

impl Default for GithubConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for GithubConnector {
    fn provider_type(&self) -> &'static str {
        "github"
    }

    fn tool_names(&self) -> &'static [&'static str] {
        GITHUB_TOOLS
    }

    async fn apply_credentials(&self, credentials: &HashMap<String, String>) {
        match credentials.get("github_token") {
            Some(token) if token != DECRYPTION_ERROR_MARKER => {
                self.set_token(Some(token.clone())).await;
            }
            Some(_) => warn!("GitHub token is unusable (decryption failed), leaving unset"),
            None => warn!("No GitHub token found in credentials"),
        }
    }

    async fn call_tool(&self, tool_name: &str, parameters: &Value) -> Result<String> {
        match tool_name {
            "get_repository_info" => {
                self.get_repository_info(param(parameters, "owner")?, param(parameters, "repo")?)
                    .await
            }
            "list_repository_contents" => {
                let path = parameters.get("path").and_then(Value::as_str).unwrap_or("");
                self.list_repository_contents(
                    param(parameters, "owner")?,
                    param(parameters, "repo")?,
                    path,
                )
                .await
            }
            "get_file_content" => {
                self.get_file_content(
                    param(parameters, "owner")?,
                    param(parameters, "repo")?,
                    param(parameters, "file_path")?,
                )
                .await
            }
            "list_issues" => {
                let state = parameters.get("state").and_then(Value::as_str).unwrap_or("open");
                self.list_issues(param(parameters, "owner")?, param(parameters, "repo")?, state)
                    .await
            }
            "list_pull_requests" => {
                let state = parameters.get("state").and_then(Value::as_str).unwrap_or("open");
                self.list_pull_requests(param(parameters, "owner")?, param(parameters, "repo")?, state)
                    .await
            }
            "create_issue" => {
                let body = parameters.get("body").and_then(Value::as_str).unwrap_or("");
                self.create_issue(
                    param(parameters, "owner")?,
                    param(parameters, "repo")?,
                    param(parameters, "title")?,
                    body,
                    parameters.get("labels"),
                )
                .await
            }
            "search_repositories" => self.search_repositories(param(parameters, "query")?).await,
            other => Err(anyhow!("tool '{}' is not implemented", other)),
        }
    }
}

fn param<'a>(parameters: &'a Value, key: &str) -> Result<&'a str> {
    parameters
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing required parameter '{}'", key))
}

fn str_field(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "None".to_string(),
        Some(other) => other.to_string(),
    }
}

fn num_field(value: &Value, key: &str) -> i64 {
    value.get(key).and_then(Value::as_i64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn apply_credentials_sets_token() {
        let connector = GithubConnector::new();
        let mut creds = HashMap::new();
        creds.insert("github_token".to_string(), "ghp_abc".to_string());
        connector.apply_credentials(&creds).await;
        assert_eq!(connector.token.read().await.as_deref(), Some("ghp_abc"));

        // Applying again must be safe and leave the same state.
        connector.apply_credentials(&creds).await;
        assert_eq!(connector.token.read().await.as_deref(), Some("ghp_abc"));
    }

    #[tokio::test]
    async fn unusable_credential_marker_leaves_token_unset() {
        let connector = GithubConnector::new();
        let mut creds = HashMap::new();
        creds.insert("github_token".to_string(), DECRYPTION_ERROR_MARKER.to_string());
        connector.apply_credentials(&creds).await;
        assert!(connector.token.read().await.is_none());
    }

    #[tokio::test]
    async fn missing_parameter_is_an_invocation_error() {
        let connector = GithubConnector::new();
        let err = connector
            .call_tool("get_repository_info", &json!({ "owner": "octocat" }))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("repo"));
    }

    #[test]
    fn config_base_url_override() {
        let connector = GithubConnector::from_config(&json!({ "base_url": "http://127.0.0.1:9999/" }));
        assert_eq!(connector.base_url, "http://127.0.0.1:9999");
    }
}
