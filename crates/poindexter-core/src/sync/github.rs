//! GitHub implementation of [`SyncProvider`], talking to the REST API
//! directly over `reqwest` (§4.8, §9 "Provider polymorphism").

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::json;

use super::{RemoteRef, SyncProvider};

const API_BASE: &str = "https://api.github.com";

/// Configuration read from a project's `provider_config` row.
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub owner: String,
    pub repo: String,
    pub token: String,
}

impl GitHubConfig {
    /// Parse from the JSON blob stored in `provider_config.config`.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        let owner = value
            .get("owner")
            .and_then(|v| v.as_str())
            .context("provider config missing 'owner'")?
            .to_string();
        let repo = value
            .get("repo")
            .and_then(|v| v.as_str())
            .context("provider config missing 'repo'")?
            .to_string();
        let token = value
            .get("token")
            .and_then(|v| v.as_str())
            .context("provider config missing 'token'")?
            .to_string();
        Ok(Self { owner, repo, token })
    }
}

pub struct GitHubProvider {
    config: GitHubConfig,
    client: reqwest::Client,
}

impl GitHubProvider {
    pub fn new(config: GitHubConfig) -> Self {
        let client = reqwest::Client::builder()
            .user_agent("poindexter")
            .build()
            .expect("reqwest client builder should not fail on static config");
        Self { config, client }
    }

    fn repo_url(&self, path: &str) -> String {
        format!(
            "{API_BASE}/repos/{}/{}{path}",
            self.config.owner, self.config.repo
        )
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.config.token)
    }
}

#[async_trait]
impl SyncProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    async fn create_issue(&self, title: &str, body: &str) -> Result<RemoteRef> {
        let resp = self
            .client
            .post(self.repo_url("/issues"))
            .header("Authorization", self.auth_header())
            .json(&json!({"title": title, "body": body}))
            .send()
            .await
            .context("github create_issue request failed")?
            .error_for_status()
            .context("github create_issue returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("invalid github response")?;
        extract_ref(&payload)
    }

    async fn update_issue(&self, external_id: &str, title: &str, body: &str) -> Result<()> {
        self.client
            .patch(self.repo_url(&format!("/issues/{external_id}")))
            .header("Authorization", self.auth_header())
            .json(&json!({"title": title, "body": body}))
            .send()
            .await
            .context("github update_issue request failed")?
            .error_for_status()
            .context("github update_issue returned an error status")?;
        Ok(())
    }

    async fn close_issue(&self, external_id: &str) -> Result<()> {
        self.client
            .patch(self.repo_url(&format!("/issues/{external_id}")))
            .header("Authorization", self.auth_header())
            .json(&json!({"state": "closed"}))
            .send()
            .await
            .context("github close_issue request failed")?
            .error_for_status()
            .context("github close_issue returned an error status")?;
        Ok(())
    }

    async fn add_comment(&self, external_id: &str, body: &str) -> Result<()> {
        self.client
            .post(self.repo_url(&format!("/issues/{external_id}/comments")))
            .header("Authorization", self.auth_header())
            .json(&json!({"body": body}))
            .send()
            .await
            .context("github add_comment request failed")?
            .error_for_status()
            .context("github add_comment returned an error status")?;
        Ok(())
    }

    async fn set_labels(&self, external_id: &str, labels: &[String]) -> Result<()> {
        self.client
            .put(self.repo_url(&format!("/issues/{external_id}/labels")))
            .header("Authorization", self.auth_header())
            .json(&json!({"labels": labels}))
            .send()
            .await
            .context("github set_labels request failed")?
            .error_for_status()
            .context("github set_labels returned an error status")?;
        Ok(())
    }

    async fn create_pr(&self, title: &str, body: &str, head: &str, base: &str) -> Result<RemoteRef> {
        let resp = self
            .client
            .post(self.repo_url("/pulls"))
            .header("Authorization", self.auth_header())
            .json(&json!({"title": title, "body": body, "head": head, "base": base}))
            .send()
            .await
            .context("github create_pr request failed")?
            .error_for_status()
            .context("github create_pr returned an error status")?;

        let payload: serde_json::Value = resp.json().await.context("invalid github response")?;
        extract_ref(&payload)
    }

    async fn merge_pr(&self, external_id: &str) -> Result<()> {
        self.client
            .put(self.repo_url(&format!("/pulls/{external_id}/merge")))
            .header("Authorization", self.auth_header())
            .send()
            .await
            .context("github merge_pr request failed")?
            .error_for_status()
            .context("github merge_pr returned an error status")?;
        Ok(())
    }

    async fn install_webhook(&self, callback_url: &str) -> Result<()> {
        self.client
            .post(self.repo_url("/hooks"))
            .header("Authorization", self.auth_header())
            .json(&json!({
                "name": "web",
                "active": true,
                "events": ["issues", "issue_comment"],
                "config": {"url": callback_url, "content_type": "json"},
            }))
            .send()
            .await
            .context("github install_webhook request failed")?
            .error_for_status()
            .context("github install_webhook returned an error status")?;
        Ok(())
    }
}

fn extract_ref(payload: &serde_json::Value) -> Result<RemoteRef> {
    let number = payload
        .get("number")
        .and_then(|v| v.as_i64())
        .context("github response missing 'number'")?;
    let url = payload
        .get("html_url")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(RemoteRef {
        external_id: number.to_string(),
        url,
    })
}
