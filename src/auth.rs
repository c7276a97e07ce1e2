use crate::config::Config;
use anyhow::{Context, Result};
use tokio::process::Command;

pub const TOKEN_ENV: &str = "GOOGLE_ACCESS_TOKEN";

/// OAuth bearer token for Vertex AI and Cloud Storage.
///
/// Looked up in order: `gcp_access_token` in config.json, the
/// `GOOGLE_ACCESS_TOKEN` environment variable, then `gcloud auth print-access-token`.
pub async fn access_token(cfg: &Config) -> Result<String> {
    if let Some(token) = cfg.gcp_access_token.as_deref() {
        let token = token.trim();
        if !token.is_empty() {
            return Ok(token.to_string());
        }
    }

    if let Ok(token) = std::env::var(TOKEN_ENV) {
        let token = token.trim().to_string();
        if !token.is_empty() {
            return Ok(token);
        }
    }

    gcloud_print_access_token().await
}

async fn gcloud_print_access_token() -> Result<String> {
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .context("gcloud execution failed (install the Cloud SDK or set GOOGLE_ACCESS_TOKEN)")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("gcloud auth print-access-token failed: {}", stderr.trim());
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        anyhow::bail!("gcloud returned an empty access token");
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_token_wins() {
        let mut cfg = Config::from_json(r#"{"google_api_key": "k", "gcp_project": "p"}"#).unwrap();
        cfg.gcp_access_token = Some("  ya29.token \n".to_string());
        assert_eq!(access_token(&cfg).await.unwrap(), "ya29.token");
    }
}
