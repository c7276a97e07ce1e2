use crate::api::body_snippet;
use crate::config::Config;
use crate::prompts::{self, ScenePrompts};
use crate::{logi, logw};
use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::json;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Token counts reported by the API, when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct PromptReply {
    pub prompts: ScenePrompts,
    pub raw_text: String,
    pub usage: Option<TokenUsage>,
}

fn gemini_extract_text(resp_json: &str) -> Option<String> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;

    if let Some(err) = root.get("error") {
        if let Some(msg) = err.get("message").and_then(|v| v.as_str()) {
            logw(format!("Gemini error message: {}", msg));
        }
        if let Some(status) = err.get("status").and_then(|v| v.as_str()) {
            logw(format!("Gemini error status: {}", status));
        }
        return None;
    }

    let candidates = root.get("candidates")?.as_array()?;
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.as_array());
        if let Some(parts) = parts {
            let text: String = parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect();
            if !text.trim().is_empty() {
                return Some(text);
            }
        }
        if let Some(reason) = candidate.get("finishReason").and_then(|v| v.as_str()) {
            logw(format!("Gemini candidate finished without text: {}", reason));
        }
    }

    None
}

fn gemini_extract_usage(resp_json: &str) -> Option<TokenUsage> {
    let root: serde_json::Value = serde_json::from_str(resp_json).ok()?;
    let usage = root.get("usageMetadata")?;
    Some(TokenUsage {
        input_tokens: usage.get("promptTokenCount")?.as_u64()?,
        output_tokens: usage
            .get("candidatesTokenCount")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    })
}

pub async fn gemini_generate_text(
    client: &Client,
    cfg: &Config,
    text: &str,
) -> Result<(String, Option<TokenUsage>)> {
    let url = format!("{}/models/{}:generateContent", GEMINI_BASE, cfg.text_model);
    let body = json!({
        "contents": [
            {"role": "user", "parts": [{"text": text}]}
        ],
    });

    let resp = client
        .post(url)
        .query(&[("key", cfg.google_api_key.as_str())])
        .json(&body)
        .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .send()
        .await
        .context("Gemini request failed")?;

    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();

    if !status.is_success() {
        logw(format!("Gemini HTTP {}", status.as_u16()));
        if !raw.is_empty() {
            logw(format!("Gemini raw body: {}", body_snippet(&raw, 800)));
        }
        // surfaces the API's error message in the log before bailing
        let _ = gemini_extract_text(&raw);
        anyhow::bail!("Gemini request returned HTTP {}", status.as_u16());
    }

    let out_text = match gemini_extract_text(&raw) {
        Some(text) => text,
        None => {
            logw("Gemini response parse failed.".to_string());
            if !raw.is_empty() {
                logw(format!("Gemini raw body: {}", body_snippet(&raw, 800)));
            }
            anyhow::bail!("Gemini response contained no text");
        }
    };

    Ok((out_text, gemini_extract_usage(&raw)))
}

pub async fn gemini_generate_scene_prompts(
    client: &Client,
    cfg: &Config,
    brief: &str,
) -> Result<PromptReply> {
    let request = prompts::build_request_text(brief);
    logi(format!(
        "Requesting {} scene prompts from {}...",
        prompts::SCENE_COUNT,
        cfg.text_model
    ));

    let (raw_text, usage) = gemini_generate_text(client, cfg, &request).await?;
    let parsed = ScenePrompts::parse(&raw_text);
    logi(format!("Gemini reply received: {} chars", raw_text.len()));

    Ok(PromptReply {
        prompts: parsed,
        raw_text,
        usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_joined_parts() {
        let body = r#"{
            "candidates": [{"content": {"parts": [{"text": "PROMPT 1: a"}, {"text": "\nPROMPT 2: b"}]}}],
            "usageMetadata": {"promptTokenCount": 120, "candidatesTokenCount": 480}
        }"#;
        assert_eq!(
            gemini_extract_text(body).as_deref(),
            Some("PROMPT 1: a\nPROMPT 2: b")
        );
        assert_eq!(
            gemini_extract_usage(body),
            Some(TokenUsage {
                input_tokens: 120,
                output_tokens: 480
            })
        );
    }

    #[test]
    fn error_body_yields_none() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(gemini_extract_text(body), None);
        assert_eq!(gemini_extract_usage(body), None);
    }

    #[test]
    fn blocked_candidate_yields_none() {
        let body = r#"{"candidates": [{"finishReason": "SAFETY"}]}"#;
        assert_eq!(gemini_extract_text(body), None);
    }
}
