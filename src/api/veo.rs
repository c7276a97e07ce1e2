use crate::api::body_snippet;
use crate::config::Config;
use crate::{logi, logw};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};

const MAX_WAIT_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<OperationError>,
    pub response: Option<VideoResponse>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperationError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResponse {
    #[serde(default)]
    pub videos: Vec<GeneratedVideo>,
    #[serde(default)]
    pub rai_media_filtered_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVideo {
    pub gcs_uri: Option<String>,
    pub mime_type: Option<String>,
}

impl Operation {
    /// `gs://` location of the first generated video once the operation is done.
    pub fn video_uri(&self) -> Result<String> {
        if let Some(err) = &self.error {
            anyhow::bail!("video generation failed ({}): {}", err.code, err.message);
        }
        let response = self
            .response
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("video generation returned no response"))?;
        if let Some(uri) = response.videos.iter().find_map(|v| v.gcs_uri.clone()) {
            return Ok(uri);
        }
        if response.rai_media_filtered_count > 0 {
            anyhow::bail!(
                "video generation filtered {} result(s) by safety policy",
                response.rai_media_filtered_count
            );
        }
        anyhow::bail!("video generation returned no videos")
    }
}

fn model_url(cfg: &Config, verb: &str) -> String {
    format!(
        "https://{loc}-aiplatform.googleapis.com/v1/projects/{project}/locations/{loc}/publishers/google/models/{model}:{verb}",
        loc = cfg.gcp_location,
        project = cfg.gcp_project,
        model = cfg.video_model,
        verb = verb
    )
}

async fn post_operation(
    client: &Client,
    token: &str,
    url: String,
    body: serde_json::Value,
    what: &str,
) -> Result<Operation> {
    let resp = client
        .post(url)
        .bearer_auth(token)
        .json(&body)
        .timeout(Duration::from_secs(120))
        .send()
        .await
        .with_context(|| format!("Veo {} request failed", what))?;

    let status = resp.status();
    let raw = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        logw(format!("Veo {} HTTP {}", what, status.as_u16()));
        if !raw.is_empty() {
            logw(format!("Veo raw body: {}", body_snippet(&raw, 800)));
        }
        anyhow::bail!("Veo {} returned HTTP {}", what, status.as_u16());
    }

    serde_json::from_str(&raw).with_context(|| format!("Failed to parse Veo {} response", what))
}

/// Starts a long-running generation; the clip lands under `output_gcs_uri`.
pub async fn veo_submit(
    client: &Client,
    cfg: &Config,
    token: &str,
    prompt: &str,
    output_gcs_uri: &str,
) -> Result<Operation> {
    let body = json!({
        "instances": [{"prompt": prompt}],
        "parameters": {
            "aspectRatio": cfg.aspect_ratio,
            "storageUri": output_gcs_uri,
            "sampleCount": 1,
        },
    });
    post_operation(client, token, model_url(cfg, "predictLongRunning"), body, "submit").await
}

pub async fn veo_fetch_operation(
    client: &Client,
    cfg: &Config,
    token: &str,
    operation_name: &str,
) -> Result<Operation> {
    let body = json!({ "operationName": operation_name });
    post_operation(client, token, model_url(cfg, "fetchPredictOperation"), body, "poll").await
}

/// Polls at the configured interval until the operation completes, then returns the video URI.
pub async fn veo_wait_for_video(
    client: &Client,
    cfg: &Config,
    token: &str,
    mut op: Operation,
    label: &str,
) -> Result<String> {
    let interval = Duration::from_secs(cfg.poll_interval_secs);
    let started = Instant::now();

    while !op.done {
        if started.elapsed() > Duration::from_secs(MAX_WAIT_SECS) {
            anyhow::bail!("{} still not done after {}s", label, MAX_WAIT_SECS);
        }
        tokio::time::sleep(interval).await;
        let name = std::mem::take(&mut op.name);
        op = veo_fetch_operation(client, cfg, token, &name).await?;
        if op.name.is_empty() {
            op.name = name;
        }
        logi(format!(
            "Still generating {} ({}s elapsed)...",
            label,
            started.elapsed().as_secs()
        ));
    }

    op.video_uri()
}
