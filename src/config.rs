use crate::timeline::TransitionSpec;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "google_api_key", default)]
    pub google_api_key: String,
    #[serde(default = "default_text_model")]
    pub text_model: String,
    #[serde(rename = "gcp_project", default)]
    pub gcp_project: String,
    #[serde(rename = "gcp_location", default = "default_location")]
    pub gcp_location: String,
    #[serde(default)]
    pub gcp_access_token: Option<String>,
    #[serde(default = "default_video_model")]
    pub video_model: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    #[serde(default = "default_output_uri")]
    pub gcs_output_uri: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_project_dir")]
    pub project_dir: PathBuf,
    #[serde(default)]
    pub transition: TransitionSpec,
    #[serde(default = "default_spending_log")]
    pub spending_log: PathBuf,
}

fn default_text_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_location() -> String {
    "us-central1".to_string()
}

fn default_video_model() -> String {
    "veo-3.1-fast-generate-001".to_string()
}

fn default_aspect_ratio() -> String {
    "16:9".to_string()
}

fn default_output_uri() -> String {
    "gs://scene-reel/veo_output/".to_string()
}

fn default_poll_interval() -> u64 {
    20
}

fn default_project_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_spending_log() -> PathBuf {
    PathBuf::from("api_spending_log.json")
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config = Self::from_json(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parses the file body, filling the API key from `GOOGLE_API_KEY` when absent.
    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Config =
            serde_json::from_str(content).context("config.json: invalid JSON")?;
        if config.google_api_key.is_empty() {
            if let Ok(key) = std::env::var("GOOGLE_API_KEY") {
                config.google_api_key = key;
            }
        }
        if config.gcp_project.is_empty() {
            if let Ok(project) = std::env::var("GENAI_PROJECT") {
                config.gcp_project = project;
            }
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.google_api_key.is_empty() {
            anyhow::bail!("config.json: google_api_key missing (or set GOOGLE_API_KEY)");
        }
        if self.gcp_project.is_empty() {
            anyhow::bail!("config.json: gcp_project missing (or set GENAI_PROJECT)");
        }
        if !self.gcs_output_uri.starts_with("gs://") {
            anyhow::bail!("config.json: gcs_output_uri must start with gs://");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("config.json: poll_interval_secs must be positive");
        }
        self.transition
            .validate()
            .context("config.json: invalid transition")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::TransitionPolicy;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = Config::from_json(
            r#"{"google_api_key": "k", "gcp_project": "demo-project"}"#,
        )
        .unwrap();
        assert_eq!(cfg.text_model, "gemini-2.0-flash");
        assert_eq!(cfg.video_model, "veo-3.1-fast-generate-001");
        assert_eq!(cfg.gcp_location, "us-central1");
        assert_eq!(cfg.poll_interval_secs, 20);
        assert_eq!(cfg.transition, TransitionSpec::default());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn transition_section_is_read() {
        let cfg = Config::from_json(
            r#"{"google_api_key": "k", "gcp_project": "p",
                "transition": {"policy": "fade_black", "duration_seconds": 1.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.transition.policy, TransitionPolicy::FadeBlack);
        assert_eq!(cfg.transition.duration, 1.0);
    }

    #[test]
    fn bad_output_uri_fails_validation() {
        let cfg = Config::from_json(
            r#"{"google_api_key": "k", "gcp_project": "p", "gcs_output_uri": "/tmp/out"}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_transition_fails_validation() {
        let cfg = Config::from_json(
            r#"{"google_api_key": "k", "gcp_project": "p",
                "transition": {"policy": "crossfade", "duration_seconds": 0}}"#,
        )
        .unwrap();
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{"google_api_key": "abc", "gcp_project": "p"}"#)
            .await
            .unwrap();
        let cfg = Config::load(&path).await.unwrap();
        assert_eq!(cfg.google_api_key, "abc");
    }
}
