use crate::logw;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const CHARS_PER_TOKEN: f64 = 4.0;
pub const OUTPUT_EXPANSION: f64 = 4.0;
pub const WORKFLOW_STORAGE_ESTIMATE: f64 = 0.05;
pub const SCENES_PER_WORKFLOW: u32 = 4;

pub const SERVICE_PROMPTS: &str = "Gemini 2.0 Flash";
pub const SERVICE_VIDEO: &str = "Veo 3.1 Video Generation";

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Pricing {
    pub text_input_per_1m_tokens: f64,
    pub text_output_per_1m_tokens: f64,
    pub video_per_clip: f64,
    pub storage_per_gb_month: f64,
    pub storage_per_operation: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            text_input_per_1m_tokens: 0.075,
            text_output_per_1m_tokens: 0.30,
            video_per_clip: 0.75,
            storage_per_gb_month: 0.020,
            storage_per_operation: 0.0004,
        }
    }
}

impl Pricing {
    pub fn rows(&self) -> Vec<(&'static str, &'static str, f64)> {
        vec![
            ("Text generation (prompts)", "input_per_1m_tokens", self.text_input_per_1m_tokens),
            ("Text generation (prompts)", "output_per_1m_tokens", self.text_output_per_1m_tokens),
            ("Video generation", "per_video", self.video_per_clip),
            ("Cloud Storage", "per_gb_month", self.storage_per_gb_month),
            ("Cloud Storage", "per_operation", self.storage_per_operation),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptCostEstimate {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoCostEstimate {
    pub num_videos: u32,
    pub cost_per_video: f64,
    pub total_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowEstimate {
    pub prompt_generation: PromptCostEstimate,
    pub video_generation: VideoCostEstimate,
    pub storage_operations: f64,
    pub total_estimated_cost: f64,
}

impl WorkflowEstimate {
    /// Percent of the total spent on prompts and on videos.
    pub fn distribution(&self) -> (f64, f64) {
        if self.total_estimated_cost <= 0.0 {
            return (0.0, 0.0);
        }
        (
            self.prompt_generation.total_cost / self.total_estimated_cost * 100.0,
            self.video_generation.total_cost / self.total_estimated_cost * 100.0,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingEntry {
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Local>,
    pub service: String,
    pub cost: f64,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// RFC 3339, or a naive ISO timestamp read as local time.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Local>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Local));
    }
    let naive = text
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()?;
    Local.from_local_datetime(&naive).earliest()
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Local>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{}'", text)))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServiceTotals {
    pub count: usize,
    pub total_cost: f64,
}

impl ServiceTotals {
    pub fn average(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_cost / self.count as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendingSummary {
    pub period_days: i64,
    pub total_cost: f64,
    pub by_service: BTreeMap<String, ServiceTotals>,
    pub num_entries: usize,
}

pub fn estimate_prompt_generation(
    pricing: &Pricing,
    user_input: &str,
    generated: Option<&str>,
) -> PromptCostEstimate {
    let input_chars = user_input.chars().count() as f64;
    let output_chars = match generated {
        Some(text) => text.chars().count() as f64,
        None => input_chars * OUTPUT_EXPANSION,
    };
    let input_tokens = input_chars / CHARS_PER_TOKEN;
    let output_tokens = output_chars / CHARS_PER_TOKEN;
    prompt_cost_from_tokens(pricing, input_tokens, output_tokens)
}

pub fn prompt_cost_from_tokens(
    pricing: &Pricing,
    input_tokens: f64,
    output_tokens: f64,
) -> PromptCostEstimate {
    let input_cost = input_tokens / 1_000_000.0 * pricing.text_input_per_1m_tokens;
    let output_cost = output_tokens / 1_000_000.0 * pricing.text_output_per_1m_tokens;
    PromptCostEstimate {
        input_tokens: input_tokens as u64,
        output_tokens: output_tokens as u64,
        input_cost,
        output_cost,
        total_cost: input_cost + output_cost,
    }
}

pub fn estimate_video_generation(pricing: &Pricing, num_videos: u32) -> VideoCostEstimate {
    VideoCostEstimate {
        num_videos,
        cost_per_video: pricing.video_per_clip,
        total_cost: num_videos as f64 * pricing.video_per_clip,
    }
}

pub fn estimate_workflow(
    pricing: &Pricing,
    user_input: &str,
    generated: Option<&str>,
) -> WorkflowEstimate {
    let prompt_generation = estimate_prompt_generation(pricing, user_input, generated);
    let video_generation = estimate_video_generation(pricing, SCENES_PER_WORKFLOW);
    let total_estimated_cost =
        prompt_generation.total_cost + video_generation.total_cost + WORKFLOW_STORAGE_ESTIMATE;
    WorkflowEstimate {
        prompt_generation,
        video_generation,
        storage_operations: WORKFLOW_STORAGE_ESTIMATE,
        total_estimated_cost,
    }
}

pub fn optimisation_tips(user_input: &str) -> Vec<String> {
    let len = user_input.chars().count();
    let mut tips = Vec::new();
    if len > 1000 {
        tips.push("Consider shortening input to reduce token costs".to_string());
    }
    if len < 200 {
        tips.push("Input is cost-efficient for prompt generation".to_string());
    }
    tips.push("Prompt generation is very cheap - focus on optimizing video generation".to_string());
    tips.push("Review each scene before generating the next one".to_string());
    let video = Pricing::default().video_per_clip;
    tips.push(format!(
        "Each video costs ~${:.2}, so stopping after 1 bad video saves ${:.2}",
        video,
        video * (SCENES_PER_WORKFLOW - 1) as f64
    ));
    tips
}

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "spending_log".into());
    name.push(".bak");
    path.with_file_name(name)
}

/// Append-only spending log persisted as a JSON array.
#[derive(Debug)]
pub struct SpendingTracker {
    path: PathBuf,
    pub pricing: Pricing,
    entries: Vec<SpendingEntry>,
}

impl SpendingTracker {
    /// Opens the log at `path`; a missing or unreadable log starts empty.
    ///
    /// An unreadable log is copied to `<name>.bak` first so the next save
    /// cannot destroy it.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<Vec<SpendingEntry>>(&text) {
                Ok(entries) => entries,
                Err(e) => {
                    logw(format!("Error loading spending log {}: {}", path.display(), e));
                    let backup = backup_path(&path);
                    match fs::copy(&path, &backup).await {
                        Ok(_) => logw(format!("Previous log kept at {}", backup.display())),
                        Err(e) => logw(format!("Could not back up spending log: {}", e)),
                    }
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        Self {
            path,
            pricing: Pricing::default(),
            entries,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[SpendingEntry] {
        &self.entries
    }

    pub fn recent(&self, n: usize) -> &[SpendingEntry] {
        let start = self.entries.len().saturating_sub(n);
        &self.entries[start..]
    }

    async fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.entries)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        fs::write(&self.path, json)
            .await
            .with_context(|| format!("Failed to save spending log {}", self.path.display()))
    }

    pub async fn log_usage(
        &mut self,
        service: &str,
        cost: f64,
        details: serde_json::Value,
    ) -> Result<()> {
        self.entries.push(SpendingEntry {
            timestamp: Local::now(),
            service: service.to_string(),
            cost,
            details,
        });
        self.save().await
    }

    pub fn summary(&self, days: i64) -> SpendingSummary {
        self.summary_since(days, Local::now())
    }

    fn summary_since(&self, days: i64, now: DateTime<Local>) -> SpendingSummary {
        // windows too wide for chrono cover the whole log
        let cutoff = Duration::try_days(days).and_then(|d| now.checked_sub_signed(d));
        let mut by_service: BTreeMap<String, ServiceTotals> = BTreeMap::new();
        let mut total_cost = 0.0;
        let mut num_entries = 0;

        for entry in self.entries.iter().filter(|e| cutoff.is_none_or(|c| e.timestamp > c)) {
            let totals = by_service.entry(entry.service.clone()).or_default();
            totals.count += 1;
            totals.total_cost += entry.cost;
            total_cost += entry.cost;
            num_entries += 1;
        }

        SpendingSummary {
            period_days: days,
            total_cost,
            by_service,
            num_entries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const EPS: f64 = 1e-12;

    #[test]
    fn prompt_estimate_uses_four_chars_per_token() {
        let input = "x".repeat(400);
        let est = estimate_prompt_generation(&Pricing::default(), &input, None);
        assert_eq!(est.input_tokens, 100);
        assert_eq!(est.output_tokens, 400);
        assert!((est.input_cost - 100.0 / 1e6 * 0.075).abs() < EPS);
        assert!((est.output_cost - 400.0 / 1e6 * 0.30).abs() < EPS);
    }

    #[test]
    fn generated_text_overrides_output_guess() {
        let est = estimate_prompt_generation(&Pricing::default(), "abcd", Some("abcdabcd"));
        assert_eq!(est.input_tokens, 1);
        assert_eq!(est.output_tokens, 2);
    }

    #[test]
    fn workflow_estimate_is_dominated_by_video() {
        let est = estimate_workflow(&Pricing::default(), "short brief", None);
        assert!((est.video_generation.total_cost - 3.0).abs() < EPS);
        assert!((est.storage_operations - 0.05).abs() < EPS);
        let expected = est.prompt_generation.total_cost + 3.0 + 0.05;
        assert!((est.total_estimated_cost - expected).abs() < EPS);
        let (prompts, videos) = est.distribution();
        assert!(videos > 90.0);
        assert!(prompts < 1.0);
    }

    #[test]
    fn tips_depend_on_length() {
        assert!(optimisation_tips("tiny")[0].contains("cost-efficient"));
        assert!(optimisation_tips(&"y".repeat(1500))[0].contains("shortening"));
    }

    #[tokio::test]
    async fn log_persists_and_summarises() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_spending_log.json");

        let mut tracker = SpendingTracker::open(&path).await;
        assert!(tracker.entries().is_empty());
        tracker
            .log_usage(SERVICE_VIDEO, 0.75, json!({"scene": 1}))
            .await
            .unwrap();
        tracker
            .log_usage(SERVICE_VIDEO, 0.75, json!({"scene": 2}))
            .await
            .unwrap();
        tracker
            .log_usage(SERVICE_PROMPTS, 0.0002, json!({}))
            .await
            .unwrap();

        let reopened = SpendingTracker::open(&path).await;
        assert_eq!(reopened.entries().len(), 3);

        let summary = reopened.summary(30);
        assert_eq!(summary.num_entries, 3);
        assert!((summary.total_cost - 1.5002).abs() < 1e-9);
        let video = &summary.by_service[SERVICE_VIDEO];
        assert_eq!(video.count, 2);
        assert!((video.average() - 0.75).abs() < EPS);
        assert_eq!(reopened.recent(1)[0].service, SERVICE_PROMPTS);
    }

    #[tokio::test]
    async fn old_entries_fall_outside_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = SpendingTracker::open(dir.path().join("log.json")).await;
        tracker.log_usage(SERVICE_VIDEO, 0.75, json!({})).await.unwrap();

        let later = Local::now() + Duration::days(45);
        let summary = tracker.summary_since(30, later);
        assert_eq!(summary.num_entries, 0);
        assert_eq!(summary.total_cost, 0.0);
    }

    #[tokio::test]
    async fn corrupt_log_starts_empty_and_is_backed_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let mut tracker = SpendingTracker::open(&path).await;
        assert!(tracker.entries().is_empty());
        tracker.log_usage(SERVICE_VIDEO, 0.75, json!({})).await.unwrap();

        let backup = tokio::fs::read_to_string(dir.path().join("log.json.bak"))
            .await
            .unwrap();
        assert_eq!(backup, "not json");
    }

    #[tokio::test]
    async fn naive_timestamps_load_and_survive_the_next_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_spending_log.json");
        let legacy = r#"[
            {"timestamp": "2025-11-19T21:34:01.123456", "service": "Veo 3.1 Video Generation",
             "cost": 0.75, "details": {"scene_number": 1}},
            {"timestamp": "2025-11-19T21:40:12", "service": "Gemini 2.0 Flash",
             "cost": 0.0002, "details": {}}
        ]"#;
        tokio::fs::write(&path, legacy).await.unwrap();

        let mut tracker = SpendingTracker::open(&path).await;
        assert_eq!(tracker.entries().len(), 2);
        assert_eq!(
            tracker.entries()[0].timestamp.naive_local(),
            NaiveDateTime::parse_from_str("2025-11-19 21:34:01.123456", "%Y-%m-%d %H:%M:%S%.f")
                .unwrap()
        );

        tracker
            .log_usage(SERVICE_VIDEO, 0.75, json!({"scene_number": 2}))
            .await
            .unwrap();
        let reopened = SpendingTracker::open(&path).await;
        assert_eq!(reopened.entries().len(), 3);
        assert_eq!(reopened.entries()[0].details["scene_number"], 1);
        assert!(!dir.path().join("api_spending_log.json.bak").exists());
    }

    #[test]
    fn timestamp_parsing_accepts_rfc3339_and_naive() {
        assert!(parse_timestamp("2025-11-19T21:34:01.123456+01:00").is_some());
        assert!(parse_timestamp("2025-11-19T21:34:01").is_some());
        assert!(parse_timestamp("2025-11-19 21:34:01.5").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn huge_summary_window_covers_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = SpendingTracker::open(dir.path().join("log.json")).await;
        tracker.log_usage(SERVICE_VIDEO, 0.75, json!({})).await.unwrap();

        let summary = tracker.summary(10_000_000_000_000);
        assert_eq!(summary.num_entries, 1);
        assert_eq!(tracker.summary(i64::MAX).num_entries, 1);
    }
}
