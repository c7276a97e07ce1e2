use crate::api::{gcs, gemini, veo};
use crate::auth;
use crate::compositor::{self, ComposedClip};
use crate::config::Config;
use crate::cost::{self, SpendingTracker};
use crate::init;
use crate::prompts::{self, ScenePrompts};
use crate::timeline::TransitionSpec;
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Local;
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::fs;
use walkdir::WalkDir;

pub const PROMPTS_FILE: &str = "generated_prompts.json";
pub const SUMMARY_FILE: &str = "workflow_summary.json";
pub const BRIEF_FILE: &str = "brief.txt";

pub fn run_stamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S").to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedScene {
    pub scene_number: usize,
    pub prompt: String,
    pub gcs_uri: String,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Continue,
    Stop,
}

/// Turns one prompt into a local clip.
#[async_trait]
pub trait SceneGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        scene_number: usize,
        out_dir: &Path,
        stamp: &str,
    ) -> Result<GeneratedScene>;
}

/// Consulted after each scene; `Stop` ends generation and keeps what exists.
#[async_trait]
pub trait SceneReviewer: Send + Sync {
    async fn review(&self, scene: &GeneratedScene, total: usize) -> Result<ReviewDecision>;
}

pub struct AutoApprove;

#[async_trait]
impl SceneReviewer for AutoApprove {
    async fn review(&self, _scene: &GeneratedScene, _total: usize) -> Result<ReviewDecision> {
        Ok(ReviewDecision::Continue)
    }
}

pub struct VertexSceneGenerator {
    client: reqwest::Client,
    cfg: Config,
    token: String,
}

impl VertexSceneGenerator {
    pub fn new(client: reqwest::Client, cfg: Config, token: String) -> Self {
        Self { client, cfg, token }
    }

    fn output_uri(&self, scene_number: usize, stamp: &str) -> String {
        let base = self.cfg.gcs_output_uri.trim_end_matches('/');
        format!("{}/scene_{}_{}/", base, scene_number, stamp)
    }
}

#[async_trait]
impl SceneGenerator for VertexSceneGenerator {
    async fn generate(
        &self,
        prompt: &str,
        scene_number: usize,
        out_dir: &Path,
        stamp: &str,
    ) -> Result<GeneratedScene> {
        let label = format!("Scene {}", scene_number);
        logi(format!(
            "Generating video for {}: {}",
            label,
            prompts::preview(prompt, 100)
        ));

        let op = veo::veo_submit(
            &self.client,
            &self.cfg,
            &self.token,
            prompt,
            &self.output_uri(scene_number, stamp),
        )
        .await?;
        logi(format!(
            "Video generation started for {}. Polling every {}s...",
            label, self.cfg.poll_interval_secs
        ));

        let gcs_uri =
            veo::veo_wait_for_video(&self.client, &self.cfg, &self.token, op, &label).await?;
        logok(format!("{} generated at: {}", label, gcs_uri));

        let local_path = out_dir.join(scene_file_name(scene_number, stamp));
        let bytes = gcs::gcs_download(&self.client, &self.token, &gcs_uri, &local_path).await?;
        logok(format!(
            "{} downloaded: {} ({:.2} MB)",
            label,
            local_path.display(),
            bytes as f64 / (1024.0 * 1024.0)
        ));

        Ok(GeneratedScene {
            scene_number,
            prompt: prompt.to_string(),
            gcs_uri,
            local_path,
        })
    }
}

pub fn scene_file_name(scene_number: usize, stamp: &str) -> String {
    format!("scene_{}_{}.mp4", scene_number, stamp)
}

async fn record_scene_cost(tracker: &mut SpendingTracker, scene: &GeneratedScene) {
    let per_video = tracker.pricing.video_per_clip;
    if let Err(e) = tracker
        .log_usage(
            cost::SERVICE_VIDEO,
            per_video,
            json!({"scene_number": scene.scene_number, "gcs_uri": scene.gcs_uri}),
        )
        .await
    {
        logw(format!("Failed to record video cost: {:#}", e));
    }
}

/// Generates every scene in order. A failed scene is logged and skipped.
///
/// Each downloaded scene is charged to `tracker` before the reviewer sees it.
pub async fn generate_scenes(
    generator: &dyn SceneGenerator,
    reviewer: &dyn SceneReviewer,
    mut tracker: Option<&mut SpendingTracker>,
    prompts: &ScenePrompts,
    out_dir: &Path,
    stamp: &str,
) -> Vec<GeneratedScene> {
    let all = prompts.as_array();
    let total = all.len();
    let mut scenes = Vec::with_capacity(total);

    for (idx, prompt) in all.iter().enumerate() {
        let scene_number = idx + 1;
        logi(format!(
            "=== Processing Scene {} ({}/{}) ===",
            scene_number, scene_number, total
        ));

        let scene = match generator.generate(prompt, scene_number, out_dir, stamp).await {
            Ok(scene) => scene,
            Err(e) => {
                logw(format!("Failed to generate Scene {}: {:#}", scene_number, e));
                continue;
            }
        };
        if let Some(tracker) = tracker.as_deref_mut() {
            record_scene_cost(tracker, &scene).await;
        }
        scenes.push(scene);

        let latest = &scenes[scenes.len() - 1];
        match reviewer.review(latest, total).await {
            Ok(ReviewDecision::Continue) => {}
            Ok(ReviewDecision::Stop) => {
                logw(format!("Workflow stopped by reviewer after Scene {}", scene_number));
                break;
            }
            Err(e) => {
                logw(format!("Review failed ({:#}); stopping generation", e));
                break;
            }
        }
    }

    logi(format!("Generated {} out of {} videos", scenes.len(), total));
    scenes
}

#[derive(Debug, Serialize)]
struct WorkflowInfo<'a> {
    timestamp: &'a str,
    output_directory: String,
    user_input: &'a str,
}

#[derive(Debug, Serialize)]
struct FileRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    scene_number: Option<usize>,
    filename: String,
    full_path: String,
    relative_path: Option<String>,
    exists: bool,
}

#[derive(Debug, Serialize)]
struct WorkflowSummary<'a> {
    workflow_info: WorkflowInfo<'a>,
    generated_prompts: &'a ScenePrompts,
    individual_videos: Vec<FileRecord>,
    final_video: FileRecord,
}

fn file_record(path: &Path, base: &Path, scene_number: Option<usize>) -> FileRecord {
    FileRecord {
        scene_number,
        filename: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        full_path: path.display().to_string(),
        relative_path: pathdiff::diff_paths(path, base).map(|p| p.display().to_string()),
        exists: path.exists(),
    }
}

pub async fn write_summary(
    out_dir: &Path,
    stamp: &str,
    brief: &str,
    prompts: &ScenePrompts,
    scenes: &[GeneratedScene],
    final_video: &Path,
) -> Result<PathBuf> {
    let summary = WorkflowSummary {
        workflow_info: WorkflowInfo {
            timestamp: stamp,
            output_directory: out_dir.display().to_string(),
            user_input: brief,
        },
        generated_prompts: prompts,
        individual_videos: scenes
            .iter()
            .map(|s| file_record(&s.local_path, out_dir, Some(s.scene_number)))
            .collect(),
        final_video: file_record(final_video, out_dir, None),
    };

    let path = out_dir.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(&summary)?;
    fs::write(&path, json)
        .await
        .with_context(|| format!("Failed to write summary: {}", path.display()))?;
    logok(format!("Workflow summary saved: {}", path.display()));
    Ok(path)
}

fn scene_index(path: &Path) -> Option<u32> {
    let stem = path.file_stem()?.to_str()?;
    stem.split('_').nth(1)?.parse().ok()
}

/// `scene_*.mp4` files directly inside `dir`, ordered by scene number.
pub fn find_scene_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| {
                    let lower = n.to_ascii_lowercase();
                    lower.starts_with("scene_") && lower.ends_with(".mp4")
                })
                .unwrap_or(false)
        })
        .collect();

    files.sort_by(|a, b| {
        let ka = (scene_index(a).is_none(), scene_index(a), a.file_name());
        let kb = (scene_index(b).is_none(), scene_index(b), b.file_name());
        ka.cmp(&kb)
    });
    files
}

/// Merges previously generated scene files in `dir` into `merged_resume_<stamp>.mp4`.
pub async fn merge_existing(dir: &Path, spec: TransitionSpec) -> Result<ComposedClip> {
    if !dir.is_dir() {
        anyhow::bail!("Output directory not found: {}", dir.display());
    }
    logi(format!("Looking for scene files in: {}", dir.display()));
    let scenes = find_scene_files(dir);
    if scenes.is_empty() {
        anyhow::bail!("No scene_*.mp4 files found in {}", dir.display());
    }
    for path in &scenes {
        logi(format!(" - {}", path.display()));
    }

    let output = dir.join(format!("merged_resume_{}.mp4", run_stamp()));
    let merged = compositor::compose(&scenes, spec, &output).await?;
    Ok(merged)
}

#[derive(Debug)]
pub struct WorkflowOutcome {
    pub output_dir: PathBuf,
    pub prompts: ScenePrompts,
    pub scenes: Vec<GeneratedScene>,
    pub final_video: ComposedClip,
    pub summary_path: PathBuf,
}

pub struct Workflow {
    cfg: Config,
    client: reqwest::Client,
    stamp: String,
    output_dir: PathBuf,
    tracker: SpendingTracker,
}

impl Workflow {
    pub async fn new(cfg: Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;
        let stamp = run_stamp();
        let output_dir = cfg.project_dir.join(format!("generated_videos_{}", stamp));
        init::ensure_project_dir(&output_dir).await?;
        let tracker = SpendingTracker::open(&cfg.spending_log).await;

        logi(format!("Output directory: {}", output_dir.display()));
        Ok(Self {
            cfg,
            client,
            stamp,
            output_dir,
            tracker,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn stamp(&self) -> &str {
        &self.stamp
    }

    pub async fn generate_prompts(&mut self, brief: &str) -> Result<ScenePrompts> {
        prompts::validate_brief(brief)?;
        logi(format!("User input preview: {}", prompts::preview(brief, 100)));

        let reply = gemini::gemini_generate_scene_prompts(&self.client, &self.cfg, brief).await?;
        let path = self.output_dir.join(PROMPTS_FILE);
        reply.prompts.save(&path).await?;
        logok(format!("Video prompts generated and saved: {}", path.display()));

        let pricing = self.tracker.pricing;
        let estimate = match reply.usage {
            Some(u) => cost::prompt_cost_from_tokens(
                &pricing,
                u.input_tokens as f64,
                u.output_tokens as f64,
            ),
            None => cost::estimate_prompt_generation(&pricing, brief, Some(&reply.raw_text)),
        };
        if let Err(e) = self
            .tracker
            .log_usage(
                cost::SERVICE_PROMPTS,
                estimate.total_cost,
                json!({
                    "input_tokens": estimate.input_tokens,
                    "output_tokens": estimate.output_tokens,
                }),
            )
            .await
        {
            logw(format!("Failed to record prompt cost: {:#}", e));
        }

        for (idx, prompt) in reply.prompts.as_array().iter().enumerate() {
            logi(format!("Scene {}: {}", idx + 1, prompts::preview(prompt, 80)));
        }
        Ok(reply.prompts)
    }

    pub async fn run(
        &mut self,
        brief: &str,
        reviewer: &dyn SceneReviewer,
    ) -> Result<WorkflowOutcome> {
        logi("=== STARTING COMPLETE AI VIDEO WORKFLOW ===".to_string());
        logi(format!("Timestamp: {}", self.stamp));

        let prompts = self.generate_prompts(brief).await?;

        let token = auth::access_token(&self.cfg).await?;
        let generator = VertexSceneGenerator::new(self.client.clone(), self.cfg.clone(), token);
        let scenes = generate_scenes(
            &generator,
            reviewer,
            Some(&mut self.tracker),
            &prompts,
            &self.output_dir,
            &self.stamp,
        )
        .await;

        if scenes.is_empty() {
            anyhow::bail!("No videos were generated successfully");
        }

        let paths: Vec<PathBuf> = scenes.iter().map(|s| s.local_path.clone()).collect();
        let output = self
            .output_dir
            .join(format!("merged_video_{}.mp4", self.stamp));
        let spec = self.cfg.transition;
        logi(format!(
            "Merging {} videos ({} {:.2}s)...",
            paths.len(),
            spec.policy,
            spec.duration
        ));
        let final_video = compositor::compose(&paths, spec, &output).await?;

        let summary_path = write_summary(
            &self.output_dir,
            &self.stamp,
            brief,
            &prompts,
            &scenes,
            &final_video.path,
        )
        .await?;

        logok(format!("WORKFLOW COMPLETED: {}", final_video.path.display()));
        Ok(WorkflowOutcome {
            output_dir: self.output_dir.clone(),
            prompts,
            scenes,
            final_video,
            summary_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeGenerator {
        fail_scene: Option<usize>,
    }

    #[async_trait]
    impl SceneGenerator for FakeGenerator {
        async fn generate(
            &self,
            prompt: &str,
            scene_number: usize,
            out_dir: &Path,
            stamp: &str,
        ) -> Result<GeneratedScene> {
            if self.fail_scene == Some(scene_number) {
                anyhow::bail!("quota exceeded");
            }
            let local_path = out_dir.join(scene_file_name(scene_number, stamp));
            fs::write(&local_path, b"mp4").await?;
            Ok(GeneratedScene {
                scene_number,
                prompt: prompt.to_string(),
                gcs_uri: format!("gs://bucket/scene_{}/sample_0.mp4", scene_number),
                local_path,
            })
        }
    }

    struct StopAfter {
        limit: usize,
        seen: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SceneReviewer for StopAfter {
        async fn review(&self, scene: &GeneratedScene, _total: usize) -> Result<ReviewDecision> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(scene.scene_number);
            if seen.len() >= self.limit {
                Ok(ReviewDecision::Stop)
            } else {
                Ok(ReviewDecision::Continue)
            }
        }
    }

    fn prompts() -> ScenePrompts {
        ScenePrompts::from_vec(vec![
            "intro".into(),
            "problem".into(),
            "solution".into(),
            "call to action".into(),
        ])
    }

    #[tokio::test]
    async fn generates_all_scenes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FakeGenerator { fail_scene: None };
        let scenes = generate_scenes(
            &generator,
            &AutoApprove,
            None,
            &prompts(),
            dir.path(),
            "20250101_000000",
        )
        .await;
        let numbers: Vec<usize> = scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4]);
        assert_eq!(scenes[3].prompt, "call to action");
    }

    #[tokio::test]
    async fn failed_scene_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FakeGenerator {
            fail_scene: Some(2),
        };
        let scenes =
            generate_scenes(&generator, &AutoApprove, None, &prompts(), dir.path(), "t").await;
        let numbers: Vec<usize> = scenes.iter().map(|s| s.scene_number).collect();
        assert_eq!(numbers, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn reviewer_can_stop_early() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FakeGenerator { fail_scene: None };
        let reviewer = StopAfter {
            limit: 2,
            seen: Mutex::new(Vec::new()),
        };
        let scenes =
            generate_scenes(&generator, &reviewer, None, &prompts(), dir.path(), "t").await;
        assert_eq!(scenes.len(), 2);
        assert_eq!(*reviewer.seen.lock().unwrap(), vec![1, 2]);
    }

    /// Records how many spending entries were on disk when each scene was reviewed.
    struct LogWatcher {
        log: PathBuf,
        entries_at_review: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SceneReviewer for LogWatcher {
        async fn review(&self, scene: &GeneratedScene, _total: usize) -> Result<ReviewDecision> {
            let text = std::fs::read_to_string(&self.log)?;
            let entries: Vec<serde_json::Value> = serde_json::from_str(&text)?;
            self.entries_at_review.lock().unwrap().push(entries.len());
            if scene.scene_number == 3 {
                Ok(ReviewDecision::Stop)
            } else {
                Ok(ReviewDecision::Continue)
            }
        }
    }

    #[tokio::test]
    async fn each_scene_is_charged_before_review() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("api_spending_log.json");
        let mut tracker = SpendingTracker::open(&log).await;
        let generator = FakeGenerator {
            fail_scene: Some(2),
        };
        let reviewer = LogWatcher {
            log: log.clone(),
            entries_at_review: Mutex::new(Vec::new()),
        };

        let scenes = generate_scenes(
            &generator,
            &reviewer,
            Some(&mut tracker),
            &prompts(),
            dir.path(),
            "t",
        )
        .await;

        assert_eq!(scenes.len(), 2);
        assert_eq!(*reviewer.entries_at_review.lock().unwrap(), vec![1, 2]);
        let charged: Vec<u64> = tracker
            .entries()
            .iter()
            .map(|e| e.details["scene_number"].as_u64().unwrap())
            .collect();
        assert_eq!(charged, vec![1, 3]);
        assert!(tracker.entries().iter().all(|e| e.service == cost::SERVICE_VIDEO));
    }

    #[test]
    fn scene_files_sort_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "scene_10_20251119_213401.mp4",
            "scene_2_20251119_213401.mp4",
            "scene_1_20251119_213401.mp4",
            "scene_x.mp4",
            "scene_3.mp4",
            "merged_video_20251119_213401.mp4",
            "scene_3_notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let names: Vec<String> = find_scene_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "scene_1_20251119_213401.mp4",
                "scene_2_20251119_213401.mp4",
                "scene_3.mp4",
                "scene_10_20251119_213401.mp4",
                "scene_x.mp4",
            ]
        );
    }

    #[tokio::test]
    async fn merge_existing_requires_scenes() {
        let dir = tempfile::tempdir().unwrap();
        let err = merge_existing(dir.path(), TransitionSpec::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("No scene_*.mp4"));
    }

    #[tokio::test]
    async fn summary_lists_scenes_and_final_video() {
        let dir = tempfile::tempdir().unwrap();
        let generator = FakeGenerator { fail_scene: None };
        let scenes =
            generate_scenes(&generator, &AutoApprove, None, &prompts(), dir.path(), "t").await;
        let final_video = dir.path().join("merged_video_t.mp4");

        let path = write_summary(dir.path(), "t", "brief", &prompts(), &scenes, &final_video)
            .await
            .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();

        assert_eq!(value["individual_videos"].as_array().unwrap().len(), 4);
        assert_eq!(value["individual_videos"][0]["filename"], "scene_1_t.mp4");
        assert_eq!(value["individual_videos"][0]["relative_path"], "scene_1_t.mp4");
        assert_eq!(value["individual_videos"][0]["exists"], true);
        assert_eq!(value["final_video"]["exists"], false);
        assert!(value["final_video"].get("scene_number").is_none());
        assert_eq!(value["generated_prompts"]["prompt_3"], "solution");
    }
}
