use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{Level, info};

use scene_reel::compositor;
use scene_reel::config::{CONFIG_FILE, Config};
use scene_reel::cost::{self, Pricing, SpendingTracker};
use scene_reel::init;
use scene_reel::platform;
use scene_reel::prompts;
use scene_reel::workflow::{
    self, AutoApprove, BRIEF_FILE, GeneratedScene, ReviewDecision, SceneReviewer, Workflow,
};
use scene_reel::{TransitionPolicy, TransitionSpec};

#[derive(Parser)]
#[command(
    name = "scene-reel-cli",
    version,
    about = "Turn a short product brief into a four-scene AI video",
    long_about = "Generates four scene prompts with Gemini, renders each scene with Veo, then joins the clips with crossfades or fades into one MP4."
)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the complete workflow: prompts, scenes, merge
    Run {
        #[command(flatten)]
        brief: BriefArgs,

        /// Approve every scene without asking
        #[arg(long)]
        no_review: bool,

        #[command(flatten)]
        transition: TransitionArgs,
    },
    /// Generate and save the four scene prompts only
    Prompts {
        #[command(flatten)]
        brief: BriefArgs,
    },
    /// Merge scene_*.mp4 files left in an earlier output directory
    Merge {
        /// Directory holding the scene files
        #[arg(long)]
        output_dir: PathBuf,

        #[command(flatten)]
        transition: TransitionArgs,
    },
    /// Join local clips in order
    Compose {
        /// Input clips, in playback order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output video file path
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        transition: TransitionArgs,

        /// Print the timeline without rendering
        #[arg(long)]
        dry_run: bool,
    },
    /// Cost estimates and the spending log
    Cost {
        #[command(subcommand)]
        command: CostCommand,
    },
}

#[derive(Subcommand)]
enum CostCommand {
    /// Estimate the cost of one workflow run
    Estimate {
        #[command(flatten)]
        brief: BriefArgs,
    },
    /// Spending over the last N days
    Summary {
        #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(i64).range(0..))]
        days: i64,
    },
    /// Current unit prices
    Pricing,
    /// Most recent spending log entries
    Log {
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
}

#[derive(Args)]
struct BriefArgs {
    /// Product brief text
    #[arg(long, conflicts_with = "brief_file")]
    brief: Option<String>,

    /// File holding the product brief (defaults to brief.txt in the project dir)
    #[arg(long)]
    brief_file: Option<PathBuf>,
}

#[derive(Args)]
struct TransitionArgs {
    /// Transition between scenes (crossfade, fade_black, simple)
    #[arg(long)]
    transition: Option<TransitionPolicy>,

    /// Transition length in seconds
    #[arg(long)]
    duration: Option<f64>,
}

impl TransitionArgs {
    fn apply(&self, base: TransitionSpec) -> Result<TransitionSpec> {
        let spec = TransitionSpec {
            policy: self.transition.unwrap_or(base.policy),
            duration: self.duration.unwrap_or(base.duration),
        };
        spec.validate()?;
        Ok(spec)
    }
}

async fn read_brief(args: &BriefArgs, project_dir: &Path) -> Result<String> {
    if let Some(text) = &args.brief {
        return Ok(text.trim().to_string());
    }
    let path = args
        .brief_file
        .clone()
        .unwrap_or_else(|| project_dir.join(BRIEF_FILE));
    let text = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read brief: {}", path.display()))?;
    Ok(text.trim().to_string())
}

/// Config for commands that never call an API: missing keys are tolerated.
async fn load_config_lenient(path: &Path) -> Option<Config> {
    let text = tokio::fs::read_to_string(path).await.ok()?;
    Config::from_json(&text).ok()
}

async fn ask(question: &str) -> Result<String> {
    let question = question.to_string();
    tokio::task::spawn_blocking(move || -> Result<String> {
        use std::io::Write;
        print!("{}", question);
        std::io::stdout().flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            anyhow::bail!("stdin closed");
        }
        Ok(line.trim().to_string())
    })
    .await?
}

/// Pauses after each scene so a bad result can stop the remaining paid renders.
struct InteractiveReviewer;

#[async_trait]
impl SceneReviewer for InteractiveReviewer {
    async fn review(&self, scene: &GeneratedScene, total: usize) -> Result<ReviewDecision> {
        let per_video = Pricing::default().video_per_clip;
        loop {
            println!();
            println!("=== Scene {} of {} ready ===", scene.scene_number, total);
            println!("File: {}", scene.local_path.display());
            println!("Prompt: {}", prompts::preview(&scene.prompt, 100));
            println!("  1. Open video preview");
            println!("  2. Continue to next scene");
            println!("  3. Stop workflow here");
            println!("  4. View full prompt");
            println!("  5. Show progress");

            match ask("Choose an option (1-5): ").await?.as_str() {
                "1" => {
                    if !platform::open_path(&scene.local_path) {
                        println!("Open the file manually: {}", scene.local_path.display());
                    }
                }
                "2" => return Ok(ReviewDecision::Continue),
                "3" => {
                    let remaining = total.saturating_sub(scene.scene_number);
                    println!(
                        "Stopping saves ~${:.2} on {} remaining scene(s).",
                        remaining as f64 * per_video,
                        remaining
                    );
                    let answer = ask("Stop the workflow? (y/N): ").await?;
                    if answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes") {
                        return Ok(ReviewDecision::Stop);
                    }
                }
                "4" => {
                    println!("--- Scene {} prompt ---", scene.scene_number);
                    println!("{}", scene.prompt);
                }
                "5" => {
                    let done = scene.scene_number;
                    println!(
                        "Completed {}/{} scenes, spent ~${:.2}, ~${:.2} to go.",
                        done,
                        total,
                        done as f64 * per_video,
                        total.saturating_sub(done) as f64 * per_video
                    );
                }
                other => println!("Invalid choice '{}'. Please enter 1-5.", other),
            }
        }
    }
}

async fn cmd_run(
    cfg_path: &Path,
    brief: &BriefArgs,
    no_review: bool,
    t: &TransitionArgs,
) -> Result<()> {
    let mut cfg = Config::load(cfg_path).await?;
    cfg.transition = t.apply(cfg.transition)?;
    if !init::check_ffmpeg().await {
        anyhow::bail!("FFmpeg not found in PATH. Please install FFmpeg.");
    }
    let brief = read_brief(brief, &cfg.project_dir).await?;
    prompts::validate_brief(&brief)?;

    let mut wf = Workflow::new(cfg).await?;
    let outcome = if no_review {
        wf.run(&brief, &AutoApprove).await?
    } else {
        wf.run(&brief, &InteractiveReviewer).await?
    };

    println!();
    println!("Final video: {}", outcome.final_video.path.display());
    println!("Duration: {:.2}s", outcome.final_video.duration);
    println!("Scenes: {}", outcome.scenes.len());
    println!("Summary: {}", outcome.summary_path.display());
    Ok(())
}

async fn cmd_prompts(cfg_path: &Path, brief: &BriefArgs) -> Result<()> {
    let cfg = Config::load(cfg_path).await?;
    let brief = read_brief(brief, &cfg.project_dir).await?;
    let mut wf = Workflow::new(cfg).await?;
    let prompts = wf.generate_prompts(&brief).await?;
    for (idx, prompt) in prompts.as_array().iter().enumerate() {
        println!("--- Scene {} ---", idx + 1);
        println!("{}", prompt);
    }
    println!();
    println!("Saved to {}", wf.output_dir().join(workflow::PROMPTS_FILE).display());
    Ok(())
}

async fn cmd_merge(cfg_path: &Path, dir: &Path, t: &TransitionArgs) -> Result<()> {
    let base = load_config_lenient(cfg_path)
        .await
        .map(|c| c.transition)
        .unwrap_or_default();
    let spec = t.apply(base)?;
    let merged = workflow::merge_existing(dir, spec).await?;
    println!("Merged video: {}", merged.path.display());
    println!("Duration: {:.2}s", merged.duration);
    Ok(())
}

async fn cmd_compose(
    inputs: &[PathBuf],
    output: &Path,
    t: &TransitionArgs,
    dry_run: bool,
) -> Result<()> {
    let spec = t.apply(TransitionSpec::default())?;
    if dry_run {
        let timeline = compositor::plan(inputs, spec).await?;
        println!("{} {:.2}s", spec.policy, spec.duration);
        for (idx, view) in timeline.entries.iter().enumerate() {
            let env = view.envelope();
            println!(
                "{:>2}. {:>8.3}s - {:>8.3}s  fade in {:.2}s  fade out {:.2}s  {}",
                idx + 1,
                view.start(),
                view.end(),
                env.fade_in,
                env.fade_out,
                view.source().path.display()
            );
        }
        println!("Total: {:.3}s", timeline.total_duration);
        return Ok(());
    }

    let clip = compositor::compose(inputs, spec, output).await?;
    println!("Output: {} ({:.2}s)", clip.path.display(), clip.duration);
    Ok(())
}

async fn cmd_cost(cfg_path: &Path, command: &CostCommand) -> Result<()> {
    let cfg = load_config_lenient(cfg_path).await;
    let pricing = Pricing::default();

    match command {
        CostCommand::Estimate { brief } => {
            let project_dir = cfg
                .as_ref()
                .map(|c| c.project_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let brief = read_brief(brief, &project_dir).await?;
            let est = cost::estimate_workflow(&pricing, &brief, None);
            let (prompt_pct, video_pct) = est.distribution();

            println!("=== COST ESTIMATION ===");
            println!(
                "Prompt generation: ${:.6} ({} in / {} out tokens)",
                est.prompt_generation.total_cost,
                est.prompt_generation.input_tokens,
                est.prompt_generation.output_tokens
            );
            println!(
                "Video generation:  ${:.2} ({} x ${:.2})",
                est.video_generation.total_cost,
                est.video_generation.num_videos,
                est.video_generation.cost_per_video
            );
            println!("Storage:           ${:.2}", est.storage_operations);
            println!("Total:             ${:.2}", est.total_estimated_cost);
            println!("Distribution: prompts {:.1}%, videos {:.1}%", prompt_pct, video_pct);
            println!();
            for tip in cost::optimisation_tips(&brief) {
                println!(" - {}", tip);
            }
        }
        CostCommand::Summary { days } => {
            let tracker = open_tracker(cfg.as_ref()).await;
            let summary = tracker.summary(*days);
            println!("=== SPENDING SUMMARY (last {} days) ===", summary.period_days);
            println!("Total: ${:.2} over {} entries", summary.total_cost, summary.num_entries);
            for (service, totals) in &summary.by_service {
                println!(
                    "  {}: ${:.2} ({} uses, avg ${:.4})",
                    service,
                    totals.total_cost,
                    totals.count,
                    totals.average()
                );
            }
        }
        CostCommand::Pricing => {
            println!("=== PRICING ===");
            for (service, unit, price) in pricing.rows() {
                println!("  {:<28} {:<22} ${}", service, unit, price);
            }
        }
        CostCommand::Log { count } => {
            let tracker = open_tracker(cfg.as_ref()).await;
            if tracker.entries().is_empty() {
                println!("No spending recorded in {}", tracker.path().display());
            }
            for entry in tracker.recent(*count) {
                println!(
                    "{}  {:<28} ${:.4}  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.service,
                    entry.cost,
                    entry.details
                );
            }
        }
    }
    Ok(())
}

async fn open_tracker(cfg: Option<&Config>) -> SpendingTracker {
    let path = cfg
        .map(|c| c.spending_log.clone())
        .unwrap_or_else(|| PathBuf::from("api_spending_log.json"));
    SpendingTracker::open(path).await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(log_level).init();
    info!("scene-reel v{}", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Command::Run {
            brief,
            no_review,
            transition,
        } => cmd_run(&cli.config, brief, *no_review, transition).await,
        Command::Prompts { brief } => cmd_prompts(&cli.config, brief).await,
        Command::Merge {
            output_dir,
            transition,
        } => cmd_merge(&cli.config, output_dir, transition).await,
        Command::Compose {
            inputs,
            output,
            transition,
            dry_run,
        } => cmd_compose(inputs, output, transition, *dry_run).await,
        Command::Cost { command } => cmd_cost(&cli.config, command).await,
    }
}
