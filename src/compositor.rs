//! Joins an ordered list of clips into one H.264/AAC file.
//!
//! Every input is checked and probed before any encoding starts. The
//! timeline is then laid out in full from durations alone, so its total can
//! be inspected before paying for the render. Rendering happens inside a
//! scratch directory next to the output and the result is renamed into
//! place only once the encoder has succeeded.

use crate::error::ComposeError;
use crate::ffmpeg;
use crate::timeline::{ClipSource, Timeline, TransitionSpec};
use crate::{logi, logok, logw};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

const SCRATCH_PREFIX: &str = ".compose-";
const RENDER_NAME: &str = "render.mp4";

#[derive(Debug, Clone)]
pub struct ComposedClip {
    pub path: PathBuf,
    pub duration: f64,
    pub timeline: Timeline,
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Fails on the first missing path, before anything is decoded.
pub async fn check_sources_exist(paths: &[PathBuf]) -> Result<(), ComposeError> {
    if paths.is_empty() {
        return Err(ComposeError::EmptyInput);
    }
    for path in paths {
        if !is_file(path).await {
            return Err(ComposeError::SourceNotFound { path: path.clone() });
        }
    }
    Ok(())
}

pub async fn probe_sources(paths: &[PathBuf]) -> Result<Vec<Arc<ClipSource>>, ComposeError> {
    let mut sources = Vec::with_capacity(paths.len());
    for path in paths {
        let source = ffmpeg::ffprobe_clip(path)
            .await
            .map_err(|e| ComposeError::decode(path, e.to_string()))?;
        logi(format!(
            "Probed {}: {:.2}s {}x{} @ {:.2}fps{}",
            path.display(),
            source.duration,
            source.width,
            source.height,
            source.frame_rate,
            if source.has_audio { "" } else { " (no audio)" }
        ));
        sources.push(Arc::new(source));
    }
    Ok(sources)
}

/// Validates and probes the inputs and lays out the timeline without encoding anything.
pub async fn plan(paths: &[PathBuf], spec: TransitionSpec) -> Result<Timeline, ComposeError> {
    check_sources_exist(paths).await?;
    spec.validate()?;
    let sources = probe_sources(paths).await?;
    Timeline::build(&sources, spec)
}

pub async fn compose(
    paths: &[PathBuf],
    spec: TransitionSpec,
    output: &Path,
) -> Result<ComposedClip, ComposeError> {
    let timeline = plan(paths, spec).await?;
    logi(format!(
        "Timeline: {} clip(s), {} {:.2}s, total {:.3}s",
        timeline.len(),
        spec.policy,
        spec.duration,
        timeline.total_duration
    ));

    let parent = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .map_err(|e| ComposeError::encode(format!("create {}: {}", parent.display(), e)))?;

    if timeline.is_identity() {
        return write_identity(timeline, &parent, output).await;
    }

    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(&parent)
        .map_err(|e| ComposeError::encode(format!("scratch dir: {}", e)))?;

    let audio = ffmpeg::scratch_audio_path(scratch.path());
    logi(format!("Mixing audio -> {}", audio.display()));
    match ffmpeg::ffmpeg_mix_timeline_audio(&timeline, &audio).await {
        Ok(true) => {}
        Ok(false) => return Err(ComposeError::encode("audio mix produced no file")),
        Err(e) => return Err(ComposeError::encode(e.to_string())),
    }

    let rendered = scratch.path().join(RENDER_NAME);
    logi(format!("Rendering video -> {}", output.display()));
    match ffmpeg::ffmpeg_render_timeline(&timeline, &audio, &rendered).await {
        Ok(true) => {}
        Ok(false) => return Err(ComposeError::encode("render produced no file")),
        Err(e) => return Err(ComposeError::encode(e.to_string())),
    }

    fs::rename(&rendered, output)
        .await
        .map_err(|e| ComposeError::encode(format!("move into {}: {}", output.display(), e)))?;

    if let Err(e) = scratch.close() {
        logw(format!("Failed to remove scratch dir: {}", e));
    }

    report_duration(output, &timeline).await;
    logok(format!("Composed {} clip(s) -> {}", timeline.len(), output.display()));

    Ok(ComposedClip {
        path: output.to_path_buf(),
        duration: timeline.total_duration,
        timeline,
    })
}

async fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

async fn write_identity(
    timeline: Timeline,
    parent: &Path,
    output: &Path,
) -> Result<ComposedClip, ComposeError> {
    let source = timeline.entries[0].source().path.clone();

    if !same_file(&source, output).await {
        let staged = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempfile_in(parent)
            .map_err(|e| ComposeError::encode(format!("scratch file: {}", e)))?;
        fs::copy(&source, staged.path())
            .await
            .map_err(|e| ComposeError::encode(format!("copy {}: {}", source.display(), e)))?;
        staged
            .persist(output)
            .map_err(|e| ComposeError::encode(format!("persist {}: {}", output.display(), e)))?;
    }

    logok(format!(
        "Single clip, copied without re-encode -> {}",
        output.display()
    ));
    Ok(ComposedClip {
        path: output.to_path_buf(),
        duration: timeline.total_duration,
        timeline,
    })
}

async fn report_duration(output: &Path, timeline: &Timeline) {
    let fps = timeline
        .entries
        .first()
        .map(|e| e.source().frame_rate)
        .filter(|f| *f > 0.0)
        .unwrap_or(24.0);
    match ffmpeg::ffprobe_duration_seconds(output).await {
        Ok(actual) if (actual - timeline.total_duration).abs() > 1.0 / fps => logw(format!(
            "Output duration {:.3}s differs from timeline {:.3}s",
            actual, timeline.total_duration
        )),
        Ok(actual) => logi(format!("Output duration: {:.3}s", actual)),
        Err(e) => logw(format!("Could not measure output duration: {}", e)),
    }
}
