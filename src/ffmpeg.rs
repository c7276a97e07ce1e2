use crate::timeline::{ClipSource, ClipView, Timeline};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio::process::Command;

const FALLBACK_FPS: f64 = 24.0;
const AUDIO_RATE: u32 = 48_000;
const STDERR_SNIPPET: usize = 800;

async fn run_cmd(args: &[String]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }
    cmd.kill_on_drop(true);

    let output = cmd.output().await.context("Command execution failed")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let snippet = stderr.trim().chars().take(STDERR_SNIPPET).collect::<String>();
        return Err(anyhow::anyhow!(
            "{} exited with {}: {}",
            args[0],
            output.status,
            snippet
        ));
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct ProbeRoot {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_rate(text: &str) -> Option<f64> {
    let (num, den) = match text.split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (text.parse::<f64>().ok()?, 1.0),
    };
    if num <= 0.0 || den <= 0.0 {
        return None;
    }
    Some(num / den)
}

fn parse_probe(path: &Path, json: &str) -> Result<ClipSource> {
    let root: ProbeRoot = serde_json::from_str(json).context("ffprobe returned invalid JSON")?;

    let video = root
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| anyhow::anyhow!("no video stream"))?;
    let has_audio = root
        .streams
        .iter()
        .any(|s| s.codec_type.as_deref() == Some("audio"));

    let width = video.width.unwrap_or(0);
    let height = video.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("Invalid dimensions"));
    }

    let frame_rate = video
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .or_else(|| video.r_frame_rate.as_deref().and_then(parse_rate))
        .unwrap_or(FALLBACK_FPS);

    let duration = root
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(video.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| anyhow::anyhow!("Invalid duration"))?;
    if !duration.is_finite() || duration < 0.0 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }

    Ok(ClipSource {
        path: path.to_path_buf(),
        duration,
        frame_rate,
        width,
        height,
        has_audio,
    })
}

pub async fn ffprobe_clip(path: &Path) -> Result<ClipSource> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::anyhow!("ffprobe failed: {}", stderr.trim()));
    }

    parse_probe(path, &String::from_utf8_lossy(&output.stdout))
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed"));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration < 0.0 {
        return Err(anyhow::anyhow!("Invalid duration"));
    }
    Ok(duration)
}

/// Output raster shared by every clip on the canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

impl Canvas {
    pub fn for_timeline(timeline: &Timeline) -> Canvas {
        let first = timeline.entries.first().map(|e| e.source());
        let (w, h, fps) = match first {
            Some(src) => (src.width, src.height, src.frame_rate),
            None => (1280, 720, FALLBACK_FPS),
        };
        // libx264 with yuv420p needs even dimensions
        Canvas {
            width: (w.max(2)) & !1,
            height: (h.max(2)) & !1,
            fps: if fps > 0.0 { fps } else { FALLBACK_FPS },
        }
    }
}

fn video_fades(entry: &ClipView, fade_tail: bool) -> String {
    let env = entry.envelope();
    let mut out = String::new();
    if env.fade_in > 0.0 {
        let _ = write!(out, ",fade=t=in:st=0:d={:.6}:alpha=1", env.fade_in);
    }
    if fade_tail && env.fade_out > 0.0 {
        let _ = write!(
            out,
            ",fade=t=out:st={:.6}:d={:.6}:alpha=1",
            env.fade_out_start(),
            env.fade_out
        );
    }
    out
}

fn audio_fades(entry: &ClipView) -> String {
    let env = entry.envelope();
    let mut out = String::new();
    if env.fade_in > 0.0 {
        let _ = write!(out, ",afade=t=in:st=0:d={:.6}", env.fade_in);
    }
    if env.fade_out > 0.0 {
        let _ = write!(
            out,
            ",afade=t=out:st={:.6}:d={:.6}",
            env.fade_out_start(),
            env.fade_out
        );
    }
    out
}

/// Black canvas of the full duration with every clip alpha-faded and overlaid at its offset.
///
/// Under crossfade the outgoing clip keeps full alpha: the incoming clip is
/// overlaid on top with its fade-in, which yields `A*(1-a) + B*a` over the
/// window. Fading both would darken the midpoint towards the black base.
pub fn build_video_graph(timeline: &Timeline, canvas: &Canvas) -> String {
    let fade_tail = !timeline.transition.policy.overlaps();
    let mut parts = Vec::with_capacity(timeline.len() * 2 + 2);
    parts.push(format!(
        "color=c=black:s={}x{}:r={:.6}:d={:.6}[base]",
        canvas.width, canvas.height, canvas.fps, timeline.total_duration
    ));

    for (i, entry) in timeline.entries.iter().enumerate() {
        parts.push(format!(
            "[{i}:v]trim=duration={dur:.6},setpts=PTS-STARTPTS,fps={fps:.6},\
             scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1,format=yuva420p{fades},\
             setpts=PTS+{start:.6}/TB[v{i}]",
            i = i,
            dur = entry.duration(),
            fps = canvas.fps,
            w = canvas.width,
            h = canvas.height,
            fades = video_fades(entry, fade_tail),
            start = entry.start(),
        ));
    }

    let mut current = "base".to_string();
    for i in 0..timeline.len() {
        let next = format!("o{}", i);
        parts.push(format!(
            "[{}][v{}]overlay=eof_action=pass:format=auto[{}]",
            current, i, next
        ));
        current = next;
    }
    parts.push(format!("[{}]format=yuv420p[vout]", current));

    parts.join(";")
}

/// Per-clip faded audio (silence for clips without a track), delayed to its offset and mixed.
pub fn build_audio_graph(timeline: &Timeline) -> String {
    let mut parts = Vec::with_capacity(timeline.len() + 1);
    let mut labels = String::new();

    for (i, entry) in timeline.entries.iter().enumerate() {
        let head = if entry.source().has_audio {
            format!(
                "[{i}:a]aresample={rate},aformat=sample_fmts=fltp:channel_layouts=stereo,",
                i = i,
                rate = AUDIO_RATE
            )
        } else {
            format!(
                "anullsrc=r={rate}:cl=stereo,aformat=sample_fmts=fltp,",
                rate = AUDIO_RATE
            )
        };
        let delay_ms = (entry.start() * 1000.0).round() as u64;
        parts.push(format!(
            "{head}atrim=duration={dur:.6},asetpts=PTS-STARTPTS{fades},adelay={d}|{d}[a{i}]",
            head = head,
            dur = entry.duration(),
            fades = audio_fades(entry),
            d = delay_ms,
            i = i,
        ));
        let _ = write!(labels, "[a{}]", i);
    }

    parts.push(format!(
        "{}amix=inputs={}:duration=longest:dropout_transition=0:normalize=0,atrim=duration={:.6}[aout]",
        labels,
        timeline.len(),
        timeline.total_duration
    ));

    parts.join(";")
}

fn input_args(timeline: &Timeline) -> Vec<String> {
    let mut args = Vec::with_capacity(timeline.len() * 2);
    for entry in &timeline.entries {
        args.push("-i".to_string());
        args.push(entry.source().path.display().to_string());
    }
    args
}

fn base_args() -> Vec<String> {
    vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ]
}

/// Mixes the timeline's audio into an AAC buffer.
pub async fn ffmpeg_mix_timeline_audio(timeline: &Timeline, out_m4a: &Path) -> Result<bool> {
    let mut args = base_args();
    args.extend(input_args(timeline));
    args.extend([
        "-filter_complex".to_string(),
        build_audio_graph(timeline),
        "-map".to_string(),
        "[aout]".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        out_m4a.display().to_string(),
    ]);
    run_cmd(&args).await?;
    Ok(out_m4a.exists())
}

/// Renders the timeline's video over a black canvas and muxes the pre-mixed audio.
pub async fn ffmpeg_render_timeline(
    timeline: &Timeline,
    audio_m4a: &Path,
    out_mp4: &Path,
) -> Result<bool> {
    let canvas = Canvas::for_timeline(timeline);
    let audio_index = timeline.len();

    let mut args = base_args();
    args.extend(input_args(timeline));
    args.extend([
        "-i".to_string(),
        audio_m4a.display().to_string(),
        "-filter_complex".to_string(),
        build_video_graph(timeline, &canvas),
        "-map".to_string(),
        "[vout]".to_string(),
        "-map".to_string(),
        format!("{}:a", audio_index),
        "-c:v".to_string(),
        "libx264".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-preset".to_string(),
        "veryfast".to_string(),
        "-crf".to_string(),
        "22".to_string(),
        "-r".to_string(),
        format!("{:.6}", canvas.fps),
        "-c:a".to_string(),
        "copy".to_string(),
        "-t".to_string(),
        format!("{:.6}", timeline.total_duration),
        "-movflags".to_string(),
        "+faststart".to_string(),
        out_mp4.display().to_string(),
    ]);
    run_cmd(&args).await?;
    Ok(out_mp4.exists())
}

pub fn scratch_audio_path(dir: &Path) -> PathBuf {
    dir.join("mix-audio.m4a")
}
