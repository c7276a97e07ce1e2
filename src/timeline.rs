use crate::error::ComposeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_TRANSITION_SECONDS: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    #[default]
    Crossfade,
    FadeBlack,
    Simple,
}

impl TransitionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionPolicy::Crossfade => "crossfade",
            TransitionPolicy::FadeBlack => "fade_black",
            TransitionPolicy::Simple => "simple",
        }
    }

    /// Whether consecutive clips share an overlap window.
    pub fn overlaps(&self) -> bool {
        matches!(self, TransitionPolicy::Crossfade)
    }
}

impl fmt::Display for TransitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransitionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossfade" => Ok(TransitionPolicy::Crossfade),
            "fade_black" | "fade-black" | "fade-to-black" => Ok(TransitionPolicy::FadeBlack),
            "simple" | "simple-fade" => Ok(TransitionPolicy::Simple),
            other => Err(format!(
                "unknown transition '{}' (expected crossfade, fade_black or simple)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub policy: TransitionPolicy,
    #[serde(rename = "duration_seconds")]
    pub duration: f64,
}

impl Default for TransitionSpec {
    fn default() -> Self {
        Self {
            policy: TransitionPolicy::Crossfade,
            duration: DEFAULT_TRANSITION_SECONDS,
        }
    }
}

impl TransitionSpec {
    pub fn new(policy: TransitionPolicy, duration: f64) -> Self {
        Self { policy, duration }
    }

    pub fn validate(&self) -> Result<(), ComposeError> {
        if !self.duration.is_finite() || self.duration <= 0.0 {
            return Err(ComposeError::InvalidTransition {
                duration: self.duration,
            });
        }
        Ok(())
    }

    /// Fade length applied on each side of a junction.
    pub fn fade_length(&self) -> f64 {
        match self.policy {
            TransitionPolicy::Simple => self.duration / 2.0,
            TransitionPolicy::Crossfade | TransitionPolicy::FadeBlack => self.duration,
        }
    }

    /// Amount by which clip i+1 starts before clip i ends.
    pub fn overlap(&self) -> f64 {
        if self.policy.overlaps() {
            self.duration
        } else {
            0.0
        }
    }
}

/// A probed media source. Shared by reference between every view derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipSource {
    pub path: PathBuf,
    pub duration: f64,
    pub frame_rate: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
}

/// Linear opacity ramps at the head and tail of a clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpacityEnvelope {
    pub length: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl OpacityEnvelope {
    pub fn solid(length: f64) -> Self {
        Self {
            length,
            fade_in: 0.0,
            fade_out: 0.0,
        }
    }

    /// Opacity at clip-local time `t`.
    pub fn opacity_at(&self, t: f64) -> f64 {
        if t < 0.0 || t > self.length {
            return 0.0;
        }
        let rise = if self.fade_in > 0.0 {
            (t / self.fade_in).min(1.0)
        } else {
            1.0
        };
        let fall = if self.fade_out > 0.0 {
            ((self.length - t) / self.fade_out).min(1.0)
        } else {
            1.0
        };
        rise.min(fall).clamp(0.0, 1.0)
    }

    /// Clip-local time at which the fade-out ramp begins.
    pub fn fade_out_start(&self) -> f64 {
        (self.length - self.fade_out).max(0.0)
    }
}

/// Immutable view over a source: an envelope and a timeline offset.
/// Every transformation returns a new view; the source is never copied.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipView {
    source: Arc<ClipSource>,
    start: f64,
    envelope: OpacityEnvelope,
}

impl ClipView {
    pub fn new(source: Arc<ClipSource>) -> Self {
        let envelope = OpacityEnvelope::solid(source.duration);
        Self {
            source,
            start: 0.0,
            envelope,
        }
    }

    pub fn with_fade_in(&self, seconds: f64) -> Self {
        let mut view = self.clone();
        view.envelope.fade_in = seconds;
        view
    }

    pub fn with_fade_out(&self, seconds: f64) -> Self {
        let mut view = self.clone();
        view.envelope.fade_out = seconds;
        view
    }

    pub fn with_start(&self, start: f64) -> Self {
        let mut view = self.clone();
        view.start = start;
        view
    }

    pub fn source(&self) -> &Arc<ClipSource> {
        &self.source
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.start + self.source.duration
    }

    pub fn duration(&self) -> f64 {
        self.source.duration
    }

    pub fn envelope(&self) -> &OpacityEnvelope {
        &self.envelope
    }

    /// Opacity at absolute timeline time `t`.
    pub fn opacity_at(&self, t: f64) -> f64 {
        self.envelope.opacity_at(t - self.start)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub entries: Vec<ClipView>,
    pub total_duration: f64,
    pub transition: TransitionSpec,
}

impl Timeline {
    /// Lays out every clip up front from durations and the transition spec.
    pub fn build(
        sources: &[Arc<ClipSource>],
        transition: TransitionSpec,
    ) -> Result<Timeline, ComposeError> {
        if sources.is_empty() {
            return Err(ComposeError::EmptyInput);
        }
        transition.validate()?;

        if sources.len() == 1 {
            let only = ClipView::new(Arc::clone(&sources[0]));
            let total_duration = only.duration();
            return Ok(Timeline {
                entries: vec![only],
                total_duration,
                transition,
            });
        }

        for (idx, pair) in sources.windows(2).enumerate() {
            let shortest = pair[0].duration.min(pair[1].duration);
            if transition.duration > shortest {
                return Err(ComposeError::TransitionTooLong {
                    index: idx,
                    duration: transition.duration,
                    shortest,
                });
            }
        }

        let fade = transition.fade_length();
        let overlap = transition.overlap();
        let last = sources.len() - 1;

        let mut entries = Vec::with_capacity(sources.len());
        let mut cursor = 0.0;
        for (idx, source) in sources.iter().enumerate() {
            let mut view = ClipView::new(Arc::clone(source));
            if idx > 0 {
                view = view.with_fade_in(fade);
            }
            if idx < last {
                view = view.with_fade_out(fade);
            }
            let start = if idx == 0 { 0.0 } else { cursor - overlap };
            view = view.with_start(start);
            cursor = view.end();
            entries.push(view);
        }

        Ok(Timeline {
            entries,
            total_duration: cursor,
            transition,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_identity(&self) -> bool {
        self.entries.len() == 1
    }

    /// Entries whose time span contains `t`, with their opacity at that instant.
    pub fn active_at(&self, t: f64) -> Vec<(usize, f64)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| t >= e.start() && t <= e.end())
            .map(|(i, e)| (i, e.opacity_at(t)))
            .collect()
    }
}
