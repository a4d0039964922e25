//! Pure timing model shared by live scrubbing, the frame cache and the
//! exporter. Every consumer resolves positions through the same functions so
//! preview and final output cannot drift apart.
//!
//! - `resolve_transition_timeline` plays both clips side by side for the
//!   length of the transition, starting at their (possibly negative) offsets.
//! - `resolve_full_timeline` plays clip A alone, overlaps both clips for the
//!   transition window, then plays clip B alone.
//! - `easing` and `curve` map a linear transition progress to the eased value
//!   handed to the renderer.

mod curve;
mod easing;

pub use curve::{evaluate_curve, CurveSpec, EasingSelection, Point};
pub use easing::{Easing, UnknownEasing};

use serde::{Deserialize, Serialize};

/// Seconds trimmed from each clip's duration so seeks never land on the
/// final frame, where decoders tend to stall.
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.04;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TimelineError {
    #[error("transition duration must be positive and finite, got {0}")]
    TransitionDuration(f64),
    #[error("clip {clip} duration must be positive and finite, got {value}")]
    ClipDuration { clip: char, value: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    ClipA,
    Transition,
    ClipB,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineMode {
    #[default]
    TransitionOnly,
    FullSequence,
}

impl TimelineMode {
    pub fn from_full_videos(export_full_videos: bool) -> Self {
        if export_full_videos {
            TimelineMode::FullSequence
        } else {
            TimelineMode::TransitionOnly
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineParams {
    pub transition_duration: f64,
    pub clip_a_start: f64,
    pub clip_b_start: f64,
    pub video_dur_a: f64,
    pub video_dur_b: f64,
    pub safety_margin: f64,
}

impl TimelineParams {
    pub fn new(
        transition_duration: f64,
        clip_a_start: f64,
        clip_b_start: f64,
        video_dur_a: f64,
        video_dur_b: f64,
    ) -> Result<Self, TimelineError> {
        if !(transition_duration.is_finite() && transition_duration > 0.0) {
            return Err(TimelineError::TransitionDuration(transition_duration));
        }
        for (clip, value) in [('A', video_dur_a), ('B', video_dur_b)] {
            if !(value.is_finite() && value > 0.0) {
                return Err(TimelineError::ClipDuration { clip, value });
            }
        }
        Ok(Self {
            transition_duration,
            clip_a_start: finite_or_zero(clip_a_start),
            clip_b_start: finite_or_zero(clip_b_start),
            video_dur_a,
            video_dur_b,
            safety_margin: DEFAULT_SAFETY_MARGIN,
        })
    }

    pub fn with_safety_margin(mut self, margin: f64) -> Self {
        self.safety_margin = margin.max(0.0);
        self
    }

    /// Absolute start of clip A; negative offsets count back from the end.
    pub fn start_time_a(&self) -> f64 {
        resolve_start(self.clip_a_start, self.video_dur_a)
    }

    pub fn start_time_b(&self) -> f64 {
        resolve_start(self.clip_b_start, self.video_dur_b)
    }

    pub fn total_duration(&self, mode: TimelineMode) -> f64 {
        match mode {
            TimelineMode::TransitionOnly => self.transition_duration,
            TimelineMode::FullSequence => {
                self.video_dur_a + self.transition_duration + self.video_dur_b
            }
        }
    }

    fn clamp_a(&self, time: f64) -> f64 {
        clamp_to_clip(time, self.video_dur_a, self.safety_margin)
    }

    fn clamp_b(&self, time: f64) -> f64 {
        clamp_to_clip(time, self.video_dur_b, self.safety_margin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineSample {
    pub transition_progress: f64,
    pub time_a: f64,
    pub time_b: f64,
    pub phase: Phase,
    pub total_duration: f64,
    pub current_time: f64,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn resolve_start(start: f64, duration: f64) -> f64 {
    if start < 0.0 {
        (duration + start).max(0.0)
    } else {
        start
    }
}

fn clamp_to_clip(time: f64, duration: f64, margin: f64) -> f64 {
    time.min(duration - margin).max(0.0)
}

fn normalize_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 1.0)
    }
}

pub fn resolve_transition_timeline(global_progress: f64, params: &TimelineParams) -> TimelineSample {
    let progress = normalize_progress(global_progress);
    let elapsed = progress * params.transition_duration;
    TimelineSample {
        transition_progress: progress,
        time_a: params.clamp_a(params.start_time_a() + elapsed),
        time_b: params.clamp_b(params.start_time_b() + elapsed),
        phase: Phase::Transition,
        total_duration: params.transition_duration,
        current_time: elapsed,
    }
}

pub fn resolve_full_timeline(global_progress: f64, params: &TimelineParams) -> TimelineSample {
    let progress = normalize_progress(global_progress);
    let total_duration = params.total_duration(TimelineMode::FullSequence);
    let current_time = progress * total_duration;
    let transition_start = params.video_dur_a;
    let transition_end = params.video_dur_a + params.transition_duration;

    if current_time < transition_start {
        return TimelineSample {
            transition_progress: 0.0,
            time_a: params.clamp_a(current_time),
            time_b: 0.0,
            phase: Phase::ClipA,
            total_duration,
            current_time,
        };
    }

    if current_time < transition_end {
        let transition_time = current_time - transition_start;
        let transition_progress =
            (transition_time / params.transition_duration).clamp(0.0, 1.0);
        // Clip A keeps "playing" past its end; the clamp pins it to the last safe frame.
        return TimelineSample {
            transition_progress,
            time_a: params.clamp_a(params.video_dur_a + transition_time),
            time_b: params.clamp_b(transition_time),
            phase: Phase::Transition,
            total_duration,
            current_time,
        };
    }

    let clip_b_time = current_time - transition_end;
    TimelineSample {
        transition_progress: 1.0,
        time_a: params.clamp_a(params.video_dur_a),
        time_b: params.clamp_b(params.transition_duration + clip_b_time),
        phase: Phase::ClipB,
        total_duration,
        current_time,
    }
}

pub fn resolve(mode: TimelineMode, global_progress: f64, params: &TimelineParams) -> TimelineSample {
    match mode {
        TimelineMode::TransitionOnly => resolve_transition_timeline(global_progress, params),
        TimelineMode::FullSequence => resolve_full_timeline(global_progress, params),
    }
}

pub fn full_timeline_frame_count(params: &TimelineParams, fps: f64) -> usize {
    frame_count(TimelineMode::FullSequence, params, fps)
}

pub fn frame_count(mode: TimelineMode, params: &TimelineParams, fps: f64) -> usize {
    if !(fps.is_finite() && fps > 0.0) {
        return 0;
    }
    (params.total_duration(mode) * fps).ceil() as usize
}

/// Normalized position of output frame `index` within `frame_count` frames.
///
/// A single-frame sequence maps to 0 instead of dividing by zero.
pub fn frame_progress(index: usize, frame_count: usize) -> f64 {
    let divisor = frame_count.saturating_sub(1).max(1);
    index as f64 / divisor as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(td: f64, a_start: f64, b_start: f64, dur_a: f64, dur_b: f64) -> TimelineParams {
        TimelineParams::new(td, a_start, b_start, dur_a, dur_b).expect("valid params")
    }

    #[test]
    fn transition_starts_at_clip_offsets() {
        let params = params(2.0, 1.5, 3.0, 10.0, 10.0);
        let start = resolve_transition_timeline(0.0, &params);
        assert_eq!(start.time_a, params.start_time_a());
        assert_eq!(start.time_b, 3.0);
        assert_eq!(start.phase, Phase::Transition);

        let end = resolve_transition_timeline(1.0, &params);
        assert!((end.time_a - (1.5 + 2.0)).abs() < 1e-9);
        assert!((end.time_b - 5.0).abs() < 1e-9);
        assert_eq!(end.transition_progress, 1.0);
    }

    #[test]
    fn transition_end_respects_safety_margin() {
        let params = params(2.0, 9.0, 0.0, 10.0, 10.0);
        let end = resolve_transition_timeline(1.0, &params);
        assert!((end.time_a - (10.0 - DEFAULT_SAFETY_MARGIN)).abs() < 1e-9);
    }

    #[test]
    fn negative_start_counts_back_from_end() {
        let params = params(2.0, -3.0, -20.0, 10.0, 10.0);
        assert_eq!(params.start_time_a(), 7.0);
        assert_eq!(params.start_time_b(), 0.0);
    }

    #[test]
    fn full_timeline_phase_boundaries() {
        let params = params(2.0, 0.0, 0.0, 10.0, 8.0);
        let total = 20.0;
        for step in 0..=200 {
            let progress = step as f64 / 200.0;
            let sample = resolve_full_timeline(progress, &params);
            assert_eq!(sample.total_duration, total);
            if sample.current_time < 10.0 {
                assert_eq!(sample.phase, Phase::ClipA);
                assert_eq!(sample.transition_progress, 0.0);
            } else if sample.current_time < 12.0 {
                assert_eq!(sample.phase, Phase::Transition);
                assert!((0.0..=1.0).contains(&sample.transition_progress));
            } else {
                assert_eq!(sample.phase, Phase::ClipB);
                assert_eq!(sample.transition_progress, 1.0);
            }
        }
    }

    #[test]
    fn full_timeline_clip_b_continues_from_transition() {
        let params = params(2.0, 0.0, 0.0, 10.0, 8.0);
        let in_transition = resolve_full_timeline(11.0 / 20.0, &params);
        assert!((in_transition.time_b - 1.0).abs() < 1e-9);
        assert!((in_transition.time_a - (10.0 - DEFAULT_SAFETY_MARGIN)).abs() < 1e-9);

        let in_clip_b = resolve_full_timeline(14.0 / 20.0, &params);
        assert!((in_clip_b.time_b - 4.0).abs() < 1e-9);
        assert!((in_clip_b.time_a - (10.0 - DEFAULT_SAFETY_MARGIN)).abs() < 1e-9);
    }

    #[test]
    fn resolving_is_repeatable() {
        let params = params(2.5, -1.0, 0.5, 6.0, 7.0);
        for mode in [TimelineMode::TransitionOnly, TimelineMode::FullSequence] {
            assert_eq!(resolve(mode, 0.37, &params), resolve(mode, 0.37, &params));
        }
    }

    #[test]
    fn transition_only_scenario() {
        let params = params(2.0, 0.0, 0.0, 5.0, 5.0);
        let frames = frame_count(TimelineMode::TransitionOnly, &params, 10.0);
        assert_eq!(frames, 20);

        let first = resolve_transition_timeline(frame_progress(0, frames), &params);
        assert_eq!(first.transition_progress, 0.0);
        assert_eq!(first.time_a, 0.0);
        assert_eq!(first.time_b, 0.0);

        let last = resolve_transition_timeline(frame_progress(19, frames), &params);
        assert!((last.transition_progress - 1.0).abs() < 1e-9);
        assert!((last.time_a - 1.96).abs() <= DEFAULT_SAFETY_MARGIN + 1e-9);
        assert!((last.time_b - 1.96).abs() <= DEFAULT_SAFETY_MARGIN + 1e-9);
    }

    #[test]
    fn full_frame_count_covers_both_clips() {
        let params = params(2.0, 0.0, 0.0, 10.0, 8.0);
        assert_eq!(full_timeline_frame_count(&params, 30.0), 600);
        assert_eq!(frame_count(TimelineMode::TransitionOnly, &params, 0.0), 0);
    }

    #[test]
    fn single_frame_progress_does_not_divide_by_zero() {
        assert_eq!(frame_progress(0, 1), 0.0);
        assert_eq!(frame_progress(0, 0), 0.0);
        assert_eq!(frame_progress(4, 5), 1.0);
    }

    #[test]
    fn rejects_invalid_durations() {
        assert_eq!(
            TimelineParams::new(0.0, 0.0, 0.0, 1.0, 1.0),
            Err(TimelineError::TransitionDuration(0.0))
        );
        assert!(matches!(
            TimelineParams::new(1.0, 0.0, 0.0, f64::NAN, 1.0),
            Err(TimelineError::ClipDuration { clip: 'A', .. })
        ));
    }
}
