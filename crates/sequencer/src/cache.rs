//! Pre-extracted frame pairs covering a whole resolved timeline, so scrubbing
//! anywhere reads bitmaps instead of seeking.

use std::sync::Arc;
use std::time::Duration;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use renderer::TextureSlot;
use serde::Serialize;
use settings::{CacheConfig, TransitionSettings};
use timeline::{frame_count, frame_progress, resolve, TimelineMode, TimelineParams};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::media::MediaSource;
use crate::seek::{clamp_seek_time, seek_with_timeout, SeekOutcome};

/// Wait granted to a superseded build before the next one starts.
pub const CANCEL_GRACE: Duration = Duration::from_millis(100);

/// Seeks never target the last millisecond of a clip.
const SEEK_END_EPSILON: f64 = 0.001;

/// Tolerance when matching source durations against a request.
const DURATION_EPSILON: f64 = 1e-6;

/// The inputs a cache is built for. Any change means a rebuild.
///
/// The source durations stand in for the clips themselves: a build refuses
/// sources whose durations differ from the request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheRequest {
    pub transition_duration: f64,
    pub clip_a_start: f64,
    pub clip_b_start: f64,
    pub fps: f64,
    pub mode: TimelineMode,
    pub video_dur_a: f64,
    pub video_dur_b: f64,
}

impl CacheRequest {
    /// Covers the timeline `settings` resolve to, sampled at `fps`.
    pub fn from_settings(
        settings: &TransitionSettings,
        fps: f64,
        video_dur_a: f64,
        video_dur_b: f64,
    ) -> Self {
        Self {
            transition_duration: settings.duration,
            clip_a_start: settings.clip_a_start,
            clip_b_start: settings.clip_b_start,
            fps,
            mode: settings.timeline_mode(),
            video_dur_a,
            video_dur_b,
        }
    }

    fn matches_sources(&self, dur_a: f64, dur_b: f64) -> bool {
        (self.video_dur_a - dur_a).abs() <= DURATION_EPSILON
            && (self.video_dur_b - dur_b).abs() <= DURATION_EPSILON
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildOutcome {
    Complete { frames: usize },
    /// Stopped at the memory ceiling; what was cached stays usable.
    Truncated { frames: usize },
    Cancelled,
    Failed(String),
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            BuildOutcome::Complete { .. } | BuildOutcome::Truncated { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub is_building: bool,
    pub is_ready: bool,
    pub progress: f64,
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
}

/// One cached output frame.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    pub frame_a: Arc<RgbaImage>,
    pub frame_b: Arc<RgbaImage>,
    pub transition_progress: f64,
}

#[derive(Default)]
struct CacheState {
    frames_a: Vec<Arc<RgbaImage>>,
    frames_b: Vec<Arc<RgbaImage>>,
    progress: Vec<f64>,
    planned: usize,
    bytes: u64,
    building: bool,
    build_progress: f64,
    generation: u64,
    cancel: Option<CancellationToken>,
    request: Option<CacheRequest>,
}

impl CacheState {
    fn reset(&mut self) {
        self.frames_a.clear();
        self.frames_b.clear();
        self.progress.clear();
        self.planned = 0;
        self.bytes = 0;
        self.build_progress = 0.0;
        self.request = None;
    }
}

/// Index of the cached frame shown at `progress`: the nearest earlier frame,
/// clamped to the last one.
pub fn cache_index(progress: f64, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let progress = if progress.is_nan() { 0.0 } else { progress.max(0.0) };
    Some(((progress * len as f64).floor() as usize).min(len - 1))
}

/// Frame cache shared between the build task and its readers. Clones share
/// the same storage.
#[derive(Clone)]
pub struct FrameCache {
    config: CacheConfig,
    safety_margin: f64,
    grace: Duration,
    state: Arc<Mutex<CacheState>>,
}

impl FrameCache {
    pub fn new(config: CacheConfig, safety_margin: f64) -> Self {
        Self {
            config,
            safety_margin,
            grace: CANCEL_GRACE,
            state: Arc::new(Mutex::new(CacheState::default())),
        }
    }

    pub fn frame_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    /// Extracts every frame pair of the timeline described by `request`.
    ///
    /// Starting a build while another runs cancels the older one. Per-frame
    /// seeks are bounded by the configured timeout; a source whose duration
    /// disappears fails the build.
    pub async fn build<A, B>(
        &self,
        source_a: &mut A,
        source_b: &mut B,
        request: CacheRequest,
        mut on_progress: impl FnMut(f64),
    ) -> BuildOutcome
    where
        A: MediaSource,
        B: MediaSource,
    {
        let superseded = {
            let mut state = self.state.lock();
            if state.building {
                state.cancel.take()
            } else {
                None
            }
        };
        if let Some(previous) = superseded {
            debug!("cancelling in-flight cache build");
            previous.cancel();
            tokio::time::sleep(self.grace).await;
        }

        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(stale) = state.cancel.take() {
                stale.cancel();
            }
            state.generation += 1;
            state.reset();
            state.building = true;
            state.cancel = Some(cancel.clone());
            state.request = Some(request);
            state.generation
        };

        let outcome = self
            .run(source_a, source_b, &request, generation, &cancel, &mut on_progress)
            .await;

        let mut state = self.state.lock();
        if state.generation == generation {
            state.building = false;
            state.cancel = None;
            if !outcome.is_success() {
                state.reset();
            }
        }
        outcome
    }

    async fn run<A, B>(
        &self,
        source_a: &mut A,
        source_b: &mut B,
        request: &CacheRequest,
        generation: u64,
        cancel: &CancellationToken,
        on_progress: &mut impl FnMut(f64),
    ) -> BuildOutcome
    where
        A: MediaSource,
        B: MediaSource,
    {
        let (Some(dur_a), Some(dur_b)) = (
            usable_duration(source_a.duration()),
            usable_duration(source_b.duration()),
        ) else {
            warn!("cache build needs both source durations");
            return BuildOutcome::Failed("source duration unavailable".into());
        };
        if !request.matches_sources(dur_a, dur_b) {
            warn!(
                dur_a,
                dur_b,
                requested_a = request.video_dur_a,
                requested_b = request.video_dur_b,
                "sources do not match the cache request"
            );
            return BuildOutcome::Failed("sources do not match the cache request".into());
        }
        let params = match TimelineParams::new(
            request.transition_duration,
            request.clip_a_start,
            request.clip_b_start,
            dur_a,
            dur_b,
        ) {
            Ok(params) => params.with_safety_margin(self.safety_margin),
            Err(err) => return BuildOutcome::Failed(err.to_string()),
        };

        let total = frame_count(request.mode, &params, request.fps);
        if total == 0 {
            return BuildOutcome::Failed("timeline has no frames".into());
        }
        self.state.lock().planned = total;
        info!(
            frames = total,
            fps = request.fps,
            total_duration = params.total_duration(request.mode),
            "building frame cache"
        );

        let limit = self.config.memory_limit_bytes();
        for index in 0..total {
            if cancel.is_cancelled() {
                debug!(frame = index, "cache build cancelled");
                return BuildOutcome::Cancelled;
            }
            if usable_duration(source_a.duration()).is_none()
                || usable_duration(source_b.duration()).is_none()
            {
                warn!(frame = index, "source invalidated during cache build");
                return BuildOutcome::Failed("source invalidated during build".into());
            }

            let sample = resolve(request.mode, frame_progress(index, total), &params);
            let Some(frame_a) = self.extract(source_a, sample.time_a, cancel).await else {
                return BuildOutcome::Cancelled;
            };
            let Some(frame_b) = self.extract(source_b, sample.time_b, cancel).await else {
                return BuildOutcome::Cancelled;
            };

            let (usage, progress) = {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return BuildOutcome::Cancelled;
                }
                state.bytes += image_bytes(&frame_a) + image_bytes(&frame_b);
                state.frames_a.push(Arc::new(frame_a));
                state.frames_b.push(Arc::new(frame_b));
                state.progress.push(sample.transition_progress);
                state.build_progress = (index + 1) as f64 / total as f64;
                (state.bytes, state.build_progress)
            };

            if usage > limit {
                warn!(
                    frames = index + 1,
                    memory_mb = to_mb(usage),
                    limit_mb = to_mb(limit),
                    "frame cache memory limit reached; keeping partial cache"
                );
                return BuildOutcome::Truncated { frames: index + 1 };
            }
            on_progress(progress);
        }

        info!(frames = total, "frame cache complete");
        BuildOutcome::Complete { frames: total }
    }

    /// Seeks `media` to `time` and captures its frame at cache size. `None`
    /// only when cancelled.
    async fn extract<M: MediaSource>(
        &self,
        media: &mut M,
        time: f64,
        cancel: &CancellationToken,
    ) -> Option<RgbaImage> {
        let Some(duration) = usable_duration(media.duration()) else {
            return Some(self.blank());
        };
        let time = clamp_seek_time(time, duration, SEEK_END_EPSILON);
        match seek_with_timeout(media, time, self.config.seek_timeout, cancel).await {
            SeekOutcome::Cancelled => return None,
            SeekOutcome::Completed => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = tokio::time::sleep(self.config.settle) => {}
                }
            }
            SeekOutcome::TimedOut => debug!(time, "seek stalled; capturing current frame"),
            SeekOutcome::Failed(_) => {}
        }
        Some(match media.current_frame() {
            Some(frame) => self.fit(frame),
            None => self.blank(),
        })
    }

    fn fit(&self, frame: RgbaImage) -> RgbaImage {
        let (width, height) = self.frame_size();
        if frame.dimensions() == (width, height) {
            frame
        } else {
            image::imageops::resize(&frame, width, height, FilterType::Triangle)
        }
    }

    fn blank(&self) -> RgbaImage {
        let (width, height) = self.frame_size();
        RgbaImage::from_pixel(width, height, Rgba([0, 0, 0, 255]))
    }

    pub fn get_frame(&self, slot: TextureSlot, progress: f64) -> Option<Arc<RgbaImage>> {
        let state = self.state.lock();
        let frames = match slot {
            TextureSlot::A => &state.frames_a,
            TextureSlot::B => &state.frames_b,
        };
        cache_index(progress, frames.len()).map(|index| Arc::clone(&frames[index]))
    }

    pub fn get_frame_data(&self, progress: f64) -> Option<CachedFrame> {
        let state = self.state.lock();
        let len = state.frames_a.len().min(state.frames_b.len());
        let index = cache_index(progress, len)?;
        Some(CachedFrame {
            frame_a: Arc::clone(&state.frames_a[index]),
            frame_b: Arc::clone(&state.frames_b[index]),
            transition_progress: state.progress.get(index).copied().unwrap_or(0.0),
        })
    }

    pub fn is_ready(&self) -> bool {
        let state = self.state.lock();
        !state.building && !state.frames_a.is_empty() && !state.frames_b.is_empty()
    }

    pub fn is_building(&self) -> bool {
        self.state.lock().building
    }

    pub fn len(&self) -> usize {
        self.state.lock().frames_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frames the current or last build planned to extract.
    pub fn planned_frames(&self) -> usize {
        self.state.lock().planned
    }

    pub fn memory_usage_bytes(&self) -> u64 {
        self.state.lock().bytes
    }

    pub fn request(&self) -> Option<CacheRequest> {
        self.state.lock().request
    }

    /// True when the cache holds nothing built for `request`.
    pub fn needs_rebuild(&self, request: &CacheRequest) -> bool {
        let state = self.state.lock();
        state.request.as_ref() != Some(request)
            || (!state.building && state.frames_a.is_empty())
    }

    /// Drops every cached frame and cancels a running build.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        state.generation += 1;
        state.building = false;
        state.reset();
    }

    pub fn status(&self) -> CacheStatus {
        let state = self.state.lock();
        CacheStatus {
            is_building: state.building,
            is_ready: !state.building
                && !state.frames_a.is_empty()
                && !state.frames_b.is_empty(),
            progress: state.build_progress,
            memory_mb: to_mb(state.bytes),
        }
    }
}

fn usable_duration(duration: Option<f64>) -> Option<f64> {
    duration.filter(|value| value.is_finite() && *value > 0.0)
}

fn image_bytes(image: &RgbaImage) -> u64 {
    image.as_raw().len() as u64
}

fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeVideo;

    fn small_config() -> CacheConfig {
        CacheConfig {
            width: 16,
            height: 9,
            ..CacheConfig::default()
        }
    }

    fn request(fps: f64, mode: TimelineMode) -> CacheRequest {
        sized_request(fps, mode, 1.0)
    }

    fn sized_request(fps: f64, mode: TimelineMode, video_dur: f64) -> CacheRequest {
        CacheRequest {
            transition_duration: 0.5,
            clip_a_start: 0.0,
            clip_b_start: 0.0,
            fps,
            mode,
            video_dur_a: video_dur,
            video_dur_b: video_dur,
        }
    }

    #[test]
    fn index_is_nearest_earlier_frame() {
        assert_eq!(cache_index(0.0, 10), Some(0));
        assert_eq!(cache_index(0.55, 10), Some(5));
        assert_eq!(cache_index(1.0, 10), Some(9));
        assert_eq!(cache_index(-0.3, 10), Some(0));
        assert_eq!(cache_index(0.5, 0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn caches_the_full_timeline_in_order() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut a = FakeVideo::new(1.0);
        let mut b = FakeVideo::new(1.0);
        let mut reported = Vec::new();

        let outcome = cache
            .build(
                &mut a,
                &mut b,
                request(10.0, TimelineMode::FullSequence),
                |progress| reported.push(progress),
            )
            .await;

        assert_eq!(outcome, BuildOutcome::Complete { frames: 25 });
        assert!(cache.is_ready());
        assert_eq!(cache.len(), 25);
        assert_eq!(reported.len(), 25);
        assert!(reported.windows(2).all(|pair| pair[0] < pair[1]));

        let first = cache.get_frame_data(0.0).unwrap();
        assert_eq!(first.transition_progress, 0.0);
        assert_eq!(first.frame_a.dimensions(), (16, 9));
        let last = cache.get_frame_data(1.0).unwrap();
        assert_eq!(last.transition_progress, 1.0);

        let status = cache.status();
        assert!(status.is_ready && !status.is_building);
        assert_eq!(status.progress, 1.0);
        assert!(!cache.needs_rebuild(&request(10.0, TimelineMode::FullSequence)));
        assert!(cache.needs_rebuild(&request(12.0, TimelineMode::FullSequence)));
    }

    #[tokio::test(start_paused = true)]
    async fn memory_ceiling_truncates_but_stays_ready() {
        let config = CacheConfig {
            memory_limit_mb: 1,
            width: 256,
            height: 256,
            ..CacheConfig::default()
        };
        let pair_bytes = 2 * 256 * 256 * 4;
        let cache = FrameCache::new(config.clone(), 0.04);
        let mut a = FakeVideo::new(2.0);
        let mut b = FakeVideo::new(2.0);

        let outcome = cache
            .build(&mut a, &mut b, sized_request(30.0, TimelineMode::FullSequence, 2.0), |_| {})
            .await;

        assert_eq!(outcome, BuildOutcome::Truncated { frames: 3 });
        assert!(outcome.is_success());
        assert!(cache.is_ready());
        assert!(cache.memory_usage_bytes() <= config.memory_limit_bytes() + pair_bytes);
        assert!(cache.len() < cache.planned_frames());
    }

    #[tokio::test(start_paused = true)]
    async fn refuses_sources_other_than_requested() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut a = FakeVideo::new(3.0);
        let mut b = FakeVideo::new(1.0);

        let outcome = cache
            .build(&mut a, &mut b, request(10.0, TimelineMode::FullSequence), |_| {})
            .await;

        assert!(matches!(outcome, BuildOutcome::Failed(_)));
        assert!(cache.is_empty());
        assert_eq!(a.seek_count(), 0);
    }

    #[test]
    fn request_follows_settings_mode() {
        let transition_only = TransitionSettings::default();
        let request = CacheRequest::from_settings(&transition_only, 30.0, 4.0, 6.0);
        assert_eq!(request.mode, TimelineMode::TransitionOnly);
        assert_eq!(request.transition_duration, transition_only.duration);
        assert_eq!((request.video_dur_a, request.video_dur_b), (4.0, 6.0));

        let full = TransitionSettings {
            export_full_videos: true,
            ..TransitionSettings::default()
        };
        let request = CacheRequest::from_settings(&full, 30.0, 4.0, 6.0);
        assert_eq!(request.mode, TimelineMode::FullSequence);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_source_fails_and_clears() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut a = FakeVideo::new(1.0);
        a.vanish_after = Some(4);
        let mut b = FakeVideo::new(1.0);

        let outcome = cache
            .build(&mut a, &mut b, request(10.0, TimelineMode::TransitionOnly), |_| {})
            .await;

        assert!(matches!(outcome, BuildOutcome::Failed(_)));
        assert!(!cache.is_ready());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_seek_still_captures_a_frame() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut a = FakeVideo::new(1.0);
        a.stall_first = 1;
        let mut b = FakeVideo::new(1.0);

        let started = tokio::time::Instant::now();
        let outcome = cache
            .build(&mut a, &mut b, request(4.0, TimelineMode::TransitionOnly), |_| {})
            .await;

        assert_eq!(outcome, BuildOutcome::Complete { frames: 2 });
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn new_build_supersedes_running_one() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut slow_a = FakeVideo::new(1.0);
        slow_a.seek_delay = Duration::from_millis(200);
        let mut slow_b = slow_a.clone();
        let mut fast_a = FakeVideo::new(1.0);
        let mut fast_b = FakeVideo::new(1.0);

        let first = cache.build(
            &mut slow_a,
            &mut slow_b,
            request(10.0, TimelineMode::FullSequence),
            |_| {},
        );
        let second = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            cache
                .build(
                    &mut fast_a,
                    &mut fast_b,
                    request(10.0, TimelineMode::TransitionOnly),
                    |_| {},
                )
                .await
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, BuildOutcome::Cancelled);
        assert_eq!(second, BuildOutcome::Complete { frames: 5 });
        assert!(cache.is_ready());
        assert_eq!(cache.len(), 5);
        assert_eq!(
            cache.request().map(|request| request.mode),
            Some(TimelineMode::TransitionOnly)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_cancels_running_build() {
        let cache = FrameCache::new(small_config(), 0.04);
        let mut a = FakeVideo::new(1.0);
        a.seek_delay = Duration::from_millis(100);
        let mut b = a.clone();

        let build = cache.build(&mut a, &mut b, request(10.0, TimelineMode::FullSequence), |_| {});
        let clearer = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            cache.clear();
        };
        let (outcome, ()) = tokio::join!(build, clearer);

        assert_eq!(outcome, BuildOutcome::Cancelled);
        assert!(!cache.is_ready());
        assert!(!cache.is_building());
        assert_eq!(cache.memory_usage_bytes(), 0);
    }
}
