//! Interactive preview: one composited frame per timeline position.
//!
//! Frames come from a ready [`FrameCache`] when it was built for exactly the
//! driver's [`CacheRequest`], otherwise from the live sources after a bounded
//! seek. Both paths go through the same resolver and easing as the exporter.

use std::time::Duration;

use engines::{merge_uniforms, ShaderKey, ShaderRegistry, UniformMap};
use renderer::{ActiveProgram, Compositor, TextureSlot};
use settings::TransitionSettings;
use timeline::{resolve, EasingSelection, TimelineError, TimelineMode, TimelineParams, TimelineSample};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheRequest, FrameCache};
use crate::media::MediaSource;
use crate::seek::{seek_with_timeout, SeekOutcome};

/// Seek bound for live scrubbing.
pub const LIVE_SEEK_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewFrame {
    pub sample: TimelineSample,
    pub eased_progress: f64,
    pub from_cache: bool,
    /// False when no source frame was available to draw.
    pub drawn: bool,
}

#[derive(Debug, Clone)]
pub struct PreviewDriver {
    key: ShaderKey,
    mode: TimelineMode,
    params: TimelineParams,
    easing: EasingSelection,
    intensity: f32,
    uniforms: UniformMap,
    seek_timeout: Duration,
    cache_request: CacheRequest,
}

impl PreviewDriver {
    pub fn new(
        settings: &TransitionSettings,
        registry: &ShaderRegistry,
        video_dur_a: f64,
        video_dur_b: f64,
        safety_margin: f64,
    ) -> Result<Self, TimelineError> {
        let key = settings.shader_key();
        Ok(Self {
            params: settings.to_timeline_params(video_dur_a, video_dur_b, safety_margin)?,
            mode: settings.timeline_mode(),
            easing: settings.easing_selection(),
            intensity: settings.intensity as f32,
            uniforms: merge_uniforms(&registry.uniforms(&key), &settings.live_uniforms()),
            seek_timeout: LIVE_SEEK_TIMEOUT,
            cache_request: CacheRequest::from_settings(
                settings,
                f64::from(settings.fps),
                video_dur_a,
                video_dur_b,
            ),
            key,
        })
    }

    pub fn with_seek_timeout(mut self, timeout: Duration) -> Self {
        self.seek_timeout = timeout;
        self
    }

    /// Samples the preview cache at `fps` instead of the export rate.
    pub fn with_cache_fps(mut self, fps: f64) -> Self {
        self.cache_request.fps = fps;
        self
    }

    /// The cache this driver reads from; build [`FrameCache`] with it.
    pub fn cache_request(&self) -> CacheRequest {
        self.cache_request
    }

    pub fn key(&self) -> &ShaderKey {
        &self.key
    }

    pub fn mode(&self) -> TimelineMode {
        self.mode
    }

    pub fn params(&self) -> &TimelineParams {
        &self.params
    }

    pub fn sample(&self, position: f64) -> TimelineSample {
        resolve(self.mode, position, &self.params)
    }

    /// Selects the configured program on `compositor`.
    pub fn prepare<C: Compositor>(&self, compositor: &mut C, registry: &ShaderRegistry) -> ActiveProgram {
        let active = compositor.use_variant(registry, &self.key);
        if active == ActiveProgram::Fallback {
            warn!(shader = %self.key, "previewing with crossfade fallback");
        }
        active
    }

    fn draw<C: Compositor>(&self, compositor: &mut C, transition_progress: f64) -> (f64, bool) {
        let eased = self.easing.evaluate(transition_progress);
        let drawn = compositor.render(eased as f32, self.intensity, &self.uniforms);
        (eased, drawn)
    }

    /// Draws from `cache` when it is ready and was built for this driver's
    /// timeline and sources.
    pub fn render_cached<C: Compositor>(
        &self,
        compositor: &mut C,
        cache: &FrameCache,
        position: f64,
    ) -> Option<PreviewFrame> {
        if !cache.is_ready() || cache.needs_rebuild(&self.cache_request) {
            debug!(position, "preview cache stale or not ready");
            return None;
        }
        let frame = cache.get_frame_data(position)?;
        compositor.update_image(TextureSlot::A, &frame.frame_a);
        compositor.update_image(TextureSlot::B, &frame.frame_b);
        let (eased_progress, drawn) = self.draw(compositor, frame.transition_progress);
        Some(PreviewFrame {
            sample: self.sample(position),
            eased_progress,
            from_cache: true,
            drawn,
        })
    }

    /// Seeks both sources to `position` and draws whatever they show.
    pub async fn render_live<C, A, B>(
        &self,
        compositor: &mut C,
        source_a: &mut A,
        source_b: &mut B,
        position: f64,
        cancel: &CancellationToken,
    ) -> PreviewFrame
    where
        C: Compositor,
        A: MediaSource,
        B: MediaSource,
    {
        let sample = self.sample(position);
        let outcome_a = seek_with_timeout(source_a, sample.time_a, self.seek_timeout, cancel).await;
        let outcome_b = seek_with_timeout(source_b, sample.time_b, self.seek_timeout, cancel).await;
        if outcome_a.is_cancelled() || outcome_b.is_cancelled() {
            return PreviewFrame {
                sample,
                eased_progress: self.easing.evaluate(sample.transition_progress),
                from_cache: false,
                drawn: false,
            };
        }
        if outcome_a == SeekOutcome::TimedOut || outcome_b == SeekOutcome::TimedOut {
            debug!(position, "preview seek timed out; drawing current frames");
        }

        if let Some(frame) = source_a.current_frame() {
            compositor.update_image(TextureSlot::A, &frame);
        }
        if let Some(frame) = source_b.current_frame() {
            compositor.update_image(TextureSlot::B, &frame);
        }
        let (eased_progress, drawn) = self.draw(compositor, sample.transition_progress);
        PreviewFrame {
            sample,
            eased_progress,
            from_cache: false,
            drawn,
        }
    }

    /// Cached frame when possible, live otherwise.
    pub async fn render<C, A, B>(
        &self,
        compositor: &mut C,
        cache: &FrameCache,
        source_a: &mut A,
        source_b: &mut B,
        position: f64,
        cancel: &CancellationToken,
    ) -> PreviewFrame
    where
        C: Compositor,
        A: MediaSource,
        B: MediaSource,
    {
        if let Some(frame) = self.render_cached(compositor, cache, position) {
            return frame;
        }
        self.render_live(compositor, source_a, source_b, position, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use settings::CacheConfig;

    use super::*;
    use crate::testing::{CompositorLog, FakeCompositor, FakeVideo};

    fn settings(full: bool) -> TransitionSettings {
        TransitionSettings {
            duration: 0.5,
            fps: 10,
            export_full_videos: full,
            ..TransitionSettings::default()
        }
    }

    #[test]
    fn samples_through_the_resolver() {
        let registry = ShaderRegistry::with_builtin();
        let driver = PreviewDriver::new(&settings(false), &registry, 1.0, 1.0, 0.04).unwrap();
        let sample = driver.sample(0.5);
        assert_eq!(sample.transition_progress, 0.5);
        assert_eq!(sample.current_time, 0.25);
        assert_eq!(driver.mode(), TimelineMode::TransitionOnly);
    }

    #[tokio::test(start_paused = true)]
    async fn live_render_seeks_both_sources() {
        let registry = ShaderRegistry::with_builtin();
        let driver = PreviewDriver::new(&settings(false), &registry, 5.0, 5.0, 0.04).unwrap();
        let log = Arc::new(CompositorLog::default());
        let mut compositor = FakeCompositor::new(8, 8, Arc::clone(&log));
        assert_eq!(driver.prepare(&mut compositor, &registry), ActiveProgram::Requested);

        let mut a = FakeVideo::new(5.0);
        let mut b = FakeVideo::new(5.0);
        let cancel = CancellationToken::new();
        let frame = driver
            .render_live(&mut compositor, &mut a, &mut b, 1.0, &cancel)
            .await;

        assert!(frame.drawn);
        assert!(!frame.from_cache);
        assert_eq!(frame.eased_progress, 1.0);
        assert_eq!(a.position, 0.5);
        assert_eq!(b.position, 0.5);
        assert_eq!(
            log.uploads.lock().clone(),
            vec![(TextureSlot::A, 5), (TextureSlot::B, 5)]
        );
        assert_eq!(log.renders.lock().clone(), vec![1.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_live_render_draws_nothing() {
        let registry = ShaderRegistry::with_builtin();
        let driver = PreviewDriver::new(&settings(false), &registry, 5.0, 5.0, 0.04).unwrap();
        let log = Arc::new(CompositorLog::default());
        let mut compositor = FakeCompositor::new(8, 8, Arc::clone(&log));
        let mut a = FakeVideo::new(5.0);
        let mut b = FakeVideo::new(5.0);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let frame = driver
            .render_live(&mut compositor, &mut a, &mut b, 0.5, &cancel)
            .await;
        assert!(!frame.drawn);
        assert!(log.renders.lock().is_empty());
    }

    fn small_cache() -> FrameCache {
        let config = CacheConfig {
            width: 16,
            height: 9,
            ..CacheConfig::default()
        };
        FrameCache::new(config, 0.04)
    }

    #[tokio::test(start_paused = true)]
    async fn ready_cache_replaces_seeking() {
        let registry = ShaderRegistry::with_builtin();
        let cache = small_cache();
        let mut a = FakeVideo::new(1.0);
        let mut b = FakeVideo::new(1.0);
        let full = PreviewDriver::new(&settings(true), &registry, 1.0, 1.0, 0.04).unwrap();
        let built = cache.build(&mut a, &mut b, full.cache_request(), |_| {}).await;
        assert!(built.is_success());
        let seeks_a = a.seek_count();

        let log = Arc::new(CompositorLog::default());
        let mut compositor = FakeCompositor::new(16, 9, Arc::clone(&log));
        let cancel = CancellationToken::new();

        let frame = full
            .render(&mut compositor, &cache, &mut a, &mut b, 0.5, &cancel)
            .await;
        assert!(frame.from_cache);
        assert!(frame.drawn);
        assert_eq!(frame.eased_progress, 0.5);
        assert_eq!(a.seek_count(), seeks_a);

        let transition_only =
            PreviewDriver::new(&settings(false), &registry, 1.0, 1.0, 0.04).unwrap();
        let frame = transition_only
            .render(&mut compositor, &cache, &mut a, &mut b, 0.5, &cancel)
            .await;
        assert!(!frame.from_cache);
        assert_eq!(a.seek_count(), seeks_a + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn default_settings_hit_their_own_cache() {
        let registry = ShaderRegistry::with_builtin();
        let cache = small_cache();
        let mut a = FakeVideo::new(5.0);
        let mut b = FakeVideo::new(5.0);
        let defaults = TransitionSettings::default();
        let request = CacheRequest::from_settings(&defaults, 30.0, 5.0, 5.0);
        assert!(cache.build(&mut a, &mut b, request, |_| {}).await.is_success());
        let seeks_a = a.seek_count();

        let driver = PreviewDriver::new(&defaults, &registry, 5.0, 5.0, 0.04)
            .unwrap()
            .with_cache_fps(30.0);
        assert_eq!(driver.cache_request(), request);

        let log = Arc::new(CompositorLog::default());
        let mut compositor = FakeCompositor::new(16, 9, Arc::clone(&log));
        let cancel = CancellationToken::new();
        let frame = driver
            .render(&mut compositor, &cache, &mut a, &mut b, 0.3, &cancel)
            .await;
        assert!(frame.from_cache);
        assert_eq!(a.seek_count(), seeks_a);
    }

    #[tokio::test(start_paused = true)]
    async fn cache_for_another_timeline_is_not_used() {
        let registry = ShaderRegistry::with_builtin();
        let cache = small_cache();
        let mut a = FakeVideo::new(1.0);
        let mut b = FakeVideo::new(1.0);
        let built_for = PreviewDriver::new(&settings(true), &registry, 1.0, 1.0, 0.04).unwrap();
        let built = cache.build(&mut a, &mut b, built_for.cache_request(), |_| {}).await;
        assert!(built.is_success());

        let log = Arc::new(CompositorLog::default());
        let mut compositor = FakeCompositor::new(16, 9, Arc::clone(&log));
        let cancel = CancellationToken::new();

        let longer = TransitionSettings {
            duration: 4.0,
            clip_a_start: -0.5,
            ..settings(true)
        };
        let driver = PreviewDriver::new(&longer, &registry, 1.0, 1.0, 0.04).unwrap();
        let frame = driver
            .render(&mut compositor, &cache, &mut a, &mut b, 0.3, &cancel)
            .await;
        assert!(!frame.from_cache);
        let expected = driver.sample(0.3).transition_progress;
        assert!((expected - 0.2).abs() < 1e-9);
        assert_eq!(frame.eased_progress, expected);

        let other_clips = PreviewDriver::new(&settings(true), &registry, 2.0, 1.0, 0.04).unwrap();
        assert!(other_clips
            .render_cached(&mut compositor, &cache, 0.3)
            .is_none());
        assert!(built_for.render_cached(&mut compositor, &cache, 0.3).is_some());
    }
}
