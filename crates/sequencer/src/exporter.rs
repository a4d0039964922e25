//! Offline export of every frame of a transition.
//!
//! The exporter seeks private duplicates of both sources so the interactive
//! preview never moves, renders through its own compositor, encodes each
//! frame on the blocking pool and hands it to a [`FrameUploader`]. At most
//! `upload_concurrency` uploads run at once; results land in the slot of
//! their frame index whatever order they finish in.

use std::sync::Arc;

use engines::{merge_uniforms, ShaderRegistry};
use parking_lot::Mutex;
use renderer::{ActiveProgram, Compositor, TextureSlot};
use serde::Serialize;
use settings::{ExportConfig, FrameRef, TransitionSettings};
use thiserror::Error;
use timeline::{frame_count, frame_progress, resolve, TimelineError};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::encode::encode_frame;
use crate::media::{MediaError, MediaSource, FALLBACK_DURATION};
use crate::seek::{clamp_seek_time, seek_with_retry, RetryPolicy};
use crate::upload::{FrameUploader, UploadError};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("no usable source media: {0}")]
    Sources(#[source] MediaError),
    #[error("no GPU adapter available for a {width}x{height} export")]
    RendererUnavailable { width: u32, height: u32 },
    #[error(transparent)]
    Timeline(#[from] TimelineError),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStatus {
    pub is_exporting: bool,
    pub progress: f64,
    pub frame_count: usize,
}

#[derive(Default)]
struct ExportState {
    exporting: bool,
    progress: f64,
    frame_count: usize,
    frames: Vec<FrameRef>,
    generation: u64,
    cancel: Option<CancellationToken>,
}

/// Cheap handle for watching or aborting an export from another task.
#[derive(Clone)]
pub struct ExportHandle {
    state: Arc<Mutex<ExportState>>,
}

impl ExportHandle {
    pub fn status(&self) -> ExportStatus {
        let state = self.state.lock();
        ExportStatus {
            is_exporting: state.exporting,
            progress: state.progress,
            frame_count: state.frame_count,
        }
    }

    /// Stops producing frames. Uploads already issued still finish.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        if let Some(cancel) = state.cancel.as_ref() {
            cancel.cancel();
        }
        state.exporting = false;
    }

    /// Aborts and forgets the last result.
    pub fn clear(&self) {
        self.abort();
        let mut state = self.state.lock();
        state.frames.clear();
        state.progress = 0.0;
        state.frame_count = 0;
    }

    pub fn frames(&self) -> Vec<FrameRef> {
        self.state.lock().frames.clone()
    }
}

/// Everything one export run owns. Dropping it releases the duplicates and
/// the compositor on every exit path.
struct ExportResources<A: MediaSource, B: MediaSource, C: Compositor> {
    clone_a: Option<A>,
    clone_b: Option<B>,
    compositor: Option<C>,
    state: Arc<Mutex<ExportState>>,
    generation: u64,
}

impl<A: MediaSource, B: MediaSource, C: Compositor> Drop for ExportResources<A, B, C> {
    fn drop(&mut self) {
        if let Some(mut clone) = self.clone_a.take() {
            clone.release();
        }
        if let Some(mut clone) = self.clone_b.take() {
            clone.release();
        }
        if let Some(mut compositor) = self.compositor.take() {
            compositor.dispose();
        }
        let mut state = self.state.lock();
        if state.generation == self.generation {
            state.exporting = false;
            state.cancel = None;
        }
        debug!("export resources released");
    }
}

type UploadResult = Result<(usize, Option<Result<FrameRef, UploadError>>), JoinError>;

pub struct FrameExporter<U, F> {
    config: ExportConfig,
    safety_margin: f64,
    uploader: Arc<U>,
    make_compositor: F,
    state: Arc<Mutex<ExportState>>,
}

impl<U, F, C> FrameExporter<U, F>
where
    U: FrameUploader,
    F: Fn(u32, u32) -> C,
    C: Compositor,
{
    /// `make_compositor` builds the dedicated compositor for each run at the
    /// requested output size.
    pub fn new(config: ExportConfig, safety_margin: f64, uploader: U, make_compositor: F) -> Self {
        Self {
            config,
            safety_margin,
            uploader: Arc::new(uploader),
            make_compositor,
            state: Arc::new(Mutex::new(ExportState::default())),
        }
    }

    pub fn handle(&self) -> ExportHandle {
        ExportHandle {
            state: Arc::clone(&self.state),
        }
    }

    pub fn status(&self) -> ExportStatus {
        self.handle().status()
    }

    pub fn abort(&self) {
        self.handle().abort();
    }

    pub fn clear(&self) {
        self.handle().clear();
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: self.config.seek_timeout,
            retries: self.config.seek_retries,
            backoff: self.config.retry_backoff,
        }
    }

    /// Renders and uploads every frame of the timeline `settings` describe.
    ///
    /// Returns the uploaded references in frame order. Frames whose upload
    /// failed are missing; an abort returns whatever finished before it.
    #[allow(clippy::too_many_arguments)]
    pub async fn export_all_frames<A, B>(
        &self,
        source_a: &A,
        source_b: &B,
        settings: &TransitionSettings,
        registry: &ShaderRegistry,
        width: u32,
        height: u32,
        mut on_progress: impl FnMut(f64),
    ) -> Result<Vec<FrameRef>, ExportError>
    where
        A: MediaSource,
        B: MediaSource,
    {
        let cancel = CancellationToken::new();
        let generation = {
            let mut state = self.state.lock();
            if let Some(previous) = state.cancel.replace(cancel.clone()) {
                debug!("superseding running export");
                previous.cancel();
            }
            state.generation += 1;
            state.exporting = true;
            state.progress = 0.0;
            state.frame_count = 0;
            state.frames.clear();
            state.generation
        };
        let mut resources: ExportResources<A, B, C> = ExportResources {
            clone_a: None,
            clone_b: None,
            compositor: None,
            state: Arc::clone(&self.state),
            generation,
        };

        let (clone_a, clone_b) = match (source_a.duplicate(), source_b.duplicate()) {
            (Err(err), Err(_)) => return Err(ExportError::Sources(err)),
            (a, b) => (
                a.map_err(|err| warn!(error = %err, "clip A unavailable for export"))
                    .ok(),
                b.map_err(|err| warn!(error = %err, "clip B unavailable for export"))
                    .ok(),
            ),
        };
        resources.clone_a = clone_a;
        resources.clone_b = clone_b;

        let timeout = self.config.clone_timeout;
        futures::future::join(
            wait_ready_bounded(resources.clone_a.as_mut(), timeout, 'A'),
            wait_ready_bounded(resources.clone_b.as_mut(), timeout, 'B'),
        )
        .await;
        if cancel.is_cancelled() {
            return Ok(Vec::new());
        }

        let dur_a = clip_duration(resources.clone_a.as_ref());
        let dur_b = clip_duration(resources.clone_b.as_ref());
        let fps = settings.effective_fps(&[
            resources.clone_a.as_ref().and_then(MediaSource::frame_rate),
            resources.clone_b.as_ref().and_then(MediaSource::frame_rate),
        ]);
        let params = settings.to_timeline_params(dur_a, dur_b, self.safety_margin)?;
        let mode = settings.timeline_mode();
        let total = frame_count(mode, &params, fps);

        let mut compositor = (self.make_compositor)(width, height);
        if !compositor.is_supported() {
            compositor.dispose();
            return Err(ExportError::RendererUnavailable { width, height });
        }
        let key = settings.shader_key();
        if compositor.use_variant(registry, &key) == ActiveProgram::Fallback {
            warn!(shader = %key, "exporting with crossfade fallback");
        }
        resources.compositor = Some(compositor);

        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.frame_count = total;
            }
        }
        info!(
            frames = total,
            fps,
            ?mode,
            width,
            height,
            shader = %key,
            "exporting frames"
        );

        let uniforms = merge_uniforms(&registry.uniforms(&key), &settings.live_uniforms());
        let easing = settings.easing_selection();
        let intensity = settings.intensity as f32;
        let policy = self.retry_policy();
        let format = self.config.format;
        let limit = self.config.upload_concurrency.max(1);

        let mut slots: Vec<Option<FrameRef>> = vec![None; total];
        let mut uploads = JoinSet::new();
        let mut uploaded = 0usize;

        for index in 0..total {
            if cancel.is_cancelled() {
                break;
            }
            let sample = resolve(mode, frame_progress(index, total), &params);

            if let Some(clone) = resources.clone_a.as_mut() {
                let time = clamp_seek_time(sample.time_a, dur_a, 0.0);
                if seek_with_retry(clone, time, policy, &cancel).await.is_cancelled() {
                    break;
                }
            }
            if let Some(clone) = resources.clone_b.as_mut() {
                let time = clamp_seek_time(sample.time_b, dur_b, 0.0);
                if seek_with_retry(clone, time, policy, &cancel).await.is_cancelled() {
                    break;
                }
            }

            let frame_a = resources.clone_a.as_ref().and_then(MediaSource::current_frame);
            let frame_b = resources.clone_b.as_ref().and_then(MediaSource::current_frame);
            let Some(compositor) = resources.compositor.as_mut() else {
                break;
            };
            if let Some(frame) = &frame_a {
                compositor.update_image(TextureSlot::A, frame);
            }
            if let Some(frame) = &frame_b {
                compositor.update_image(TextureSlot::B, frame);
            }

            let eased = easing.evaluate(sample.transition_progress);
            compositor.pin_time(Some(sample.current_time as f32));
            if !compositor.render(eased as f32, intensity, &uniforms) {
                warn!(frame = index, "no source frame to render; skipping");
                continue;
            }
            let pixels = match compositor.read_pixels() {
                Ok(pixels) => pixels,
                Err(err) => {
                    warn!(frame = index, error = %err, "failed to read rendered frame");
                    continue;
                }
            };
            let encoded =
                match tokio::task::spawn_blocking(move || encode_frame(index, &pixels, format))
                    .await
                {
                    Ok(Ok(encoded)) => encoded,
                    Ok(Err(err)) => {
                        warn!(frame = index, error = %err, "failed to encode frame");
                        continue;
                    }
                    Err(err) => {
                        warn!(frame = index, error = %err, "encode task failed");
                        continue;
                    }
                };
            if cancel.is_cancelled() {
                break;
            }

            while uploads.len() >= limit {
                let Some(result) = uploads.join_next().await else {
                    break;
                };
                self.record(result, &mut slots, &mut uploaded, generation, &mut on_progress);
            }

            let uploader = Arc::clone(&self.uploader);
            let token = cancel.clone();
            uploads.spawn(async move {
                if token.is_cancelled() {
                    return (index, None);
                }
                (index, Some(uploader.upload(encoded).await))
            });
        }

        while let Some(result) = uploads.join_next().await {
            self.record(result, &mut slots, &mut uploaded, generation, &mut on_progress);
        }

        let frames: Vec<FrameRef> = slots.into_iter().flatten().collect();
        if cancel.is_cancelled() {
            info!(exported = frames.len(), planned = total, "export aborted");
        } else {
            info!(exported = frames.len(), planned = total, "export finished");
        }
        {
            let mut state = self.state.lock();
            if state.generation == generation {
                state.frames = frames.clone();
            }
        }
        Ok(frames)
    }

    fn record(
        &self,
        result: UploadResult,
        slots: &mut [Option<FrameRef>],
        uploaded: &mut usize,
        generation: u64,
        on_progress: &mut impl FnMut(f64),
    ) {
        match result {
            Ok((index, Some(Ok(reference)))) => {
                slots[index] = Some(reference);
                *uploaded += 1;
                let progress = *uploaded as f64 / slots.len() as f64;
                {
                    let mut state = self.state.lock();
                    if state.generation == generation {
                        state.progress = progress;
                    }
                }
                on_progress(progress);
            }
            Ok((index, Some(Err(err)))) => {
                warn!(frame = index, error = %err, "frame upload failed");
            }
            Ok((index, None)) => debug!(frame = index, "upload skipped after abort"),
            Err(err) => warn!(error = %err, "upload task failed"),
        }
    }
}

async fn wait_ready_bounded<M: MediaSource>(
    media: Option<&mut M>,
    timeout: std::time::Duration,
    label: char,
) {
    let Some(media) = media else {
        return;
    };
    if tokio::time::timeout(timeout, media.wait_ready()).await.is_err() {
        warn!(clip = %label, "timed out waiting for clip metadata; proceeding anyway");
    }
}

fn clip_duration<M: MediaSource>(media: Option<&M>) -> f64 {
    media
        .and_then(MediaSource::duration)
        .filter(|duration| duration.is_finite() && *duration > 0.0)
        .unwrap_or(FALLBACK_DURATION)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use settings::FrameFormat;

    use super::*;
    use crate::encode::EncodedFrame;
    use crate::testing::{CompositorLog, FakeCompositor, FakeVideo};

    fn compositor_factory(
        log: Arc<CompositorLog>,
        supported: bool,
    ) -> impl Fn(u32, u32) -> FakeCompositor {
        move |width, height| {
            let mut compositor = FakeCompositor::new(width, height, Arc::clone(&log));
            compositor.supported = supported;
            compositor
        }
    }

    /// Finishes later frames first and fails the indices in `fail`.
    #[derive(Default)]
    struct FakeUploader {
        fail: HashSet<usize>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay_base: u64,
    }

    impl FrameUploader for FakeUploader {
        async fn upload(&self, frame: EncodedFrame) -> Result<FrameRef, UploadError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = self.delay_base.saturating_sub(frame.index as u64 * 5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.fail.contains(&frame.index) {
                return Err(UploadError::Endpoint(format!("rejected {}", frame.name)));
            }
            Ok(FrameRef::new(frame.name, "blendpack_export", "temp"))
        }
    }

    fn export_config() -> ExportConfig {
        ExportConfig {
            format: FrameFormat::Png,
            ..ExportConfig::default()
        }
    }

    fn transition_settings() -> TransitionSettings {
        TransitionSettings {
            duration: 2.0,
            fps: 10,
            ..TransitionSettings::default()
        }
    }

    fn names(frames: &[FrameRef]) -> Vec<String> {
        frames.iter().map(|frame| frame.name.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn exports_transition_frames_in_order() {
        let log = Arc::new(CompositorLog::default());
        let uploader = FakeUploader {
            delay_base: 200,
            ..FakeUploader::default()
        };
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            uploader,
            compositor_factory(Arc::clone(&log), true),
        );
        let source_a = FakeVideo::new(5.0);
        let source_b = FakeVideo::new(5.0);
        let registry = ShaderRegistry::with_builtin();

        let frames = exporter
            .export_all_frames(
                &source_a,
                &source_b,
                &transition_settings(),
                &registry,
                32,
                18,
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(frames.len(), 20);
        let expected: Vec<String> = (0..20).map(|i| format!("frame_{i:05}.png")).collect();
        assert_eq!(names(&frames), expected);

        let renders = log.renders.lock().clone();
        assert_eq!(renders.len(), 20);
        assert_eq!(renders[0], 0.0);
        assert_eq!(renders[19], 1.0);
        assert!(log.times.lock().windows(2).all(|pair| pair[0] <= pair[1]));

        assert!(exporter.handle().status().frame_count == 20);
        assert!(!exporter.status().is_exporting);
        assert_eq!(exporter.status().progress, 1.0);
        assert_eq!(log.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(source_a.released.load(Ordering::SeqCst), 1);
        assert_eq!(source_b.released.load(Ordering::SeqCst), 1);
        assert_eq!(source_a.seek_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn caps_concurrent_uploads_and_keeps_slots() {
        let log = Arc::new(CompositorLog::default());
        let uploader = FakeUploader {
            delay_base: 100,
            fail: HashSet::from([3]),
            ..FakeUploader::default()
        };
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            uploader,
            compositor_factory(Arc::clone(&log), true),
        );
        let source = FakeVideo::new(5.0);
        let registry = ShaderRegistry::with_builtin();
        let mut reported = Vec::new();

        let frames = exporter
            .export_all_frames(
                &source,
                &source,
                &transition_settings(),
                &registry,
                8,
                8,
                |progress| reported.push(progress),
            )
            .await
            .unwrap();

        assert_eq!(frames.len(), 19);
        assert!(!names(&frames).contains(&"frame_00003.png".to_string()));
        let mut sorted = names(&frames);
        sorted.sort();
        assert_eq!(names(&frames), sorted);
        assert!(exporter.uploader.peak.load(Ordering::SeqCst) <= 4);
        assert!(exporter.uploader.peak.load(Ordering::SeqCst) > 1);
        assert!(reported.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_stops_new_frames_and_releases_everything() {
        let log = Arc::new(CompositorLog::default());
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            FakeUploader::default(),
            compositor_factory(Arc::clone(&log), true),
        );
        let handle = exporter.handle();
        let source_a = FakeVideo::new(5.0);
        let source_b = FakeVideo::new(5.0);
        let registry = ShaderRegistry::with_builtin();

        let frames = exporter
            .export_all_frames(
                &source_a,
                &source_b,
                &transition_settings(),
                &registry,
                8,
                8,
                |progress| {
                    if progress >= 0.25 {
                        handle.abort();
                        handle.abort();
                    }
                },
            )
            .await
            .unwrap();

        assert!(!frames.is_empty());
        assert!(frames.len() < 20);
        let mut sorted = names(&frames);
        sorted.sort();
        assert_eq!(names(&frames), sorted);
        assert!(log.renders.lock().len() < 20);
        assert!(!exporter.status().is_exporting);
        assert_eq!(log.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(source_a.released.load(Ordering::SeqCst), 1);

        exporter.clear();
        assert_eq!(exporter.status().frame_count, 0);
        assert!(exporter.handle().frames().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_sequence_uses_source_rate() {
        let log = Arc::new(CompositorLog::default());
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            FakeUploader::default(),
            compositor_factory(Arc::clone(&log), true),
        );
        let mut source = FakeVideo::new(1.0);
        source.fps = Some(4.0);
        let settings = TransitionSettings {
            duration: 0.5,
            export_full_videos: true,
            use_source_fps: true,
            ..TransitionSettings::default()
        };
        let registry = ShaderRegistry::with_builtin();

        let frames = exporter
            .export_all_frames(&source, &source, &settings, &registry, 8, 8, |_| {})
            .await
            .unwrap();

        assert_eq!(frames.len(), 10);
        let renders = log.renders.lock().clone();
        assert_eq!(renders.first(), Some(&0.0));
        assert_eq!(renders.last(), Some(&1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_seeks_are_retried() {
        let log = Arc::new(CompositorLog::default());
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            FakeUploader::default(),
            compositor_factory(Arc::clone(&log), true),
        );
        let mut source_a = FakeVideo::new(5.0);
        source_a.stall_first = 2;
        let source_b = FakeVideo::new(5.0);
        let registry = ShaderRegistry::with_builtin();

        let started = tokio::time::Instant::now();
        let frames = exporter
            .export_all_frames(
                &source_a,
                &source_b,
                &transition_settings(),
                &registry,
                8,
                8,
                |_| {},
            )
            .await
            .unwrap();

        assert_eq!(frames.len(), 20);
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn unsupported_renderer_fails_and_releases_clones() {
        let log = Arc::new(CompositorLog::default());
        let exporter = FrameExporter::new(
            export_config(),
            0.04,
            FakeUploader::default(),
            compositor_factory(Arc::clone(&log), false),
        );
        let source = FakeVideo::new(5.0);
        let registry = ShaderRegistry::with_builtin();

        let err = exporter
            .export_all_frames(
                &source,
                &source,
                &transition_settings(),
                &registry,
                8,
                8,
                |_| {},
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::RendererUnavailable { .. }));
        assert_eq!(source.released.load(Ordering::SeqCst), 2);
        assert!(!exporter.status().is_exporting);
    }

    #[test]
    fn status_serializes_with_host_field_names() {
        let status = ExportStatus {
            is_exporting: true,
            progress: 0.5,
            frame_count: 60,
        };
        assert_eq!(
            serde_json::to_value(status).unwrap(),
            serde_json::json!({"isExporting": true, "progress": 0.5, "frameCount": 60})
        );
    }
}
