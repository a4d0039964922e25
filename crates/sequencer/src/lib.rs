//! Frame pipelines built on the timeline resolver and the renderer.
//!
//! ```text
//!   MediaSource A ─┐                      ┌─> FrameCache (scrubbing)
//!                  ├─ seek ─ resolve(p) ──┼─> PreviewDriver ─> Compositor
//!   MediaSource B ─┘                      └─> FrameExporter ─> encode ─> FrameUploader
//! ```
//!
//! * [`media`] is the seam to whatever decodes pixels.
//! * [`seek`] bounds and retries seeks that may never complete.
//! * [`cache`] pre-extracts frame pairs under a memory ceiling.
//! * [`exporter`] renders, encodes and uploads every frame of a transition.
//! * [`preview`] draws single frames for interactive scrubbing.

pub mod cache;
pub mod encode;
pub mod exporter;
pub mod media;
pub mod preview;
pub mod seek;
pub mod upload;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{cache_index, BuildOutcome, CacheRequest, CacheStatus, CachedFrame, FrameCache};
pub use encode::{encode_frame, encode_image, frame_file_name, EncodeError, EncodedFrame};
pub use exporter::{ExportError, ExportHandle, ExportStatus, FrameExporter};
pub use media::{decode_rgba, ImageSequence, MediaError, MediaSource, StillImage, FALLBACK_DURATION};
pub use preview::{PreviewDriver, PreviewFrame};
pub use seek::{clamp_seek_time, seek_with_retry, seek_with_timeout, RetryPolicy, SeekOutcome};
pub use upload::{DirectoryUploader, FrameUploader, HttpUploader, UploadError, FRAME_TYPE};
