use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};
use settings::FrameFormat;
use thiserror::Error;

pub const JPEG_QUALITY: u8 = 90;

#[derive(Debug, Error)]
#[error("failed to encode {format:?} frame: {source}")]
pub struct EncodeError {
    pub format: FrameFormat,
    #[source]
    pub source: image::ImageError,
}

/// An encoded frame ready to hand to an uploader.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub index: usize,
    pub name: String,
    pub format: FrameFormat,
    pub bytes: Vec<u8>,
}

pub fn frame_file_name(index: usize, format: FrameFormat) -> String {
    format!("frame_{index:05}.{}", format.extension())
}

/// Encodes `image` as lossless WebP, PNG, or JPEG at [`JPEG_QUALITY`].
pub fn encode_image(image: &RgbaImage, format: FrameFormat) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = image.dimensions();
    let mut bytes = Cursor::new(Vec::new());
    let result = match format {
        FrameFormat::Webp => WebPEncoder::new_lossless(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        FrameFormat::Png => PngEncoder::new(&mut bytes).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        FrameFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
    };
    result.map_err(|source| EncodeError { format, source })?;
    Ok(bytes.into_inner())
}

pub fn encode_frame(
    index: usize,
    image: &RgbaImage,
    format: FrameFormat,
) -> Result<EncodedFrame, EncodeError> {
    Ok(EncodedFrame {
        index,
        name: frame_file_name(index, format),
        format,
        bytes: encode_image(image, format)?,
    })
}
