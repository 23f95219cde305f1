use anyhow::{Result, anyhow, ensure};
use nokhwa::{Buffer, utils::FrameFormat};
use rayon::prelude::*;
use yuv::{
    YuvBiPlanarImage, YuvConversionMode, YuvPackedImage, YuvRange, YuvStandardMatrix,
    yuv_nv12_to_rgba, yuyv422_to_rgba,
};
use zune_jpeg::{
    JpegDecoder,
    zune_core::{bytestream::ZCursor, colorspace::ColorSpace, options::DecoderOptions},
};

use crate::types::Frame;

/// Byte order of uncompressed camera formats that map 1:1 onto RGBA pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Packed {
    Rgb,
    Bgr,
    Gray,
}

impl Packed {
    fn channels(self) -> usize {
        match self {
            Packed::Rgb | Packed::Bgr => 3,
            Packed::Gray => 1,
        }
    }
}

/// Normalises whatever the driver delivered into a tightly packed RGBA frame.
pub fn convert_camera_frame(buffer: &Buffer) -> Result<Frame> {
    let resolution = buffer.resolution();
    let (width, height) = (resolution.width_x, resolution.height_y);
    let data = buffer.buffer();

    match buffer.source_frame_format() {
        FrameFormat::MJPEG => decode_mjpeg(data),
        FrameFormat::NV12 => Ok(Frame::new(nv12_to_rgba(data, width, height)?, width, height)),
        FrameFormat::YUYV => Ok(Frame::new(yuyv_to_rgba(data, width, height)?, width, height)),
        FrameFormat::RAWRGB => expand_packed(data, width, height, Packed::Rgb),
        FrameFormat::RAWBGR => expand_packed(data, width, height, Packed::Bgr),
        FrameFormat::GRAY => expand_packed(data, width, height, Packed::Gray),
    }
}

fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

fn check_len(kind: &str, data: &[u8], expected: usize) -> Result<()> {
    ensure!(
        data.len() >= expected,
        "{kind} buffer too small: got {}, expected {expected}",
        data.len()
    );
    Ok(())
}

fn nv12_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let luma = pixel_count(width, height);
    let chroma = luma / 2;
    check_len("NV12", data, luma + chroma)?;

    let image = YuvBiPlanarImage {
        y_plane: &data[..luma],
        y_stride: width,
        uv_plane: &data[luma..luma + chroma],
        uv_stride: width,
        width,
        height,
    };

    let mut rgba = vec![0u8; luma * 4];
    yuv_nv12_to_rgba(
        &image,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
        YuvConversionMode::Balanced,
    )
    .map_err(|err| anyhow!("NV12 conversion failed: {err:?}"))?;
    Ok(rgba)
}

fn yuyv_to_rgba(data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    check_len("YUYV", data, pixel_count(width, height) * 2)?;

    let packed = YuvPackedImage {
        yuy: data,
        yuy_stride: width * 2,
        width,
        height,
    };

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    yuyv422_to_rgba(
        &packed,
        &mut rgba,
        width * 4,
        YuvRange::Full,
        YuvStandardMatrix::Bt709,
    )
    .map_err(|err| anyhow!("YUYV conversion failed: {err:?}"))?;
    Ok(rgba)
}

// Frame size comes from the JPEG header; some drivers report a stale resolution.
fn decode_mjpeg(data: &[u8]) -> Result<Frame> {
    let options = DecoderOptions::default().jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(ZCursor::new(data), options);
    let rgba = decoder
        .decode()
        .map_err(|err| anyhow!("MJPEG decode failed: {err:?}"))?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("MJPEG decoder returned no header"))?;

    let (width, height) = (u32::from(info.width), u32::from(info.height));
    check_len("MJPEG output", &rgba, pixel_count(width, height) * 4)?;
    Ok(Frame::new(rgba, width, height))
}

fn expand_packed(data: &[u8], width: u32, height: u32, layout: Packed) -> Result<Frame> {
    let channels = layout.channels();
    check_len(&format!("{layout:?}"), data, pixel_count(width, height) * channels)?;

    let mut rgba = vec![0u8; pixel_count(width, height) * 4];
    rgba.par_chunks_mut(4)
        .zip(data.par_chunks_exact(channels))
        .for_each(|(dst, src)| {
            let rgb = match layout {
                Packed::Rgb => [src[0], src[1], src[2]],
                Packed::Bgr => [src[2], src[1], src[0]],
                Packed::Gray => [src[0]; 3],
            };
            dst[..3].copy_from_slice(&rgb);
            dst[3] = 255;
        });

    Ok(Frame::new(rgba, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_is_swapped_into_rgba() {
        let frame = expand_packed(&[10, 20, 30, 40, 50, 60], 2, 1, Packed::Bgr).unwrap();
        assert_eq!(frame.rgba, vec![30, 20, 10, 255, 60, 50, 40, 255]);
        assert_eq!((frame.width, frame.height), (2, 1));
    }

    #[test]
    fn rgb_keeps_channel_order() {
        let frame = expand_packed(&[1, 2, 3], 1, 1, Packed::Rgb).unwrap();
        assert_eq!(frame.rgba, vec![1, 2, 3, 255]);
    }

    #[test]
    fn gray_expands_to_opaque_rgba() {
        let frame = expand_packed(&[7, 200], 2, 1, Packed::Gray).unwrap();
        assert_eq!(frame.rgba, vec![7, 7, 7, 255, 200, 200, 200, 255]);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(expand_packed(&[0u8; 5], 2, 1, Packed::Rgb).is_err());
        assert!(expand_packed(&[0u8; 3], 2, 2, Packed::Gray).is_err());
        assert!(yuyv_to_rgba(&[0u8; 7], 2, 2).is_err());
        assert!(nv12_to_rgba(&[0u8; 5], 2, 2).is_err());
    }

    #[test]
    fn garbage_mjpeg_fails_cleanly() {
        assert!(decode_mjpeg(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }
}
