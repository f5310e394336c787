//! Pixel-format conversion between decoder layouts and interleaved RGB.
//!
//! Full-range BT.601 in both directions, shared by the Y4M reader/writer and
//! the V4L2 capture path.

use anyhow::{anyhow, Result};

#[cfg(any(feature = "ingest-v4l2", test))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PixelFormat {
    Rgb24,
    Nv12,
}

#[cfg(any(feature = "ingest-v4l2", test))]
pub(crate) fn normalize_to_rgb(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: PixelFormat,
) -> Result<Vec<u8>> {
    match format {
        PixelFormat::Rgb24 => {
            let expected = width
                .checked_mul(height)
                .and_then(|v| v.checked_mul(3))
                .ok_or_else(|| anyhow!("RGB frame dimensions overflow"))? as usize;
            if pixels.len() != expected {
                return Err(anyhow!(
                    "RGB frame length mismatch: expected {}, got {}",
                    expected,
                    pixels.len()
                ));
            }
            Ok(pixels.to_vec())
        }
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    }
}

#[cfg(any(feature = "ingest-v4l2", test))]
fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w
        .checked_mul(h)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    let expected = y_plane
        .checked_add(y_plane / 2)
        .ok_or_else(|| anyhow!("NV12 frame dimensions overflow"))?;
    if pixels.len() != expected {
        return Err(anyhow!(
            "NV12 frame length mismatch: expected {}, got {}",
            expected,
            pixels.len()
        ));
    }

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let px = yuv_to_rgb(pixels[j * w + i], pixels[uv_index], pixels[uv_index + 1]);
            let offset = (j * w + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&px);
        }
    }

    Ok(rgb)
}

/// Planar YUV with any integer chroma subsampling to interleaved RGB.
pub(crate) fn planar_yuv_to_rgb(
    y: &[u8],
    u: &[u8],
    v: &[u8],
    width: usize,
    height: usize,
) -> Result<Vec<u8>> {
    let luma = width * height;
    if y.len() != luma {
        return Err(anyhow!(
            "luma plane length mismatch: expected {}, got {}",
            luma,
            y.len()
        ));
    }
    if u.len() != v.len() || u.is_empty() {
        return Err(anyhow!(
            "chroma planes unusable: {} and {} bytes",
            u.len(),
            v.len()
        ));
    }
    let (cw, ch) = chroma_dims(width, height, u.len()).ok_or_else(|| {
        anyhow!(
            "unsupported chroma plane size {} for {}x{}",
            u.len(),
            width,
            height
        )
    })?;

    let mut rgb = vec![0u8; luma * 3];
    for j in 0..height {
        let cj = j * ch / height;
        for i in 0..width {
            let ci = i * cw / width;
            let c = cj * cw + ci;
            let px = yuv_to_rgb(y[j * width + i], u[c], v[c]);
            let offset = (j * width + i) * 3;
            rgb[offset..offset + 3].copy_from_slice(&px);
        }
    }
    Ok(rgb)
}

/// Chroma plane dimensions for 4:4:4, 4:2:2 or 4:2:0.
fn chroma_dims(width: usize, height: usize, len: usize) -> Option<(usize, usize)> {
    let half_w = width.div_ceil(2);
    let half_h = height.div_ceil(2);
    [(width, height), (half_w, height), (half_w, half_h)]
        .into_iter()
        .find(|(w, h)| w * h == len)
}

/// Interleaved RGB to full-resolution Y, U, V planes.
pub(crate) fn rgb_to_yuv444(rgb: &[u8]) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
    let n = rgb.len() / 3;
    let mut y = Vec::with_capacity(n);
    let mut u = Vec::with_capacity(n);
    let mut v = Vec::with_capacity(n);
    for px in rgb.chunks_exact(3) {
        let (r, g, b) = (px[0] as f32, px[1] as f32, px[2] as f32);
        y.push(clamp_to_u8(0.299 * r + 0.587 * g + 0.114 * b));
        u.push(clamp_to_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0));
        v.push(clamp_to_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0));
    }
    (y, u, v)
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let y = y as f32;
    let u = u as f32 - 128.0;
    let v = v as f32 - 128.0;

    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;
    [clamp_to_u8(r), clamp_to_u8(g), clamp_to_u8(b)]
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
