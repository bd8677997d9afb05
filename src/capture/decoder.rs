use std::time::Instant;

use bytes::Bytes;

use super::frame::{DecodedFrame, FrameLayout, PixelFormat};
use crate::error::CameraError;

/// Copy a raw payload out into an owned interleaved RGB frame.
///
/// Only Mono8, BayerRG8, RGB8 and BGR8 are decoded; everything else is
/// `UnsupportedPixelFormat`.
pub fn decode_frame(
    payload: &[u8],
    width: u32,
    height: u32,
    format: &PixelFormat,
    sequence: u64,
) -> Result<DecodedFrame, CameraError> {
    let pixels = width as usize * height as usize;

    let rgb = match format {
        PixelFormat::Mono8 => gray_to_rgb(checked(payload, pixels)?),
        PixelFormat::BayerRG8 => demosaic_rggb(checked(payload, pixels)?, width as usize, height as usize),
        PixelFormat::Rgb8 => checked(payload, pixels * 3)?.to_vec(),
        PixelFormat::Bgr8 => swap_red_blue(checked(payload, pixels * 3)?),
        other => return Err(CameraError::UnsupportedPixelFormat(other.clone())),
    };

    Ok(DecodedFrame {
        width,
        height,
        layout: FrameLayout::Rgb8,
        data: Bytes::from(rgb),
        sequence,
        timestamp: Instant::now(),
    })
}

/// Bring any decoded frame to RGB. Frames already in RGB are returned as is.
pub fn normalize(frame: DecodedFrame) -> DecodedFrame {
    let data = match frame.layout {
        FrameLayout::Rgb8 => return frame,
        FrameLayout::Bgr8 => swap_red_blue(&frame.data),
        FrameLayout::Gray8 => gray_to_rgb(&frame.data),
    };
    DecodedFrame {
        layout: FrameLayout::Rgb8,
        data: Bytes::from(data),
        ..frame
    }
}

fn checked(payload: &[u8], expected: usize) -> Result<&[u8], CameraError> {
    payload
        .get(..expected)
        .ok_or(CameraError::PayloadTooShort {
            expected,
            actual: payload.len(),
        })
}

fn gray_to_rgb(gray: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(gray.len() * 3);
    for &v in gray {
        rgb.extend_from_slice(&[v, v, v]);
    }
    rgb
}

fn swap_red_blue(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

/// Colour sampled at (x, y) of an RGGB mosaic: 0 = R, 1 = G, 2 = B
fn rggb_channel(x: usize, y: usize) -> usize {
    match (y & 1, x & 1) {
        (0, 0) => 0,
        (1, 1) => 2,
        _ => 1,
    }
}

/// Bilinear demosaic: each missing channel is the mean of the same-colour
/// sites in the 3x3 neighbourhood.
fn demosaic_rggb(raw: &[u8], w: usize, h: usize) -> Vec<u8> {
    let mut rgb = vec![0u8; w * h * 3];

    for y in 0..h {
        for x in 0..w {
            let own = rggb_channel(x, y);
            let mut sum = [0u32; 3];
            let mut count = [0u32; 3];

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let c = rggb_channel(nx, ny);
                    if c == own && (nx, ny) != (x, y) {
                        continue;
                    }
                    sum[c] += raw[ny * w + nx] as u32;
                    count[c] += 1;
                }
            }

            let out = &mut rgb[(y * w + x) * 3..(y * w + x) * 3 + 3];
            for c in 0..3 {
                out[c] = if count[c] == 0 {
                    0
                } else {
                    ((sum[c] + count[c] / 2) / count[c]) as u8
                };
            }
        }
    }

    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mono8_expands_to_equal_channels() {
        let payload: Vec<u8> = (0..12).map(|v| v * 20).collect();
        let frame = decode_frame(&payload, 4, 3, &PixelFormat::Mono8, 7).unwrap();

        assert_eq!(frame.data.len(), 4 * 3 * 3);
        assert_eq!(frame.layout, FrameLayout::Rgb8);
        assert_eq!(frame.sequence, 7);
        for (i, px) in frame.data.chunks_exact(3).enumerate() {
            assert_eq!(px, [payload[i]; 3]);
        }
    }

    #[test]
    fn bgr8_is_reordered() {
        let frame = decode_frame(&[1, 2, 3, 4, 5, 6], 2, 1, &PixelFormat::Bgr8, 0).unwrap();
        assert_eq!(&frame.data[..], &[3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn rgb8_is_copied_verbatim() {
        let frame = decode_frame(&[1, 2, 3, 4, 5, 6, 99], 2, 1, &PixelFormat::Rgb8, 0).unwrap();
        assert_eq!(&frame.data[..], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn flat_bayer_field_demosaics_to_flat_colour() {
        let (w, h) = (6, 4);
        let colour = [200u8, 100, 50];
        let raw: Vec<u8> = (0..w * h)
            .map(|i| colour[rggb_channel(i % w, i / w)])
            .collect();

        let frame = decode_frame(&raw, w as u32, h as u32, &PixelFormat::BayerRG8, 0).unwrap();
        for px in frame.data.chunks_exact(3) {
            assert_eq!(px, colour);
        }
    }

    #[test]
    fn rggb_phase_and_borders_are_interpolated() {
        #[rustfmt::skip]
        let raw = [
            240,  10, 240, 100,
             20,  16,  30,  16,
            240,  40, 240, 100,
            100,  16, 100,  16,
        ];
        let frame = decode_frame(&raw, 4, 4, &PixelFormat::BayerRG8, 0).unwrap();
        let px = |x: usize, y: usize| &frame.data[(y * 4 + x) * 3..(y * 4 + x) * 3 + 3];

        // Top-left corner is red; green and blue come from its three neighbours
        assert_eq!(px(0, 0), [240, 15, 16]);
        // Interior blue site: red from the diagonals, green from the four edges
        assert_eq!(px(1, 1), [240, 25, 16]);
        // Bottom-right corner is blue
        assert_eq!(px(3, 3), [240, 100, 16]);
    }

    #[test]
    fn short_payload_is_rejected() {
        let err = decode_frame(&[0; 5], 4, 2, &PixelFormat::Mono8, 0).unwrap_err();
        assert!(matches!(err, CameraError::PayloadTooShort { expected: 8, actual: 5 }));
    }

    #[test]
    fn unknown_formats_are_unsupported() {
        let err = decode_frame(&[0; 16], 4, 2, &PixelFormat::Mono16, 0).unwrap_err();
        assert!(matches!(err, CameraError::UnsupportedPixelFormat(PixelFormat::Mono16)));
    }

    #[test]
    fn normalize_leaves_rgb_untouched_and_converts_the_rest() {
        let rgb = decode_frame(&[10, 20], 2, 1, &PixelFormat::Mono8, 0).unwrap();
        let again = normalize(rgb.clone());
        assert_eq!(again.data, rgb.data);

        let gray = DecodedFrame {
            layout: FrameLayout::Gray8,
            data: Bytes::from_static(&[10, 20]),
            ..rgb
        };
        let converted = normalize(gray);
        assert_eq!(converted.layout, FrameLayout::Rgb8);
        assert_eq!(&converted.data[..], &[10, 10, 10, 20, 20, 20]);
    }
}
