//! Channel extraction from interleaved frames.
//!
//! Frames are row-major with the channel varying fastest: sample
//! `(row, col, ch)` lives at `(row * width + col) * channels + ch`.

use crate::{Error, Result};
use rayon::prelude::*;

/// Planes with at least this many pixels are split across the rayon pool.
const PARALLEL_MIN_PIXELS: usize = 1 << 20;
const PARALLEL_CHUNK: usize = 1 << 16;

/// Copies channel `channel` of `src` into `dst`, so `dst[p] = src[p * channels + channel]`.
///
/// `dst.len()` decides how many pixels are extracted. Nothing is allocated.
///
/// # Errors
/// Returns [`Error::InvalidChannel`] if `channel >= channels`, and
/// [`Error::MissingPixelData`] if `src` is empty or too short for `dst`.
pub fn deinterleave(src: &[u16], channels: usize, channel: usize, dst: &mut [u16]) -> Result<()> {
    if channel >= channels {
        return Err(Error::InvalidChannel { channel, channels });
    }
    let needed = dst.len() * channels;
    if src.is_empty() || src.len() < needed {
        return Err(Error::MissingPixelData {
            needed,
            available: src.len(),
        });
    }

    if channels == 1 {
        dst.copy_from_slice(&src[..dst.len()]);
        return Ok(());
    }

    if dst.len() >= PARALLEL_MIN_PIXELS {
        dst.par_chunks_mut(PARALLEL_CHUNK)
            .enumerate()
            .for_each(|(chunk_idx, chunk)| {
                let base = chunk_idx * PARALLEL_CHUNK;
                copy_channel(&src[base * channels..], channels, channel, chunk);
            });
    } else {
        copy_channel(src, channels, channel, dst);
    }
    Ok(())
}

fn copy_channel(src: &[u16], channels: usize, channel: usize, dst: &mut [u16]) {
    for (out, pixel) in dst.iter_mut().zip(src.chunks_exact(channels)) {
        *out = pixel[channel];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn interleave(planes: &[Vec<u16>]) -> Vec<u16> {
        let pixels = planes[0].len();
        let mut out = Vec::with_capacity(pixels * planes.len());
        for p in 0..pixels {
            for plane in planes {
                out.push(plane[p]);
            }
        }
        out
    }

    #[test]
    fn test_constant_channels_recovered() {
        let constants = [7u16, 300, 65535, 0];
        let planes: Vec<Vec<u16>> = constants.iter().map(|&c| vec![c; 6 * 4]).collect();
        let frame = interleave(&planes);

        let mut dst = vec![1u16; 6 * 4];
        for (channel, &constant) in constants.iter().enumerate() {
            deinterleave(&frame, constants.len(), channel, &mut dst).unwrap();
            assert!(dst.iter().all(|&v| v == constant), "channel {channel}");
        }
    }

    #[test]
    fn test_pixel_order_preserved() {
        let a: Vec<u16> = (0..12).collect();
        let b: Vec<u16> = (100..112).collect();
        let frame = interleave(&[a.clone(), b.clone()]);

        let mut dst = vec![0u16; 12];
        deinterleave(&frame, 2, 0, &mut dst).unwrap();
        assert_eq!(dst, a);
        deinterleave(&frame, 2, 1, &mut dst).unwrap();
        assert_eq!(dst, b);
    }

    #[test]
    fn test_single_channel_is_copy() {
        let frame: Vec<u16> = (0..9).collect();
        let mut dst = vec![0u16; 9];
        deinterleave(&frame, 1, 0, &mut dst).unwrap();
        assert_eq!(dst, frame);
    }

    #[test]
    fn test_large_plane_uses_parallel_path() {
        let pixels = PARALLEL_MIN_PIXELS + 3;
        let frame: Vec<u16> = (0..pixels * 3).map(|i| (i % 3) as u16).collect();
        let mut dst = vec![0u16; pixels];
        deinterleave(&frame, 3, 2, &mut dst).unwrap();
        assert!(dst.iter().all(|&v| v == 2));
    }

    #[test]
    fn test_missing_pixel_data() {
        let mut dst = vec![0u16; 4];
        assert!(matches!(
            deinterleave(&[], 2, 0, &mut dst),
            Err(Error::MissingPixelData {
                needed: 8,
                available: 0
            })
        ));
        assert!(matches!(
            deinterleave(&[0u16; 7], 2, 1, &mut dst),
            Err(Error::MissingPixelData { .. })
        ));
    }

    #[test]
    fn test_invalid_channel() {
        let mut dst = vec![0u16; 2];
        assert!(matches!(
            deinterleave(&[0u16; 4], 2, 2, &mut dst),
            Err(Error::InvalidChannel { .. })
        ));
    }
}
