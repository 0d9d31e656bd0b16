use crate::error::{Result, RewardsError};
use image::imageops::{self, FilterType};

/// Side of the luminance grid the image is reduced to
pub const GRID_SIZE: u32 = 32;

/// One hex digit per four grid cells
pub const FINGERPRINT_HEX_LEN: usize = (GRID_SIZE * GRID_SIZE / 4) as usize;

/// Average-hash fingerprint of an encoded image.
///
/// The image is converted to greyscale and resampled to a 32x32 grid. Each
/// cell contributes a `1` bit when its luminance is at or above the grid
/// mean. Bits are packed row-major, most significant first, into a
/// fixed-length lowercase hex string.
pub fn fingerprint(image_bytes: &[u8]) -> Result<String> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| RewardsError::DecodeError(e.to_string()))?;

    let grey = decoded.to_luma8();
    let grid = imageops::resize(&grey, GRID_SIZE, GRID_SIZE, FilterType::Lanczos3);

    let pixels: Vec<u8> = grid.pixels().map(|p| p.0[0]).collect();
    let mean = pixels.iter().map(|&p| f64::from(p)).sum::<f64>() / pixels.len() as f64;

    let mut hex_digits = String::with_capacity(FINGERPRINT_HEX_LEN);
    for nibble in pixels.chunks(4) {
        let value = nibble
            .iter()
            .fold(0u8, |acc, &p| (acc << 1) | u8::from(f64::from(p) >= mean));
        hex_digits.push(char::from_digit(u32::from(value), 16).unwrap_or('0'));
    }

    Ok(hex_digits)
}

/// Number of differing bits between two fingerprints, or `None` when they
/// are not comparable.
pub fn hamming_distance(a: &str, b: &str) -> Option<u32> {
    if a.len() != b.len() {
        return None;
    }

    a.chars().zip(b.chars()).try_fold(0u32, |acc, (x, y)| {
        let x = x.to_digit(16)?;
        let y = y.to_digit(16)?;
        Some(acc + (x ^ y).count_ones())
    })
}
