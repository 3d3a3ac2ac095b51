// THEORY:
// The `row_scanner` module reduces one image row to per-column match-strength
// contributions against the target color. It is the innermost loop of the
// pipeline: every pixel of every scanned row passes through here.
//
// Key architectural principles:
// 1.  **Low-Pass Color Filter**: A pixel contributes only when its HSV
//     distance to the target is within the match threshold. The contribution
//     added is the distance itself, not `1 - distance`, so a run of
//     near-perfect matches sums *smaller* than a run of borderline matches.
//     Downstream quantization works on relative column levels, so the policy
//     still peaks where the beacon is.
// 2.  **Mirror-Aware Traversal**: A horizontally flipped camera mount only
//     reverses traversal order; the value written per column is identical
//     either way. Vertical flips are the caller's concern (row order).
// 3.  **Local Accumulation**: The scanner writes into a caller-owned buffer,
//     never into shared state; synchronization stays out of the hot loop.

use crate::core_modules::color::{Color, color_distance};
use crate::core_modules::frame::Frame;

/// A recoverable per-frame scan failure. Contained inside the worker: logged,
/// the frame buffer is still released, and the pass carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The requested row lies outside the frame.
    RowOutOfBounds { row: u32, height: u32 },
    /// The contribution buffer does not match the frame width.
    WidthMismatch { expected: usize, actual: usize },
}

impl std::fmt::Display for ScanError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanError::RowOutOfBounds { row, height } => {
                write!(f, "row {row} out of bounds for frame height {height}")
            }
            ScanError::WidthMismatch { expected, actual } => {
                write!(f, "contribution buffer width {actual} != frame width {expected}")
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Scans one row of the frame, adding the distance of every within-threshold
/// pixel to its column's entry in `contributions`.
pub fn scan_row(
    frame: &Frame,
    row: u32,
    target: &Color,
    threshold: f64,
    flip_horizontal: bool,
    contributions: &mut [f64],
) -> Result<(), ScanError> {
    if row >= frame.height() {
        return Err(ScanError::RowOutOfBounds {
            row,
            height: frame.height(),
        });
    }
    if contributions.len() != frame.width() as usize {
        return Err(ScanError::WidthMismatch {
            expected: frame.width() as usize,
            actual: contributions.len(),
        });
    }

    let width = frame.width();
    let mut scan = |x: u32| {
        let pixel = frame.pixel(x, row);
        let distance = color_distance(&pixel, target);
        if distance <= threshold {
            contributions[x as usize] += distance;
        }
    };

    if flip_horizontal {
        for x in (0..width).rev() {
            scan(x);
        }
    } else {
        for x in 0..width {
            scan(x);
        }
    }
    Ok(())
}
