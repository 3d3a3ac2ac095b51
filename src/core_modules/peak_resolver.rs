// THEORY:
// The `peak_resolver` module turns a completed column accumulator into the
// pipeline's single output: one horizontal beacon position, or "not found".
//
// Key architectural principles:
// 1.  **Quantize Before Judging**: Raw column sums are mapped onto a coarse
//     ladder of evenly spaced levels between zero and the strongest column.
//     Judging peaks on quantized levels instead of raw floats makes the
//     decision robust to per-pixel noise in the accumulation.
// 2.  **Spread as a Confidence Test**: The beacon occupies a narrow angular
//     slice of the frame. One tight cluster of peak columns is a detection;
//     equally strong peaks spread across the image mean either no beacon or a
//     confusing background, and both must fail safe rather than steer the
//     robot at a wrong position.
// 3.  **Single Consumption**: A resolver run reads one accumulator snapshot
//     once; resolving against a partially updated pass is the caller's bug to
//     prevent (the producer waits for pass completion first).
//
// Boundary choice: a column's level is the number of step boundaries at or
// below its value, minus one, clamped to [0, LEVELS-1]. A value landing
// exactly on a step edge counts that step.

use crate::core_modules::accumulator::ColumnAccumulator;

/// Number of quantization levels applied to column sums.
pub const QUANTIZATION_LEVELS: usize = 10;
/// Peak spread (as a percentage of image width) at or beyond which a pass is
/// judged ambiguous.
pub const MAX_SPREAD_PERCENT: u32 = 10;

/// The outcome of one localization pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakResult {
    /// Whether a beacon position was reliably determined.
    pub found: bool,
    /// Column index of the beacon in `[0, width)`; `-1` when not found.
    pub position: i32,
    /// Number of columns at the peak quantization level.
    pub peak_count: usize,
}

impl PeakResult {
    pub const fn not_found(peak_count: usize) -> Self {
        Self {
            found: false,
            position: -1,
            peak_count,
        }
    }
}

/// Per-column quantization levels for one pass, `0..QUANTIZATION_LEVELS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuantizedProfile {
    levels: Vec<u8>,
}

impl QuantizedProfile {
    /// Quantizes the column sums against `column_max`. Zero columns map to
    /// level 0; the strongest column maps to the top level.
    pub fn from_columns(columns: &[f64], column_max: f64) -> Self {
        // Degenerate pass: nothing accumulated anywhere, every column sits at
        // the lowest level.
        if column_max == 0.0 {
            return Self {
                levels: vec![0; columns.len()],
            };
        }
        let steps = quantization_steps(column_max);
        let levels = columns
            .iter()
            .map(|value| {
                let at_or_below = steps.iter().filter(|step| value >= step).count();
                at_or_below.saturating_sub(1).min(QUANTIZATION_LEVELS - 1) as u8
            })
            .collect();
        Self { levels }
    }

    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    /// The maximum level present in the profile.
    pub fn peak_level(&self) -> u8 {
        self.levels.iter().copied().max().unwrap_or(0)
    }
}

/// Evenly spaced step boundaries from 0 to `column_max` inclusive. The last
/// boundary is pinned to `column_max` itself so rounding in the step width
/// can never push the strongest column off the top level.
fn quantization_steps(column_max: f64) -> Vec<f64> {
    let step = column_max / (QUANTIZATION_LEVELS - 1) as f64;
    (0..QUANTIZATION_LEVELS)
        .map(|i| {
            if i == QUANTIZATION_LEVELS - 1 {
                column_max
            } else {
                i as f64 * step
            }
        })
        .collect()
}

/// Applies the quantization and peak/spread decision policy to a completed
/// column accumulator.
pub struct PeakResolver {
    width: usize,
}

impl PeakResolver {
    pub fn new(width: usize) -> Self {
        Self { width }
    }

    /// Resolves a completed pass to a single position or "not found".
    pub fn resolve(&self, accumulator: &ColumnAccumulator) -> PeakResult {
        let columns = accumulator.snapshot();
        self.resolve_columns(&columns)
    }

    /// Resolves from a raw snapshot; also the diagnostics entry point.
    pub fn resolve_columns(&self, columns: &[f64]) -> PeakResult {
        // No column matched within threshold anywhere.
        if columns.iter().sum::<f64>() == 0.0 {
            tracing::debug!("no beacon found: empty accumulator");
            return PeakResult::not_found(0);
        }

        let column_max = columns.iter().copied().fold(0.0_f64, f64::max);
        let profile = QuantizedProfile::from_columns(columns, column_max);
        let peak_level = profile.peak_level();

        let mut first_peak = None;
        let mut last_peak = 0usize;
        let mut peak_count = 0usize;
        for (column, level) in profile.levels().iter().enumerate() {
            if *level >= peak_level {
                if first_peak.is_none() {
                    first_peak = Some(column);
                }
                last_peak = column;
                peak_count += 1;
            }
        }
        // peak_level is the max of a non-empty profile, so at least one
        // column reached it.
        let first_peak = first_peak.unwrap_or(0);

        let spread_percent =
            ((last_peak - first_peak) as f64 / self.width as f64 * 100.0).round() as u32;
        if spread_percent == 0 {
            tracing::debug!(position = first_peak, peak_count, "single contiguous peak");
            PeakResult {
                found: true,
                position: first_peak as i32,
                peak_count,
            }
        } else if spread_percent < MAX_SPREAD_PERCENT {
            let position = ((first_peak + last_peak) as f64 / 2.0).round() as i32;
            tracing::debug!(
                position,
                first_peak,
                last_peak,
                peak_count,
                "peaks within spread; averaging"
            );
            PeakResult {
                found: true,
                position,
                peak_count,
            }
        } else {
            tracing::debug!(spread_percent, peak_count, "spread too wide; no beacon discernable");
            PeakResult::not_found(peak_count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: usize = 100;

    fn resolve(columns: &[f64]) -> PeakResult {
        PeakResolver::new(columns.len()).resolve_columns(columns)
    }

    #[test]
    fn all_zero_accumulator_finds_nothing() {
        let result = resolve(&vec![0.0; WIDTH]);
        assert_eq!(result, PeakResult::not_found(0));
    }

    #[test]
    fn single_peak_column_is_found_at_its_index() {
        let mut columns = vec![0.1; WIDTH];
        columns[42] = 5.0;
        let result = resolve(&columns);
        assert_eq!(
            result,
            PeakResult {
                found: true,
                position: 42,
                peak_count: 1
            }
        );
    }

    #[test]
    fn close_peaks_average_to_their_center() {
        let mut columns = vec![0.0; WIDTH];
        columns[48] = 5.0;
        columns[52] = 5.0;
        let result = resolve(&columns);
        assert_eq!(
            result,
            PeakResult {
                found: true,
                position: 50,
                peak_count: 2
            }
        );
    }

    #[test]
    fn distant_peaks_fail_safe() {
        let mut columns = vec![0.0; WIDTH];
        columns[10] = 5.0;
        columns[80] = 5.0;
        let result = resolve(&columns);
        assert_eq!(result, PeakResult::not_found(2));
    }

    #[test]
    fn contiguous_peak_run_returns_first_index() {
        // Spread rounds to 0% on a wide image, so the first peak wins.
        let mut columns = vec![0.0; 1000];
        for column in 500..503 {
            columns[column] = 5.0;
        }
        let result = resolve(&columns);
        assert_eq!(
            result,
            PeakResult {
                found: true,
                position: 500,
                peak_count: 3
            }
        );
    }

    #[test]
    fn quantization_maps_extremes_to_bottom_and_top() {
        let columns = [0.0, 2.5, 5.0];
        let profile = QuantizedProfile::from_columns(&columns, 5.0);
        assert_eq!(profile.levels().len(), 3);
        assert_eq!(profile.levels()[0], 0);
        assert_eq!(profile.levels()[2], (QUANTIZATION_LEVELS - 1) as u8);
        assert_eq!(profile.peak_level(), (QUANTIZATION_LEVELS - 1) as u8);
    }

    #[test]
    fn quantization_counts_exact_step_edges() {
        // column_max = 9 gives step boundaries 0, 1, 2, ..., 9; a value
        // exactly on an edge counts that step.
        let columns = [1.0, 0.999, 9.0];
        let profile = QuantizedProfile::from_columns(&columns, 9.0);
        assert_eq!(profile.levels()[0], 1);
        assert_eq!(profile.levels()[1], 0);
        assert_eq!(profile.levels()[2], 9);
    }

    #[test]
    fn profile_length_always_matches_width() {
        let columns = vec![1.0; 640];
        let profile = QuantizedProfile::from_columns(&columns, 1.0);
        assert_eq!(profile.levels().len(), 640);
    }
}
