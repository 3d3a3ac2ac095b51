// THEORY:
// The `diagnostics` module renders what the pipeline saw, for humans. Three
// tools live here: a glyph ramp that paints the quantized column profile into
// log output, a per-pixel ramp that renders a whole scanned row bucketed by
// raw match distance, and a PNG writer that dumps a raw camera snapshot to
// disk for tuning the target color.

use crate::core_modules::color::{Color, color_distance};
use crate::core_modules::frame::Frame;
use crate::core_modules::peak_resolver::QuantizedProfile;
use image::ImageEncoder;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// One glyph per quantization level, dimmest to brightest.
const LEVEL_RAMP: &[u8] = b" .:-=+*#%@";

/// Upper bounds for raw per-pixel match distance, nearest first, each paired
/// with the glyph rendered below it. Anything past the last bound is blank.
/// The first four buckets sit under the default match threshold.
const DISTANCE_BUCKETS: &[(f64, char)] = &[
    (0.025, '@'),
    (0.05, '%'),
    (0.08, '#'),
    (0.10, '*'),
    (0.15, '+'),
    (0.2, '='),
    (0.3, '-'),
    (0.4, ':'),
    (0.5, '.'),
];

/// Maps a raw match distance to its bucket glyph.
pub fn distance_glyph(distance: f64) -> char {
    for (bound, glyph) in DISTANCE_BUCKETS {
        if distance < *bound {
            return *glyph;
        }
    }
    ' '
}

/// Renders one image row as a glyph per pixel, bucketed by raw match distance
/// to the target color, in the scanner's traversal order. Heavy; intended for
/// tuning the target color and threshold, not steady-state operation.
pub fn render_scan_row(frame: &Frame, row: u32, target: &Color, flip_horizontal: bool) -> String {
    let mut line = String::with_capacity(frame.width() as usize);
    if flip_horizontal {
        for x in (0..frame.width()).rev() {
            line.push(distance_glyph(color_distance(&frame.pixel(x, row), target)));
        }
    } else {
        for x in 0..frame.width() {
            line.push(distance_glyph(color_distance(&frame.pixel(x, row), target)));
        }
    }
    line
}

/// Renders a quantized profile as one glyph per column, marking the resolved
/// beacon position (when found) with a caret on a second line.
pub fn render_profile(profile: &QuantizedProfile, position: i32) -> String {
    let mut ramp = String::with_capacity(profile.levels().len() + 1);
    for level in profile.levels() {
        let glyph = LEVEL_RAMP[(*level as usize).min(LEVEL_RAMP.len() - 1)] as char;
        ramp.push(glyph);
    }
    if position >= 0 && (position as usize) < profile.levels().len() {
        let mut marker = String::with_capacity(position as usize + 1);
        for _ in 0..position {
            marker.push(' ');
        }
        marker.push('^');
        format!("{ramp}\n{marker}")
    } else {
        ramp
    }
}

/// Writes a frame to disk as a PNG, for offline inspection of what the
/// camera actually captured.
pub fn save_snapshot(frame: &Frame, path: &Path) -> Result<(), image::ImageError> {
    let output = std::fs::File::create(path)?;
    let encoder = image::codecs::png::PngEncoder::new(output);
    encoder.write_image(
        frame.as_slice(),
        frame.width(),
        frame.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(())
}

/// A timestamped snapshot filename in the working directory.
pub fn snapshot_path() -> PathBuf {
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    PathBuf::from(format!("snapshot-{seconds}.png"))
}
