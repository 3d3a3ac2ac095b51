// THEORY:
// The `color` module is the most fundamental unit of the beacon-localization
// system. It provides a "dumb" data container for a single RGB color plus the
// one perceptual heuristic the whole pipeline is built on: distance between
// two colors in hue/saturation/value space.
//
// Key architectural principles:
// 1.  **Value Semantics**: A `Color` is an immutable, `Copy` value type. All
//     analysis is expressed as pure functions over pairs of colors.
// 2.  **HSV as the Comparison Space**: A beacon LED is defined by its hue far
//     more than by its brightness. Comparing in HSV makes the match robust to
//     exposure changes that would wreck a naive per-channel RGB delta, with
//     the hue term measured on the color wheel (circular, in degrees).
// 3.  **No Error Conditions**: `color_distance` is deterministic and
//     side-effect-free; every pixel of every frame funnels through it, so it
//     must stay allocation-free and branch-light.

/// Hue angle on the color wheel, in degrees `[0, 360)`.
pub type Hue = f64;
/// HSV saturation, `[0, 1]`.
pub type Saturation = f64;
/// HSV value (brightness), kept in the raw channel range `[0, 255]`.
pub type Value = f64;
/// Perceptual distance between two colors, `[0, ~1.4]` for typical inputs.
pub type ColorDistance = f64;

const HUE_HALF_TURN: f64 = 180.0;
const HUE_FULL_TURN: f64 = 360.0;
const VALUE_RANGE: f64 = 255.0;

/// A "dumb" data container representing a single RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Color {
    /// The red channel value (0-255).
    pub red: u8,
    /// The green channel value (0-255).
    pub green: u8,
    /// The blue channel value (0-255).
    pub blue: u8,
}

impl Color {
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    /// Reads a color from the first three bytes of a raw RGB slice.
    pub fn from_rgb_slice(bytes: &[u8]) -> Self {
        Self {
            red: bytes[0],
            green: bytes[1],
            blue: bytes[2],
        }
    }

    /// Converts the color to HSV: hue in degrees `[0, 360)`, saturation in
    /// `[0, 1]`, value in the raw channel range `[0, 255]`.
    pub fn hsv(&self) -> (Hue, Saturation, Value) {
        let r = self.red as f64;
        let g = self.green as f64;
        let b = self.blue as f64;
        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let chroma = max - min;

        let hue = if chroma == 0.0 {
            0.0
        } else if max == r {
            60.0 * (((g - b) / chroma).rem_euclid(6.0))
        } else if max == g {
            60.0 * ((b - r) / chroma + 2.0)
        } else {
            60.0 * ((r - g) / chroma + 4.0)
        };

        let saturation = if max == 0.0 { 0.0 } else { chroma / max };

        (hue, saturation, max)
    }
}

/// Perceptual distance between two colors in HSV space.
///
/// The hue term is circular (the shorter way around the color wheel,
/// normalized by a half turn), the saturation term is a plain delta, and the
/// value term is normalized by the channel range. The result is the Euclidean
/// norm of the three terms.
pub fn color_distance(a: &Color, b: &Color) -> ColorDistance {
    let (h0, s0, v0) = a.hsv();
    let (h1, s1, v1) = b.hsv();

    let hue_delta = (h1 - h0).abs();
    let dh = hue_delta.min(HUE_FULL_TURN - hue_delta) / HUE_HALF_TURN;
    let ds = (s1 - s0).abs();
    let dv = (v1 - v0).abs() / VALUE_RANGE;

    (dh * dh + ds * ds + dv * dv).sqrt()
}
