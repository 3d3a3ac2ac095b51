// THEORY:
// This file is the main entry point for the `beacon_vision` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the
// public API that will be exposed to external consumers (like a navigation
// controller).
//
// The primary goal is to export the `BeaconLocator` and its associated data
// structures (`LocatorConfig`, `PeakResult`, the collaborator traits) as the
// clean, high-level interface for the whole beacon-localization engine. The
// internal modules (`core_modules`) are encapsulated behind it; external
// callers hand the locator a camera and a target color and read back a column
// position or "not found".

pub mod core_modules;
pub mod pipeline;

pub use crate::core_modules::color::Color;
pub use crate::core_modules::peak_resolver::PeakResult;
pub use crate::pipeline::{BeaconLocator, FrameSource, IndicatorControl, LocatorConfig, LocatorError};
