// This binary is an example of how to use the `beacon_vision` library: it
// runs the locator against either a still image (passed as the first
// argument, scanned repeatedly as if it were a live feed) or a synthetic
// beacon scene, and prints the resolved position.

use anyhow::Context;
use beacon_vision::core_modules::frame::Frame;
use beacon_vision::{BeaconLocator, Color, FrameSource, LocatorConfig, LocatorError};
use std::time::Duration;

/// Serves one decoded image file over and over, like a camera staring at a
/// frozen scene.
struct StillImageSource {
    rgb: image::RgbImage,
}

impl StillImageSource {
    fn load(path: &str, width: u32, height: u32) -> anyhow::Result<Self> {
        let decoded = image::open(path).with_context(|| format!("opening {path}"))?;
        let rgb = image::imageops::resize(
            &decoded.to_rgb8(),
            width,
            height,
            image::imageops::FilterType::Triangle,
        );
        Ok(Self { rgb })
    }
}

impl FrameSource for StillImageSource {
    fn open(&mut self) -> Result<(), LocatorError> {
        Ok(())
    }

    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), LocatorError> {
        frame.as_mut_slice().copy_from_slice(self.rgb.as_raw());
        Ok(())
    }

    fn close(&mut self) {}
}

/// A synthetic scene: gray background with a narrow beacon stripe.
struct SyntheticSource {
    beacon_column: u32,
    beacon_color: Color,
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> Result<(), LocatorError> {
        Ok(())
    }

    fn next_frame(&mut self, frame: &mut Frame) -> Result<(), LocatorError> {
        frame.fill(Color::new(128, 128, 128));
        for y in 0..frame.height() {
            for x in self.beacon_column.saturating_sub(1)..=self.beacon_column + 1 {
                frame.set_pixel(x.min(frame.width() - 1), y, self.beacon_color);
            }
        }
        Ok(())
    }

    fn close(&mut self) {}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = LocatorConfig {
        print_summary: true,
        ..LocatorConfig::default()
    };

    let source: Box<dyn FrameSource> = match std::env::args().nth(1) {
        Some(path) => Box::new(StillImageSource::load(
            &path,
            config.image_width,
            config.image_height,
        )?),
        None => Box::new(SyntheticSource {
            beacon_column: config.image_width / 2,
            // Slightly off the configured pink target, as a real LED would be.
            beacon_color: Color::new(155, 60, 185),
        }),
    };

    let mut locator = BeaconLocator::new(config, source, None)?;
    locator.enable().await?;

    // Let a few passes land, then report the latest fix.
    tokio::time::sleep(Duration::from_secs(1)).await;
    match locator.capture()? {
        result if result.found => {
            println!("beacon at column {} ({} peak columns)", result.position, result.peak_count)
        }
        result => println!("no beacon found ({} peak columns)", result.peak_count),
    }

    locator.close().await;
    Ok(())
}
