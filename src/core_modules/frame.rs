// THEORY:
// The `frame` module is the reusable image buffer that travels between the
// camera collaborator and a frame worker. A `Frame` is a plain row-major RGB8
// grid; it carries no analysis of its own.
//
// Key architectural principles:
// 1.  **Exclusive Ownership**: For the duration of a scan, a `Frame` is owned
//     by exactly one worker. There is no sharing and no locking at this level.
// 2.  **Buffer Reuse**: The backing `Vec<u8>` is allocated once per worker and
//     refilled in place by the camera for every capture. Releasing a frame
//     means handing the same allocation back for the next exposure, never
//     reallocating per frame.

use crate::core_modules::color::Color;

const CHANNELS: usize = 3;

/// A reusable row-major RGB8 image buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Creates a zeroed frame of the given dimensions.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * CHANNELS],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// The raw RGB8 buffer, row-major, 3 bytes per pixel.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access for the camera collaborator to refill the buffer
    /// in place.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Reads the pixel at `(x, y)`. Callers must stay in bounds; the scanner
    /// iterates over `width`/`height` so this never fails in practice.
    pub fn pixel(&self, x: u32, y: u32) -> Color {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Color::from_rgb_slice(&self.data[offset..offset + CHANNELS])
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[offset] = color.red;
        self.data[offset + 1] = color.green;
        self.data[offset + 2] = color.blue;
    }

    /// Fills the whole frame with one color.
    pub fn fill(&mut self, color: Color) {
        for pixel in self.data.chunks_exact_mut(CHANNELS) {
            pixel[0] = color.red;
            pixel[1] = color.green;
            pixel[2] = color.blue;
        }
    }
}
