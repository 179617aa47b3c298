//! Frame container and the RGB view handed to providers.
//!
//! - `Frame`: owned pixel buffer for one loop iteration. Bytes are private and
//!   zeroized on drop.
//! - `RgbView`: validated, RGB-ordered view. Providers only ever receive this,
//!   so a provider can never observe BGR data or a truncated buffer.

use zeroize::Zeroize;

use crate::error::{ProctorError, ProctorResult};

/// Channel order of a frame buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PixelFormat {
    #[default]
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "rgb" | "rgb8" => Some(Self::Rgb8),
            "bgr" | "bgr8" => Some(Self::Bgr8),
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------------
// Frame: owned pixel data for a single iteration
// ----------------------------------------------------------------------------

/// Decoded frame. Owned by the session loop for one iteration.
///
/// There is no `Clone`: a frame is read, analyzed and dropped.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Position in the source stream, starting at 0.
    pub sequence: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            width,
            height,
            format,
            sequence,
        }
    }

    /// Expected byte length for a packed 3-channel frame.
    pub fn expected_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Validate the buffer and normalize it to RGB order.
    ///
    /// Any mismatch between dimensions and buffer length is a decode failure.
    pub fn rgb_view(&mut self) -> ProctorResult<RgbView<'_>> {
        if self.width == 0 || self.height == 0 {
            return Err(ProctorError::decode(format!(
                "frame {} has empty dimensions {}x{}",
                self.sequence, self.width, self.height
            )));
        }
        let expected = Self::expected_len(self.width, self.height)
            .ok_or_else(|| ProctorError::decode("frame dimensions overflow"))?;
        if self.data.len() != expected {
            return Err(ProctorError::decode(format!(
                "frame {} expected {} bytes for {}x{}, received {}",
                self.sequence,
                expected,
                self.width,
                self.height,
                self.data.len()
            )));
        }
        if self.format == PixelFormat::Bgr8 {
            for px in self.data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            self.format = PixelFormat::Rgb8;
        }
        Ok(RgbView { frame: self })
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// RgbView: what providers see
// ----------------------------------------------------------------------------

/// Validated RGB view of a frame.
///
/// Constructed only by `Frame::rgb_view`, so holders can rely on
/// `pixels().len() == width * height * 3` and RGB channel order.
pub struct RgbView<'a> {
    frame: &'a Frame,
}

impl<'a> RgbView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn sequence(&self) -> u64 {
        self.frame.sequence
    }

    /// Packed RGB bytes, row-major.
    pub fn pixels(&self) -> &'a [u8] {
        &self.frame.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.frame.width || y >= self.frame.height {
            return None;
        }
        let idx = (y as usize * self.frame.width as usize + x as usize) * 3;
        let px = self.frame.data.get(idx..idx + 3)?;
        Some([px[0], px[1], px[2]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgr_frames_are_normalized_to_rgb() {
        let mut frame = Frame::new(vec![1, 2, 3, 4, 5, 6], 2, 1, PixelFormat::Bgr8, 7);
        let view = frame.rgb_view().unwrap();
        assert_eq!(view.pixels(), &[3, 2, 1, 6, 5, 4]);
        assert_eq!(view.pixel(1, 0), Some([6, 5, 4]));
        assert_eq!(view.sequence(), 7);
        assert_eq!(frame.format, PixelFormat::Rgb8);
    }

    #[test]
    fn rgb_view_is_idempotent_for_converted_frames() {
        let mut frame = Frame::new(vec![1, 2, 3], 1, 1, PixelFormat::Bgr8, 0);
        frame.rgb_view().unwrap();
        let view = frame.rgb_view().unwrap();
        assert_eq!(view.pixels(), &[3, 2, 1]);
    }

    #[test]
    fn truncated_buffer_is_a_decode_failure() {
        let mut frame = Frame::new(vec![0; 10], 2, 2, PixelFormat::Rgb8, 0);
        let err = frame.rgb_view().err().expect("decode failure");
        assert!(matches!(err, ProctorError::Decode(_)));
    }

    #[test]
    fn empty_dimensions_are_a_decode_failure() {
        let mut frame = Frame::new(Vec::new(), 0, 480, PixelFormat::Rgb8, 0);
        assert!(matches!(frame.rgb_view(), Err(ProctorError::Decode(_))));
    }

    #[test]
    fn pixel_lookup_is_bounds_checked() {
        let mut frame = Frame::new(vec![9; 12], 2, 2, PixelFormat::Rgb8, 0);
        let view = frame.rgb_view().unwrap();
        assert_eq!(view.pixel(2, 0), None);
        assert_eq!(view.pixel(0, 2), None);
        assert_eq!(view.pixel(1, 1), Some([9, 9, 9]));
    }
}
