use crate::error::{ProctorError, ProctorResult};
use crate::frame::Frame;

use super::{FrameSource, SourceConfig, SourceStats};

/// Synthetic source for `stub://` URLs.
///
/// Produces a shifting gradient so consecutive frames differ. Pair it with
/// the scripted scene provider, which keys its output on the frame sequence.
pub struct SyntheticSource {
    config: SourceConfig,
    opened: bool,
    next_sequence: u64,
    bytes_read: u64,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            opened: false,
            next_sequence: 0,
            bytes_read: 0,
        }
    }

    fn generate_pixels(&self) -> ProctorResult<Vec<u8>> {
        let len = Frame::expected_len(self.config.width, self.config.height)
            .ok_or_else(|| ProctorError::Source("synthetic frame size overflows".into()))?;
        let width = self.config.width.max(1) as usize;
        let shift = self.next_sequence as usize;
        let mut pixels = vec![0u8; len];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            px[0] = ((x + shift) % 256) as u8;
            px[1] = ((y + shift / 2) % 256) as u8;
            px[2] = ((x + y) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn open(&mut self) -> ProctorResult<()> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(ProctorError::Source(format!(
                "synthetic source needs non-zero dimensions, got {}x{}",
                self.config.width, self.config.height
            )));
        }
        self.opened = true;
        log::info!(
            "SyntheticSource: opened {} ({}x{})",
            self.config.url,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> ProctorResult<Option<Frame>> {
        if !self.opened {
            return Err(ProctorError::Source("synthetic source not open".into()));
        }
        if let Some(limit) = self.config.frame_limit {
            if self.next_sequence >= limit {
                return Ok(None);
            }
        }
        let pixels = self.generate_pixels()?;
        let frame = Frame::new(
            pixels,
            self.config.width,
            self.config.height,
            self.config.format,
            self.next_sequence,
        );
        self.bytes_read += frame.byte_len() as u64;
        self.next_sequence += 1;
        Ok(Some(frame))
    }

    fn close(&mut self) {
        if self.opened {
            log::info!(
                "SyntheticSource: closed {} after {} frames",
                self.config.url,
                self.next_sequence
            );
        }
        self.opened = false;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.next_sequence,
            bytes_read: self.bytes_read,
            url: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(limit: Option<u64>) -> SourceConfig {
        SourceConfig {
            width: 8,
            height: 4,
            frame_limit: limit,
            ..SourceConfig::default()
        }
    }

    #[test]
    fn honours_frame_limit() {
        let mut source = SyntheticSource::new(config(Some(2)));
        source.open().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_read, 2);
        assert_eq!(source.stats().bytes_read, 2 * 8 * 4 * 3);
    }

    #[test]
    fn frames_are_valid_and_change_over_time() {
        let mut source = SyntheticSource::new(config(None));
        source.open().unwrap();
        let mut first = source.next_frame().unwrap().unwrap();
        let mut second = source.next_frame().unwrap().unwrap();
        let a = first.rgb_view().unwrap().pixels().to_vec();
        let b = second.rgb_view().unwrap().pixels().to_vec();
        assert_ne!(a, b);
        assert_eq!(second.sequence, 1);
    }

    #[test]
    fn reading_before_open_is_a_source_error() {
        let mut source = SyntheticSource::new(config(None));
        assert!(matches!(source.next_frame(), Err(ProctorError::Source(_))));
    }
}
