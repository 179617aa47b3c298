//! Local raw-frame file source.
//!
//! The file is a plain concatenation of packed frames, `width * height * 3`
//! bytes each, in the configured channel order. No container, no header.
//! A trailing partial frame is reported once as a decode failure and then the
//! stream ends.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::error::{ProctorError, ProctorResult};
use crate::frame::Frame;

use super::{is_local_source, FrameSource, SourceConfig, SourceStats};

pub struct RawFileSource {
    config: SourceConfig,
    path: PathBuf,
    frame_len: usize,
    reader: Option<BufReader<File>>,
    next_sequence: u64,
    frames_read: u64,
    bytes_read: u64,
    finished: bool,
}

impl RawFileSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if !is_local_source(&config.url) || config.url.starts_with("stub://") {
            return Err(anyhow!(
                "raw file source only supports local paths (no URL schemes)"
            ));
        }
        let frame_len = Frame::expected_len(config.width, config.height)
            .filter(|len| *len > 0)
            .ok_or_else(|| {
                anyhow!(
                    "invalid frame dimensions {}x{}",
                    config.width,
                    config.height
                )
            })?;
        Ok(Self {
            path: PathBuf::from(&config.url),
            config,
            frame_len,
            reader: None,
            next_sequence: 0,
            frames_read: 0,
            bytes_read: 0,
            finished: false,
        })
    }

    /// Fill `buf` as far as the file allows. Returns the byte count read.
    fn read_up_to(reader: &mut BufReader<File>, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl FrameSource for RawFileSource {
    fn open(&mut self) -> ProctorResult<()> {
        let file = File::open(&self.path).map_err(|e| {
            ProctorError::Source(format!("failed to open {}: {}", self.path.display(), e))
        })?;
        self.reader = Some(BufReader::new(file));
        self.finished = false;
        log::info!(
            "RawFileSource: opened {} ({}x{}, {:?})",
            self.path.display(),
            self.config.width,
            self.config.height,
            self.config.format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> ProctorResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        if let Some(limit) = self.config.frame_limit {
            if self.next_sequence >= limit {
                self.finished = true;
                return Ok(None);
            }
        }
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ProctorError::Source("raw file source not open".into()))?;

        let mut data = vec![0u8; self.frame_len];
        let filled = Self::read_up_to(reader, &mut data).map_err(|e| {
            ProctorError::Source(format!("read failed on {}: {}", self.path.display(), e))
        })?;
        self.bytes_read += filled as u64;
        let sequence = self.next_sequence;

        if filled == 0 {
            self.finished = true;
            return Ok(None);
        }
        self.next_sequence += 1;
        if filled < self.frame_len {
            self.finished = true;
            return Err(ProctorError::decode(format!(
                "trailing partial frame {} ({} of {} bytes)",
                sequence, filled, self.frame_len
            )));
        }
        self.frames_read += 1;
        Ok(Some(Frame::new(
            data,
            self.config.width,
            self.config.height,
            self.config.format,
            sequence,
        )))
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            log::info!(
                "RawFileSource: closed {} after {} frames",
                self.path.display(),
                self.frames_read
            );
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frames_read,
            bytes_read: self.bytes_read,
            url: self.config.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::io::Write;

    fn source_for(bytes: &[u8]) -> (tempfile::NamedTempFile, RawFileSource) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        let config = SourceConfig {
            url: file.path().to_string_lossy().into_owned(),
            width: 2,
            height: 1,
            format: PixelFormat::Bgr8,
            frame_limit: None,
        };
        let source = RawFileSource::new(config).unwrap();
        (file, source)
    }

    #[test]
    fn reads_whole_frames_in_order() {
        let (_file, mut source) = source_for(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        source.open().unwrap();
        let mut first = source.next_frame().unwrap().unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(first.rgb_view().unwrap().pixels(), &[3, 2, 1, 6, 5, 4]);
        let second = source.next_frame().unwrap().unwrap();
        assert_eq!(second.sequence, 1);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_read, 2);
    }

    #[test]
    fn trailing_partial_frame_is_a_decode_failure() {
        let (_file, mut source) = source_for(&[1, 2, 3, 4, 5, 6, 7, 8]);
        source.open().unwrap();
        assert!(source.next_frame().unwrap().is_some());
        assert!(matches!(source.next_frame(), Err(ProctorError::Decode(_))));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn missing_file_fails_to_open() {
        let config = SourceConfig {
            url: "/nonexistent/proctor/session.raw".into(),
            ..SourceConfig::default()
        };
        let mut source = RawFileSource::new(config).unwrap();
        assert!(matches!(source.open(), Err(ProctorError::Source(_))));
    }

    #[test]
    fn rejects_urls() {
        let config = SourceConfig {
            url: "http://example.com/frames.raw".into(),
            ..SourceConfig::default()
        };
        assert!(RawFileSource::new(config).is_err());
    }
}
