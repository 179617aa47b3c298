//! Frame ingestion sources.
//!
//! - `stub://` URLs: synthetic patterned frames (testing, demos)
//! - local paths: files of concatenated raw RGB/BGR frames
//!
//! Sources MUST NOT:
//! - Fetch remote URLs
//! - Store frames to disk
//! - Log frame content

pub mod file;
pub mod synthetic;

pub use file::RawFileSource;
pub use synthetic::SyntheticSource;

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::error::ProctorResult;
use crate::frame::{Frame, PixelFormat};

pub const DEFAULT_SOURCE_URL: &str = "stub://exam";
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;

/// Where frames come from and what they look like.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// `stub://<name>` or a local file path.
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Stop after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            format: PixelFormat::Rgb8,
            frame_limit: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    pub frames_read: u64,
    pub bytes_read: u64,
    pub url: String,
}

/// A stream of frames for one session.
///
/// `next_frame` returns `Ok(None)` once the stream is exhausted. A
/// `Decode` error rejects a single frame; the stream may continue. Any other
/// error ends the stream.
pub trait FrameSource: Send {
    fn open(&mut self) -> ProctorResult<()>;

    fn next_frame(&mut self) -> ProctorResult<Option<Frame>>;

    /// Release the underlying handle. Safe to call more than once.
    fn close(&mut self);

    fn stats(&self) -> SourceStats;
}

/// Build the source named by `config.url`.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    if !is_local_source(&config.url) {
        return Err(anyhow!(
            "frame ingestion only supports stub:// or local paths (got {})",
            config.url
        ));
    }
    if config.url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(config.clone())))
    } else {
        Ok(Box::new(RawFileSource::new(config.clone())?))
    }
}

pub(crate) fn is_local_source(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    if url.starts_with("stub://") {
        return true;
    }
    !url.contains("://")
}
