//! Opening a URL as a stream of decoded frames.

use anyhow::Result;

use crate::config::HttpConfig;
use crate::decode::{FrameSource, Mp3Frames};
use crate::transport;

/// A decodable stream positioned at the requested byte offset.
pub struct OpenedStream {
    pub frames: Box<dyn FrameSource + Send>,
    /// Total resource length, when the server reported one.
    pub content_length: Option<u64>,
}

/// Opens `url` starting at `offset` bytes; called once per decode session.
pub trait StreamOpener: Send + Sync {
    fn open(&self, url: &str, offset: u64) -> Result<OpenedStream>;
}

/// HTTP(S) GET with optional `Range`, decoded as MP3.
#[derive(Clone, Debug)]
pub struct HttpMp3Opener {
    http: HttpConfig,
    max_corrupt_frames: u32,
}

impl HttpMp3Opener {
    pub fn new(http: HttpConfig, max_corrupt_frames: u32) -> Self {
        Self {
            http,
            max_corrupt_frames,
        }
    }
}

impl StreamOpener for HttpMp3Opener {
    fn open(&self, url: &str, offset: u64) -> Result<OpenedStream> {
        let body = transport::open_stream(url, offset, &self.http)?;
        let frames = Mp3Frames::new(body.reader, self.max_corrupt_frames)?;
        Ok(OpenedStream {
            frames: Box::new(frames),
            content_length: body.content_length,
        })
    }
}
