//! SSE frame reader.
//!
//! Turns the raw response body into `Frame`s: one JSON payload per `data:` line,
//! or `Frame::Done` for the terminal sentinel. Partial lines stay buffered in the
//! codec until their newline arrives, which also keeps multi-byte UTF-8 sequences
//! intact across chunk boundaries.

use crate::constants::{MAX_LINE_BYTES, SSE_DATA_PREFIX, SSE_DONE_SENTINEL};
use bytes::{Bytes, BytesMut};
use futures_util::Stream;
use tokio_util::codec::{Decoder, FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(String),
    Done,
}

pub type FrameStream<R> = FramedRead<StreamReader<R, Bytes>, SseFrameCodec>;

pub struct SseFrameCodec {
    lines: LinesCodec,
    dropped_lines: usize,
}

impl SseFrameCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
            dropped_lines: 0,
        }
    }

    /// Lines skipped because they were oversized or not valid UTF-8.
    pub fn dropped_lines(&self) -> usize {
        self.dropped_lines
    }

    fn next_frame(
        &mut self,
        line: std::result::Result<Option<String>, LinesCodecError>,
    ) -> std::result::Result<Step, LinesCodecError> {
        match line {
            Ok(Some(line)) => Ok(match classify_line(&line) {
                Some(frame) => Step::Yield(frame),
                None => Step::Skip,
            }),
            Ok(None) => Ok(Step::NeedMore),
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                self.dropped_lines += 1;
                tracing::warn!(
                    "[☁️  -> ⚙️ ] Oversized SSE line skipped (limit {} bytes)",
                    self.lines.max_length()
                );
                Ok(Step::Skip)
            }
            Err(LinesCodecError::Io(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                self.dropped_lines += 1;
                tracing::warn!("[☁️  -> ⚙️ ] Non UTF-8 SSE line skipped: {}", e);
                Ok(Step::Skip)
            }
            Err(e) => Err(e),
        }
    }
}

impl Default for SseFrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

enum Step {
    Yield(Frame),
    Skip,
    NeedMore,
}

impl Decoder for SseFrameCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Frame>, Self::Error> {
        loop {
            let line = self.lines.decode(src);
            match self.next_frame(line)? {
                Step::Yield(frame) => return Ok(Some(frame)),
                Step::Skip => continue,
                Step::NeedMore => return Ok(None),
            }
        }
    }

    fn decode_eof(
        &mut self,
        src: &mut BytesMut,
    ) -> std::result::Result<Option<Frame>, Self::Error> {
        loop {
            let line = self.lines.decode_eof(src);
            match self.next_frame(line)? {
                Step::Yield(frame) => return Ok(Some(frame)),
                Step::Skip => continue,
                Step::NeedMore => return Ok(None),
            }
        }
    }
}

/// Maps one SSE line to a frame. Comments, `event:`/`id:` fields, keep-alives
/// and blank lines carry nothing for the decoder.
pub fn classify_line(line: &str) -> Option<Frame> {
    let data = line.strip_prefix(SSE_DATA_PREFIX)?;
    let data = data.strip_prefix(' ').unwrap_or(data);
    let data = data.trim_end();
    if data.is_empty() {
        return None;
    }
    if data == SSE_DONE_SENTINEL {
        tracing::debug!("[☁️  -> ⚙️ ] Stream end marker [DONE] received");
        return Some(Frame::Done);
    }
    Some(Frame::Payload(data.to_string()))
}

/// Frames over a chunked byte stream such as `reqwest::Response::bytes_stream`.
pub fn frame_stream<R>(body: R) -> FrameStream<R>
where
    R: Stream<Item = std::result::Result<Bytes, std::io::Error>>,
{
    FramedRead::new(StreamReader::new(body), SseFrameCodec::new())
}

pub fn frame_stream_with_max_length<R>(body: R, max_length: usize) -> FrameStream<R>
where
    R: Stream<Item = std::result::Result<Bytes, std::io::Error>>,
{
    FramedRead::new(
        StreamReader::new(body),
        SseFrameCodec::with_max_length(max_length),
    )
}
