//! Decoding session.
//!
//! A `Session` owns every piece of per-request decoder state: the structured
//! accumulator, the inline parser, the dedup registry and the counters. Frames
//! are processed strictly in arrival order; the only suspension point is the wait
//! for the next frame.

use crate::accumulator::ToolCallAccumulator;
use crate::dedup::DedupRegistry;
use crate::delta::{parse_provider_line, Delta, LineEvent};
use crate::frames::Frame;
use crate::inline::InlineParserState;
use crate::logging::StreamMetric;
use crate::str_utils::snippet;
use crate::types::*;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct Session {
    options: SessionOptions,
    accumulator: ToolCallAccumulator,
    inline: InlineParserState,
    dedup: DedupRegistry,
    metrics: StreamMetric,
    output_tokens: usize,
    events_emitted: usize,
    finish_reason: Option<FinishReason>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Running `ceil(bytes / 4)` estimate over text and argument fragments.
    pub fn output_tokens(&self) -> usize {
        self.output_tokens
    }

    pub fn finish_reason(&self) -> Option<&FinishReason> {
        self.finish_reason.as_ref()
    }

    pub fn accumulator(&self) -> &ToolCallAccumulator {
        &self.accumulator
    }

    pub fn inline_state(&self) -> &InlineParserState {
        &self.inline
    }

    /// Decodes one `data:` payload, appending produced events to `out`.
    /// Unparseable and error payloads are dropped; only a broken structured
    /// call at the tool-calls finish is fatal.
    pub fn process_payload(&mut self, payload: &str, out: &mut Vec<EmittedEvent>) -> Result<()> {
        match parse_provider_line(payload) {
            LineEvent::Delta(delta) => self.process_delta(delta, out),
            LineEvent::Error(err) => {
                self.metrics.record_dropped();
                tracing::warn!(
                    "[☁️  -> ⚙️ ] Upstream error object in stream (ignored): {}",
                    snippet(&err.to_string(), 300)
                );
                Ok(())
            }
            LineEvent::Unknown => {
                self.metrics.record_dropped();
                Ok(())
            }
        }
    }

    pub fn process_delta(&mut self, delta: Delta, out: &mut Vec<EmittedEvent>) -> Result<()> {
        self.metrics.record_delta(&delta);
        self.output_tokens += delta.estimated_output_tokens();
        let first_new = out.len();

        let result = self.apply_delta(delta, out);

        let produced = &out[first_new..];
        self.events_emitted += produced.len();
        self.metrics.record_events(produced);

        if result.is_err() {
            self.reset();
        }
        result
    }

    fn apply_delta(&mut self, delta: Delta, out: &mut Vec<EmittedEvent>) -> Result<()> {
        if let Some(reasoning) = delta.reasoning {
            if self.options.reasoning {
                out.push(EmittedEvent::Reasoning {
                    content: reasoning.text,
                    id: reasoning.id,
                    metadata: reasoning.metadata,
                });
            }
        }

        if let Some(text) = delta.text {
            out.extend(self.inline.push(&text, &mut self.dedup));
        }

        for fragment in delta.tool_calls {
            if let Some(call) = self.accumulator.push(fragment, &mut self.dedup) {
                tracing::debug!("[⚙️ ] Structured tool call complete: {}", call.name);
                out.push(call.into());
            }
        }

        if let Some(reason) = delta.finish_reason {
            tracing::debug!("[☁️  -> ⚙️ ] Finish reason: {}", reason);
            match &reason {
                FinishReason::ToolCallsRequested => {
                    let calls = self.accumulator.finish_tool_calls(&mut self.dedup)?;
                    out.extend(calls.into_iter().map(EmittedEvent::from));
                }
                FinishReason::NormalStop | FinishReason::Other(_) => {
                    let calls = self.accumulator.flush(&mut self.dedup);
                    out.extend(calls.into_iter().map(EmittedEvent::from));
                }
            }
            self.finish_reason = Some(reason);
        }

        Ok(())
    }

    /// End of stream: final opportunistic flush of both channels, then reset.
    pub fn finish(&mut self) -> (Vec<EmittedEvent>, StreamSummary) {
        let mut out: Vec<EmittedEvent> = self.inline.finish(&mut self.dedup);
        out.extend(
            self.accumulator
                .flush(&mut self.dedup)
                .into_iter()
                .map(EmittedEvent::from),
        );
        self.events_emitted += out.len();
        self.metrics.record_events(&out);
        self.metrics.log_summary(self.output_tokens);

        let summary = self.summary(StreamStatus::Completed);
        self.reset();
        (out, summary)
    }

    /// Abandons the stream without flushing anything.
    pub fn cancel(&mut self) -> StreamSummary {
        tracing::info!(
            "[⚙️ ] Session cancelled; discarding {} pending tool call(s)",
            self.accumulator.pending().count() + usize::from(self.inline.active().is_some())
        );
        let summary = self.summary(StreamStatus::Cancelled);
        self.reset();
        summary
    }

    fn summary(&self, status: StreamStatus) -> StreamSummary {
        StreamSummary {
            status,
            finish_reason: self.finish_reason.clone(),
            output_tokens: self.output_tokens,
            events_emitted: self.events_emitted,
        }
    }

    /// Clears all per-request state so the instance can serve the next request.
    pub fn reset(&mut self) {
        self.accumulator.clear();
        self.inline.reset();
        self.dedup.clear();
        self.metrics = StreamMetric::new();
        self.output_tokens = 0;
        self.events_emitted = 0;
        self.finish_reason = None;
    }

    /// Drives the session over a frame stream, delivering events as they are produced.
    /// A closed receiver is handled like cancellation.
    pub async fn run<S>(
        &mut self,
        mut frames: S,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<EmittedEvent>,
    ) -> Result<StreamSummary>
    where
        S: Stream<Item = std::result::Result<Frame, LinesCodecError>> + Unpin,
    {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(self.cancel()),
                next = frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    self.reset();
                    return Err(line_error(e));
                }
                None => {
                    tracing::debug!("[☁️  -> ⚙️ ] Stream closed without [DONE]");
                    break;
                }
            };

            let payload = match frame {
                Frame::Done => break,
                Frame::Payload(payload) => payload,
            };

            let mut out = Vec::new();
            let result = self.process_payload(&payload, &mut out);
            // Events produced before a fatal error are still delivered.
            if !deliver(out, tx, cancel).await {
                return Ok(self.cancel());
            }
            result?;
        }

        let (events, summary) = self.finish();
        if !deliver(events, tx, cancel).await {
            tracing::trace!("Final flush not delivered; stream abandoned");
            return Ok(StreamSummary {
                status: StreamStatus::Cancelled,
                ..summary
            });
        }
        Ok(summary)
    }
}

/// Sends events in order. False once the receiver is gone or `cancel` fires,
/// including while waiting on a full channel.
async fn deliver(
    events: Vec<EmittedEvent>,
    tx: &mpsc::Sender<EmittedEvent>,
    cancel: &CancellationToken,
) -> bool {
    for event in events {
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            sent = tx.send(event) => sent,
        };
        if sent.is_err() {
            tracing::trace!("Client disconnected, stopping stream");
            return false;
        }
    }
    true
}

fn line_error(e: LinesCodecError) -> ObservedError {
    tracing::error!("[☁️  -> ⚙️ ] Line Parse Error: {}", e);
    let io_err = match e {
        LinesCodecError::Io(io) => io,
        LinesCodecError::MaxLineLengthExceeded => std::io::Error::other("Max line length exceeded"),
    };
    ChatDeltaError::Io(io_err).into()
}
