//! Inline tool-call multiplexer.
//!
//! Some backends write tool calls into ordinary text content:
//!
//! `<|tool_call_begin|>name[:index]<|tool_call_argument_begin|>{json}<|tool_call_end|>`
//!
//! Markers may be split at any byte offset across chunks. The parser keeps the
//! unconsumed tail in `carryover` and splits each chunk into visible text and
//! tool calls without reordering the text around them.

use crate::arguments::{parse_arguments_object, Arguments};
use crate::constants::{
    MAX_INLINE_HEADER_BYTES, STRIPPED_MARKERS, TOOL_CALL_ARGUMENT_BEGIN, TOOL_CALL_BEGIN,
    TOOL_CALL_END, UNKNOWN_TOOL_NAME,
};
use crate::dedup::DedupRegistry;
use crate::str_utils::{partial_suffix_len, partial_suffix_len_any, snippet, strip_tokens};
use crate::types::{EmittedEvent, ToolCallId};
use lazy_static::lazy_static;
use regex::Regex;

const HEADER_DELIMITERS: &[&str] = &[TOOL_CALL_ARGUMENT_BEGIN, TOOL_CALL_END];

lazy_static! {
    static ref HEADER_REGEX: Regex =
        Regex::new(r"^([A-Za-z0-9_.\-]+)(?::(\d+))?$").expect("Invalid inline header regex");
}

/// `name[:index]` from the text between the begin marker and its delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineHeader {
    pub name: Option<String>,
    pub declared_index: Option<u32>,
}

pub fn parse_header(raw: &str) -> InlineHeader {
    let trimmed = raw.trim();
    let Some(caps) = HEADER_REGEX.captures(trimmed) else {
        tracing::debug!("[INLINE] Unrecognized tool call header: {:?}", snippet(trimmed, 80));
        return InlineHeader::default();
    };
    InlineHeader {
        name: caps.get(1).map(|m| m.as_str().to_string()),
        declared_index: caps.get(2).and_then(|m| m.as_str().parse().ok()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InlineCall {
    pub name: Option<String>,
    pub declared_index: Option<u32>,
    pub argument_text: String,
    pub already_emitted_speculative: bool,
}

impl InlineCall {
    fn from_header(header: InlineHeader) -> Self {
        Self {
            name: header.name,
            declared_index: header.declared_index,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    ArgumentBegin,
    End,
}

/// Per-session parser state. `active` is `Some` while capturing arguments;
/// `discarding` swallows an abandoned call up to its end marker.
#[derive(Debug, Default)]
pub struct InlineParserState {
    carryover: String,
    active: Option<InlineCall>,
    discarding: bool,
}

impl InlineParserState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn carryover(&self) -> &str {
        &self.carryover
    }

    pub fn active(&self) -> Option<&InlineCall> {
        self.active.as_ref()
    }

    pub fn is_discarding(&self) -> bool {
        self.discarding
    }

    /// Feeds one text fragment; returns visible text and completed calls in source order.
    pub fn push(&mut self, chunk: &str, dedup: &mut DedupRegistry) -> Vec<EmittedEvent> {
        let mut out = Vec::new();
        let mut buffer = std::mem::take(&mut self.carryover);
        buffer.push_str(chunk);

        let mut pos = 0;
        while pos <= buffer.len() {
            let rest = &buffer[pos..];

            if self.discarding {
                match rest.find(TOOL_CALL_END) {
                    Some(end) => {
                        self.discarding = false;
                        pos += end + TOOL_CALL_END.len();
                        continue;
                    }
                    None => {
                        let keep = partial_suffix_len(rest, TOOL_CALL_END);
                        self.carryover = rest[rest.len() - keep..].to_string();
                        break;
                    }
                }
            }

            if self.active.is_some() {
                match rest.find(TOOL_CALL_END) {
                    Some(end) => {
                        self.append_arguments(&rest[..end], dedup, &mut out);
                        self.close_call(dedup, &mut out);
                        pos += end + TOOL_CALL_END.len();
                        continue;
                    }
                    None => {
                        let take = rest.len() - partial_suffix_len(rest, TOOL_CALL_END);
                        self.append_arguments(&rest[..take], dedup, &mut out);
                        self.carryover = rest[take..].to_string();
                        break;
                    }
                }
            }

            let Some(start) = rest.find(TOOL_CALL_BEGIN) else {
                let take = rest.len() - partial_suffix_len_any(rest, STRIPPED_MARKERS);
                push_text(&rest[..take], &mut out);
                self.carryover = rest[take..].to_string();
                break;
            };

            push_text(&rest[..start], &mut out);
            let header_start = start + TOOL_CALL_BEGIN.len();
            let after = &rest[header_start..];

            let delimiter = find_delimiter(after);
            let header_len = match delimiter {
                Some((_, at)) => at,
                None => after.len() - partial_suffix_len_any(after, HEADER_DELIMITERS),
            };
            if header_len > MAX_INLINE_HEADER_BYTES {
                tracing::debug!(
                    "[INLINE] Header exceeded {} bytes; dropping the call through its end marker",
                    MAX_INLINE_HEADER_BYTES
                );
                self.discarding = true;
                pos += header_start;
                continue;
            }

            match delimiter {
                None => {
                    // Wait for the delimiter; the begin marker is re-scanned next time.
                    self.carryover = rest[start..].to_string();
                    break;
                }
                Some((Delimiter::End, at)) => {
                    let header = parse_header(&after[..at]);
                    emit_call(
                        header.name,
                        header.declared_index,
                        Arguments::new(),
                        dedup,
                        &mut out,
                    );
                    pos += header_start + at + TOOL_CALL_END.len();
                }
                Some((Delimiter::ArgumentBegin, at)) => {
                    let header = parse_header(&after[..at]);
                    tracing::trace!("[INLINE] Capturing arguments for {:?}", header.name);
                    self.active = Some(InlineCall::from_header(header));
                    pos += header_start + at + TOOL_CALL_ARGUMENT_BEGIN.len();
                }
            }
        }

        out
    }

    /// End of stream: one last parse of an unclosed call, flush held-back text,
    /// drop an unfinished header. State is cleared afterwards.
    pub fn finish(&mut self, dedup: &mut DedupRegistry) -> Vec<EmittedEvent> {
        let mut out = Vec::new();
        let carryover = std::mem::take(&mut self.carryover);

        if self.discarding {
            tracing::debug!("[INLINE] Stream ended inside an abandoned tool call");
        } else if let Some(call) = self.active.take() {
            if !call.already_emitted_speculative {
                match parse_arguments_object(&call.argument_text) {
                    Some(arguments) => {
                        emit_call(call.name, call.declared_index, arguments, dedup, &mut out)
                    }
                    None => tracing::debug!(
                        "[INLINE] Dropping unterminated tool call {:?} ({} bytes of arguments)",
                        call.name,
                        call.argument_text.len()
                    ),
                }
            }
        } else if carryover.starts_with(TOOL_CALL_BEGIN) {
            tracing::debug!(
                "[INLINE] Dropping unfinished tool call header: {:?}",
                snippet(&carryover, 80)
            );
        } else {
            push_text(&carryover, &mut out);
        }

        self.reset();
        out
    }

    pub fn reset(&mut self) {
        self.carryover.clear();
        self.active = None;
        self.discarding = false;
    }

    fn append_arguments(&mut self, text: &str, dedup: &mut DedupRegistry, out: &mut Vec<EmittedEvent>) {
        let Some(call) = self.active.as_mut() else {
            return;
        };
        if call.already_emitted_speculative || text.is_empty() {
            return;
        }
        call.argument_text.push_str(text);

        if let Some(arguments) = parse_arguments_object(&call.argument_text) {
            call.already_emitted_speculative = true;
            let (name, index) = (call.name.clone(), call.declared_index);
            tracing::debug!("[INLINE] Arguments complete before end marker for {:?}", name);
            emit_call(name, index, arguments, dedup, out);
        }
    }

    fn close_call(&mut self, dedup: &mut DedupRegistry, out: &mut Vec<EmittedEvent>) {
        let Some(call) = self.active.take() else {
            return;
        };
        if call.already_emitted_speculative {
            return;
        }
        let arguments = if call.argument_text.trim().is_empty() {
            Some(Arguments::new())
        } else {
            parse_arguments_object(&call.argument_text)
        };
        match arguments {
            Some(arguments) => emit_call(call.name, call.declared_index, arguments, dedup, out),
            None => tracing::debug!(
                "[INLINE] Dropping malformed tool call {:?}: {:?}",
                call.name,
                snippet(&call.argument_text, 120)
            ),
        }
    }
}

fn emit_call(
    name: Option<String>,
    declared_index: Option<u32>,
    arguments: Arguments,
    dedup: &mut DedupRegistry,
    out: &mut Vec<EmittedEvent>,
) {
    let name = name.unwrap_or_else(|| UNKNOWN_TOOL_NAME.to_string());
    let is_new = match declared_index {
        Some(index) => dedup.claim_indexed(&name, index, &arguments),
        None => dedup.claim_arguments(&name, &arguments),
    };
    if !is_new {
        tracing::debug!("[INLINE] Duplicate tool call {} suppressed", name);
        return;
    }
    out.push(EmittedEvent::ToolCall {
        id: ToolCallId::new().0,
        name,
        arguments,
    });
}

fn find_delimiter(text: &str) -> Option<(Delimiter, usize)> {
    let argument_begin = text
        .find(TOOL_CALL_ARGUMENT_BEGIN)
        .map(|at| (Delimiter::ArgumentBegin, at));
    let end = text.find(TOOL_CALL_END).map(|at| (Delimiter::End, at));
    match (argument_begin, end) {
        (Some(a), Some(e)) => Some(if a.1 < e.1 { a } else { e }),
        (a, e) => a.or(e),
    }
}

fn push_text(text: &str, out: &mut Vec<EmittedEvent>) {
    let visible = strip_tokens(text, STRIPPED_MARKERS);
    if visible.is_empty() {
        return;
    }
    // Adjacent visible fragments from one chunk are merged.
    if let Some(EmittedEvent::Text { content }) = out.last_mut() {
        content.push_str(&visible);
        return;
    }
    out.push(EmittedEvent::text(visible));
}
