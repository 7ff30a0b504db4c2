use crate::arguments::{parse_arguments_object, Arguments};
use crate::constants::UNKNOWN_TOOL_NAME;
use crate::dedup::DedupRegistry;
use crate::delta::ToolCallFragment;
use crate::types::{ChatDeltaError, EmittedEvent, Result, ToolCallId};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Arguments,
}

impl From<CompletedToolCall> for EmittedEvent {
    fn from(call: CompletedToolCall) -> Self {
        EmittedEvent::ToolCall {
            id: call.id,
            name: call.name,
            arguments: call.arguments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingToolCall {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub argument_text: String,
}

impl PendingToolCall {
    fn new(index: u32) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    fn resolved_name(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_TOOL_NAME)
    }

    /// Terminal-flush interpretation of the buffer. A named call with no
    /// argument text is a zero-argument call; a bare index is nothing at all.
    fn finalize(&self) -> Finalized {
        if self.argument_text.trim().is_empty() {
            return match self.name {
                Some(_) => Finalized::Valid(Arguments::new()),
                None => Finalized::Empty,
            };
        }
        match parse_arguments_object(&self.argument_text) {
            Some(arguments) => Finalized::Valid(arguments),
            None => Finalized::Invalid,
        }
    }
}

enum Finalized {
    Valid(Arguments),
    Empty,
    Invalid,
}

/// Assembles index-keyed structured tool-call fragments into complete calls.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: BTreeMap<u32, PendingToolCall>,
    completed: HashSet<u32>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one fragment. Returns the call once its arguments form a complete
    /// object and it has not been emitted by either channel before.
    pub fn push(
        &mut self,
        fragment: ToolCallFragment,
        dedup: &mut DedupRegistry,
    ) -> Option<CompletedToolCall> {
        if self.completed.contains(&fragment.index) {
            tracing::trace!(
                "[ACCUMULATOR] Ignoring fragment for completed index {}",
                fragment.index
            );
            return None;
        }

        let entry = self
            .pending
            .entry(fragment.index)
            .or_insert_with(|| PendingToolCall::new(fragment.index));
        if entry.id.is_none() {
            entry.id = fragment.id;
        }
        if entry.name.is_none() {
            if let Some(name) = fragment.name {
                tracing::debug!("[ACCUMULATOR] Tool call {} name: {}", fragment.index, name);
                entry.name = Some(name);
            }
        }
        if let Some(arguments) = fragment.arguments {
            tracing::trace!(
                "[ACCUMULATOR] Tool call {} arguments delta: {} bytes (total: {} -> {})",
                fragment.index,
                arguments.len(),
                entry.argument_text.len(),
                entry.argument_text.len() + arguments.len()
            );
            entry.argument_text.push_str(&arguments);
        }

        let arguments = parse_arguments_object(&entry.argument_text)?;
        self.complete(fragment.index, arguments, dedup)
    }

    /// The server declared the turn finished with tool calls: every pending
    /// index must now hold a complete object.
    pub fn finish_tool_calls(&mut self, dedup: &mut DedupRegistry) -> Result<Vec<CompletedToolCall>> {
        let mut ready = Vec::new();
        for (index, call) in &self.pending {
            match call.finalize() {
                Finalized::Valid(arguments) => ready.push((*index, arguments)),
                Finalized::Empty => {}
                Finalized::Invalid => {
                    tracing::error!(
                        "[ACCUMULATOR] Tool call {} ({}) incomplete at tool_calls finish: {} bytes of arguments",
                        index,
                        call.resolved_name(),
                        call.argument_text.len()
                    );
                    return Err(ChatDeltaError::InvalidToolCallPayload {
                        index: *index,
                        name: call.resolved_name().to_string(),
                        reason: format!(
                            "arguments are not a complete JSON object ({} bytes)",
                            call.argument_text.len()
                        ),
                    }
                    .into());
                }
            }
        }

        let emitted = ready
            .into_iter()
            .filter_map(|(index, arguments)| self.complete(index, arguments, dedup))
            .collect();
        self.pending.clear();
        Ok(emitted)
    }

    /// Normal stop or end of stream: emit what is valid, drop the rest.
    pub fn flush(&mut self, dedup: &mut DedupRegistry) -> Vec<CompletedToolCall> {
        let pending = std::mem::take(&mut self.pending);
        let mut emitted = Vec::new();
        for (index, call) in pending {
            match call.finalize() {
                Finalized::Valid(arguments) => {
                    self.pending.insert(index, call);
                    if let Some(done) = self.complete(index, arguments, dedup) {
                        emitted.push(done);
                    }
                }
                Finalized::Empty => {}
                Finalized::Invalid => {
                    tracing::warn!(
                        "[ACCUMULATOR] Dropping dangling tool call {} ({}) with {} bytes of incomplete arguments",
                        index,
                        call.resolved_name(),
                        call.argument_text.len()
                    );
                }
            }
        }
        self.pending.clear();
        emitted
    }

    fn complete(
        &mut self,
        index: u32,
        arguments: Arguments,
        dedup: &mut DedupRegistry,
    ) -> Option<CompletedToolCall> {
        let call = self.pending.remove(&index)?;
        self.completed.insert(index);

        let name = call.resolved_name().to_string();
        if !dedup.claim_arguments(&name, &arguments) {
            tracing::debug!(
                "[ACCUMULATOR] Duplicate tool call {} ({}) suppressed",
                index,
                name
            );
            return None;
        }

        let id = match call.id {
            Some(id) => id,
            None => {
                let id = ToolCallId::new().0;
                tracing::debug!(
                    "[ACCUMULATOR] Tool call {} had no id; generated {}",
                    index,
                    id
                );
                id
            }
        };
        Some(CompletedToolCall {
            id,
            name,
            arguments,
        })
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingToolCall> {
        self.pending.values()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn is_completed(&self, index: u32) -> bool {
        self.completed.contains(&index)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.completed.clear();
    }
}
