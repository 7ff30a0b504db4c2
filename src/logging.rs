use crate::delta::Delta;
use crate::types::{EmittedEvent, Usage};
use std::panic;
use tracing::{error, info};

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-session counters, summarized once when the stream ends.
#[derive(Debug, Default, Clone)]
pub struct StreamMetric {
    pub frames: usize,
    pub dropped_frames: usize,
    pub text_bytes: usize,
    pub reasoning_bytes: usize,
    pub tool_fragments: usize,
    pub tool_names: Vec<String>,
    pub usage: Option<Usage>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delta(&mut self, delta: &Delta) {
        self.frames += 1;
        if let Some(text) = &delta.text {
            self.text_bytes += text.len();
        }
        if let Some(reasoning) = &delta.reasoning {
            self.reasoning_bytes += reasoning.text.len();
        }
        self.tool_fragments += delta.tool_calls.len();
        if let Some(usage) = &delta.usage {
            self.usage = Some(usage.clone());
        }
    }

    pub fn record_dropped(&mut self) {
        self.frames += 1;
        self.dropped_frames += 1;
    }

    pub fn record_events(&mut self, events: &[EmittedEvent]) {
        for event in events {
            if let EmittedEvent::ToolCall { name, .. } = event {
                self.tool_names.push(name.clone());
            }
        }
    }

    pub fn log_summary(&self, output_tokens: usize) {
        let tools_str = if self.tool_names.is_empty() {
            "0".to_string()
        } else {
            format!("{} ({})", self.tool_names.len(), self.tool_names.join(", "))
        };
        let usage_str = match &self.usage {
            Some(u) => format!(
                "Prompt: {}, Completion: {}, Total: {}",
                u.prompt_tokens, u.completion_tokens, u.total_tokens
            ),
            None => "Usage unavailable".to_string(),
        };

        info!(
            target: "flight_recorder",
            "[STREAM END] Frames: {} (dropped {}) | Tools: {} | Text: {} bytes | Thought: {} bytes | Est. output tokens: {} | {}",
            self.frames,
            self.dropped_frames,
            tools_str,
            self.text_bytes,
            self.reasoning_bytes,
            output_tokens,
            usage_str
        );
    }
}
