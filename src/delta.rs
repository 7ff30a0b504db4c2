use crate::str_utils::snippet;
use crate::token_counting::TokenEstimator;
use crate::types::{FinishReason, ProviderPulse, PulseDelta, Usage};

const REASONING_TEXT_KEYS: &[&str] = &["reasoning_content", "reasoning", "thought"];
const REASONING_METADATA_KEYS: &[&str] = &["reasoning_details", "signature"];
const MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningFragment {
    pub text: String,
    pub id: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallFragment {
    pub index: u32,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// One normalized unit of generated output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    pub text: Option<String>,
    pub reasoning: Option<ReasoningFragment>,
    pub tool_calls: Vec<ToolCallFragment>,
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
}

impl Delta {
    pub fn from_pulse(pulse: ProviderPulse) -> Self {
        let usage = pulse.usage;
        // n=1 streams: only the first choice carries output
        let Some(choice) = pulse.choices.into_iter().next() else {
            return Self {
                usage,
                ..Self::default()
            };
        };

        let reasoning = extract_reasoning(&choice.delta);
        let PulseDelta {
            content,
            tool_calls,
            ..
        } = choice.delta;

        let tool_calls = tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| {
                let (name, arguments) = match tc.function {
                    Some(f) => (non_empty(f.name), f.arguments.filter(|a| !a.is_empty())),
                    None => (None, None),
                };
                ToolCallFragment {
                    index: tc.index,
                    id: non_empty(tc.id),
                    name,
                    arguments,
                }
            })
            .collect();

        Self {
            text: content.filter(|c| !c.is_empty()),
            reasoning,
            tool_calls,
            finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
            usage,
        }
    }

    /// Output-size contribution of this delta's text and argument fragments.
    pub fn estimated_output_tokens(&self) -> usize {
        let text = self
            .text
            .as_deref()
            .map(TokenEstimator::estimate_text_tokens)
            .unwrap_or(0);
        let arguments: usize = self
            .tool_calls
            .iter()
            .filter_map(|tc| tc.arguments.as_deref())
            .map(TokenEstimator::estimate_text_tokens)
            .sum();
        text + arguments
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.reasoning.is_none()
            && self.tool_calls.is_empty()
            && self.finish_reason.is_none()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn extract_reasoning(delta: &PulseDelta) -> Option<ReasoningFragment> {
    let text = REASONING_TEXT_KEYS
        .iter()
        .filter_map(|k| delta.extra.get(*k))
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())?;

    let id = match delta.extra.get("reasoning_id").and_then(|v| v.as_str()) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => None,
    };
    let metadata = REASONING_METADATA_KEYS
        .iter()
        .filter_map(|k| delta.extra.get(*k))
        .find(|v| !v.is_null())
        .cloned();

    Some(ReasoningFragment {
        text: text.to_string(),
        id,
        metadata,
    })
}

#[derive(Debug)]
pub enum LineEvent {
    Delta(Delta),
    Error(serde_json::Value),
    Unknown,
}

/// Decodes one payload. Absent fields mean "no fragment of that kind";
/// anything that is not a JSON object of the expected shape is `Unknown`.
pub fn parse_provider_line(data: &str) -> LineEvent {
    if data.len() > MAX_PAYLOAD_BYTES {
        tracing::warn!(
            "[☁️  -> ⚙️ ] JSON chunk too large: {} bytes, dropped",
            data.len()
        );
        return LineEvent::Unknown;
    }
    match serde_json::from_str::<ProviderPulse>(data) {
        Ok(mut pulse) => {
            if let Some(err) = pulse.error.take() {
                return LineEvent::Error(err);
            }
            LineEvent::Delta(Delta::from_pulse(pulse))
        }
        Err(e) => {
            tracing::debug!(
                "[☁️  -> ⚙️ ] Unparseable payload ({}): {}",
                e,
                snippet(data, 200)
            );
            LineEvent::Unknown
        }
    }
}
