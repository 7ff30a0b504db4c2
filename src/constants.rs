/// SSE line prefix carrying an event payload
pub const SSE_DATA_PREFIX: &str = "data:";

/// Payload value that terminates the stream
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Upper bound for a single SSE line; longer lines are skipped
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Inline tool-call sub-protocol markers
pub const TOOL_CALL_BEGIN: &str = "<|tool_call_begin|>";
pub const TOOL_CALL_ARGUMENT_BEGIN: &str = "<|tool_call_argument_begin|>";
pub const TOOL_CALL_END: &str = "<|tool_call_end|>";

/// Every token stripped from visible text: the call markers plus section
/// delimiters that carry no call semantics
pub const STRIPPED_MARKERS: &[&str] = &[
    TOOL_CALL_BEGIN,
    TOOL_CALL_ARGUMENT_BEGIN,
    TOOL_CALL_END,
    "<|tool_calls_section_begin|>",
    "<|tool_calls_section_end|>",
    "<|tool_call_section_begin|>",
    "<|tool_call_section_end|>",
];

/// A header longer than this without a delimiter is abandoned as plain text
pub const MAX_INLINE_HEADER_BYTES: usize = 256;

/// Name used when neither channel supplied one
pub const UNKNOWN_TOOL_NAME: &str = "unknown_tool";

/// Coarse bytes-per-token ratio for size estimates
pub const BYTES_PER_TOKEN: usize = 4;

/// Finish reasons as sent by OpenAI-compatible servers
pub const FINISH_STOP: &str = "stop";
pub const FINISH_TOOL_CALLS: &str = "tool_calls";
pub const FINISH_FUNCTION_CALL: &str = "function_call";

/// Environment variable holding the bearer token
pub const API_KEY_ENV: &str = "CHATDELTA_API_KEY";

pub const DEFAULT_ENDPOINT: &str = "https://api.moonshot.ai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "kimi-k2-0905-preview";
pub const DEFAULT_MAX_INPUT_TOKENS: usize = 128_000;
