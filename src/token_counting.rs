//! Token Counting Utility
//!
//! Coarse byte-based token estimates used for the output-size counter and the
//! pre-flight input budget check.

use crate::client::ChatRequest;
use crate::constants::BYTES_PER_TOKEN;

/// Estimator for token counts to avoid a tokenizer dependency.
pub struct TokenEstimator;

impl TokenEstimator {
    /// `ceil(bytes / 4)`; empty text costs nothing.
    pub fn estimate_text_tokens(text: &str) -> usize {
        text.len().div_ceil(BYTES_PER_TOKEN)
    }

    /// Estimate for an outgoing request: message bodies, tool schemas, and role overhead.
    pub fn estimate_request_tokens(request: &ChatRequest) -> usize {
        let mut tokens = 0;

        for message in &request.messages {
            tokens += Self::estimate_text_tokens(&message.content);
            tokens += Self::estimate_text_tokens(message.role.as_str());
        }

        if let Some(tools) = &request.tools {
            for tool in tools {
                tokens += Self::estimate_text_tokens(&tool.to_string());
            }
        }

        tokens
    }
}
