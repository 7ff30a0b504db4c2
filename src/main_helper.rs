use crate::client::{ChatMessage, ClientConfig};
use crate::constants::{DEFAULT_ENDPOINT, DEFAULT_MAX_INPUT_TOKENS, DEFAULT_MODEL};
use crate::types::*;
use clap::Parser;
use colored::Colorize;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Prompt sent as the single user message
    pub prompt: String,
    #[arg(long, default_value = DEFAULT_ENDPOINT)]
    pub endpoint: String,
    #[arg(long, default_value = DEFAULT_MODEL)]
    pub model: String,
    #[arg(long)]
    pub system: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_INPUT_TOKENS)]
    pub max_input_tokens: usize,
    #[arg(long)]
    pub max_tokens: Option<u32>,
    #[arg(long, default_value_t = 300)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    /// Show reasoning fragments from thinking models
    #[arg(long, default_value_t = false)]
    pub reasoning: bool,
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
}

impl Args {
    pub fn client_config(&self, api_key: String) -> ClientConfig {
        ClientConfig {
            endpoint: self.endpoint.clone(),
            api_key,
            model: self.model.clone(),
            max_input_tokens: self.max_input_tokens,
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            reasoning: self.reasoning,
        }
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(system) = &self.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.push(ChatMessage::user(self.prompt.clone()));
        messages
    }
}

/// Terminal rendering of one event. Text is passed through untouched.
pub fn render_event(event: &EmittedEvent) -> String {
    match event {
        EmittedEvent::Text { content } => content.clone(),
        EmittedEvent::Reasoning { content, .. } => content.dimmed().to_string(),
        EmittedEvent::ToolCall {
            id,
            name,
            arguments,
        } => {
            let args = match serde_json::to_string_pretty(arguments) {
                Ok(s) => s,
                Err(_) => "{}".to_string(),
            };
            format!("\n{} {} ({})\n{}\n", "⚙ tool call".cyan().bold(), name.bold(), id, args)
        }
    }
}

pub fn render_summary(summary: &StreamSummary) -> String {
    let finish = match &summary.finish_reason {
        Some(reason) => reason.to_string(),
        None => "none".to_string(),
    };
    let status = match summary.status {
        StreamStatus::Completed => "completed".green(),
        StreamStatus::Cancelled => "cancelled".yellow(),
    };
    format!(
        "[{}] finish: {} | events: {} | ~{} output tokens",
        status, finish, summary.events_emitted, summary.output_tokens
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Role;

    #[test]
    fn test_args_build_config_and_messages() {
        let args = Args::parse_from([
            "chatdelta",
            "--system",
            "be brief",
            "--reasoning",
            "--max-input-tokens",
            "64",
            "hello",
        ]);
        let config = args.client_config("key".to_string());
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.max_input_tokens, 64);
        assert!(args.session_options().reasoning);

        let messages = args.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "hello");
    }

    #[test]
    fn test_render_text_is_verbatim() {
        assert_eq!(render_event(&EmittedEvent::text("a\nb")), "a\nb");
    }

    #[test]
    fn test_render_summary_mentions_tokens() {
        colored::control::set_override(false);
        let line = render_summary(&StreamSummary {
            status: StreamStatus::Completed,
            finish_reason: Some(FinishReason::ToolCallsRequested),
            output_tokens: 12,
            events_emitted: 3,
        });
        assert_eq!(
            line,
            "[completed] finish: tool_calls | events: 3 | ~12 output tokens"
        );
    }
}
