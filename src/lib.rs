pub mod accumulator;
pub mod arguments;
pub mod client;
pub mod constants;
pub mod dedup;
pub mod delta;
pub mod frames;
pub mod inline;
pub mod logging;
pub mod main_helper;
pub mod redaction_layer;
pub mod session;
pub mod str_utils;
pub mod token_counting;
pub mod types;

pub use types::*;

pub use client::{ChatClient, ChatMessage, ChatRequest, ClientConfig};
pub use session::Session;
