//! # litroute-llm
//!
//! Minimal client for OpenAI-compatible chat-completion endpoints, used to
//! classify attachment text.
//!
//! Two fixed prompts are provided:
//! - [`PromptKind::DocumentType`]: review, supporting information or main paper
//! - [`PromptKind::DuplicateCheck`]: whether numbered excerpts are the same work
//!
//! Replies are reduced to a [`Verdict`]: either a recognised [`Label`] or the
//! raw reply when it cannot be interpreted.
//!
//! ## Example
//!
//! ```ignore
//! use litroute_llm::{ChatClient, ChatConfig, PromptKind, Verdict};
//!
//! let client = ChatClient::new(ChatConfig::deepseek(api_key))?;
//! match client.classify(PromptKind::DocumentType, &text).await? {
//!     Verdict::Label(label) => println!("{label}"),
//!     Verdict::Unparseable(raw) => eprintln!("unexpected reply: {raw}"),
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod client;
mod error;
pub mod prompt;
pub mod types;

pub use client::{ChatClient, ChatConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
pub use error::{ApiErrorCode, Error, Result};
pub use prompt::{Label, PromptKind, Verdict, format_excerpts};
