//! Transport implementations of the `LlmClient` trait.
//!
//! Applications can use these directly or implement their own.

#[cfg(feature = "openai")]
mod openai;

#[cfg(feature = "openai")]
pub use openai::OpenAiChat;
