#![deny(missing_docs)]
//! Image relay library.
//!
//! Uploads images received from chat users to sm.ms, pairs the resulting URL
//! with the same user's text and forwards the combined prompt to a downstream bot.

/// Telegram host adapter.
pub mod bot;
/// Configuration management.
pub mod config;
/// Inbound events, session context and outbound replies.
pub mod event;
/// Downstream delivery of paired messages.
pub mod forward;
/// OpenAI-compatible downstream bot.
pub mod llm;
/// Per-user pairing of images and text.
pub mod pairing;
/// Event routing for the image uploader component.
pub mod plugin;
/// Image hosting client.
pub mod upload;
/// Utility functions.
pub mod utils;
