//! Reasoning-service clients for buildloop.
//!
//! All providers implement the `buildloop_core::Provider` trait.

pub mod anthropic;

pub use anthropic::AnthropicProvider;
