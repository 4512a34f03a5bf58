//! Wire formats for provider communication.

pub mod anthropic;
pub mod openai;
