//! User hook subsystem
//!
//! - `events` - lifecycle event enumeration
//! - `config` - YAML config loading, merging, and matcher semantics
//! - `schemas` - subprocess stdin/stdout contracts
//! - `executor` - the engine that spawns hooks and merges results

pub mod config;
pub mod events;
pub mod executor;
pub mod schemas;

pub use config::{load_hook_config, matches_pattern, HookConfig, HookEntry, HookMatcher};
pub use events::HookEvent;
pub use executor::{HookEngine, HookSession};
pub use schemas::{CommonInput, HookOutput, HookPayload};
