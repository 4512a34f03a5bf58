//! The agent loop
//!
//! - `orchestrator` - the loop controller driving generate/execute cycles
//! - `invoker` - one generation with cancellation, retry, and stream fallback
//! - `stream` - stream consumption and per-provider tool-call detection
//! - `history` - conversation window pruning
//! - `retry` - backoff for transient provider errors
//! - `loop_events` - the event/input channel vocabulary

pub mod history;
pub mod invoker;
pub mod loop_events;
pub mod orchestrator;
pub mod retry;
pub mod stream;

pub use invoker::{CancelListener, InvokeResult, Invoker};
pub use loop_events::{LoopEvent, LoopInput};
pub use orchestrator::{AgentConfig, AgentLoop, AgentServices, STEP_LIMIT_MESSAGE};
pub use retry::RetryPolicy;
pub use stream::DetectionStrategy;
