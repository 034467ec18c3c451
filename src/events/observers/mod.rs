//! Event Observers for the Pipeline
//!
//! Observers subscribe to the EventBus and process events for different
//! purposes:
//! - `logging`: Structured logging via tracing

pub mod logging;

pub use logging::LoggingObserver;
