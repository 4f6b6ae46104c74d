//! Observability
//!
//! Structured JSON logging of typed events, plus scopes that log the begin
//! and end of a unit of work.
//!
//! # Principles
//!
//! 1. Observability is read-only and never changes a result
//! 2. Logging is synchronous, one line per event
//! 3. Output is deterministic: fixed key order
//!
//! ```ignore
//! use docquery::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::PipelineLowered, &[("collection", "Book"), ("stages", "4")]);
//! ```

mod events;
mod logger;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use scope::{ObservationScope, Timer};

/// Log an event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log an event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
