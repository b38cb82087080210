//! Shared plumbing for the test harness: the topic-keyed event bus every
//! component publishes on, and logging initialisation.

pub mod event_bus;
pub mod structured_logging;

pub use event_bus::{BusEvent, EventBus, EventEnvelope, Topic};
pub use structured_logging::{
    init_structured_logging, LoggingConfig, OperationTimer, StructuredLogEntry,
};
