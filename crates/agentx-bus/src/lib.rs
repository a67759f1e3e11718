//! In-process event bus for AgentX.
//!
//! Every component that wants to observe agents (transports, loggers, other
//! agents) talks to the [`EventBus`]:
//!
//! - `on` / `on_many` / `on_any` / `once` subscribe with optional priority and filter
//! - `emit` dispatches synchronously, highest priority first
//! - `request` sends a `<verb>_request` and waits for the matching `<verb>_response`

pub mod bus;
pub mod error;
pub mod event;
pub mod subscription;
pub mod view;

pub use bus::EventBus;
pub use error::{BusError, Result};
pub use event::{
    BusEvent, EventCategory, EventContext, EventIntent, EventSource, REQUEST_ID_KEY,
    response_type_for,
};
pub use subscription::{EventFilter, EventHandler, SubscribeOptions, Topic, Unsubscribe};
pub use view::{EventConsumer, EventProducer};
