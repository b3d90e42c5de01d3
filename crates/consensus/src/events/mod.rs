//! Topic-based pub/sub for consensus runtime events.

pub mod bus;
pub mod types;

pub use bus::{EventBus, FilteredReceiver, SharedEventBus};
pub use types::{
    agent_costs_topic, task_costs_topic, task_events_topic, Envelope, RuntimeEvent,
};
