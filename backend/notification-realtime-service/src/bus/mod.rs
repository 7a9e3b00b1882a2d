pub mod bridge;
pub mod publisher;

pub use bridge::{BusPayload, BusSubscriber, BusSubscription, EventBusBridge};
pub use publisher::BusPublisher;
