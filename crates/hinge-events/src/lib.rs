//! Priority-ordered, filterable publish/subscribe for lifecycle events, with
//! an optional bounded history that can be replayed to late subscribers.

mod bus;
mod subscription;

pub use bus::{EventBus, EventBusConfig, ReplayOptions};
pub use subscription::{
    AsyncEventHandler, DispatchError, ErrorHandler, EventHandler, HandlerError, Predicate,
    SubscribeOptions, SubscriptionHandle, SubscriptionInfo, Transform,
};
