//! # mediator-core
//!
//! Hierarchical in-process publish/subscribe.
//!
//! This crate provides:
//!
//! - **Subscriber** - A registered callback with its priority, predicate and context
//! - **Channel** - A node in the namespace tree holding ordered subscribers
//! - **Mediator** - Facade resolving `a:b:c` namespaces and routing calls
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Publisher  │────▶│  Mediator   │────▶│ root Channel│
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                                                │
//!                                    ┌───────────┴───────────┐
//!                                    ▼                       ▼
//!                             ┌─────────────┐         ┌─────────────┐
//!                             │ Channel "a" │         │ Channel "b" │
//!                             └─────────────┘         └─────────────┘
//! ```
//!
//! Publishing on a channel invokes its own subscribers, then recurses into
//! every child, so `publish("a", ..)` also reaches subscribers of `a:x`.
//!
//! ## Example
//!
//! ```rust
//! use mediator_core::{args, Mediator};
//!
//! let mediator = Mediator::new();
//! let sub = mediator.subscribe("chat:lobby", |_ctx, args| {
//!     println!("got {:?}", args);
//!     Ok(())
//! });
//!
//! let report = mediator.publish("chat", &args!["hello", 42]).unwrap();
//! assert_eq!(report.delivered, 1);
//!
//! mediator.remove("chat:lobby", sub.id());
//! ```

pub mod channel;
pub mod config;
pub mod error;
pub mod mediator;
pub mod metrics;
pub mod subscriber;

pub use channel::{Channel, ChannelId, ChannelInfo, PublishReport, DEFAULT_DELIMITER};
pub use config::{FailurePolicy, MediatorConfig};
pub use error::{CallbackError, MediatorError};
pub use mediator::{Mediator, MediatorStats};
pub use serde_json::Value;
pub use subscriber::{
    Callback, Context, Predicate, SubscribeOptions, Subscriber, SubscriberId, SubscriberKey,
    SubscriberUpdate,
};

/// Package a list of arguments for [`Mediator::publish`].
///
/// Each argument is converted with `Value::from`, preserving order and count.
///
/// ```rust
/// use mediator_core::{args, Value};
///
/// let packed: Vec<Value> = args![1, "two", true];
/// assert_eq!(packed.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::Value>::new()
    };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Value::from($arg)),+]
    };
}
