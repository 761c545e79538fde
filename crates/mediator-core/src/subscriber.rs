//! Subscriber registrations.
//!
//! A subscriber is a callback plus the options and context it is invoked
//! with. Subscribers are addressed either by their generated id or by the
//! callback they were registered with, see [`SubscriberKey`].

use crate::error::CallbackError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

/// Receiver value passed to callbacks and predicates.
pub type Context = Value;

type CallbackFn = dyn Fn(&Context, &[Value]) -> Result<(), CallbackError> + Send + Sync;
type PredicateFn = dyn Fn(&Context, &[Value]) -> bool + Send + Sync;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a random subscriber ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SubscriberId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for SubscriberId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// A shared callback handle.
///
/// Clones refer to the same callback, and removal by callback compares
/// handles by pointer identity.
#[derive(Clone)]
pub struct Callback(Arc<CallbackFn>);

impl Callback {
    /// Wrap a closure as a callback.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wrap an infallible closure as a callback.
    pub fn infallible<F>(f: F) -> Self
    where
        F: Fn(&Context, &[Value]) + Send + Sync + 'static,
    {
        Self::new(move |ctx, args| {
            f(ctx, args);
            Ok(())
        })
    }

    /// Invoke the callback.
    ///
    /// # Errors
    ///
    /// Returns whatever error the wrapped closure returns.
    pub fn call(&self, context: &Context, args: &[Value]) -> Result<(), CallbackError> {
        (self.0)(context, args)
    }

    /// Check whether two handles refer to the same callback.
    #[must_use]
    pub fn ptr_eq(&self, other: &Callback) -> bool {
        // Compare data pointers only; vtable pointers may differ across codegen units.
        Arc::as_ptr(&self.0).cast::<()>() == Arc::as_ptr(&other.0).cast::<()>()
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:p})", Arc::as_ptr(&self.0))
    }
}

/// A shared predicate handle gating a subscriber's callback.
#[derive(Clone)]
pub struct Predicate(Arc<PredicateFn>);

impl Predicate {
    /// Wrap a closure as a predicate.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Evaluate the predicate.
    #[must_use]
    pub fn test(&self, context: &Context, args: &[Value]) -> bool {
        (self.0)(context, args)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Predicate({:p})", Arc::as_ptr(&self.0))
    }
}

/// Options recognised when subscribing.
#[derive(Debug, Clone, Default)]
pub struct SubscribeOptions {
    /// Insertion index in the channel's subscriber list. Out of range
    /// values are clamped; `None` appends.
    pub priority: Option<i64>,
    /// Gate deciding whether the callback runs for a given publish.
    pub predicate: Option<Predicate>,
}

impl SubscribeOptions {
    /// Create empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the insertion priority.
    #[must_use]
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Set the predicate.
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Context, &[Value]) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Predicate::new(predicate));
        self
    }
}

/// Key used to look up, reorder, or remove subscribers.
#[derive(Debug, Clone)]
pub enum SubscriberKey {
    /// Match by subscriber ID.
    Id(SubscriberId),
    /// Match by the registered callback.
    Callback(Callback),
}

impl From<SubscriberId> for SubscriberKey {
    fn from(id: SubscriberId) -> Self {
        Self::Id(id)
    }
}

impl From<Callback> for SubscriberKey {
    fn from(callback: Callback) -> Self {
        Self::Callback(callback)
    }
}

impl From<&Callback> for SubscriberKey {
    fn from(callback: &Callback) -> Self {
        Self::Callback(callback.clone())
    }
}

impl From<&Subscriber> for SubscriberKey {
    fn from(subscriber: &Subscriber) -> Self {
        Self::Id(subscriber.id)
    }
}

/// Partial replacement applied by [`Subscriber::update`].
#[derive(Debug, Clone, Default)]
pub struct SubscriberUpdate {
    /// Replacement callback.
    pub callback: Option<Callback>,
    /// Replacement context.
    pub context: Option<Context>,
    /// Replacement options.
    pub options: Option<SubscribeOptions>,
}

/// A registered callback with its invocation metadata.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    callback: Callback,
    /// Shared so that publish snapshots only bump a refcount.
    context: Arc<Context>,
    options: SubscribeOptions,
}

impl Subscriber {
    /// Create a subscriber with a fresh ID.
    ///
    /// A missing context defaults to an empty JSON object.
    #[must_use]
    pub fn new(callback: Callback, options: SubscribeOptions, context: Option<Context>) -> Self {
        Self {
            id: SubscriberId::generate(),
            callback,
            context: Arc::new(context.unwrap_or_else(|| Value::Object(serde_json::Map::new()))),
            options,
        }
    }

    /// Get the subscriber ID.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Get the callback.
    #[must_use]
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    /// Get the context.
    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Get the options.
    #[must_use]
    pub fn options(&self) -> &SubscribeOptions {
        &self.options
    }

    /// Key addressing this subscriber by ID.
    #[must_use]
    pub fn key(&self) -> SubscriberKey {
        SubscriberKey::Id(self.id)
    }

    /// Replace the supplied fields, leaving the rest unchanged.
    pub fn update(&mut self, update: SubscriberUpdate) {
        if let Some(callback) = update.callback {
            self.callback = callback;
        }
        if let Some(context) = update.context {
            self.context = Arc::new(context);
        }
        if let Some(options) = update.options {
            self.options = options;
        }
    }

    /// Check whether the key addresses this subscriber.
    #[must_use]
    pub fn matches(&self, key: &SubscriberKey) -> bool {
        match key {
            SubscriberKey::Id(id) => self.id == *id,
            SubscriberKey::Callback(callback) => self.callback.ptr_eq(callback),
        }
    }

    /// Evaluate the predicate, if any, against the arguments.
    #[must_use]
    pub fn accepts(&self, args: &[Value]) -> bool {
        self.options
            .predicate
            .as_ref()
            .map_or(true, |p| p.test(&self.context, args))
    }

    /// Run the callback with this subscriber's context.
    ///
    /// # Errors
    ///
    /// Returns the callback's error.
    pub fn invoke(&self, args: &[Value]) -> Result<(), CallbackError> {
        self.callback.call(&self.context, args)
    }
}
