//! Channel tree for the mediator.
//!
//! A channel holds an ordered list of subscribers and a set of named child
//! channels. Publishing on a channel reaches every subscriber in its subtree,
//! parent before children, children in the order they were created.

use crate::config::FailurePolicy;
use crate::error::MediatorError;
use crate::metrics;
use crate::subscriber::{Callback, Context, SubscribeOptions, Subscriber, SubscriberKey};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Default namespace delimiter.
pub const DEFAULT_DELIMITER: char = ':';

/// A channel identifier (full namespace path).
pub type ChannelId = Arc<str>;

/// Outcome of a publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    /// Callbacks that ran successfully.
    pub delivered: usize,
    /// Subscribers skipped because their predicate rejected the arguments.
    pub filtered: usize,
    /// Callbacks that failed under [`FailurePolicy::Isolate`].
    pub failed: usize,
}

/// Serializable view of a single channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Last namespace segment.
    pub name: String,
    /// Full namespace path.
    pub path: String,
    /// Number of subscribers on this channel only.
    pub subscriber_count: usize,
    /// Child segment names in creation order.
    pub children: Vec<String>,
}

/// A subscriber captured for delivery, together with its channel path.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    channel: ChannelId,
    subscriber: Subscriber,
}

/// A node in the channel tree.
#[derive(Debug)]
pub struct Channel {
    /// Segment name, empty for the root.
    name: String,
    /// Full namespace path.
    path: ChannelId,
    /// Delimiter used to build child paths and resolve namespaces.
    delimiter: char,
    /// Subscribers in invocation order.
    subscribers: Vec<Subscriber>,
    /// Child channels in creation order.
    children: Vec<Channel>,
}

impl Channel {
    /// Create a root channel using the default delimiter.
    #[must_use]
    pub fn new() -> Self {
        Self::root(DEFAULT_DELIMITER)
    }

    /// Create a root channel with a custom namespace delimiter.
    #[must_use]
    pub fn root(delimiter: char) -> Self {
        Self {
            name: String::new(),
            path: Arc::from(""),
            delimiter,
            subscribers: Vec::new(),
            children: Vec::new(),
        }
    }

    fn child_of(parent: &Channel, name: &str) -> Self {
        let path = if parent.path.is_empty() {
            name.to_string()
        } else {
            format!("{}{}{}", parent.path, parent.delimiter, name)
        };
        Self {
            name: name.to_string(),
            path: Arc::from(path),
            delimiter: parent.delimiter,
            subscribers: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Get the segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the full namespace path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the namespace delimiter.
    #[must_use]
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    /// Get the subscribers of this channel in invocation order.
    #[must_use]
    pub fn subscribers(&self) -> &[Subscriber] {
        &self.subscribers
    }

    /// Get the number of subscribers on this channel.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check if the channel has no subscribers of its own.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Get the child segment names in creation order.
    #[must_use]
    pub fn child_names(&self) -> Vec<&str> {
        self.children.iter().map(|c| c.name.as_str()).collect()
    }

    /// Count this channel and all of its descendants.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        1 + self.children.iter().map(Channel::channel_count).sum::<usize>()
    }

    /// Count subscribers across this channel's subtree.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.subscribers.len()
            + self
                .children
                .iter()
                .map(Channel::total_subscribers)
                .sum::<usize>()
    }

    /// Get a serializable snapshot of this channel.
    #[must_use]
    pub fn info(&self) -> ChannelInfo {
        ChannelInfo {
            name: self.name.clone(),
            path: self.path.to_string(),
            subscriber_count: self.subscribers.len(),
            children: self.children.iter().map(|c| c.name.clone()).collect(),
        }
    }

    /// Register a subscriber on this channel.
    ///
    /// With a priority the subscriber is inserted at that index, clamped to
    /// `[0, subscriber_count]`, shifting later subscribers back. Without one
    /// it is appended.
    pub fn add_subscriber(
        &mut self,
        callback: Callback,
        options: SubscribeOptions,
        context: Option<Context>,
    ) -> Subscriber {
        let priority = options.priority;
        let subscriber = Subscriber::new(callback, options, context);

        match priority {
            Some(priority) => {
                let index = priority.clamp(0, self.subscribers.len() as i64) as usize;
                self.subscribers.insert(index, subscriber.clone());
                debug!(channel = %self.path, subscriber = %subscriber.id(), index, "Subscribed");
            }
            None => {
                self.subscribers.push(subscriber.clone());
                debug!(channel = %self.path, subscriber = %subscriber.id(), "Subscribed");
            }
        }

        subscriber
    }

    /// Find a subscriber in this channel or, failing that, in its subtree.
    ///
    /// The search is depth-first: own subscribers first, then each child in
    /// creation order.
    #[must_use]
    pub fn get_subscriber(&self, key: &SubscriberKey) -> Option<&Subscriber> {
        self.subscribers
            .iter()
            .find(|s| s.matches(key))
            .or_else(|| self.children.iter().find_map(|c| c.get_subscriber(key)))
    }

    /// Mutable variant of [`Channel::get_subscriber`].
    pub fn get_subscriber_mut(&mut self, key: &SubscriberKey) -> Option<&mut Subscriber> {
        if let Some(index) = self.subscribers.iter().position(|s| s.matches(key)) {
            return Some(&mut self.subscribers[index]);
        }
        self.children
            .iter_mut()
            .find_map(|c| c.get_subscriber_mut(key))
    }

    /// Move a subscriber of this channel to a new index.
    ///
    /// Only this channel's own list is searched. The relative order of the
    /// other subscribers is kept and the index is clamped to the list length.
    ///
    /// Returns `false` if no subscriber matched.
    pub fn set_priority(&mut self, key: &SubscriberKey, index: usize) -> bool {
        let Some(position) = self.subscribers.iter().position(|s| s.matches(key)) else {
            return false;
        };

        let subscriber = self.subscribers.remove(position);
        let index = index.min(self.subscribers.len());
        debug!(
            channel = %self.path,
            subscriber = %subscriber.id(),
            from = position,
            to = index,
            "Priority changed"
        );
        self.subscribers.insert(index, subscriber);
        true
    }

    /// Create an empty child channel, replacing any child with the same name.
    pub fn add_channel(&mut self, name: &str) -> &mut Channel {
        let child = Channel::child_of(self, name);
        debug!(channel = %child.path, "Creating new channel");

        match self.children.iter().position(|c| c.name == name) {
            Some(index) => {
                let replaced = std::mem::replace(&mut self.children[index], child);
                metrics::record_channels_dropped(replaced.channel_count() - 1);
                &mut self.children[index]
            }
            None => {
                metrics::record_channel_created();
                let index = self.children.len();
                self.children.push(child);
                &mut self.children[index]
            }
        }
    }

    /// Check if a direct child with this name exists.
    #[must_use]
    pub fn has_channel(&self, name: &str) -> bool {
        self.children.iter().any(|c| c.name == name)
    }

    /// Get a direct child by name.
    #[must_use]
    pub fn channel(&self, name: &str) -> Option<&Channel> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Get a direct child by name, mutably.
    pub fn channel_mut(&mut self, name: &str) -> Option<&mut Channel> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    /// Resolve a namespace relative to this channel, creating missing
    /// segments along the way.
    ///
    /// The empty namespace resolves to this channel.
    pub fn resolve(&mut self, namespace: &str) -> &mut Channel {
        if namespace.is_empty() {
            return self;
        }
        let delimiter = self.delimiter;
        namespace
            .split(delimiter)
            .fold(self, |channel, segment| channel.child_or_insert(segment))
    }

    /// Resolve a namespace without creating anything.
    #[must_use]
    pub fn find(&self, namespace: &str) -> Option<&Channel> {
        if namespace.is_empty() {
            return Some(self);
        }
        namespace
            .split(self.delimiter)
            .try_fold(self, |channel, segment| channel.channel(segment))
    }

    fn child_or_insert(&mut self, name: &str) -> &mut Channel {
        match self.children.iter().position(|c| c.name == name) {
            Some(index) => &mut self.children[index],
            None => self.add_channel(name),
        }
    }

    /// Remove subscribers.
    ///
    /// With a key, every matching subscriber of this channel is removed and
    /// descendants are left alone. Without one, this channel and every
    /// descendant are cleared while the channel structure is kept.
    ///
    /// Returns the number of subscribers removed.
    pub fn remove_subscriber(&mut self, key: Option<&SubscriberKey>) -> usize {
        let removed = match key {
            Some(key) => {
                let before = self.subscribers.len();
                self.subscribers.retain(|s| !s.matches(key));
                before - self.subscribers.len()
            }
            None => self.clear(),
        };
        if removed > 0 {
            debug!(channel = %self.path, removed, "Unsubscribed");
        }
        removed
    }

    fn clear(&mut self) -> usize {
        let own = self.subscribers.len();
        self.subscribers.clear();
        own + self.children.iter_mut().map(Channel::clear).sum::<usize>()
    }

    /// Publish to this channel's subtree, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`MediatorError::Callback`] if a callback fails.
    pub fn publish(&self, args: &[Value]) -> Result<PublishReport, MediatorError> {
        self.publish_with(args, FailurePolicy::FailFast)
    }

    /// Publish to this channel's subtree with an explicit failure policy.
    ///
    /// The subtree's subscribers are captured before any callback runs.
    ///
    /// # Errors
    ///
    /// Returns [`MediatorError::Callback`] if a callback fails under
    /// [`FailurePolicy::FailFast`].
    pub fn publish_with(
        &self,
        args: &[Value],
        policy: FailurePolicy,
    ) -> Result<PublishReport, MediatorError> {
        let mut targets = Vec::new();
        self.collect_targets(&mut targets);
        dispatch(targets, args, policy)
    }

    /// Capture the subtree's subscribers in delivery order.
    pub(crate) fn collect_targets(&self, out: &mut Vec<Target>) {
        out.extend(self.subscribers.iter().map(|s| Target {
            channel: Arc::clone(&self.path),
            subscriber: s.clone(),
        }));
        for child in &self.children {
            child.collect_targets(out);
        }
    }
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

/// Invoke captured subscribers in order.
pub(crate) fn dispatch(
    targets: Vec<Target>,
    args: &[Value],
    policy: FailurePolicy,
) -> Result<PublishReport, MediatorError> {
    let mut report = PublishReport::default();

    for target in targets {
        let subscriber = &target.subscriber;
        if !subscriber.accepts(args) {
            report.filtered += 1;
            continue;
        }

        match subscriber.invoke(args) {
            Ok(()) => report.delivered += 1,
            Err(source) => {
                metrics::record_callback_failure();
                match policy {
                    FailurePolicy::FailFast => {
                        metrics::record_deliveries(report.delivered);
                        return Err(MediatorError::Callback {
                            channel: target.channel.to_string(),
                            subscriber: subscriber.id(),
                            source,
                        });
                    }
                    FailurePolicy::Isolate => {
                        warn!(
                            channel = %target.channel,
                            subscriber = %subscriber.id(),
                            error = %source,
                            "Subscriber callback failed"
                        );
                        report.failed += 1;
                    }
                }
            }
        }
    }

    metrics::record_deliveries(report.delivered);
    trace!(
        delivered = report.delivered,
        filtered = report.filtered,
        failed = report.failed,
        "Dispatched"
    );
    Ok(report)
}
