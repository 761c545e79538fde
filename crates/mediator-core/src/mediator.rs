//! The mediator facade.
//!
//! The mediator owns the root channel and resolves colon-delimited
//! namespaces into channels, creating missing segments on demand.

use crate::channel::{dispatch, Channel, ChannelInfo, PublishReport};
use crate::config::MediatorConfig;
use crate::error::{CallbackError, MediatorError};
use crate::metrics;
use crate::subscriber::{
    Callback, Context, SubscribeOptions, Subscriber, SubscriberKey, SubscriberUpdate,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Mediator statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediatorStats {
    /// Number of channels below the root.
    pub channel_count: usize,
    /// Number of subscribers across the whole tree.
    pub subscriber_count: usize,
}

/// The publish/subscribe mediator.
///
/// All operations take `&self`. The channel tree sits behind a mutex that is
/// released before any callback runs, so callbacks may subscribe, remove, or
/// publish through the same mediator. Changes made while a publish is in
/// flight apply from the next publish on.
pub struct Mediator {
    /// Root channel, namespace `""`.
    root: Mutex<Channel>,
    /// Configuration.
    config: MediatorConfig,
}

impl Mediator {
    /// Create a mediator with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MediatorConfig::default())
    }

    /// Create a mediator with custom configuration.
    #[must_use]
    pub fn with_config(config: MediatorConfig) -> Self {
        info!("Creating mediator with config: {:?}", config);
        Self {
            root: Mutex::new(Channel::root(config.delimiter)),
            config,
        }
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &MediatorConfig {
        &self.config
    }

    fn root(&self) -> MutexGuard<'_, Channel> {
        // The lock is never held across user code, so a poisoned tree is
        // still structurally sound.
        self.root.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a namespace, creating missing channels, and describe it.
    pub fn get_channel(&self, namespace: &str) -> ChannelInfo {
        self.root().resolve(namespace).info()
    }

    /// Run a closure against the resolved channel.
    ///
    /// The mediator is locked for the duration of the closure; calling back
    /// into the same mediator from inside it will deadlock.
    pub fn with_channel<R>(&self, namespace: &str, f: impl FnOnce(&mut Channel) -> R) -> R {
        f(self.root().resolve(namespace))
    }

    /// Check whether a namespace exists without creating it.
    #[must_use]
    pub fn has_channel(&self, namespace: &str) -> bool {
        self.root().find(namespace).is_some()
    }

    /// Subscribe a closure to a namespace with default options.
    pub fn subscribe<F>(&self, namespace: &str, f: F) -> Subscriber
    where
        F: Fn(&Context, &[Value]) -> Result<(), CallbackError> + Send + Sync + 'static,
    {
        self.subscribe_with(namespace, Callback::new(f), SubscribeOptions::default(), None)
    }

    /// Subscribe a callback to a namespace.
    ///
    /// Returns the created subscriber; its ID can later be used with
    /// [`Mediator::remove`] or [`Mediator::get_subscriber`].
    pub fn subscribe_with(
        &self,
        namespace: &str,
        callback: Callback,
        options: SubscribeOptions,
        context: Option<Context>,
    ) -> Subscriber {
        metrics::record_subscription();
        self.root()
            .resolve(namespace)
            .add_subscriber(callback, options, context)
    }

    /// Find a subscriber anywhere in the tree.
    #[must_use]
    pub fn get_subscriber(&self, key: impl Into<SubscriberKey>) -> Option<Subscriber> {
        self.get_subscriber_in("", key)
    }

    /// Find a subscriber in a namespace's subtree.
    #[must_use]
    pub fn get_subscriber_in(
        &self,
        namespace: &str,
        key: impl Into<SubscriberKey>,
    ) -> Option<Subscriber> {
        let key = key.into();
        self.root()
            .resolve(namespace)
            .get_subscriber(&key)
            .cloned()
    }

    /// Update a subscriber found anywhere in the tree.
    ///
    /// Returns `false` if no subscriber matched.
    pub fn update_subscriber(
        &self,
        key: impl Into<SubscriberKey>,
        update: SubscriberUpdate,
    ) -> bool {
        let key = key.into();
        match self.root().get_subscriber_mut(&key) {
            Some(subscriber) => {
                subscriber.update(update);
                debug!(subscriber = %subscriber.id(), "Subscriber updated");
                true
            }
            None => false,
        }
    }

    /// Move a subscriber to a new index within its channel.
    ///
    /// Returns `false` if the channel has no matching subscriber.
    pub fn set_priority(
        &self,
        namespace: &str,
        key: impl Into<SubscriberKey>,
        index: usize,
    ) -> bool {
        let key = key.into();
        self.root().resolve(namespace).set_priority(&key, index)
    }

    /// Remove matching subscribers from a channel. Descendants are untouched.
    ///
    /// Returns the number of subscribers removed.
    pub fn remove(&self, namespace: &str, key: impl Into<SubscriberKey>) -> usize {
        let key = key.into();
        self.root()
            .resolve(namespace)
            .remove_subscriber(Some(&key))
    }

    /// Remove every subscriber from a channel and all of its descendants.
    ///
    /// Returns the number of subscribers removed.
    pub fn clear(&self, namespace: &str) -> usize {
        self.root().resolve(namespace).remove_subscriber(None)
    }

    /// Publish arguments to a namespace and its whole subtree.
    ///
    /// # Errors
    ///
    /// Returns [`MediatorError::Callback`] if a callback fails and the
    /// failure policy is [`FailurePolicy::FailFast`](crate::FailurePolicy::FailFast).
    pub fn publish(
        &self,
        namespace: &str,
        args: &[Value],
    ) -> Result<PublishReport, MediatorError> {
        metrics::record_publish();

        let mut targets = Vec::new();
        self.root().resolve(namespace).collect_targets(&mut targets);
        trace!(channel = %namespace, subscribers = targets.len(), "Publishing");

        dispatch(targets, args, self.config.failure_policy)
    }

    /// Get mediator statistics.
    #[must_use]
    pub fn stats(&self) -> MediatorStats {
        let root = self.root();
        MediatorStats {
            channel_count: root.channel_count() - 1,
            subscriber_count: root.total_subscribers(),
        }
    }
}

impl Default for Mediator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailurePolicy;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<String>>>;

    fn new_log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn taken(log: &Log) -> Vec<String> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    fn record(mediator: &Mediator, namespace: &str, log: &Log, label: &str) -> Subscriber {
        let log = Arc::clone(log);
        let label = label.to_string();
        mediator.subscribe(namespace, move |_, _| {
            log.lock().unwrap().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn test_namespace_resolution_is_idempotent() {
        let mediator = Mediator::new();

        let first = mediator.get_channel("a:b:c");
        let second = mediator.get_channel("a:b:c");
        assert_eq!(first, second);
        assert_eq!(first.path, "a:b:c");
        assert_eq!(mediator.stats().channel_count, 3);

        let first: *const Channel = mediator.with_channel("a:b:c", |c| c as *const Channel);
        let second: *const Channel = mediator.with_channel("a:b:c", |c| c as *const Channel);
        assert_eq!(first, second);
        assert_eq!(mediator.stats().channel_count, 3);
    }

    #[test]
    fn test_empty_namespace_is_root() {
        let mediator = Mediator::new();
        let root = mediator.get_channel("");
        assert_eq!(root.path, "");
        assert_eq!(mediator.stats().channel_count, 0);
        assert!(mediator.has_channel(""));
        assert!(!mediator.has_channel("missing"));
    }

    #[test]
    fn test_append_order_invocation() {
        let log = new_log();
        let mediator = Mediator::new();
        record(&mediator, "x", &log, "f1");
        record(&mediator, "x", &log, "f2");
        record(&mediator, "x", &log, "f3");

        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["f1", "f2", "f3"]);
    }

    #[test]
    fn test_priority_insertion_preserves_others() {
        let log = new_log();
        let mediator = Mediator::new();
        record(&mediator, "x", &log, "f1");
        record(&mediator, "x", &log, "f2");

        let sink = Arc::clone(&log);
        mediator.subscribe_with(
            "x",
            Callback::infallible(move |_, _| sink.lock().unwrap().push("f3".to_string())),
            SubscribeOptions::new().with_priority(0),
            None,
        );

        let report = mediator.publish("x", &[]).unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(taken(&log), ["f3", "f1", "f2"]);
    }

    #[test]
    fn test_predicate_gating() {
        let log = new_log();
        let mediator = Mediator::new();
        let sink = Arc::clone(&log);
        mediator.subscribe_with(
            "x",
            Callback::infallible(move |_, args| {
                sink.lock().unwrap().push(format!("gated {}", args[0]));
            }),
            SubscribeOptions::new()
                .with_predicate(|_, args| args.first().and_then(Value::as_i64) > Some(0)),
            None,
        );
        record(&mediator, "x", &log, "plain");

        mediator.publish("x", &crate::args![5]).unwrap();
        assert_eq!(taken(&log), ["gated 5", "plain"]);

        let report = mediator.publish("x", &crate::args![-1]).unwrap();
        assert_eq!(report.filtered, 1);
        assert_eq!(taken(&log), ["plain"]);
    }

    #[test]
    fn test_subtree_fan_out() {
        let log = new_log();
        let mediator = Mediator::new();
        record(&mediator, "a", &log, "a");
        record(&mediator, "a:b", &log, "a:b");

        mediator.publish("a", &[]).unwrap();
        assert_eq!(taken(&log), ["a", "a:b"]);

        mediator.publish("a:b", &[]).unwrap();
        assert_eq!(taken(&log), ["a:b"]);
    }

    #[test]
    fn test_root_publish_reaches_everything() {
        let log = new_log();
        let mediator = Mediator::new();
        record(&mediator, "", &log, "root");
        record(&mediator, "x", &log, "x");
        record(&mediator, "y:z", &log, "y:z");

        let report = mediator.publish("", &[]).unwrap();
        assert_eq!(report.delivered, 3);
        assert_eq!(taken(&log), ["root", "x", "y:z"]);
    }

    #[test]
    fn test_removal_scoping() {
        let log = new_log();
        let mediator = Mediator::new();
        let shared = Callback::infallible({
            let log = Arc::clone(&log);
            move |_, _| log.lock().unwrap().push("shared".to_string())
        });
        let options = SubscribeOptions::new();
        mediator.subscribe_with("a", shared.clone(), options.clone(), None);
        mediator.subscribe_with("a:b", shared.clone(), options, None);

        assert_eq!(mediator.remove("a", &shared), 1);
        mediator.publish("a", &[]).unwrap();
        assert_eq!(taken(&log), ["shared"]);
        assert!(mediator.get_subscriber_in("a:b", &shared).is_some());

        record(&mediator, "a", &log, "a");
        record(&mediator, "a:b:c", &log, "a:b:c");
        assert_eq!(mediator.clear("a"), 3);
        assert_eq!(mediator.stats().subscriber_count, 0);
        assert_eq!(mediator.stats().channel_count, 3);

        mediator.publish("a", &[]).unwrap();
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn test_lookup_recursion() {
        let mediator = Mediator::new();
        let deep = mediator.subscribe_with(
            "one:two:three:four",
            Callback::infallible(|_, _| {}),
            SubscribeOptions::new(),
            Some(json!({"depth": 4})),
        );

        let found = mediator.get_subscriber(deep.id()).unwrap();
        assert_eq!(found.id(), deep.id());
        assert_eq!(found.context(), &json!({"depth": 4}));
        assert!(mediator.get_subscriber_in("one:two", deep.id()).is_some());
        assert!(mediator.get_subscriber_in("other", deep.id()).is_none());
    }

    #[test]
    fn test_round_trip_remove() {
        let log = new_log();
        let mediator = Mediator::new();
        let sub = record(&mediator, "x", &log, "x");
        record(&mediator, "x", &log, "y");

        assert_eq!(mediator.remove("x", sub.id()), 1);
        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["y"]);

        // Removing again is a silent miss.
        assert_eq!(mediator.remove("x", sub.id()), 0);
    }

    #[test]
    fn test_set_priority() {
        let log = new_log();
        let mediator = Mediator::new();
        record(&mediator, "x", &log, "a");
        record(&mediator, "x", &log, "b");
        let c = record(&mediator, "x", &log, "c");

        assert!(mediator.set_priority("x", &c, 1));
        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["a", "c", "b"]);

        assert!(!mediator.set_priority("", &c, 0));
    }

    #[test]
    fn test_update_subscriber() {
        let log = new_log();
        let mediator = Mediator::new();
        let sink = Arc::clone(&log);
        let sub = mediator.subscribe_with(
            "x:y",
            Callback::infallible(move |ctx, _| {
                let name = ctx["name"].as_str().unwrap_or("?");
                sink.lock().unwrap().push(name.to_string());
            }),
            SubscribeOptions::new(),
            Some(json!({"name": "before"})),
        );

        assert!(mediator.update_subscriber(
            sub.id(),
            SubscriberUpdate {
                context: Some(json!({"name": "after"})),
                ..Default::default()
            }
        ));
        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["after"]);

        let unknown = crate::SubscriberId::generate();
        assert!(!mediator.update_subscriber(unknown, SubscriberUpdate::default()));
    }

    #[test]
    fn test_fail_fast_propagates() {
        let log = new_log();
        let mediator = Mediator::with_config(
            MediatorConfig::default().with_failure_policy(FailurePolicy::FailFast),
        );
        mediator.subscribe("x", |_, _| Err("broken".into()));
        record(&mediator, "x:child", &log, "child");

        let err = mediator.publish("x", &[]).unwrap_err();
        assert!(err.to_string().contains("broken"));
        assert!(taken(&log).is_empty());
    }

    #[test]
    fn test_isolate_policy() {
        let log = new_log();
        let mediator = Mediator::with_config(
            MediatorConfig::default().with_failure_policy(FailurePolicy::Isolate),
        );
        mediator.subscribe("x", |_, _| Err("broken".into()));
        record(&mediator, "x:child", &log, "child");

        let report = mediator.publish("x", &[]).unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(taken(&log), ["child"]);
    }

    #[test]
    fn test_new_ignores_environment() {
        std::env::set_var(crate::config::ENV_DELIMITER, " ");
        std::env::set_var(crate::config::ENV_FAILURE_POLICY, "isolate");
        let mediator = Mediator::new();
        std::env::remove_var(crate::config::ENV_DELIMITER);
        std::env::remove_var(crate::config::ENV_FAILURE_POLICY);

        assert_eq!(mediator.config().delimiter, ':');
        assert_eq!(mediator.config().failure_policy, FailurePolicy::FailFast);

        mediator.subscribe("a:b", |_, _| Err("broken".into()));
        assert_eq!(mediator.stats().channel_count, 2);
        assert!(mediator.publish("a", &[]).is_err());
    }

    #[test]
    fn test_custom_delimiter() {
        let log = new_log();
        let mediator = Mediator::with_config(MediatorConfig::default().with_delimiter('/'));
        record(&mediator, "app/users", &log, "users");

        mediator.publish("app", &[]).unwrap();
        assert_eq!(taken(&log), ["users"]);
        assert_eq!(mediator.get_channel("app/users").path, "app/users");
        assert_eq!(mediator.stats().channel_count, 2);
    }

    #[test]
    fn test_reentrant_subscribe_during_publish() {
        let log = new_log();
        let mediator = Arc::new(Mediator::new());

        let inner_log = Arc::clone(&log);
        let handle = Arc::downgrade(&mediator);
        mediator.subscribe("x", move |_, _| {
            inner_log.lock().unwrap().push("outer".to_string());
            if let Some(mediator) = handle.upgrade() {
                let nested_log = Arc::clone(&inner_log);
                mediator.subscribe("x", move |_, _| {
                    nested_log.lock().unwrap().push("nested".to_string());
                    Ok(())
                });
            }
            Ok(())
        });

        // The subscriber added mid-publish is not invoked by that publish.
        let report = mediator.publish("x", &[]).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(taken(&log), ["outer"]);

        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["outer", "nested"]);
    }

    #[test]
    fn test_reentrant_remove_during_publish() {
        let log = new_log();
        let mediator = Arc::new(Mediator::new());
        let victim = record(&mediator, "x", &log, "victim");

        let handle = Arc::downgrade(&mediator);
        let sink = Arc::clone(&log);
        mediator.subscribe_with(
            "x",
            Callback::infallible(move |_, _| {
                sink.lock().unwrap().push("remover".to_string());
                if let Some(mediator) = handle.upgrade() {
                    mediator.remove("x", victim.id());
                }
            }),
            SubscribeOptions::new().with_priority(0),
            None,
        );

        // The snapshot still includes the victim.
        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["remover", "victim"]);

        mediator.publish("x", &[]).unwrap();
        assert_eq!(taken(&log), ["remover"]);
    }

    #[test]
    fn test_publish_from_multiple_threads() {
        let mediator = Mediator::new();
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        mediator.subscribe("events", move |_, _| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        });

        std::thread::scope(|scope| {
            for i in 0..4 {
                let mediator = &mediator;
                scope.spawn(move || {
                    for _ in 0..25 {
                        mediator.publish("events", &crate::args![i]).unwrap();
                    }
                });
            }
        });

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 100);
    }

    #[test]
    fn test_stats() {
        let mediator = Mediator::new();
        mediator.subscribe("a:b", |_, _| Ok(()));
        mediator.subscribe("a", |_, _| Ok(()));
        mediator.subscribe("c", |_, _| Ok(()));

        let stats = mediator.stats();
        assert_eq!(stats.channel_count, 3);
        assert_eq!(stats.subscriber_count, 3);
    }
}
