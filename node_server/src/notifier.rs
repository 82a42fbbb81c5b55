//! Per-connection subscription broker.
//!
//! A fresh subscription is inactive: events pushed to it are buffered, not
//! written. The dispatcher activates it only after the response carrying
//! the subscription id has been queued, which guarantees the client never
//! observes a notification before the id it references.

use {
    crate::codec::MessageSink,
    node_rpc::{domain::SubscriptionId, error::RpcError, rpc::Notification},
    parking_lot::Mutex,
    serde::Serialize,
    std::{collections::HashMap, future::Future},
    tokio::sync::watch,
};

/// Error returned when a transport without subscription support receives a
/// subscribe or unsubscribe request.
pub fn notifications_unsupported() -> RpcError {
    RpcError::Callback("notifications not supported".into())
}

/// A live subscription handle returned by subscription handlers.
///
/// The id goes back to the client as the call result. Handlers typically
/// spawn the task producing events before returning and move a
/// [`Subscription::cancelled`] future into it to learn when to stop.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    namespace: String,
    cancel: watch::Receiver<bool>,
}

impl Subscription {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// A future resolving once this subscription is unsubscribed or its
    /// connection goes away. Safe to move into the producing task.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut cancel = self.cancel.clone();

        async move {
            cancel.wait_for(|cancelled| *cancelled).await.ok();
        }
    }
}

#[derive(Debug)]
struct SubscriptionState {
    namespace: String,
    cancel: watch::Sender<bool>,
    /// Events received before activation, drained FIFO on activate.
    buffer: Vec<serde_json::Value>,
}

#[derive(Debug, Default)]
struct SubscriptionMaps {
    active: HashMap<SubscriptionId, SubscriptionState>,
    inactive: HashMap<SubscriptionId, SubscriptionState>,
}

/// Broker owning every subscription created over one connection.
#[derive(Debug)]
pub struct Notifier {
    sink: MessageSink,
    subs: Mutex<SubscriptionMaps>,
}

impl Notifier {
    pub(crate) fn new(sink: MessageSink) -> Self {
        Self {
            sink,
            subs: Mutex::new(SubscriptionMaps::default()),
        }
    }

    /// Creates a fresh inactive subscription under `namespace`.
    pub fn create_subscription(&self, namespace: impl Into<String>) -> Subscription {
        let namespace = namespace.into();
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let mut subs = self.subs.lock();

        // Ids are 128 random bits; regenerate on the astronomically
        // unlikely collision.
        let id = loop {
            let id = SubscriptionId::generate();
            if !subs.active.contains_key(&id) && !subs.inactive.contains_key(&id) {
                break id;
            }
        };

        subs.inactive.insert(
            id.clone(),
            SubscriptionState {
                namespace: namespace.clone(),
                cancel: cancel_tx,
                buffer: Vec::new(),
            },
        );

        Subscription {
            id,
            namespace,
            cancel: cancel_rx,
        }
    }

    /// Pushes an event to subscription `id`. Buffered while the
    /// subscription is inactive; silently dropped when the id is unknown.
    pub fn notify<T: Serialize>(&self, id: &SubscriptionId, event: T) -> Result<(), RpcError> {
        let event =
            serde_json::to_value(event).map_err(|err| RpcError::Callback(err.to_string()))?;

        let mut subs = self.subs.lock();

        if let Some(state) = subs.active.get(id) {
            self.sink
                .send(&Notification::new(id.clone(), &state.namespace, event));
        } else if let Some(state) = subs.inactive.get_mut(id) {
            state.buffer.push(event);
        }

        Ok(())
    }

    /// Promotes an inactive subscription and drains its buffered events in
    /// arrival order. Called only after the subscription id has been queued
    /// to the client.
    pub(crate) fn activate(&self, id: &SubscriptionId, namespace: &str) {
        let mut subs = self.subs.lock();

        if let Some(mut state) = subs.inactive.remove(id) {
            namespace.clone_into(&mut state.namespace);

            for event in state.buffer.drain(..) {
                self.sink.send(&Notification::new(id.clone(), namespace, event));
            }

            subs.active.insert(id.clone(), state);
        }
    }

    /// Cancels subscription `id`, whichever state it is in.
    pub(crate) fn unsubscribe(&self, id: &SubscriptionId) -> Result<(), RpcError> {
        let mut subs = self.subs.lock();

        let state = subs
            .active
            .remove(id)
            .or_else(|| subs.inactive.remove(id))
            .ok_or_else(|| RpcError::Callback("subscription not found".into()))?;

        state.cancel.send_replace(true);
        Ok(())
    }

    /// Tears every subscription down. Called when the connection closes.
    pub(crate) fn close(&self) {
        let mut subs = self.subs.lock();
        let SubscriptionMaps { active, inactive } = &mut *subs;

        for (_, state) in active.drain().chain(inactive.drain()) {
            state.cancel.send_replace(true);
        }
    }
}
