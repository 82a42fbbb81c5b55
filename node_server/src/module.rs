//! Handler registration: named method tables and the per-call context.

use {
    crate::notifier::{notifications_unsupported, Notifier, Subscription},
    futures_util::{future::BoxFuture, FutureExt},
    node_rpc::{error::RpcError, params::Params},
    serde::Serialize,
    std::{collections::HashMap, fmt, future::Future, sync::Arc},
    tokio::sync::watch,
};

pub(crate) type MethodHandler =
    Arc<dyn Fn(CallContext, Params) -> BoxFuture<'static, Result<serde_json::Value, RpcError>> + Send + Sync>;

pub(crate) type SubscriptionHandler =
    Arc<dyn Fn(CallContext, Params) -> BoxFuture<'static, Result<Subscription, RpcError>> + Send + Sync>;

/// Connection-scoped state passed into every handler invocation.
#[derive(Debug, Clone)]
pub struct CallContext {
    cancel: watch::Receiver<bool>,
    notifier: Option<Arc<Notifier>>,
}

impl CallContext {
    pub(crate) fn new(cancel: watch::Receiver<bool>, notifier: Option<Arc<Notifier>>) -> Self {
        Self { cancel, notifier }
    }

    /// A future resolving once the connection is torn down or the server
    /// stops. Long-running handlers should observe it and return promptly.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut cancel = self.cancel.clone();

        async move {
            cancel.wait_for(|cancelled| *cancelled).await.ok();
        }
    }

    /// The notification broker of this connection. Fails on transports
    /// without subscription support (plain request/response).
    pub fn notifier(&self) -> Result<&Arc<Notifier>, RpcError> {
        self.notifier.as_ref().ok_or_else(notifications_unsupported)
    }
}

/// A named set of RPC endpoints sharing one wire namespace.
///
/// Method names are canonicalized on registration: the first character is
/// lower-cased, so a handler registered as `FooBar` dispatches as `fooBar`.
/// Wire names are case-sensitive beyond that.
#[derive(Default, Clone)]
pub struct RpcModule {
    callbacks: HashMap<String, MethodHandler>,
    subscriptions: HashMap<String, SubscriptionHandler>,
}

impl RpcModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plain RPC method. The handler binds its params itself
    /// and returns any serializable result; a later registration under the
    /// same name replaces the earlier one.
    pub fn register_method<R, F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        R: Serialize,
        F: Fn(CallContext, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RpcError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |ctx, params| {
            let result = handler(ctx, params);

            async move {
                let value = result.await?;
                serde_json::to_value(value).map_err(|err| RpcError::Callback(err.to_string()))
            }
            .boxed()
        });

        self.callbacks.insert(format_name(name), handler);
        self
    }

    /// Registers a subscription-creating method. The handler returns the
    /// fresh [`Subscription`]; its id becomes the call result and the
    /// subscription is activated once that response has been queued to the
    /// client.
    pub fn register_subscription<F, Fut>(&mut self, name: &str, handler: F) -> &mut Self
    where
        F: Fn(CallContext, Params) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Subscription, RpcError>> + Send + 'static,
    {
        let handler: SubscriptionHandler =
            Arc::new(move |ctx, params| handler(ctx, params).boxed());

        self.subscriptions.insert(format_name(name), handler);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty() && self.subscriptions.is_empty()
    }

    /// Returns an iterator over all registered method names.
    pub fn method_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.callbacks
            .keys()
            .chain(self.subscriptions.keys())
            .map(String::as_str)
    }

    pub(crate) fn callback(&self, name: &str) -> Option<&MethodHandler> {
        self.callbacks.get(name)
    }

    pub(crate) fn subscription(&self, name: &str) -> Option<&SubscriptionHandler> {
        self.subscriptions.get(name)
    }

    /// Merges `other` into `self`; the newest registration wins per method.
    pub(crate) fn merge(&mut self, other: RpcModule) {
        self.callbacks.extend(other.callbacks);
        self.subscriptions.extend(other.subscriptions);
    }
}

impl fmt::Debug for RpcModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcModule")
            .field("callbacks", &self.callbacks.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// Canonical wire form of a handler name: the first character lower-cased.
pub fn format_name(name: &str) -> String {
    let mut chars = name.chars();

    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
