//! The RPC dispatch engine: service registry and per-connection serve
//! loops.
//!
//! One server instance is shared by every connection of a node. The
//! registry is populated while the node starts and read without further
//! locking contention during dispatch; each connection runs its own read
//! loop and executes inbound work on fresh tasks.

use {
    crate::{
        codec::{MessageSink, ServerCodec, Transport},
        module::{CallContext, MethodHandler, RpcModule, SubscriptionHandler},
        notifier::Notifier,
    },
    futures_util::FutureExt,
    node_rpc::{
        domain::{RequestId, SubscriptionId},
        error::RpcError,
        params::Params,
        rpc::{self, ErrorResponse, Response, RpcCall, SuccessResponse, UNSUBSCRIBE_METHOD_SUFFIX},
    },
    parking_lot::{Mutex, RwLock},
    std::{
        any::Any,
        collections::{BTreeMap, HashMap},
        panic::AssertUnwindSafe,
        sync::{
            atomic::{AtomicBool, AtomicU64, Ordering},
            Arc,
        },
    },
    tokio::sync::{mpsc, watch},
};

/// The meta namespace every server preregisters. Its `modules` method
/// reports the registered namespaces with their versions.
pub const METADATA_API: &str = "rpc";

/// Which message classes a connection's transport supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecOptions {
    /// The transport can carry server-pushed notification frames.
    pub subscriptions: bool,
}

impl CodecOptions {
    /// Plain request/response, e.g. HTTP.
    pub const fn method_invocation_only() -> Self {
        Self {
            subscriptions: false,
        }
    }

    /// Full duplex, e.g. WebSocket or pipe.
    pub const fn with_subscriptions() -> Self {
        Self {
            subscriptions: true,
        }
    }
}

/// Errors produced while registering handler modules.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("no service name given")]
    EmptyName,

    #[error("service doesn't have any methods or subscriptions to expose")]
    NoMethods,
}

/// A JSON-RPC server: the registry of named modules plus the serve loops
/// dispatching connections onto them.
pub struct Server {
    services: RwLock<HashMap<String, RpcModule>>,
    run: AtomicBool,
    connections: Mutex<HashMap<u64, MessageSink>>,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Creates a server with the `rpc` meta namespace preregistered.
    pub fn new() -> Arc<Self> {
        let server = Arc::new(Self {
            services: RwLock::new(HashMap::new()),
            run: AtomicBool::new(true),
            connections: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&server);
        let mut meta = RpcModule::new();
        meta.register_method("modules", move |_ctx, _params| {
            let weak = weak.clone();

            async move {
                let mut modules = BTreeMap::new();
                if let Some(server) = weak.upgrade() {
                    for name in server.services.read().keys() {
                        modules.insert(name.clone(), "1.0".to_owned());
                    }
                }
                Ok::<_, RpcError>(modules)
            }
        });

        server
            .register_name(METADATA_API, meta)
            .expect("meta module is well-formed");

        server
    }

    /// Registers `module` under the `name` namespace. Re-registering an
    /// existing namespace merges the modules, newest callback winning per
    /// method. A namespace, once registered, stays for the server's
    /// lifetime.
    pub fn register_name(&self, name: &str, module: RpcModule) -> Result<(), RegistrationError> {
        if name.is_empty() {
            return Err(RegistrationError::EmptyName);
        }
        if module.is_empty() {
            return Err(RegistrationError::NoMethods);
        }

        let mut services = self.services.write();
        match services.get_mut(name) {
            Some(existing) => existing.merge(module),
            None => {
                services.insert(name.to_owned(), module);
            }
        }

        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    /// The currently registered namespaces.
    pub fn module_names(&self) -> Vec<String> {
        self.services.read().keys().cloned().collect()
    }

    /// Serves `transport` until end of stream or until the server stops.
    /// Handlers of one connection may run concurrently; each inbound value
    /// (request or batch) executes on a fresh task.
    pub async fn serve_codec<T: Transport>(self: &Arc<Self>, transport: T, options: CodecOptions) {
        self.serve_requests(ServerCodec::new(transport), options, false)
            .await;
    }

    /// Reads and processes exactly one request (or batch), then returns.
    /// Used for request/response-only transports; cancellation follows the
    /// caller dropping or racing this future.
    pub async fn serve_single_request<T: Transport>(
        self: &Arc<Self>,
        transport: T,
        options: CodecOptions,
    ) {
        self.serve_requests(ServerCodec::new(transport), options, true)
            .await;
    }

    /// Stops accepting requests and closes every live connection.
    /// In-flight handlers run to completion; their results are dropped with
    /// the closed connections.
    pub fn stop(&self) {
        if self
            .run
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            tracing::debug!("rpc server shutdown initiated");

            for (_, sink) in self.connections.lock().drain() {
                sink.close();
            }
        }
    }

    async fn serve_requests<T: Transport>(
        self: &Arc<Self>,
        mut codec: ServerCodec<T>,
        options: CodecOptions,
        single_shot: bool,
    ) {
        let sink = codec.sink();

        if !self.is_running() {
            sink.close();
            return;
        }

        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        self.connections.lock().insert(conn_id, sink.clone());

        let notifier = options
            .subscriptions
            .then(|| Arc::new(Notifier::new(sink.clone())));
        let (cancel, cancelled) = watch::channel(false);
        let ctx = CallContext::new(cancelled, notifier.clone());

        // Every spawned exec task holds a clone of `done`; recv() returns
        // None once the original is dropped and all tasks have finished.
        let (done, mut pending) = mpsc::channel::<()>(1);

        loop {
            // End of stream, or the connection was ordered closed.
            let Some(inbound) = codec.next_message().await else {
                break;
            };

            let msg = match inbound {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::debug!("transport read error: {err}");
                    break;
                }
            };

            let (calls, batch) = match rpc::parse_requests(&msg) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::debug!("read error: {err}");
                    sink.send(&ErrorResponse::new(RequestId::Null, err));
                    if single_shot {
                        break;
                    }
                    continue;
                }
            };

            // Requests that arrive after shutdown began still get answered,
            // with a shutdown error.
            if !self.is_running() {
                let responses: Vec<Response> = calls
                    .into_iter()
                    .map(|call| Response::Error(ErrorResponse::new(call.id, RpcError::Shutdown)))
                    .collect();

                if batch {
                    sink.send(&responses);
                } else if let Some(response) = responses.first() {
                    sink.send(response);
                }
                break;
            }

            let requests = self.resolve_calls(calls);

            if single_shot {
                if batch {
                    self.exec_batch(&ctx, &sink, requests).await;
                } else if let Some(request) = requests.into_iter().next() {
                    self.exec(&ctx, &sink, request).await;
                }
                break;
            }

            let server = Arc::clone(self);
            let task_ctx = ctx.clone();
            let task_sink = sink.clone();
            let done = done.clone();

            tokio::spawn(async move {
                let work = async {
                    if batch {
                        server.exec_batch(&task_ctx, &task_sink, requests).await;
                    } else if let Some(request) = requests.into_iter().next() {
                        server.exec(&task_ctx, &task_sink, request).await;
                    }
                };

                if let Err(panic) = AssertUnwindSafe(work).catch_unwind().await {
                    tracing::error!(
                        "handler panicked, closing connection: {}",
                        panic_message(panic.as_ref())
                    );
                    task_sink.close();
                }

                drop(done);
            });
        }

        // Quiesce: wait for in-flight requests before tearing down.
        drop(done);
        while pending.recv().await.is_some() {}

        cancel.send_replace(true);
        if let Some(notifier) = &notifier {
            notifier.close();
        }
        self.connections.lock().remove(&conn_id);
        sink.close();
    }

    // Resolves parsed headers against the registry, attaching lookup and
    // synthesis results. The registry lock is not held across handler
    // execution.
    fn resolve_calls(&self, calls: Vec<RpcCall>) -> Vec<ServerRequest> {
        let services = self.services.read();

        calls
            .into_iter()
            .map(|call| {
                let RpcCall {
                    id,
                    service,
                    method,
                    params,
                    is_pubsub,
                    err,
                } = call;
                let params = Params::new(params);

                if let Some(err) = err {
                    return ServerRequest::failed(id, service, err);
                }

                if is_pubsub && method.ends_with(UNSUBSCRIBE_METHOD_SUFFIX) {
                    return ServerRequest {
                        id,
                        service,
                        params,
                        kind: RequestKind::Unsubscribe,
                    };
                }

                let Some(module) = services.get(&service) else {
                    let err = RpcError::method_not_found(&service, &method);
                    return ServerRequest::failed(id, service, err);
                };

                if is_pubsub {
                    match module.subscription(&method) {
                        Some(handler) => ServerRequest {
                            id,
                            service,
                            // The leading element is the subscription method
                            // name, not an actual argument.
                            params: params.tail(),
                            kind: RequestKind::Subscribe(handler.clone()),
                        },
                        None => {
                            let err = RpcError::method_not_found(&service, &method);
                            ServerRequest::failed(id, service, err)
                        }
                    }
                } else {
                    match module.callback(&method) {
                        Some(handler) => ServerRequest {
                            id,
                            service,
                            params,
                            kind: RequestKind::Call(handler.clone()),
                        },
                        None => {
                            let err = RpcError::method_not_found(&service, &method);
                            ServerRequest::failed(id, service, err)
                        }
                    }
                }
            })
            .collect()
    }

    async fn exec(&self, ctx: &CallContext, sink: &MessageSink, request: ServerRequest) {
        let (response, activation) = self.handle(ctx, request).await;

        sink.send(&response);

        // Runs only after the response is queued, so the client sees the
        // subscription id before any notification referencing it.
        if let Some(activate) = activation {
            activate();
        }
    }

    // Executes a batch sequentially, writes the responses as one array and
    // only then activates any subscriptions the batch created.
    async fn exec_batch(&self, ctx: &CallContext, sink: &MessageSink, requests: Vec<ServerRequest>) {
        let mut responses = Vec::with_capacity(requests.len());
        let mut activations = Vec::new();

        for request in requests {
            let (response, activation) = self.handle(ctx, request).await;
            responses.push(response);
            if let Some(activate) = activation {
                activations.push(activate);
            }
        }

        sink.send(&responses);

        for activate in activations {
            activate();
        }
    }

    async fn handle(
        &self,
        ctx: &CallContext,
        request: ServerRequest,
    ) -> (Response, Option<Activation>) {
        let ServerRequest {
            id,
            service,
            params,
            kind,
        } = request;

        match kind {
            RequestKind::Error(err) => (Response::Error(ErrorResponse::new(id, err)), None),

            RequestKind::Unsubscribe => {
                let subscription_id = match params.one::<SubscriptionId>() {
                    Ok(subscription_id) => subscription_id,
                    Err(_) => {
                        let err = RpcError::InvalidParams(
                            "expected subscription id as first argument".into(),
                        );
                        return (Response::Error(ErrorResponse::new(id, err)), None);
                    }
                };

                let notifier = match ctx.notifier() {
                    Ok(notifier) => notifier,
                    Err(err) => return (Response::Error(ErrorResponse::new(id, err)), None),
                };

                match notifier.unsubscribe(&subscription_id) {
                    Ok(()) => (
                        Response::Success(SuccessResponse::new(id, serde_json::Value::Bool(true))),
                        None,
                    ),
                    Err(err) => (Response::Error(ErrorResponse::new(id, err)), None),
                }
            }

            RequestKind::Subscribe(handler) => match handler(ctx.clone(), params).await {
                Ok(subscription) => {
                    let subscription_id = subscription.id().clone();
                    let result = serde_json::json!(subscription_id);

                    let activation = ctx.notifier().ok().cloned().map(|notifier| {
                        let namespace = service;
                        Box::new(move || notifier.activate(&subscription_id, &namespace))
                            as Activation
                    });

                    (Response::Success(SuccessResponse::new(id, result)), activation)
                }
                Err(err) => (Response::Error(ErrorResponse::new(id, err)), None),
            },

            RequestKind::Call(handler) => match handler(ctx.clone(), params).await {
                Ok(result) => (Response::Success(SuccessResponse::new(id, result)), None),
                Err(err) => (Response::Error(ErrorResponse::new(id, err)), None),
            },
        }
    }
}

type Activation = Box<dyn FnOnce() + Send>;

/// One resolved inbound request: the work to run or the error to answer
/// with.
struct ServerRequest {
    id: RequestId,
    service: String,
    params: Params,
    kind: RequestKind,
}

impl ServerRequest {
    fn failed(id: RequestId, service: String, err: RpcError) -> Self {
        Self {
            id,
            service,
            params: Params::default(),
            kind: RequestKind::Error(err),
        }
    }
}

enum RequestKind {
    Call(MethodHandler),
    Subscribe(SubscriptionHandler),
    Unsubscribe,
    Error(RpcError),
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}
