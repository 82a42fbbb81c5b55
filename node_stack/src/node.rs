//! The node lifecycle manager.
//!
//! A node owns service *constructors*. `start` runs them in registration
//! order, registers every constructed service's RPC surface on a fresh
//! dispatch engine and then starts the services one by one; any failure
//! unwinds what already started, in reverse order. `stop` discards the
//! instances entirely, so a later `start` reconstructs them from scratch.

use {
    crate::{admin, config::Config},
    node_server::{
        duplex, ChannelTransport, CodecOptions, RegistrationError, RpcModule, Server,
    },
    parking_lot::Mutex,
    std::{
        any::{Any, TypeId},
        collections::HashMap,
        fmt, fs, io,
        path::PathBuf,
        sync::{
            atomic::{AtomicU8, Ordering},
            Arc,
        },
    },
};


/// Boxed error type services report their failures with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An individual protocol that can be registered into a node.
pub trait Service: Send + Sync + 'static {
    /// The RPC descriptors this service exposes once the node runs.
    fn apis(&self) -> Vec<Api> {
        Vec::new()
    }

    /// Called after every registered service has been constructed, in
    /// registration order, to spawn whatever background work the service
    /// needs.
    fn start(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Terminates the service, blocking until its background work is done.
    fn stop(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A single RPC surface contribution: `module` served under `namespace`.
pub struct Api {
    pub namespace: String,
    pub version: String,
    pub module: RpcModule,
    pub public: bool,
}

/// Errors produced by the node lifecycle manager. Lifecycle conditions are
/// distinct sentinels; service failures pass through untouched.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The operation requires a node that is not running.
    #[error("node already running")]
    Running,

    /// The operation requires a running node.
    #[error("node not started")]
    Stopped,

    /// No running service has the requested concrete type.
    #[error("unknown service")]
    ServiceUnknown,

    /// Another instance already claimed the data directory.
    #[error("data directory already in use: {}", .0.display())]
    DatadirUsed(PathBuf),

    /// Two registered constructors produce the same concrete service type.
    #[error("duplicate service: {0}")]
    DuplicateService(&'static str),

    /// A service constructor or `start` failed.
    #[error(transparent)]
    Service(BoxError),

    /// One or more services failed to stop.
    #[error(transparent)]
    Stop(#[from] StopError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error("failed to prepare data directory: {0}")]
    Datadir(#[from] io::Error),
}

/// Aggregate failure of a node shutdown: the stop error of every service
/// that refused to terminate cleanly, keyed by concrete service type.
#[derive(Debug, Default)]
pub struct StopError {
    pub services: HashMap<&'static str, BoxError>,
}

impl fmt::Display for StopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node stop failures: [")?;
        for (index, (service, err)) in self.services.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{service}: {err}")?;
        }
        write!(f, "]")
    }
}

impl std::error::Error for StopError {}

const STATE_INITIALIZED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Lifecycle manager owning a set of pluggable services and the RPC server
/// aggregating their APIs.
pub struct Node {
    inner: Arc<NodeInner>,
}

pub(crate) struct NodeInner {
    pub(crate) config: Config,
    state: AtomicU8,
    /// Guards every lifecycle transition; the atomic only answers fast
    /// state queries.
    lifecycle: Mutex<Lifecycle>,
    pub(crate) ws: Mutex<Option<WsEndpoint>>,
}

#[derive(Default)]
struct Lifecycle {
    constructors: Vec<ServiceConstructor>,
    running: Option<RunningNode>,
}

struct RunningNode {
    services: Vec<ConstructedService>,
    server: Arc<Server>,
    datadir_lock: Option<PathBuf>,
}

/// The recorded WebSocket endpoint state managed by `admin_startWS` and
/// `admin_stopWS`. The socket listener itself is the embedder's concern.
#[derive(Debug, Clone)]
pub(crate) struct WsEndpoint {
    pub host: String,
    pub port: u16,
    pub origins: Vec<String>,
    pub modules: Vec<String>,
}

struct ServiceConstructor {
    type_id: TypeId,
    type_name: &'static str,
    build: Box<dyn Fn(&ServiceContext<'_>) -> Result<ConstructedService, BoxError> + Send + Sync>,
}

#[derive(Clone)]
struct ConstructedService {
    type_id: TypeId,
    type_name: &'static str,
    service: Arc<dyn Service>,
    as_any: Arc<dyn Any + Send + Sync>,
}

/// Construction-time facility handed to service constructors: the node
/// config plus every service constructed before this one, letting later
/// services discover earlier ones.
pub struct ServiceContext<'a> {
    config: &'a Config,
    services: &'a [ConstructedService],
}

impl<'a> ServiceContext<'a> {
    pub fn config(&self) -> &Config {
        self.config
    }

    /// Retrieves an already-constructed service by its concrete type.
    pub fn service<S: Service>(&self) -> Option<Arc<S>> {
        self.services
            .iter()
            .find(|constructed| constructed.type_id == TypeId::of::<S>())
            .and_then(|constructed| Arc::downcast(constructed.as_any.clone()).ok())
    }
}

impl Node {
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                config,
                state: AtomicU8::new(STATE_INITIALIZED),
                lifecycle: Mutex::new(Lifecycle::default()),
                ws: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::SeqCst) == STATE_RUNNING
    }

    /// Appends a service constructor. Constructors run in registration
    /// order on every `start`. Fails while the node is running.
    pub fn register<S, F>(&self, constructor: F) -> Result<(), NodeError>
    where
        S: Service,
        F: Fn(&ServiceContext<'_>) -> Result<S, BoxError> + Send + Sync + 'static,
    {
        let mut lifecycle = self.inner.lifecycle.lock();
        if self.is_running() {
            return Err(NodeError::Running);
        }

        lifecycle.constructors.push(ServiceConstructor {
            type_id: TypeId::of::<S>(),
            type_name: std::any::type_name::<S>(),
            build: Box::new(move |ctx| {
                let service = Arc::new(constructor(ctx)?);

                Ok(ConstructedService {
                    type_id: TypeId::of::<S>(),
                    type_name: std::any::type_name::<S>(),
                    as_any: service.clone() as Arc<dyn Any + Send + Sync>,
                    service,
                })
            }),
        });

        Ok(())
    }

    /// Constructs and starts every registered service, then transitions to
    /// running. On any failure nothing is left running: constructor errors
    /// abort before anything started, start errors unwind already-started
    /// services in reverse order.
    pub fn start(&self) -> Result<(), NodeError> {
        let mut lifecycle = self.inner.lifecycle.lock();
        if self.is_running() {
            return Err(NodeError::Running);
        }

        let mut services: Vec<ConstructedService> =
            Vec::with_capacity(lifecycle.constructors.len());

        for constructor in &lifecycle.constructors {
            if services
                .iter()
                .any(|constructed| constructed.type_id == constructor.type_id)
            {
                return Err(NodeError::DuplicateService(constructor.type_name));
            }

            let ctx = ServiceContext {
                config: &self.inner.config,
                services: &services,
            };
            let constructed = (constructor.build)(&ctx).map_err(NodeError::Service)?;
            services.push(constructed);
        }

        let datadir_lock = self.claim_datadir()?;

        // Gather the RPC surface onto a fresh dispatch engine.
        let server = Server::new();
        let mut api_infos = Vec::new();

        for constructed in &services {
            for api in constructed.service.apis() {
                let Api {
                    namespace,
                    version,
                    module,
                    public,
                } = api;

                api_infos.push(admin::ApiInfo {
                    namespace: namespace.clone(),
                    version,
                    public,
                });
                server.register_name(&namespace, module)?;
            }
        }

        let service_names: Vec<&'static str> = services
            .iter()
            .map(|constructed| constructed.type_name)
            .collect();
        server.register_name(
            "admin",
            admin::module(Arc::downgrade(&self.inner), api_infos, service_names),
        )?;

        for (index, constructed) in services.iter().enumerate() {
            if let Err(err) = constructed.service.start() {
                // Unwind whatever already started, in reverse order.
                for started in services.iter().take(index).rev() {
                    if let Err(stop_err) = started.service.stop() {
                        tracing::error!(
                            service = started.type_name,
                            "rollback stop failed: {stop_err}"
                        );
                    }
                }
                server.stop();
                release_datadir(&datadir_lock);
                return Err(NodeError::Service(err));
            }
        }

        tracing::info!(
            name = %self.inner.config.name,
            services = services.len(),
            "node started"
        );

        lifecycle.running = Some(RunningNode {
            services,
            server,
            datadir_lock,
        });
        self.inner.state.store(STATE_RUNNING, Ordering::SeqCst);

        Ok(())
    }

    /// Stops every service and the RPC server. All services get their stop
    /// call even when some of them fail; the failures come back aggregated
    /// in a [`StopError`]. The instances are discarded, so a later `start`
    /// reconstructs them.
    pub fn stop(&self) -> Result<(), NodeError> {
        let mut lifecycle = self.inner.lifecycle.lock();

        if self
            .inner
            .state
            .compare_exchange(
                STATE_RUNNING,
                STATE_STOPPED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return Err(NodeError::Stopped);
        }

        let running = lifecycle
            .running
            .take()
            .expect("running state implies a running node");

        let mut failures: HashMap<&'static str, BoxError> = HashMap::new();
        for constructed in running.services.iter().rev() {
            if let Err(err) = constructed.service.stop() {
                failures.insert(constructed.type_name, err);
            }
        }

        running.server.stop();
        release_datadir(&running.datadir_lock);
        self.inner.ws.lock().take();

        tracing::info!(name = %self.inner.config.name, "node stopped");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StopError { services: failures }.into())
        }
    }

    /// Stops and immediately restarts the node; services come back as
    /// fresh instances.
    pub fn restart(&self) -> Result<(), NodeError> {
        self.stop()?;
        self.start()
    }

    /// Retrieves a running service by its concrete type.
    pub fn service<S: Service>(&self) -> Result<Arc<S>, NodeError> {
        let lifecycle = self.inner.lifecycle.lock();
        let running = lifecycle.running.as_ref().ok_or(NodeError::Stopped)?;

        running
            .services
            .iter()
            .find(|constructed| constructed.type_id == TypeId::of::<S>())
            .and_then(|constructed| Arc::downcast::<S>(constructed.as_any.clone()).ok())
            .ok_or(NodeError::ServiceUnknown)
    }

    /// The dispatch engine of the running node, for wiring external
    /// transports.
    pub fn server(&self) -> Result<Arc<Server>, NodeError> {
        let lifecycle = self.inner.lifecycle.lock();
        let running = lifecycle.running.as_ref().ok_or(NodeError::Stopped)?;

        Ok(running.server.clone())
    }

    /// Opens an in-process RPC connection to the running node. Must be
    /// called from within a tokio runtime.
    pub fn attach(&self) -> Result<ChannelTransport, NodeError> {
        let server = self.server()?;
        let (client, remote) = duplex();

        tokio::spawn(async move {
            server
                .serve_codec(remote, CodecOptions::with_subscriptions())
                .await;
        });

        Ok(client)
    }

    fn claim_datadir(&self) -> Result<Option<PathBuf>, NodeError> {
        let data_dir = &self.inner.config.data_dir;
        if data_dir.as_os_str().is_empty() {
            return Ok(None);
        }

        fs::create_dir_all(data_dir)?;

        let lock = data_dir.join("LOCK");
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
        {
            Ok(_) => Ok(Some(lock)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                Err(NodeError::DatadirUsed(data_dir.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl NodeInner {
    pub(crate) fn is_running(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_RUNNING
    }
}

fn release_datadir(lock: &Option<PathBuf>) {
    if let Some(path) = lock {
        fs::remove_file(path).ok();
    }
}
