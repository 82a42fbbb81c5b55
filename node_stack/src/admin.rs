//! The built-in administrative RPC surface, registered under the `admin`
//! namespace on every node start.

use {
    crate::node::{NodeInner, WsEndpoint},
    node_rpc::{error::RpcError, params::Params},
    node_server::{CallContext, RpcModule},
    serde::Serialize,
    std::sync::{Arc, Weak},
};

/// Static description of one registered API namespace, reported by
/// `admin_nodeInfo`.
#[derive(Debug, Clone, Serialize)]
pub struct ApiInfo {
    pub namespace: String,
    pub version: String,
    pub public: bool,
}

fn node_gone() -> RpcError {
    RpcError::Callback("node has shut down".into())
}

fn upgrade(node: &Weak<NodeInner>) -> Result<Arc<NodeInner>, RpcError> {
    node.upgrade().ok_or_else(node_gone)
}

/// Builds the admin module for one running episode of the node. The API
/// and service listings are fixed at start time; the running state and the
/// WebSocket endpoint are read through the node handle.
pub(crate) fn module(
    node: Weak<NodeInner>,
    apis: Vec<ApiInfo>,
    services: Vec<&'static str>,
) -> RpcModule {
    let mut module = RpcModule::new();

    {
        let node = node.clone();
        module.register_method("nodeInfo", move |_ctx: CallContext, _params: Params| {
            let node = node.clone();
            let apis = apis.clone();
            let services = services.clone();

            async move {
                let inner = upgrade(&node)?;
                let config = serde_json::to_value(&inner.config)
                    .map_err(|err| RpcError::Callback(err.to_string()))?;

                Ok::<_, RpcError>(serde_json::json!({
                    "config": config,
                    "apis": apis,
                    "services": services,
                    "isRunning": inner.is_running(),
                }))
            }
        });
    }

    {
        let node = node.clone();
        module.register_method("dataDir", move |_ctx: CallContext, _params: Params| {
            let node = node.clone();

            async move {
                let inner = upgrade(&node)?;
                Ok::<_, RpcError>(inner.config.data_dir.display().to_string())
            }
        });
    }

    {
        let node = node.clone();
        module.register_method("version", move |_ctx: CallContext, _params: Params| {
            let node = node.clone();

            async move {
                let inner = upgrade(&node)?;
                Ok::<_, RpcError>(format!("{} {}", inner.config.name, inner.config.version))
            }
        });
    }

    module.register_method("ping", |_ctx: CallContext, _params: Params| async move {
        Ok::<_, RpcError>("pong")
    });

    {
        let node = node.clone();
        module.register_method("startWS", move |_ctx: CallContext, params: Params| {
            let node = node.clone();

            async move {
                let (host, port, origins, modules) =
                    params.parse::<(Option<String>, Option<u16>, Option<String>, Option<String>)>()?;

                upgrade(&node)?.start_ws(host, port, origins, modules)
            }
        });
    }

    module.register_method("stopWS", move |_ctx: CallContext, _params: Params| {
        let node = node.clone();

        async move { upgrade(&node)?.stop_ws() }
    });

    module
}

impl NodeInner {
    pub(crate) fn start_ws(
        &self,
        host: Option<String>,
        port: Option<u16>,
        origins: Option<String>,
        modules: Option<String>,
    ) -> Result<bool, RpcError> {
        let mut ws = self.ws.lock();

        if let Some(endpoint) = ws.as_ref() {
            return Err(RpcError::Callback(format!(
                "WebSocket RPC already running on {}:{}",
                endpoint.host, endpoint.port
            )));
        }

        let endpoint = WsEndpoint {
            host: host.unwrap_or_else(|| self.config.ws_host.clone()),
            port: port.unwrap_or(self.config.ws_port),
            origins: origins
                .map(|list| split_list(&list))
                .unwrap_or_else(|| self.config.ws_origins.clone()),
            modules: modules
                .map(|list| split_list(&list))
                .unwrap_or_else(|| self.config.ws_modules.clone()),
        };

        tracing::info!(
            host = %endpoint.host,
            port = endpoint.port,
            origins = ?endpoint.origins,
            modules = ?endpoint.modules,
            "websocket endpoint enabled"
        );
        *ws = Some(endpoint);

        Ok(true)
    }

    pub(crate) fn stop_ws(&self) -> Result<bool, RpcError> {
        if self.ws.lock().take().is_none() {
            return Err(RpcError::Callback("WebSocket RPC not running".into()));
        }

        Ok(true)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',').map(|item| item.trim().to_owned()).collect()
}
