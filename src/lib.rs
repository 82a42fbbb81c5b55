//! Facade crate re-exporting the node framework components: wire types
//! (`rpc`), the JSON-RPC server core (`server`) and the service lifecycle
//! stack (`stack`).

#[cfg(feature = "rpc")]
pub use node_rpc as rpc;

#[cfg(feature = "server")]
pub use node_server as server;

#[cfg(feature = "stack")]
pub use node_stack as stack;
