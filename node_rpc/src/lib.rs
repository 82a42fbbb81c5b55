//! Wire-level types for the JSON-RPC 2.0 protocol spoken between nodes and
//! their clients: frame shapes, the error taxonomy, request-header parsing
//! and positional parameter binding. Everything here is transport-agnostic;
//! the I/O half of the codec lives in `node_server`.

pub mod domain;
pub mod error;
pub mod params;
pub mod rpc;
