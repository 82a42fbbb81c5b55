//! Service lifecycle orchestration: a node owns a set of lazily
//! constructed services, aggregates their RPC surface onto one dispatch
//! engine and walks them through start/stop/restart with strict failure
//! unwinding.

pub use crate::{
    admin::ApiInfo,
    config::Config,
    node::{Api, BoxError, Node, NodeError, Service, ServiceContext, StopError},
};

pub mod admin;
pub mod config;
pub mod node;
