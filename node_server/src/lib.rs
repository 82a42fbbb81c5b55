//! The JSON-RPC 2.0 server core: message codec over an opaque transport,
//! the dispatch engine with its service registry, and the per-connection
//! notification broker backing `_subscribe`/`_unsubscribe` methods.

pub use crate::{
    codec::{duplex, ChannelTransport, MessageSink, ServerCodec, Transport, TransportError},
    module::{format_name, CallContext, RpcModule},
    notifier::{notifications_unsupported, Notifier, Subscription},
    server::{CodecOptions, RegistrationError, Server, METADATA_API},
};

mod codec;
mod module;
mod notifier;
mod server;
