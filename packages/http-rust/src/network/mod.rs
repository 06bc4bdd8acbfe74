//! Socket-facing side of the HTTP component: bind resolution, the `http`
//! configuration section, transport layers, and the listener set.

pub mod bind;
pub mod config;
pub mod listener;
pub mod middleware;

pub use bind::{resolve_bind, ANY_INTERFACE, LOOPBACK};
pub use config::{
    parse_port, HttpConfig, InvalidServerEntry, PortValue, ServerDescriptor, TlsConfig, Transport,
};
pub use listener::{Listener, ListenerSet, SkippedServer, StartSummary};
pub use middleware::{build_listener_router, build_transport_layers, REQUEST_ID_HEADER};
