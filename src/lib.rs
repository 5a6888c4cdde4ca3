//! A non-blocking, readiness-driven I/O reactor core.
//!
//! Every connection is driven by exactly one [`selector::ManagedSelector`],
//! itself owned by a [`selector_manager::SelectorManager`]. Protocol logic
//! plugs in through [`connection::Connection`] and
//! [`connection::ConnectionFactory`]; this crate owns none of it.
//!
//! Start here: [`selector_manager::SelectorManager::start`] to bring up a
//! pool of selectors, then [`selector_manager::SelectorManager::serve_tcp`],
//! [`selector_manager::SelectorManager::adopt_tcp`], or
//! [`selector_manager::SelectorManager::connect_tcp`] to hand it channels.

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]

pub mod callback;
pub mod chunk;
pub mod config;
pub mod connection;
pub mod content;
pub mod endpoint;
pub mod error;
pub mod executor;
pub mod iterate;
pub mod listener_hooks;
pub mod net;
pub mod pool;
pub mod selector;
pub mod selector_manager;

pub use callback::{BoxCallback, Callback, FnCallback};
pub use chunk::Chunk;
pub use config::Options;
pub use connection::{ConnectContext, Connection, ConnectionFactory};
pub use content::{copy, BlockingSink, BlockingSource, DemandCallback, EndpointSink, QueueSource, Sink, Source};
pub use endpoint::{Endpoint, EndpointHandle};
pub use error::{CoreError, Severity};
pub use iterate::{Driver, Step, StepResult};
pub use listener_hooks::{ConnectionListener, ListenerRegistry};
pub use selector_manager::SelectorManager;
