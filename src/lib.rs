//! Uniform client for hierarchical coordination on top of a zookeeper ensemble.
//!
//! The `ZookeeperClient` exposes node creation (persistent, ephemeral, sequential),
//! deletion, payload access, children listing, children watches and session state events.
//!
//! Failures to create a node that already exists, to delete a node that does not exist
//! and to list children of a missing node are absorbed; anything else is reported
//! as an `Error` carrying the zookeeper cause.
mod backend;
mod client;
mod config;
mod error;
mod listener;
mod metrics;
pub mod mock;
pub mod path;
mod serializer;

pub use self::backend::NodeKind;
pub use self::client::ZookeeperClient;
pub use self::config::ZookeeperConfig;
pub use self::error::failure_chain;
pub use self::error::Error;
pub use self::error::ErrorKind;
pub use self::error::Result;
pub use self::listener::ChildListener;
pub use self::listener::StateEvent;
pub use self::listener::StateListener;
pub use self::metrics::register_metrics;
pub use self::serializer::BincodeSerializer;
pub use self::serializer::JsonSerializer;
pub use self::serializer::Serializer;
