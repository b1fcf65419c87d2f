//! sawmill - a remote build execution service.
//!
//! A client uploads a content-addressed input tree and a command, asks for
//! execution, and watches for the completed operation:
//!
//! 1. `cas.find_missing_blobs` tells it which inputs the store lacks.
//! 2. `bytestream.write` uploads them, resumably.
//! 3. `execution.execute` queues the action and returns a long-running
//!    operation handle.
//! 4. The executor materializes the input tree, runs the command, ingests
//!    outputs back into the store, caches the `ActionResult`, and publishes
//!    completion.
//! 5. `watcher.watch` delivers that completion to the subscribed client.
//!
//! Modules follow that shape: storage-facing services in [`services`], the
//! run machinery in [`executor`], the pub/sub fabric in [`broker`], and the
//! wire surface in [`server`].

pub mod broker;
pub mod config;
pub mod executor;
pub mod keys;
pub mod server;
pub mod services;
pub mod telemetry;

pub use broker::{Broker, Topic};
pub use config::SawmillConfig;
pub use executor::Executor;
pub use keys::Keyspace;
pub use server::AppState;
