//! # pipes-bridge
//!
//! Host side of the pipes protocol: runs the map or reduce logic of a task
//! in an external worker process and talks to it over a loopback socket.
//!
//! ## Modules
//!
//! - `bridge` - worker lifecycle, the upward message handler, counters and partitioning
//! - `protocol` - wire encoding, command model, downlink and uplink ends, auth digests
//! - `task` - task context, record sources and sinks, the map and reduce drivers
//! - `avro` - Avro datums carried as opaque bytes in both directions
//! - `splits` - opaque split framing and the external split source
//! - `config` - job configuration and the settings derived from it
//! - `subprocess` - worker process launching, with a mock for tests
//! - `testing` - an in-process worker that speaks the protocol
pub mod avro;
pub mod bridge;
pub mod config;
pub mod error;
pub mod protocol;
pub mod splits;
pub mod subprocess;
pub mod task;

pub mod testing;

pub use bridge::{Application, ApplicationBuilder, CounterRegistry, OutputHandler};
pub use config::{JobConf, PipesConfig};
pub use error::{ErrorCode, PipesError, Result};
pub use splits::{OpaqueSplit, PipesInputFormat};
pub use task::{LocalTaskContext, MapTask, ReduceTask, TaskContext};
