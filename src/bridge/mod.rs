//! The host side of a pipes session: the worker application, the handler of
//! its upward messages and the shared per-attempt state they need.

pub mod application;
pub mod counters;
pub mod executable;
pub mod handler;
pub mod partition;

pub use application::{Application, ApplicationBuilder};
pub use counters::{Counter, CounterRegistry, Counters};
pub use handler::OutputHandler;
pub use partition::{
    HashPartitioner, PartitionSlot, Partitioner, PartitionerRegistry, PipesPartitioner,
};
