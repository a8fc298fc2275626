//! SQLite statement execution with results encoded as Erlang terms.
//!
//! A [`Connection`] receives `[tag][sql]` commands, runs each statement as an
//! [`ExecutionTask`], and hands the finished reply to a [`Transport`].

pub mod command;
pub mod connection;
pub mod encoder;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod stats;
pub mod task;
pub mod transport;

pub use command::{Command, CMD_SQL_EXEC};
pub use connection::Connection;
pub use encoder::ResultEncoder;
pub use envelope::{Reply, StepEnd, TaskOutcome, BUSY_MESSAGE, STATUS_DONE};
pub use error::DriverError;
pub use registry::{TaskEntry, TaskRegistry};
pub use stats::{ResourceSnapshot, ResourceStats};
pub use task::{ExecutionTask, Prepared, TaskContext, TaskId, TaskState};
pub use transport::{deliver_reply, MemoryTransport, PacketTransport, Transport};
