//! Command relay
//!
//! A TCP server that accepts one JSON request line per connection, optionally
//! fires an instrumentation launcher, and routes the request to a registered
//! executor whose response line is written back to the client.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod launch;
pub mod server;
pub mod transport;

pub use config::{ErrorReplyMode, RelayConfig};
pub use error::{DispatchError, ListenerError};
pub use executor::{EchoExecutor, Executor, ExecutorRegistry};
pub use launch::{InstrumentationLauncher, LaunchOutcome, ProcessLauncher, ReadySignal};
pub use relay_shared::{CommandRequest, LAUNCH_COMMAND};
pub use server::RelayServer;
