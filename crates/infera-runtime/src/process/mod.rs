//! Process management for inference-server subprocesses.
//!
//! # Structure
//!
//! - `PortAllocator` - exclusive ports from a fixed range
//! - `build_launch_args` - deterministic argument vector
//! - `LogBuffer` - bounded per-process output history
//! - `ProcessSupervisor` - lifecycle, events and persistence
//! - `JsonProcessStore` - durable record set
//! - Health checks and termination helpers

mod args;
mod health;
mod logs;
mod ports;
mod shutdown;
mod store;
mod stream;
mod supervisor;

pub use args::build_launch_args;
pub use health::check_http_health;
pub use logs::{LogBuffer, MAX_LOG_LINES};
pub use ports::{PortAllocator, is_port_bindable};
pub use shutdown::{describe_exit, send_terminate};
pub use store::JsonProcessStore;
pub use supervisor::{
    DEFAULT_HEALTH_TIMEOUT, DEFAULT_READY_MARKER, DEFAULT_SPAWN_GRACE, DEFAULT_STOP_TIMEOUT,
    ProcessSupervisor, SupervisorConfig,
};
