#![doc = include_str!("../README.md")]
#![deny(unsafe_code)]

pub mod process;

// Re-export the supervisor surface
pub use process::{
    DEFAULT_READY_MARKER, JsonProcessStore, LogBuffer, MAX_LOG_LINES, PortAllocator,
    ProcessSupervisor, SupervisorConfig, build_launch_args, check_http_health, is_port_bindable,
};
