//! drainwatch: ECS sidecar that exits once its load balancer target drains
//!
//! Resolves the task's identity and target group at startup, polls target
//! health, and after the first DRAINING observation waits the deregistration
//! delay before exiting. Run as an essential container, that exit stops the
//! whole task.

pub mod aws;
pub mod config;
pub mod error;
pub mod server;
pub mod sidecar;
