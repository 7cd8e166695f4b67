//! Debug session: the front-end/debuggee translation layer
//!
//! - **controller**: the per-connection state machine
//! - **handles**: integer handles for variable containers and inline sources
//! - **breakpoints**: line verification and per-file breakpoint sets
//! - **paths**: client ↔ debuggee path translation over source roots
//! - **config**: launch/attach argument resolution

pub mod breakpoints;
pub mod config;
pub mod controller;
pub mod error;
pub mod handles;
pub mod paths;


pub use controller::DebugSession;
