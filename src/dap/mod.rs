//! Front-end side: Debug Adapter Protocol framing, messages and connection

pub mod framing;
pub mod frontend;
pub mod protocol;

pub use frontend::{FrontEnd, RequestTicket};
