//! Payload records exchanged over the pipe

pub mod request;
pub mod result;

pub use request::*;
pub use result::*;
