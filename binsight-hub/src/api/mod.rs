//! REST surface of the hub

pub mod error;
pub mod handlers;
