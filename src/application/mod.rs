//! Request-side orchestration: visit building, render modes and error mapping.

pub mod error;
pub mod globals;
pub mod render;
pub mod session;
pub mod version;
pub mod visit;
