pub mod application;
pub mod cache;
pub mod client;
pub mod config;
pub mod infra;
pub mod presentation;
pub(crate) mod util;
