#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod auth;
pub mod config;
pub mod data;
pub mod feed;
pub mod page;
pub mod reddit;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
