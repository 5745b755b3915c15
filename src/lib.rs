#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod controller;
pub mod help;
pub mod input;
pub mod menu;
pub mod mesh;
pub mod nav;
pub mod outbound;
pub mod reducer;
pub mod render;
pub mod settings;
pub mod state;
pub mod storage;
pub mod surface;
pub mod transport;
pub mod ui;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::{run, RunOptions};
