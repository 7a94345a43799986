pub mod cli;
pub mod config;
pub mod context;
pub mod core;
pub mod export;
pub mod logging;
pub mod settings;
