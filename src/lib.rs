pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod store;
pub mod ui;
pub mod view;
