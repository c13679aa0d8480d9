pub mod agent;
pub mod cli;
pub mod command;
pub mod config;
pub mod instance;
pub mod remote;
pub mod shipper;
pub mod watcher;
