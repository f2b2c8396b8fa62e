pub mod config;
pub mod install;
pub mod passthrough;
