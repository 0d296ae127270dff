pub mod config;
mod config_env;
pub mod models;
pub mod processor;
pub mod repos;
pub mod retry_policy;
