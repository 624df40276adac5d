pub mod config;
pub mod error;
pub mod types;
pub mod retry;
pub mod utils;
pub mod database;
