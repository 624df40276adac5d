pub mod ast;
pub mod parser;
pub mod matcher;
pub mod types;
pub mod aliases;
pub mod engine;
