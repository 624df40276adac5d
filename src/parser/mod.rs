pub mod adapter;
pub mod json_task;

pub use adapter::{parser_factory, ParserAdapter, ParserFactory};
pub use json_task::JsonTaskParser;
