pub mod spec;
pub mod field_index;
pub mod builder;
