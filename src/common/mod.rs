pub mod keys;
pub mod types;
