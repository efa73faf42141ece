pub mod env;
pub mod task;
