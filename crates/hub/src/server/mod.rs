pub mod bootstrap;
pub mod kubernetes;
