pub mod capacity;
pub mod collector;
pub mod group;
pub mod manager;
pub mod pod;
pub mod priority;
pub mod quota;
pub mod rules;
pub mod selector;
pub mod snapshot;
pub mod task;
