pub mod api;
pub mod config;
pub mod error;
pub mod labels;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod tasks;
