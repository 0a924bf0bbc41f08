pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod payload;
pub mod protocol;
pub mod query;
pub mod scheduler;
pub mod shutdown;
pub mod submit;
pub mod worker;
