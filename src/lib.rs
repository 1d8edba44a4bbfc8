pub mod config;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod query;
pub mod repository;
pub mod rpc;
pub mod scanner;
pub mod source;
