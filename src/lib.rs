pub mod agent;
pub mod app;
pub mod cli;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod memory;
pub mod permissions;
pub mod persistence;
pub mod rag;
pub mod test_utils;
pub mod tools;
pub mod types;
