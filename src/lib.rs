//! ragchat: resilient retrieval for a RAG chat application.
//!
//! The retrieval, resilience and ranking machinery lives in the
//! `ragchat-search` crate. This crate adds the application layer:
//! - **Configuration**: one TOML file covering every search setting
//! - **Services**: the explicit registry created at startup and shut down on exit
//! - **Corpus**: JSON document sets loaded into in-memory sources

pub mod config;
pub mod corpus;
pub mod error;
pub mod services;

pub use config::{AppConfig, SourceConfig};
pub use error::{AppError, Result};
pub use services::SearchServices;
