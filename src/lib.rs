pub mod audit;
pub mod clock;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod guard;
pub mod kafka;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod prompt;
pub mod sanitize;
pub mod scheduler;
pub mod service;
pub mod taxonomy;
pub mod triage;
pub mod updates;
pub mod validate;
