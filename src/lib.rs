#![allow(dead_code)]
// Library entrypoint for integration tests and internal reuse.
pub mod api;
pub mod config;
pub mod confluence;
pub mod llm;
pub mod orchestrator;
pub mod prompting;
pub mod schemas;
pub mod shutdown;
pub mod state;
pub mod tools;
