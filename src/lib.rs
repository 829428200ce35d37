//! Multi-agent retrieval-augmented orchestration runtime.
//!
//! [`manager::Manager`] is the single entry point that ties together session
//! storage, tiered memory, the vector-store facade, the reasoning pipeline,
//! and the specialist agent registry; [`api`] exposes it over HTTP and
//! WebSocket.

pub mod agents;
pub mod api;
pub mod config;
pub mod debug;
pub mod events;
pub mod llm;
pub mod logging;
pub mod manager;
pub mod memory;
pub mod rag;
pub mod reasoning;
pub mod store;
pub mod types;

pub use config::RuntimeConfig;
pub use manager::Manager;
