//! Assistant Orchestrator
//!
//! A conversational assistant backend that:
//! - Persists conversation threads with newest-first pagination
//! - Maintains a bounded cross-conversation global memory
//! - Correlates pause/resume workflows with their originating threads
//! - Drives client submissions through a single armed execution mode
//! - Exposes the whole surface over a REST API
//!
//! REQUEST LOOP:
//! SUBMIT → PREPROCESS → DISPATCH → LAND | CANCEL

pub mod ai;
pub mod api;
pub mod chat;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod workflow;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use orchestrator::{ExecutionMode, RequestOrchestrator};
