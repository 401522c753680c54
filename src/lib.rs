//! Job and task execution engine for rollouts across fleets of network
//! elements.
//!
//! A job is a directed acyclic graph of tasks. The engine dispatches ready
//! tasks to pluggable [`processor::TaskProcessor`]s, propagates outcomes
//! along the graph, stalls on canary tasks until an operator confirms, and
//! times out tasks that never report back.

pub mod cli;
pub mod config;
pub mod editor;
pub mod engine;
pub mod error;
pub mod events;
pub mod expiry;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod processor;
pub mod repository;
pub mod submission;
pub mod ui;

pub use error::{JobError, ReasonCode, Result};
pub use orchestrator::{JobOrchestrator, TaskInfo};
