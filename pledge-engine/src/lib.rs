//! PLEDGE Engine - Running groups in real time
//!
//! This crate provides the live side of the exercise:
//! - Waiting queues and random group formation
//! - One cancellable round deadline per group
//! - Move intake and exactly-once round resolution
//! - The ports the engine reports through (transport, store, metrics)
//!
//! ## Architecture (4-layer granularity)
//!
//! - Level 1: Engine (orchestration)
//! - Level 2: Matchmaker (phases)
//! - Level 3: RoundScheduler (steps)
//! - Level 4: utilities, configuration

mod config;
mod engine;
mod locks;
mod matchmaker;
mod ports;
mod scheduler;

pub use config::{EngineConfig, Timing};
pub use engine::{Engine, GroupCounts, JoinOutcome, SubmitOutcome};
pub use matchmaker::{Formation, Matchmaker, QueueEntry};
pub use ports::{Audience, Discard, MetricsSink, Outbound, Ports, Recorder, Store, Transport};
pub use scheduler::{RoundScheduler, TimeoutHandler};
