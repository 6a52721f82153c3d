//! HTTP route handlers

pub mod dashboard;
pub mod game;
pub mod inbox;
pub mod queue;
pub mod runs;
pub mod status;
pub mod variants;
