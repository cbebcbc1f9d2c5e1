//! Scenario-based tests for flowline

mod concurrent_runs;
mod scripted_flow;
