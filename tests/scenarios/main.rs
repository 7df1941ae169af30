//! Scenario-based tests for tool-pipeline

mod helpers;

mod branching;
mod concurrency;
mod success_chain;
