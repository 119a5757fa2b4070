//! Ready-to-go lifecycle hooks for message handlers.
pub mod pre_start;
