//! Example model clients built on the [`crate::agents::ThreadedAgent`] contract.
//!
//! [`grid`] is shared infrastructure (grid-file parsing, box-drawing output) used
//! only by [`search`]; [`highlife`] renders its own plain-text grid dumps.

pub mod grid;
pub mod highlife;
pub mod search;
