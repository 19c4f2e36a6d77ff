//! Built-in graph nodes.
//!
//! Capture sources are not listed here; each
//! [`CaptureBridge`](crate::CaptureBridge) adds its own node to the graph.

mod output;

pub use output::OutputNode;
