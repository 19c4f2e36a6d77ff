//! Device bridges between the graph and the native layer.
//!
//! A [`RenderBridge`] owns an output stream and runs the graph once per
//! hardware callback. A [`CaptureBridge`] feeds captured input into the
//! graph through a source node. When both target the same physical device
//! they share one duplex stream owned by the render side.

mod capture;
mod duplex;
mod render;

pub use capture::CaptureBridge;
pub use render::RenderBridge;

pub(crate) use capture::CaptureInner;
pub(crate) use render::RenderInner;

/// Lifecycle of a bridge.
///
/// ```text
/// Uninitialized -> Initialized -> Enabled <-> Disabled -> Uninitialized
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// No stream, no buffers.
    Uninitialized,
    /// Stream open and buffers sized, not yet started.
    Initialized,
    /// Stream running.
    Enabled,
    /// Stream stopped after having run.
    Disabled,
}

impl BridgeState {
    pub fn is_initialized(self) -> bool {
        self != BridgeState::Uninitialized
    }
}
