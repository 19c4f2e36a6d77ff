//! Error types for bridge setup and control.
//!
//! Only control-thread operations (constructing a [`Context`](crate::Context),
//! initializing or toggling a bridge) return errors. Runtime glitches on the
//! audio thread never surface here; they are counted by the
//! [`GlitchReporter`](crate::GlitchReporter) instead.

/// Fatal errors raised while configuring or controlling a bridge.
///
/// A bridge whose `initialize` fails is left uninitialized. Nothing is
/// retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The context configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No device with this key is known to the native host.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// The device cannot provide the requested number of channels.
    #[error("device '{device}' has {available} {direction} channels, {requested} requested")]
    UnsupportedChannelCount {
        /// Key of the device.
        device: String,
        /// "input" or "output".
        direction: &'static str,
        /// Channels the caller asked for.
        requested: usize,
        /// Channels the device reports.
        available: usize,
    },

    /// The device only offers sample formats the bridge cannot handle.
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// The native layer refused to open a stream.
    #[error("failed to open stream on '{device}': {reason}")]
    StreamOpen {
        /// Key of the device.
        device: String,
        /// Native error description.
        reason: String,
    },

    /// The native layer refused to start a stream.
    #[error("failed to start stream: {0}")]
    StreamStart(String),

    /// The native layer refused to stop a stream.
    #[error("failed to stop stream: {0}")]
    StreamStop(String),

    /// The process-wide native audio layer failed to come up.
    #[error("native audio layer failed to initialize: {0}")]
    HostInit(String),

    /// The owning context was dropped; the bridge can no longer be used.
    #[error("the processing context has been dropped")]
    ContextDropped,

    /// A node's control message queue is full.
    #[error("node control queue is full")]
    ControlQueueFull,

    /// The node is not part of this context's graph.
    #[error("node {0:?} is not part of this graph")]
    UnknownNode(crate::node::NodeId),

    /// The context has no render bridge to drive the graph.
    #[error("no output device has been set")]
    NoOutput,
}

/// Convenience result type for bridge operations.
pub type Result<T> = std::result::Result<T, Error>;
