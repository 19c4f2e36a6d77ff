//! Bridge a fixed-block pull graph to hardware audio callbacks.
//!
//! The graph runs inside the output device's callback: each callback pulls
//! exactly one block through the [`RenderBridge`]. Captured input reaches the
//! graph through a [`CaptureBridge`], either over per-channel lock-free rings
//! fed by the input device's own callback, or, when input and output share a
//! physical device, straight from the duplex callback's input half.
//!
//! Design principles:
//! - The hardware thread never allocates, logs, or waits on anything but the
//!   processing lock
//! - Node parameters and capture readers travel through `rtrb` queues
//! - Glitches are counted on the audio thread and reported later
//! - Device input at a foreign rate is converted before it enters the rings
//!
//! ```
//! use klangport::host::MockHost;
//! use klangport::{Context, ContextConfig, Device};
//!
//! let interface = Device::new("0 - Mock - Interface", "Interface")
//!     .with_input_channels(2)
//!     .with_output_channels(2);
//! let host = MockHost::with_devices(vec![interface.clone()]);
//!
//! let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
//! let mic = context.create_capture_bridge(&interface).unwrap();
//! context.output(&mic).unwrap();
//! context.create_render_bridge(&interface);
//! context.enable().unwrap();
//! mic.initialize().unwrap();
//! mic.enable_processing().unwrap();
//!
//! // One shared stream: what comes in goes straight back out.
//! let input: Vec<f32> = (0..1024).map(|i| i as f32 / 1024.0).collect();
//! let output = host.run_output_cycle(&interface.key, &input).unwrap();
//! assert_eq!(output, input);
//! ```

mod bridge;
mod buffer;
mod config;
mod context;
mod convert;
mod device;
mod error;
mod glitch;
mod graph;
mod node;

pub mod host;
pub mod nodes;
pub mod ring_buffer;

pub use bridge::{BridgeState, CaptureBridge, RenderBridge};
pub use buffer::PlanarBuffer;
pub use config::ContextConfig;
pub use context::{Context, Handle};
pub use convert::{LinearConverter, RateConverter};
pub use device::{Device, NativeDeviceIndexLookup};
pub use error::{Error, Result};
pub use glitch::{GlitchReporter, GlitchSnapshot};
pub use graph::is_audio_thread;
pub use node::{AudioNode, GraphNode, NodeId, ProcessContext};
