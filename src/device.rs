//! Device descriptions and native index lookup.
//!
//! A [`Device`] describes a physical audio endpoint as reported by a
//! [`NativeHost`](crate::host::NativeHost). Bridges keep a copy of the
//! description and compare devices by [`key`](Device::key); they never own the
//! hardware itself.
//!
//! # Example: List Devices
//!
//! ```
//! use klangport::host::{MockHost, NativeHost};
//! use klangport::Device;
//!
//! let host = MockHost::with_devices(vec![
//!     Device::new("0 - Mock - Speakers", "Speakers").with_output_channels(2),
//! ]);
//! for device in host.devices() {
//!     println!("{} ({} Hz, {} out)", device.name, device.sample_rate, device.output_channels);
//! }
//! ```

/// A physical audio endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Stable identifier, unique per host.
    pub key: String,
    /// Human-readable name.
    pub name: String,
    /// Maximum input channels (0 for output-only devices).
    pub input_channels: usize,
    /// Maximum output channels (0 for input-only devices).
    pub output_channels: usize,
    /// Native sample rate in Hz.
    pub sample_rate: u32,
    /// Native frames per hardware callback.
    pub frames_per_block: usize,
}

impl Device {
    /// Create a device with no channels at 48 kHz / 512 frames.
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            input_channels: 0,
            output_channels: 0,
            sample_rate: 48000,
            frames_per_block: 512,
        }
    }

    /// Build the host-wide key for a device, `"{index} - {host} - {name}"`.
    pub fn make_key(index: usize, host: &str, name: &str) -> String {
        format!("{} - {} - {}", index, host, name)
    }

    /// Set the input channel count (builder pattern).
    pub fn with_input_channels(mut self, channels: usize) -> Self {
        self.input_channels = channels;
        self
    }

    /// Set the output channel count (builder pattern).
    pub fn with_output_channels(mut self, channels: usize) -> Self {
        self.output_channels = channels;
        self
    }

    /// Set the native sample rate (builder pattern).
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Set the native block size (builder pattern).
    pub fn with_frames_per_block(mut self, frames: usize) -> Self {
        self.frames_per_block = frames;
        self
    }

    /// Whether two descriptions refer to the same physical endpoint.
    #[inline]
    pub fn same_endpoint(&self, other: &Device) -> bool {
        self.key == other.key
    }
}

/// Resolves a device key to the index the native layer uses to open streams.
///
/// Implemented by device registries; this is the only native detail the
/// bridges need from them.
pub trait NativeDeviceIndexLookup {
    /// Native index of the device with this key, if the host knows it.
    fn native_device_index(&self, key: &str) -> Option<usize>;
}

impl NativeDeviceIndexLookup for [Device] {
    fn native_device_index(&self, key: &str) -> Option<usize> {
        self.iter().position(|d| d.key == key)
    }
}
