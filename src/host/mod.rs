//! Native audio layer abstraction.
//!
//! A [`NativeHost`] is the process-wide audio API: it enumerates devices and
//! opens streams whose callback runs on a hardware thread. Bridges never
//! talk to a host directly; they go through a [`HostSession`], which brings
//! the native layer up once and tears it down after the last user is gone.
//!
//! Two hosts ship with the crate:
//!
//! - [`MockHost`]: in-memory devices driven by hand, for tests
//! - `CpalHost` (feature `cpal_host`): the system audio API through cpal

#[cfg(feature = "cpal_host")]
mod cpal;
mod mock;

#[cfg(feature = "cpal_host")]
pub use self::cpal::CpalHost;
pub use mock::{HostEvent, MockHost, MockStreamInfo};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::{Device, NativeDeviceIndexLookup};
use crate::error::Result;

/// Parameters for opening a native stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamParams {
    /// Index from [`NativeDeviceIndexLookup::native_device_index`].
    pub device_index: usize,
    /// Input channels, or `None` for an output-only stream.
    pub input_channels: Option<usize>,
    /// Output channels; 0 for an input-only stream.
    pub output_channels: usize,
    /// Stream sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per callback.
    pub frames_per_buffer: usize,
}

impl StreamParams {
    pub fn is_duplex(&self) -> bool {
        self.input_channels.is_some() && self.output_channels > 0
    }
}

/// Hardware callback: interleaved input, interleaved output.
///
/// The input half is empty for output-only streams and the output half is
/// empty for input-only streams. Runs on the hardware thread; it must not
/// block, allocate, or log.
pub type StreamCallback = Box<dyn FnMut(&[f32], &mut [f32]) + Send>;

/// An open native stream. Dropping it closes the stream.
pub trait NativeStream: Send {
    /// Start invoking the callback.
    fn start(&mut self) -> Result<()>;

    /// Stop invoking the callback. Blocks until no callback is running.
    fn stop(&mut self) -> Result<()>;
}

/// A process-wide native audio API.
pub trait NativeHost: NativeDeviceIndexLookup + Send + Sync {
    /// Name of the host API, used in device keys.
    fn name(&self) -> &str;

    /// Bring the native layer up.
    fn initialize(&self) -> Result<()>;

    /// Tear the native layer down. Called once no stream is open.
    fn terminate(&self);

    /// All known devices.
    fn devices(&self) -> Vec<Device>;

    fn default_output_device(&self) -> Option<Device>;

    fn default_input_device(&self) -> Option<Device>;

    /// Open a stream. The callback does not run until
    /// [`NativeStream::start`].
    fn open_stream(&self, params: &StreamParams, callback: StreamCallback) -> Result<Box<dyn NativeStream>>;
}

/// Keeps the native layer initialized while anything uses it.
///
/// The context holds one reference and every open [`StreamHandle`] holds
/// another, so the native layer terminates only after the context and all of
/// its streams are gone.
pub struct HostSession {
    host: Arc<dyn NativeHost>,
    live_streams: AtomicUsize,
}

impl HostSession {
    /// Initialize the native layer.
    pub fn acquire(host: Arc<dyn NativeHost>) -> Result<Arc<Self>> {
        host.initialize()?;
        tracing::info!(host = host.name(), "native audio layer initialized");
        Ok(Arc::new(Self {
            host,
            live_streams: AtomicUsize::new(0),
        }))
    }

    pub fn host(&self) -> &dyn NativeHost {
        self.host.as_ref()
    }

    /// Streams currently open through this session.
    pub fn live_streams(&self) -> usize {
        self.live_streams.load(Ordering::Acquire)
    }

    /// Open a stream bound to this session.
    pub fn open_stream(self: &Arc<Self>, params: &StreamParams, callback: StreamCallback) -> Result<StreamHandle> {
        let stream = self.host.open_stream(params, callback)?;
        self.live_streams.fetch_add(1, Ordering::AcqRel);
        Ok(StreamHandle {
            stream: Some(stream),
            running: false,
            session: Arc::clone(self),
        })
    }
}

impl Drop for HostSession {
    fn drop(&mut self) {
        self.host.terminate();
        tracing::info!(host = self.host.name(), "native audio layer terminated");
    }
}

/// An open stream owned by exactly one bridge.
///
/// Dropping the handle stops the stream if it is running, then closes it.
pub struct StreamHandle {
    stream: Option<Box<dyn NativeStream>>,
    running: bool,
    session: Arc<HostSession>,
}

impl StreamHandle {
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.start()?;
            self.running = true;
        }
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        if let Some(stream) = self.stream.as_mut() {
            stream.stop()?;
        }
        self.running = false;
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop stream before closing");
        }
        // Close before the session reference goes away.
        drop(self.stream.take());
        self.session.live_streams.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("running", &self.running)
            .finish_non_exhaustive()
    }
}
