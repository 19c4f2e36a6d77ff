//! System audio through cpal.

use std::sync::mpsc;
use std::thread::JoinHandle;

use ::cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ::cpal::{BufferSize, SampleFormat, SampleRate, StreamConfig, SupportedBufferSize};
use parking_lot::RwLock;
use rtrb::{Consumer, RingBuffer};

use super::{NativeHost, NativeStream, StreamCallback, StreamParams};
use crate::device::{Device, NativeDeviceIndexLookup};
use crate::error::{Error, Result};

/// Block size reported for devices that do not pin one down.
const DEFAULT_FRAMES: usize = 512;

/// The platform's default cpal host.
///
/// cpal streams are not `Send` on every platform, so each stream lives on a
/// dedicated thread and is driven by command messages. Device descriptions
/// are cached at [`initialize`](NativeHost::initialize); the native index of
/// a device is its position in cpal's enumeration.
pub struct CpalHost {
    id: ::cpal::HostId,
    devices: RwLock<Vec<Device>>,
}

impl CpalHost {
    pub fn new() -> Self {
        Self {
            id: ::cpal::default_host().id(),
            devices: RwLock::new(Vec::new()),
        }
    }

    fn host(&self) -> Result<::cpal::Host> {
        ::cpal::host_from_id(self.id).map_err(|e| Error::HostInit(e.to_string()))
    }

    fn enumerate(&self) -> Result<Vec<Device>> {
        let host = self.host()?;
        let devices = host.devices().map_err(|e| Error::HostInit(e.to_string()))?;
        Ok(devices
            .enumerate()
            .filter_map(|(index, device)| describe(self.id.name(), index, &device))
            .collect())
    }

    fn find_by_name(&self, name: Option<String>) -> Option<Device> {
        let name = name?;
        self.devices().into_iter().find(|d| d.name == name)
    }
}

impl Default for CpalHost {
    fn default() -> Self {
        Self::new()
    }
}

fn describe(host_name: &str, index: usize, device: &::cpal::Device) -> Option<Device> {
    let name = device.name().ok()?;
    let output = device.default_output_config().ok();
    let input = device.default_input_config().ok();
    let reference = output.as_ref().or(input.as_ref())?;

    let frames = match reference.buffer_size() {
        SupportedBufferSize::Range { min, max } => DEFAULT_FRAMES.max(*min as usize).min(*max as usize),
        SupportedBufferSize::Unknown => DEFAULT_FRAMES,
    };

    Some(
        Device::new(Device::make_key(index, host_name, &name), name)
            .with_input_channels(input.as_ref().map_or(0, |c| c.channels() as usize))
            .with_output_channels(output.as_ref().map_or(0, |c| c.channels() as usize))
            .with_sample_rate(reference.sample_rate().0)
            .with_frames_per_block(frames),
    )
}

impl NativeDeviceIndexLookup for CpalHost {
    fn native_device_index(&self, key: &str) -> Option<usize> {
        self.devices.read().native_device_index(key)
    }
}

impl NativeHost for CpalHost {
    fn name(&self) -> &str {
        self.id.name()
    }

    fn initialize(&self) -> Result<()> {
        let devices = self.enumerate()?;
        tracing::debug!(count = devices.len(), "enumerated cpal devices");
        *self.devices.write() = devices;
        Ok(())
    }

    fn terminate(&self) {
        self.devices.write().clear();
    }

    fn devices(&self) -> Vec<Device> {
        let cached = self.devices.read().clone();
        if !cached.is_empty() {
            return cached;
        }
        self.enumerate().unwrap_or_default()
    }

    fn default_output_device(&self) -> Option<Device> {
        let name = self.host().ok()?.default_output_device()?.name().ok();
        self.find_by_name(name)
    }

    fn default_input_device(&self) -> Option<Device> {
        let name = self.host().ok()?.default_input_device()?.name().ok();
        self.find_by_name(name)
    }

    fn open_stream(&self, params: &StreamParams, callback: StreamCallback) -> Result<Box<dyn NativeStream>> {
        let host_id = self.id;
        let device_index = params.device_index;
        let params = params.clone();
        let (ready_tx, ready_rx) = mpsc::channel();
        let (command_tx, command_rx) = mpsc::channel();

        let thread = std::thread::Builder::new()
            .name("klangport-stream".into())
            .spawn(move || {
                let streams = match build_streams(host_id, &params, callback) {
                    Ok(streams) => streams,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                run_stream_thread(streams, command_rx);
            })
            .map_err(|e| open_error(device_index, e))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                commands: Some(command_tx),
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(open_error(device_index, "stream thread exited during setup"))
            }
        }
    }
}

enum Command {
    Start(mpsc::Sender<Result<()>>),
    Stop(mpsc::Sender<Result<()>>),
}

fn run_stream_thread(streams: Vec<::cpal::Stream>, commands: mpsc::Receiver<Command>) {
    // Exits when the owning CpalStream drops its sender.
    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(ack) => {
                let result = streams
                    .iter()
                    .try_for_each(|s| s.play())
                    .map_err(|e| Error::StreamStart(e.to_string()));
                let _ = ack.send(result);
            }
            Command::Stop(ack) => {
                let result = streams
                    .iter()
                    .rev()
                    .try_for_each(|s| s.pause())
                    .map_err(|e| Error::StreamStop(e.to_string()));
                let _ = ack.send(result);
            }
        }
    }
}

struct CpalStream {
    commands: Option<mpsc::Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalStream {
    fn request(&self, make: fn(mpsc::Sender<Result<()>>) -> Command, lost: fn(String) -> Error) -> Result<()> {
        let (ack_tx, ack_rx) = mpsc::channel();
        let commands = self
            .commands
            .as_ref()
            .ok_or_else(|| lost("stream is closed".into()))?;
        commands
            .send(make(ack_tx))
            .map_err(|_| lost("stream thread is gone".into()))?;
        ack_rx
            .recv()
            .map_err(|_| lost("stream thread is gone".into()))?
    }
}

impl NativeStream for CpalStream {
    fn start(&mut self) -> Result<()> {
        self.request(Command::Start, Error::StreamStart)
    }

    fn stop(&mut self) -> Result<()> {
        self.request(Command::Stop, Error::StreamStop)
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        drop(self.commands.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn stream_config(channels: usize, params: &StreamParams) -> StreamConfig {
    StreamConfig {
        channels: channels as u16,
        sample_rate: SampleRate(params.sample_rate),
        buffer_size: BufferSize::Fixed(params.frames_per_buffer as u32),
    }
}

fn require_f32(format: SampleFormat) -> Result<()> {
    if format == SampleFormat::F32 {
        Ok(())
    } else {
        Err(Error::UnsupportedFormat(format!("{:?}", format)))
    }
}

fn open_error(index: usize, e: impl std::fmt::Display) -> Error {
    Error::StreamOpen {
        device: format!("native index {}", index),
        reason: e.to_string(),
    }
}

fn build_streams(
    host_id: ::cpal::HostId,
    params: &StreamParams,
    mut callback: StreamCallback,
) -> Result<Vec<::cpal::Stream>> {
    let host = ::cpal::host_from_id(host_id).map_err(|e| Error::HostInit(e.to_string()))?;
    let device = host
        .devices()
        .map_err(|e| open_error(params.device_index, e))?
        .nth(params.device_index)
        .ok_or_else(|| Error::DeviceNotFound(format!("native index {}", params.device_index)))?;

    let err_fn = |err: ::cpal::StreamError| tracing::error!(error = %err, "cpal stream error");
    let mut streams = Vec::with_capacity(2);

    if params.output_channels == 0 {
        let channels = params.input_channels.unwrap_or(0);
        let supported = device
            .default_input_config()
            .map_err(|e| open_error(params.device_index, e))?;
        require_f32(supported.sample_format())?;

        let stream = device
            .build_input_stream(
                &stream_config(channels, params),
                move |data: &[f32], _: &::cpal::InputCallbackInfo| callback(data, &mut []),
                err_fn,
                None,
            )
            .map_err(|e| open_error(params.device_index, e))?;
        streams.push(stream);
        return Ok(streams);
    }

    let supported = device
        .default_output_config()
        .map_err(|e| open_error(params.device_index, e))?;
    require_f32(supported.sample_format())?;

    let input_channels = params.input_channels.unwrap_or(0);
    let input = if input_channels > 0 {
        let supported = device
            .default_input_config()
            .map_err(|e| open_error(params.device_index, e))?;
        require_f32(supported.sample_format())?;

        let capacity = params.frames_per_buffer * input_channels * 4;
        let (mut producer, consumer) = RingBuffer::<f32>::new(capacity);
        let stream = device
            .build_input_stream(
                &stream_config(input_channels, params),
                move |data: &[f32], _: &::cpal::InputCallbackInfo| {
                    // Drop what does not fit; the output side reads silence.
                    if let Ok(chunk) = producer.write_chunk_uninit(data.len().min(producer.slots())) {
                        chunk.fill_from_iter(data.iter().copied());
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| open_error(params.device_index, e))?;
        streams.push(stream);
        Some(consumer)
    } else {
        None
    };

    let mut adapter = BlockAdapter::new(params.frames_per_buffer, input_channels, params.output_channels, input);
    let stream = device
        .build_output_stream(
            &stream_config(params.output_channels, params),
            move |data: &mut [f32], _: &::cpal::OutputCallbackInfo| adapter.fill(data, &mut callback),
            err_fn,
            None,
        )
        .map_err(|e| open_error(params.device_index, e))?;
    streams.push(stream);

    tracing::info!(
        device_index = params.device_index,
        input_channels,
        output_channels = params.output_channels,
        sample_rate = params.sample_rate,
        frames = params.frames_per_buffer,
        "cpal stream opened"
    );
    Ok(streams)
}

/// Re-blocks cpal's variable-size output callbacks into fixed blocks.
struct BlockAdapter {
    input: Option<Consumer<f32>>,
    input_block: Vec<f32>,
    output_block: Vec<f32>,
    pos: usize,
}

impl BlockAdapter {
    fn new(frames: usize, input_channels: usize, output_channels: usize, input: Option<Consumer<f32>>) -> Self {
        let output_len = frames * output_channels;
        Self {
            input,
            input_block: vec![0.0; frames * input_channels],
            output_block: vec![0.0; output_len],
            // Empty at start so the first fill renders a block.
            pos: output_len,
        }
    }

    fn fill(&mut self, data: &mut [f32], callback: &mut StreamCallback) {
        let mut written = 0;
        while written < data.len() {
            if self.pos == self.output_block.len() {
                self.pull_input();
                callback(&self.input_block, &mut self.output_block);
                self.pos = 0;
            }
            let n = (data.len() - written).min(self.output_block.len() - self.pos);
            data[written..written + n].copy_from_slice(&self.output_block[self.pos..self.pos + n]);
            written += n;
            self.pos += n;
        }
    }

    fn pull_input(&mut self) {
        let Some(consumer) = self.input.as_mut() else {
            return;
        };
        match consumer.read_chunk(self.input_block.len()) {
            Ok(chunk) => {
                let (first, second) = chunk.as_slices();
                self.input_block[..first.len()].copy_from_slice(first);
                self.input_block[first.len()..].copy_from_slice(second);
                chunk.commit_all();
            }
            Err(_) => self.input_block.fill(0.0),
        }
    }
}
