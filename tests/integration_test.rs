use dasp_graph::{Buffer, Input};
use klangport::host::{HostEvent, MockHost};
use klangport::{
    AudioNode, BridgeState, Context, ContextConfig, Device, Error, ProcessContext,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn interface() -> Device {
    Device::new("0 - Mock - Interface", "Interface")
        .with_input_channels(2)
        .with_output_channels(2)
}

fn speakers() -> Device {
    Device::new("1 - Mock - Speakers", "Speakers").with_output_channels(2)
}

fn mic() -> Device {
    Device::new("2 - Mock - Mic", "Mic").with_input_channels(1)
}

fn host() -> MockHost {
    MockHost::with_devices(vec![interface(), speakers(), mic()])
}

/// Emits a fixed level on one output.
struct Level(f32);

impl AudioNode for Level {
    type Message = f32;

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        messages: impl Iterator<Item = f32>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for level in messages {
            self.0 = level;
        }
        outputs[0].iter_mut().for_each(|s| *s = self.0);
    }
}

fn ramp(frames: usize, channels: usize) -> Vec<f32> {
    (0..frames * channels).map(|i| i as f32 / (frames * channels) as f32).collect()
}

#[test]
fn render_pulls_one_block_per_callback() {
    init_tracing();
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let level = context.add(Level(0.25)).unwrap();
    context.output(&level).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();

    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert_eq!(out.len(), 512 * 2);
    assert!(out.iter().all(|&s| s == 0.25));
    assert_eq!(context.frames_processed(), 512);

    host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert_eq!(context.frames_processed(), 1024);
    assert!(context.glitches().is_clean());
}

#[test]
fn messages_reach_nodes_between_callbacks() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let mut level = context.add(Level(0.0)).unwrap();
    context.output(&level).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();

    level.send(0.5).unwrap();
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.5));
}

#[test]
fn capture_through_rings() {
    init_tracing();
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&mic()).unwrap();
    context.output(&capture).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();

    capture.initialize().unwrap();
    capture.enable_processing().unwrap();
    assert!(!capture.is_duplex());
    assert_eq!(host.stream_count(), 2);

    let input = ramp(512, 1);
    assert!(host.push_input(&mic().key, &input));
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();

    // Mono capture feeds both output channels.
    for (i, frame) in out.chunks_exact(2).enumerate() {
        assert_eq!(frame, [input[i], input[i]]);
    }
    assert!(context.glitches().is_clean());
}

#[test]
fn capture_without_data_is_silent() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&mic()).unwrap();
    context.output(&capture).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();

    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
    // Nothing has been captured yet, so this is startup, not an underrun.
    assert_eq!(context.glitches().underruns, 0);
}

#[test]
fn starved_capture_reports_underrun() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&mic()).unwrap();
    context.output(&capture).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();

    host.push_input(&mic().key, &[0.5; 512]);
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.5));
    assert!(context.report_glitches().is_clean());

    // A quarter block is not enough: the whole block stays silent.
    host.push_input(&mic().key, &[0.25; 128]);
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(context.glitches().underruns, 1);
    assert_eq!(context.report_glitches().underruns, 1);
    assert!(context.report_glitches().is_clean());

    // The short frames were kept and lead the next block.
    host.push_input(&mic().key, &[0.75; 384]);
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out[..256].iter().all(|&s| s == 0.25));
    assert!(out[256..].iter().all(|&s| s == 0.75));
    assert_eq!(context.glitches().underruns, 1);
}

#[test]
fn capture_uses_a_subset_of_device_channels() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let left = context.create_capture_bridge_with_channels(&interface(), 1).unwrap();
    context.output(&left).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();
    left.initialize().unwrap();
    left.enable_processing().unwrap();

    let input_stream = host
        .streams()
        .into_iter()
        .find(|s| s.device == interface().key)
        .unwrap();
    assert_eq!(input_stream.params.input_channels, Some(2));

    let input: Vec<f32> = (0..512).flat_map(|i| [i as f32 / 512.0, -1.0]).collect();
    assert!(host.push_input(&interface().key, &input));
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    for (i, frame) in out.chunks_exact(2).enumerate() {
        assert_eq!(frame, [i as f32 / 512.0, i as f32 / 512.0]);
    }
}

#[test]
fn duplex_pass_through() {
    init_tracing();
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&interface()).unwrap();
    context.output(&capture).unwrap();
    let render = context.create_render_bridge(&interface());

    capture.initialize().unwrap();
    capture.enable_processing().unwrap();
    context.enable().unwrap();

    assert!(render.is_duplex());
    assert!(capture.is_duplex());
    assert_eq!(host.stream_count(), 1);
    assert!(host.streams()[0].params.is_duplex());

    for _ in 0..3 {
        let input = ramp(512, 2);
        let out = host.run_output_cycle(&interface().key, &input).unwrap();
        assert_eq!(out, input);
    }
    assert!(context.glitches().is_clean());
}

#[test]
fn capture_reconfigures_running_render() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let render = context.create_render_bridge(&interface());
    context.enable().unwrap();
    assert!(!render.is_duplex());

    let capture = context.create_capture_bridge(&interface()).unwrap();
    context.output(&capture).unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();

    let key = interface().key;
    let events = host.events();
    assert_eq!(
        events[events.len() - 4..],
        [
            HostEvent::Stop { device: key.clone() },
            HostEvent::Close { device: key.clone() },
            HostEvent::Open { device: key.clone(), duplex: true },
            HostEvent::Start { device: key.clone() },
        ]
    );
    assert_eq!(render.state(), BridgeState::Enabled);
    assert!(render.is_duplex());
    assert_eq!(host.stream_count(), 1);

    let input = ramp(512, 2);
    assert_eq!(host.run_output_cycle(&key, &input).unwrap(), input);
}

#[test]
fn render_takes_over_half_duplex_capture() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&interface()).unwrap();
    context.output(&capture).unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();
    assert!(!capture.is_duplex());
    assert_eq!(host.stream_count(), 1);

    context.create_render_bridge(&interface());
    context.enable().unwrap();

    assert_eq!(host.stream_count(), 1);
    assert!(host.streams()[0].params.is_duplex());
    assert!(capture.is_duplex());
    assert_eq!(capture.state(), BridgeState::Enabled);

    let input = ramp(512, 2);
    assert_eq!(host.run_output_cycle(&interface().key, &input).unwrap(), input);
}

#[test]
fn capture_converts_foreign_rate() {
    let mic = Device::new("1 - Mock - Mic", "Mic")
        .with_input_channels(1)
        .with_sample_rate(48000)
        .with_frames_per_block(256);
    let mic_key = mic.key.as_str();
    let host = MockHost::with_devices(vec![speakers(), mic.clone()]);
    let config = ContextConfig::default().with_sample_rate(44100);
    let context = Context::new(host.clone(), config).unwrap();

    let capture = context.create_capture_bridge(&mic).unwrap();
    context.output(&capture).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();

    assert_eq!(host.streams()[1].params.sample_rate, 48000);
    assert_eq!(host.streams()[1].params.frames_per_buffer, 256);

    for _ in 0..4 {
        assert!(host.push_input(mic_key, &[0.5; 256]));
    }
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.5));
    assert!(context.glitches().is_clean());
}

#[test]
fn stream_open_failure_leaves_bridge_uninitialized() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let render = context.create_render_bridge(&speakers());

    host.fail_next_open("device busy");
    let err = context.enable().unwrap_err();
    assert!(matches!(err, Error::StreamOpen { .. }));
    assert_eq!(render.state(), BridgeState::Uninitialized);
    assert_eq!(context.live_streams(), 0);

    context.enable().unwrap();
    assert_eq!(render.state(), BridgeState::Enabled);
    assert_eq!(context.live_streams(), 1);
}

#[test]
fn output_channel_count_is_checked() {
    let mono = Device::new("0 - Mock - Mono", "Mono").with_output_channels(1);
    let host = MockHost::with_devices(vec![mono.clone()]);
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    context.create_render_bridge(&mono);

    let err = context.enable().unwrap_err();
    assert!(matches!(err, Error::UnsupportedChannelCount { requested: 2, available: 1, .. }));
    assert_eq!(host.stream_count(), 0);
}

#[test]
fn enable_before_initialize_is_harmless() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&mic()).unwrap();
    context.output(&capture).unwrap();
    let render = context.create_render_bridge(&speakers());

    capture.enable_processing().unwrap();
    render.enable_processing().unwrap();
    assert_eq!(capture.state(), BridgeState::Uninitialized);
    assert_eq!(render.state(), BridgeState::Uninitialized);
    assert!(host.run_output_cycle(&speakers().key, &[]).is_none());

    context.enable().unwrap();
    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn clipped_blocks_are_silenced() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let level = context.add(Level(3.0)).unwrap();
    context.output(&level).unwrap();
    context.create_render_bridge(&speakers());
    context.enable().unwrap();

    let out = host.run_output_cycle(&speakers().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(context.report_glitches().clips, 1);
    assert!(context.report_glitches().is_clean());
}

#[test]
fn teardown_closes_streams_before_terminate() {
    init_tracing();
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let duplex_capture = context.create_capture_bridge(&interface()).unwrap();
    let mic_capture = context.create_capture_bridge(&mic()).unwrap();
    context.output(&duplex_capture).unwrap();
    context.output(&mic_capture).unwrap();
    let render = context.create_render_bridge(&interface());
    context.enable().unwrap();
    for capture in [&duplex_capture, &mic_capture] {
        capture.initialize().unwrap();
        capture.enable_processing().unwrap();
    }
    assert_eq!(host.stream_count(), 2);

    drop(context);

    let events = host.events();
    assert_eq!(events.last(), Some(&HostEvent::Terminate));
    assert_eq!(events.iter().filter(|e| **e == HostEvent::Terminate).count(), 1);
    let closes = events
        .iter()
        .filter(|e| matches!(e, HostEvent::Close { .. }))
        .count();
    let opens = events
        .iter()
        .filter(|e| matches!(e, HostEvent::Open { .. }))
        .count();
    assert_eq!(opens, closes);

    assert_eq!(host.stream_count(), 0);
    assert!(host.is_terminated());
    assert!(host.run_output_cycle(&interface().key, &[]).is_none());
    assert!(!host.push_input(&mic().key, &[0.0; 64]));

    assert_eq!(render.state(), BridgeState::Uninitialized);
    assert_eq!(mic_capture.state(), BridgeState::Uninitialized);
    assert!(matches!(mic_capture.initialize(), Err(Error::ContextDropped)));
}

#[test]
fn default_output_follows_device() {
    let host = MockHost::with_devices(vec![Device::new("0 - Mock - Speakers", "Speakers")
        .with_output_channels(2)
        .with_sample_rate(44100)
        .with_frames_per_block(441)]);
    let context = Context::default_output(host.clone()).unwrap();
    assert_eq!(context.config().sample_rate, 44100);
    assert_eq!(context.config().frames_per_block, 448);

    context.enable().unwrap();
    let out = host.run_output_cycle("0 - Mock - Speakers", &[]).unwrap();
    assert_eq!(out.len(), 448 * 2);
}

#[test]
fn failed_takeover_gives_capture_its_stream_back() {
    init_tracing();
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let capture = context.create_capture_bridge(&interface()).unwrap();
    capture.initialize().unwrap();
    capture.enable_processing().unwrap();
    assert!(!capture.is_duplex());

    let render = context.create_render_bridge(&interface());
    host.fail_next_open("device busy");
    assert!(matches!(context.enable(), Err(Error::StreamOpen { .. })));
    assert_eq!(render.state(), BridgeState::Uninitialized);

    assert!(!capture.is_duplex());
    assert_eq!(capture.state(), BridgeState::Enabled);
    let streams = host.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].params.output_channels, 0);
    assert!(streams[0].running);
    assert!(host.push_input(&interface().key, &ramp(512, 2)));

    // A later attempt still takes the device over.
    context.enable().unwrap();
    assert!(capture.is_duplex());
    assert!(render.is_duplex());
    assert_eq!(host.stream_count(), 1);
}

#[test]
fn failed_duplex_reopen_restores_render() {
    let host = host();
    let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
    let level = context.add(Level(0.25)).unwrap();
    context.output(&level).unwrap();
    let render = context.create_render_bridge(&interface());
    context.enable().unwrap();
    assert!(!render.is_duplex());

    let capture = context.create_capture_bridge(&interface()).unwrap();
    host.fail_next_open("device busy");
    assert!(matches!(capture.initialize(), Err(Error::StreamOpen { .. })));
    assert_eq!(capture.state(), BridgeState::Uninitialized);
    assert!(!capture.is_duplex());

    assert_eq!(render.state(), BridgeState::Enabled);
    assert!(!render.is_duplex());
    let streams = host.streams();
    assert_eq!(streams.len(), 1);
    assert_eq!(streams[0].params.input_channels, None);
    assert!(streams[0].running);
    let out = host.run_output_cycle(&interface().key, &[]).unwrap();
    assert!(out.iter().all(|&s| s == 0.25));

    capture.initialize().unwrap();
    assert!(render.is_duplex());
    assert_eq!(render.state(), BridgeState::Enabled);
}
