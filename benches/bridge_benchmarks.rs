use criterion::{black_box, criterion_group, criterion_main, Criterion};
use dasp_graph::{Buffer, Input};
use klangport::host::MockHost;
use klangport::ring_buffer::channel_ring;
use klangport::{AudioNode, Context, ContextConfig, Device, ProcessContext};

struct Noise(u32);

impl AudioNode for Noise {
    type Message = ();

    fn process(
        &mut self,
        _ctx: &ProcessContext,
        _messages: impl Iterator<Item = ()>,
        _inputs: &[Input],
        outputs: &mut [Buffer],
    ) {
        for s in outputs[0].iter_mut() {
            self.0 = self.0.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            *s = (self.0 >> 8) as f32 / (1u32 << 24) as f32 - 0.5;
        }
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("ring write+read 512", |b| {
        let (mut writer, mut reader) = channel_ring(1024);
        let block = vec![0.25f32; 512];
        let mut out = vec![0.0f32; 512];
        b.iter(|| {
            writer.write(black_box(&block)).ok();
            reader.read(black_box(&mut out)).ok();
        })
    });

    c.bench_function("render cycle 512 stereo", |b| {
        let speakers = Device::new("0 - Mock - Speakers", "Speakers").with_output_channels(2);
        let host = MockHost::with_devices(vec![speakers.clone()]);
        let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
        let noise = context.add(Noise(1)).unwrap();
        context.output(&noise).unwrap();
        context.create_render_bridge(&speakers);
        context.enable().unwrap();

        b.iter(|| black_box(host.run_output_cycle(&speakers.key, &[])))
    });

    c.bench_function("duplex cycle 512 stereo", |b| {
        let interface = Device::new("0 - Mock - Interface", "Interface")
            .with_input_channels(2)
            .with_output_channels(2);
        let host = MockHost::with_devices(vec![interface.clone()]);
        let context = Context::new(host.clone(), ContextConfig::default()).unwrap();
        let capture = context.create_capture_bridge(&interface).unwrap();
        context.output(&capture).unwrap();
        context.create_render_bridge(&interface);
        context.enable().unwrap();
        capture.initialize().unwrap();
        capture.enable_processing().unwrap();
        let input = vec![0.1f32; 1024];

        b.iter(|| black_box(host.run_output_cycle(&interface.key, &input)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
