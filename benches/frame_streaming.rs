use criterion::{criterion_group, criterion_main, Criterion};
use glam::Mat4;

use voxel_hash::core::Config;
use voxel_hash::fuse::Integrator;
use voxel_hash::sensor::SensorFrame;
use voxel_hash::streaming::StreamingController;
use voxel_hash::VoxelMap;

fn bench_config() -> Config {
    let mut config = Config::default();
    config.volume.voxel_size = 0.02;
    config.volume.bucket_count = 20_011;
    config.volume.bucket_size = 10;
    config.volume.block_count = 32_768;
    config.volume.entry_count = 20_011 * 10 * 2;
    config.sensor.fx = 80.0;
    config.sensor.fy = 80.0;
    config.sensor.cx = 80.0;
    config.sensor.cy = 60.0;
    config.sensor.width = 160;
    config.sensor.height = 120;
    config
}

fn wall_frame(config: &Config) -> SensorFrame {
    let n = (config.sensor.width * config.sensor.height) as usize;
    SensorFrame::new(
        config.sensor.width,
        config.sensor.height,
        vec![2.0; n],
        vec![[128, 128, 128, 255]; n],
        Mat4::IDENTITY,
    )
}

fn bench_steady_state_frame(c: &mut Criterion) {
    let config = bench_config();
    let map = VoxelMap::new(&config).unwrap();
    let controller = StreamingController::new(0);
    let integrator = Integrator::new(0);
    let frame = wall_frame(&config);

    // First frame pays the allocations; the benchmark measures the warm
    // path where every candidate is already resident.
    controller.mapping(&map, &frame);

    c.bench_function("mapping_steady_state", |b| {
        b.iter(|| controller.mapping(&map, &frame))
    });

    controller.mapping(&map, &frame);
    c.bench_function("fusion_steady_state", |b| {
        b.iter(|| integrator.integrate(&map, &frame))
    });
}

criterion_group!(benches, bench_steady_state_frame);
criterion_main!(benches);
