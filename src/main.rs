//! voxel-hash demo binary
//!
//! Replays a TUM RGB-D sequence through the reconstruction pipeline:
//! mapping (allocate + compact), fusion, recycling, once per frame.

use anyhow::Context;
use clap::{Arg, Command};
use tracing::info;

use voxel_hash::core::Config;
use voxel_hash::fuse::Integrator;
use voxel_hash::sensor::TumDataset;
use voxel_hash::streaming::{Recycler, StreamingController};
use voxel_hash::VoxelMap;

fn main() -> anyhow::Result<()> {
    let matches = Command::new("voxel-hash")
        .version(voxel_hash::VERSION)
        .about("Sparse voxel-block TSDF reconstruction")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("dataset")
                .short('d')
                .long("dataset")
                .value_name("DIR")
                .required(true)
                .help("TUM RGB-D sequence directory"),
        )
        .arg(
            Arg::new("frames")
                .short('n')
                .long("frames")
                .value_name("N")
                .help("Process at most N frames"),
        )
        .get_matches();

    voxel_hash::init()?;

    let config_path = matches.get_one::<String>("config").map(|s| s.as_str());
    let config = Config::load(config_path)?;

    let map = VoxelMap::new(&config)?;
    let controller = StreamingController::new(config.worker_threads());
    let integrator = Integrator::new(config.worker_threads());
    let recycler = Recycler::new(&config.recycler);

    let dataset_dir = matches.get_one::<String>("dataset").expect("required arg");
    let dataset = TumDataset::open(dataset_dir)
        .with_context(|| format!("opening dataset at {}", dataset_dir))?;

    let sensor = config.sensor_params();
    let mut limit = dataset.len();
    if let Some(n) = matches.get_one::<String>("frames") {
        limit = limit.min(n.parse::<usize>().context("parsing --frames")?);
    }
    info!(frames = limit, workers = config.worker_threads(), "replaying sequence");

    for i in 0..limit {
        let frame = dataset
            .load_frame(i, &sensor)
            .with_context(|| format!("loading frame {}", i))?;

        let mapping = controller.mapping(&map, &frame);
        let fusion = integrator.integrate(&map, &frame);
        let recycle = recycler.recycle(&map, frame.pose);

        if (i + 1) % 10 == 0 || i + 1 == limit {
            let heap = map.heap_stats();
            info!(
                frame = i + 1,
                allocated = mapping.allocated,
                visible = mapping.visible,
                fused = fusion.blocks_touched,
                recycled = recycle.recycled,
                heap_live = heap.live,
                heap_free = heap.free,
                "frame complete"
            );
        }
    }

    let heap = map.heap_stats();
    info!(
        live_blocks = heap.live,
        free_blocks = heap.free,
        "sequence complete"
    );
    Ok(())
}
