//! LOD demo: generates noise terrain, walks a viewer across it and persists
//! the sections.
//!
//! Usage: cargo run --release --bin lod_demo -- [OPTIONS]
//!
//! Options:
//!   --config <PATH>   JSON configuration file (default: built-in defaults)
//!   --dir <PATH>      Storage directory (overrides the config)
//!   --chunks <N>      Chunk radius of generated terrain (default: 8)
//!   --seed <SEED>     Noise seed (default: 12345)
//!   --steps <N>       Viewer steps along +x (default: 4)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use glam::{DVec2, IVec2};
use noise::{NoiseFn, Perlin};

use terralod::column::pack_light;
use terralod::core::config::LodConfig;
use terralod::lod::LodQuadTree;
use terralod::render::DiscardSink;
use terralod::source::{ChunkUpdate, LevelContext, PaletteColors, CHUNK_WIDTH};

fn main() {
    terralod::core::logging::init();

    let args: Vec<String> = std::env::args().collect();
    let mut config = match parse_str_arg(&args, "--config") {
        Some(path) => match LodConfig::load(&path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("Failed to load config {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => LodConfig {
            render_distance: 256.0,
            max_section_detail: 8,
            ..Default::default()
        },
    };
    if let Some(dir) = parse_str_arg(&args, "--dir") {
        config.storage_dir = PathBuf::from(dir);
    }
    let radius = parse_i32_arg(&args, "--chunks").unwrap_or(8);
    let seed = parse_u32_arg(&args, "--seed").unwrap_or(12345);
    let steps = parse_i32_arg(&args, "--steps").unwrap_or(4);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Failed to start runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(config, radius, seed, steps)) {
        log::error!("Demo failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: LodConfig, radius: i32, seed: u32, steps: i32) -> terralod::Result<()> {
    let colors = PaletteColors::new()
        .with_color("grass", 0xFF3C8C32)
        .with_color("dirt", 0xFF6B4A2B)
        .with_color("stone", 0xFF7F7F7F)
        .with_color("water", 0x803050C8);
    let level = LevelContext::new(config.level_min_y, config.level_height)?;

    let mut lod = LodQuadTree::new(
        config,
        Arc::new(colors),
        Arc::new(DiscardSink),
        tokio::runtime::Handle::current(),
    )?;
    let found = lod.scan_storage().await?;
    log::info!("Found {} existing section files under {}", found, lod.storage_dir().display());

    let start = Instant::now();
    let perlin = Perlin::new(seed);
    for cz in -radius..radius {
        for cx in -radius..radius {
            let chunk = generate_chunk(&perlin, IVec2::new(cx, cz), &level);
            lod.apply_chunk_update(Arc::new(chunk))?;
        }
    }
    log::info!(
        "Applied {} chunk updates in {:.2}s",
        (2 * radius) * (2 * radius),
        start.elapsed().as_secs_f64()
    );

    for step in 0..=steps {
        let viewer = DVec2::new(step as f64 * 64.0, 0.0);
        lod.update_viewer(viewer);
        lod.settle().await;
        log::info!(
            "Viewer at ({:.0}, {:.0}): {} sections loaded, {} buffers live",
            viewer.x,
            viewer.y,
            lod.loaded_count(),
            lod.handler().len()
        );
    }

    lod.shutdown().await?;
    log::info!("Done in {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

/// Rolling hills with a water plane at y 62
fn generate_chunk(perlin: &Perlin, pos: IVec2, level: &LevelContext) -> ChunkUpdate {
    const SEA_LEVEL: i32 = 62;
    let sky = pack_light(0, 15);

    let mut chunk = ChunkUpdate::full_height(pos, level);
    for z in 0..CHUNK_WIDTH as usize {
        for x in 0..CHUNK_WIDTH as usize {
            let wx = (pos.x * CHUNK_WIDTH) as f64 + x as f64;
            let wz = (pos.y * CHUNK_WIDTH) as f64 + z as f64;
            let n = perlin.get([wx / 96.0, wz / 96.0]);
            let height = (64.0 + n * 24.0).round() as i32;
            let height = height.clamp(level.min_y + 8, level.max_y() - 1);

            if height < SEA_LEVEL {
                chunk.push_span(x, z, "water", height, (SEA_LEVEL - height) as u32, sky);
            }
            chunk.push_span(x, z, "grass", height - 1, 1, sky);
            chunk.push_span(x, z, "dirt", height - 4, 3, 0);
            chunk.push_span(x, z, "stone", level.min_y, (height - 4 - level.min_y) as u32, 0);
        }
    }
    chunk
}

fn parse_str_arg(args: &[String], name: &str) -> Option<String> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .cloned()
}

fn parse_i32_arg(args: &[String], name: &str) -> Option<i32> {
    parse_str_arg(args, name).and_then(|s| s.parse().ok())
}

fn parse_u32_arg(args: &[String], name: &str) -> Option<u32> {
    parse_str_arg(args, name).and_then(|s| s.parse().ok())
}
