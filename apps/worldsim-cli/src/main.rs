use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use worldsim_client::{LocalClient, LocalTransport};
use worldsim_common::{NULL_OBJECT_ID, Vec2};
use worldsim_kernel::{Brush, WorldOperation};
use worldsim_server::{Server, ServerConfig};

#[derive(Parser)]
#[command(name = "worldsim-cli", about = "Headless runner for the world simulation")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print crate versions
    Info,
    /// Print the default server configuration as YAML
    DefaultConfig,
    /// Run the server for a number of ticks with a scripted workload
    Run {
        /// Number of ticks to simulate
        #[arg(short, long, default_value = "120")]
        ticks: u64,
        /// YAML server configuration
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Terraform brushes submitted per tick
        #[arg(short, long, default_value = "1")]
        brushes: u32,
        /// Print the final statistics as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("worldsim-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("kernel: {}", worldsim_kernel::crate_info());
            println!("protocol: {}", worldsim_protocol::crate_info());
            println!("server: {}", worldsim_server::crate_info());
            println!("client: {}", worldsim_client::crate_info());
        }
        Commands::DefaultConfig => {
            print!("{}", serde_yaml::to_string(&ServerConfig::default())?);
        }
        Commands::Run {
            ticks,
            config,
            brushes,
            json,
        } => run(ticks, config, brushes, json)?,
    }

    Ok(())
}

fn run(ticks: u64, config: Option<PathBuf>, brushes: u32, json: bool) -> anyhow::Result<()> {
    let config = match config {
        Some(path) => ServerConfig::load(&path)
            .with_context(|| format!("load config: {}", path.display()))?,
        None => ServerConfig::default(),
    };
    let size = config.terrain_size as f32;
    let interval = config.tick_interval();

    let server = Arc::new(Server::new(config).context("start server")?);
    let client = LocalClient::new(LocalTransport::new(server.clone()));
    let failed = Arc::new(AtomicU64::new(0));

    let centre = Vec2::splat(size / 2.0);
    client.send_command(
        WorldOperation::FluidSourceCreate {
            object_id: NULL_OBJECT_ID,
            pos: centre,
            radius: 4.0,
            absolute_height: 40.0,
            capacity: 50.0,
        },
        None,
    )?;

    for tick in 0..ticks {
        for i in 0..brushes {
            // walk brushes around the centre so successive frames touch new cells
            let angle = (tick * brushes as u64 + i as u64) as f32 * 0.1;
            let pos = centre + Vec2::new(angle.cos(), angle.sin()) * (size / 4.0);
            let failed = failed.clone();
            client.execute(
                WorldOperation::TerraformRaise {
                    brush: Brush::uniform(pos.x, pos.y, 9, 0.5),
                },
                move |result| {
                    if !result.is_success() {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                },
            )?;
        }
        if !server.wait_for_frames(1, interval * 100) {
            anyhow::bail!("simulation stalled at tick {tick}");
        }
        client.pump_responses()?;
    }

    if !client.wait_idle(Duration::from_secs(5))? {
        tracing::warn!(pending = client.pending(), "responses still outstanding");
    }

    let stats = server.stats();
    let (objects, max_height, fluid_volume) = {
        let world = server.sync_safe_point();
        let max_height = world
            .terrain()
            .heights()
            .iter()
            .copied()
            .fold(f32::MIN, f32::max);
        let volume = world.fluid().front().total_volume();
        (world.objects().len(), max_height, volume)
    };

    if json {
        let report = serde_json::json!({
            "frames": stats.frames,
            "ops_executed": stats.ops_executed,
            "ops_failed": stats.ops_failed,
            "callback_failures": failed.load(Ordering::Relaxed),
            "overruns": stats.overruns,
            "avg_frame_us": stats.avg_frame_time.as_micros() as u64,
            "max_frame_us": stats.max_frame_time.as_micros() as u64,
            "objects": objects,
            "max_height": max_height,
            "fluid_volume": fluid_volume,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "frames={} ops={} failed={} overruns={}",
            stats.frames, stats.ops_executed, stats.ops_failed, stats.overruns
        );
        println!(
            "frame time: avg={:?} max={:?}",
            stats.avg_frame_time, stats.max_frame_time
        );
        println!("objects={objects} max_height={max_height:.2} fluid_volume={fluid_volume:.2}");
    }

    Ok(())
}
