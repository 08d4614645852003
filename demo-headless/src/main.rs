use chrono::Utc;
use clap::Parser;
use plume_sim_core::protocol::{FootprintPayload, TwinStreamEvent};
use plume_sim_core::{
    FootprintConfig, GeoPoint, MeteorologicalState, MeteorologyGenerator, PlumeSimulation,
    SimulationClock, ThresholdSpec,
};

/// Plume dispersion twin-stream demo with configurable parameters
#[derive(Parser, Debug)]
#[command(name = "plume-sim-demo")]
#[command(about = "Pollutant plume digital-twin demo", long_about = None)]
struct Args {
    /// Number of simulation ticks to run
    #[arg(short, long, default_value_t = 24)]
    ticks: u32,

    /// RNG seed for the meteorological generator
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Simulated seconds per real second
    #[arg(short, long, default_value_t = 3600.0)]
    speed: f64,

    /// Concentration lattice side length (11-201)
    #[arg(short = 'n', long, default_value_t = 81)]
    grid_size: usize,

    /// Occupancy grid resolution in meters
    #[arg(short, long, default_value_t = 500.0)]
    resolution: f32,

    /// Relative threshold as a fraction of each frame's maximum
    #[arg(short, long, default_value_t = 0.05)]
    alpha: f32,

    /// Source longitude in degrees
    #[arg(long, default_value_t = 151.2093)]
    lon: f64,

    /// Source latitude in degrees
    #[arg(long, default_value_t = -33.8688)]
    lat: f64,

    /// Milliseconds of real time between ticks
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Run all ticks back to back without sleeping
    #[arg(long)]
    no_sleep: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let clock = match SimulationClock::new(Utc::now(), args.speed) {
        Ok(clock) => clock,
        Err(err) => {
            eprintln!("invalid clock configuration: {err}");
            std::process::exit(1);
        }
    };

    let mut simulation = PlumeSimulation::new(
        clock,
        MeteorologyGenerator::with_seed(args.seed),
        MeteorologicalState::neutral(),
        args.grid_size,
    )
    .with_footprint(FootprintConfig {
        resolution: args.resolution,
        threshold: ThresholdSpec::Relative(args.alpha),
        accumulate_exposure: true,
        origin: GeoPoint {
            lon: args.lon,
            lat: args.lat,
        },
    });

    println!(
        "plume-sim demo: {} ticks, {}x speed, n={}, resolution={} m",
        args.ticks, args.speed, args.grid_size, args.resolution
    );

    let mut last_footprint = None;
    for _ in 0..args.ticks {
        let event = simulation.tick();

        // One twin-stream line per tick, as the push transport would frame it
        let stream_event = TwinStreamEvent::from(&event);
        match serde_json::to_string(&stream_event) {
            Ok(line) => println!("{line}"),
            Err(err) => eprintln!("failed to serialize stream event: {err}"),
        }

        if let Some(footprint) = event.footprint {
            last_footprint = Some(footprint);
        }

        if !args.no_sleep {
            std::thread::sleep(std::time::Duration::from_millis(args.interval_ms));
        }
    }

    // Final affected-area summary: what the population-estimation
    // collaborator would receive
    match last_footprint {
        Some(footprint) => {
            println!(
                "affected area: {:.2} km2 over {} cells",
                footprint.area.km2, footprint.area.cells
            );
            match footprint.polygon {
                Some(polygon) => {
                    let payload = FootprintPayload::new(&polygon, &footprint.area);
                    println!(
                        "footprint polygon: {} vertices, {:.0} m2",
                        polygon.vertex_count(),
                        payload.area_m2
                    );
                }
                None => println!("footprint polygon: degenerate (no polygon this window)"),
            }
        }
        None => println!("no footprint produced"),
    }
}
