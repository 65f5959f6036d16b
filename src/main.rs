use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use lagguard::sim::SimWorld;
use lagguard::{
    ChannelDispatcher, ClassPolicy, EnforcementConfig, EnforcementLoop, EntityClass, EntityId,
    Inspector, IterationOutcome, ManualClock, OwnerId, PunishmentMode, SharedConfig,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Runs the enforcement loop against a simulated world and prints what it does.
#[derive(Parser, Debug)]
#[command(name = "lagguard", version, about)]
struct Args {
    /// JSON configuration file; defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of iterations to simulate
    #[arg(long, default_value_t = 40)]
    iterations: u32,

    /// Number of well-behaved grids
    #[arg(long, default_value_t = 5)]
    grids: u64,

    /// CPU cost of the one misbehaving grid, in ms per frame
    #[arg(long, default_value_t = 2.5)]
    heavy_load: f64,

    /// Overrides the configured punishment mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Mode {
    None,
    Broadcast,
    Disable,
    Damage,
}

impl From<Mode> for PunishmentMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::None => PunishmentMode::None,
            Mode::Broadcast => PunishmentMode::Broadcast,
            Mode::Disable => PunishmentMode::Disable,
            Mode::Damage => PunishmentMode::Damage,
        }
    }
}

fn load_config(args: &Args) -> Result<EnforcementConfig> {
    let config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => EnforcementConfig::new()
            .grids(
                ClassPolicy::new(1.0)
                    .tracking_window(10)
                    .pin_duration(15)
                    .grace_period(3),
            )
            .players(ClassPolicy::new(2.0).tracking_window(10).grace_period(3))
            .punishment_mode(PunishmentMode::Damage),
    };
    let mut config = match args.mode {
        Some(mode) => config.punishment_mode(mode.into()),
        None => config,
    };
    // Simulated time advances per iteration; the real window only needs to be short.
    config.profile_window_ms = 1;
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(&args)?;
    let window = chrono::Duration::seconds(1);

    let world = SimWorld::new();
    for i in 0..args.grids {
        world
            .spawn_grid(
                EntityId(i + 1),
                OwnerId(100 + i),
                &format!("player{}", i),
                &format!("Station {}", i),
                0.2,
                &[("Armor", "Light"), ("Reactor", "Small")],
            )
            .await;
    }
    let heavy = EntityId(999);
    world
        .spawn_grid(
            heavy,
            OwnerId(100),
            "player0",
            "Piston Farm",
            args.heavy_load,
            &[("Piston", "Large"); 8],
        )
        .await;
    world.spawn_player(EntityId(100), "player0", 0.4).await;

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let shared = SharedConfig::new(config);
    let collaborators = world.collaborators(Arc::new(ChannelDispatcher::spawn(64)));
    let mut engine = EnforcementLoop::new(Arc::new(shared.clone()), clock.clone(), collaborators);
    let inspector = Inspector::new(engine.grids(), engine.players(), Arc::new(shared));

    for i in 0..args.iterations {
        clock.advance(window);
        match engine.run_iteration().await? {
            IterationOutcome::Completed(report) => {
                let heavy_score = inspector
                    .entity(EntityClass::Grid, heavy)
                    .await?
                    .map(|s| (s.score, s.phase, s.pinned));
                println!(
                    "#{:>3} heavy={:?} warnings={} punished={} parts={}",
                    i + 1,
                    heavy_score,
                    report.warnings.len(),
                    report.punishments.len(),
                    report.punishment.parts_punished,
                );
            }
            IterationOutcome::Idle => println!("#{:>3} idle", i + 1),
            IterationOutcome::Cancelled => break,
        }
    }

    println!("{}", inspector.top_json(EntityClass::Grid, 3).await?);
    for line in world.chat().await {
        println!("[chat] {}", line);
    }
    engine.cleanup().await;
    Ok(())
}
