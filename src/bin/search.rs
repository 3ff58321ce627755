//! Command-line driver for the grid search model (spec.md §6.1), grounded in
//! `examples/original_source/src/search.main.c`'s option table (`--grid-map`
//! required via `TWOPT_CHAR`, `fprintf(stderr, ...); return -1;` on a missing
//! required argument) and its `director_init()` / `g_tw_gvt_hook` registration,
//! translated onto [`aika_cloning::mt::hybrid::HybridEngine`].
use std::{path::PathBuf, process::ExitCode, sync::Arc};

use clap::Parser;

use aika_cloning::{
    models::{
        grid::GridMap,
        search::{SearchAgent, SearchMsg},
    },
    mt::{
        hybrid::{config::HybridConfig, HybridEngine},
        SynchMode,
    },
    objects::Decision,
    AikaError,
};

/// Single-walker grid search, optionally forking across processing elements at
/// multi-choice decision points.
#[derive(Parser, Debug)]
#[command(name = "search", author, version, about)]
struct Cli {
    /// Grid map file (spec.md §6.2). Required: the original driver treats a
    /// missing map as a fatal configuration error, not a default.
    #[arg(long)]
    grid_map: PathBuf,

    /// Simulated end time; each step advances one tick, so this bounds the
    /// walker's path length.
    #[arg(long, default_value_t = 1000)]
    end: u64,

    /// Number of walkers (one per PE). Defaults to `--pes`; any other value
    /// must equal it, since this model carries exactly one walker per PE.
    #[arg(long)]
    nlp: Option<usize>,

    /// Synchronization protocol: 1 serial, 2 conservative (unimplemented),
    /// 3 optimistic time-warp.
    #[arg(long, default_value_t = 3)]
    synch: u8,

    /// Processing elements. Forced to 1 under `--synch=1`.
    #[arg(long, default_value_t = 1)]
    pes: usize,

    /// Local timesteps between GVT reduction passes (spec.md §4.5).
    #[arg(long, default_value_t = 1)]
    gvt_interval: u64,

    /// Minimum event delta a forward handler may schedule at (spec.md §3).
    #[arg(long, default_value_t = 0)]
    lookahead: u64,

    /// Enable the clone/branch director: a multi-choice decision forks the
    /// walker onto an idle PE instead of only recording the first choice.
    #[arg(long, default_value_t = false)]
    clone: bool,

    /// Render output with ASCII arrows instead of box-drawing glyphs.
    #[arg(long, default_value_t = false)]
    ascii: bool,

    /// Base RNG seed; PE `i`'s walker seeds from `seed + i`.
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("search: {err}");
            ExitCode::from(255)
        }
    }
}

/// The clone/branch hook: always picks the first world other than the source
/// that has already caught up to GVT (spec.md §4.6's simplest deterministic
/// tie-break — see DESIGN.md Open Question "director destination choice").
fn first_idle_destination(_source: usize, _decision: Decision, idle: &[usize]) -> Option<usize> {
    idle.first().copied()
}

fn run(cli: Cli) -> Result<(), AikaError> {
    let Some(synch_mode) = SynchMode::from_cli_value(cli.synch) else {
        return Err(AikaError::ConfigError(format!(
            "unknown --synch value {} (expected 1, 2, or 3)",
            cli.synch
        )));
    };

    let grid = Arc::new(GridMap::load(&cli.grid_map)?);

    // A single planet can't roll back due to out-of-order remote messages, so
    // serial mode reuses the optimistic engine pinned to one PE rather than a
    // second code path (DESIGN.md "serial mode via a single planet").
    let pes = if synch_mode == SynchMode::Serial { 1 } else { cli.pes.max(1) };
    let nlp = cli.nlp.unwrap_or(pes);
    if nlp != pes {
        return Err(AikaError::ConfigError(format!(
            "--nlp={nlp} must equal --pes={pes}: this model carries exactly one walker per PE"
        )));
    }
    if cli.clone && pes < 2 {
        return Err(AikaError::ConfigError(
            "--clone requires at least two PEs to fork onto".to_string(),
        ));
    }

    let mut config = HybridConfig::new(pes, 64)
        .with_time_bounds(cli.end as f64, 1.0)
        .with_optimistic_sync(50, 100)
        .with_synch(synch_mode, cli.lookahead, cli.gvt_interval);
    for world_id in 0..pes {
        config = config.with_world(world_id, 4096, vec![512])?;
    }

    let mut engine = HybridEngine::<16, 32, 8, SearchMsg>::create(config)?;

    if cli.clone {
        engine.register_gvt_hook(Box::new(first_idle_destination));
    }

    for world_id in 0..pes {
        let agent = SearchAgent::new(Arc::clone(&grid), cli.seed + world_id as u64, cli.ascii);
        let agent_id = engine.spawn_agent_on(world_id, Box::new(agent))?;
        engine.schedule(world_id, agent_id, 1)?;
    }

    engine.run()?;
    Ok(())
}
