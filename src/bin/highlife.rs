//! Command-line driver for the HighLife cellular automaton (spec.md §6.1),
//! grounded in `examples/original_source/highlife_main.c`'s ROSS option table
//! (`--pattern`, `tw_define_lps`, `tw_run`/`tw_end`) translated onto
//! [`aika_cloning::mt::hybrid::HybridEngine`].
use std::process::ExitCode;

use clap::Parser;

use aika_cloning::{
    models::highlife::{HighLifeAgent, HighLifeMsg, Pattern, HL_DEFAULT_HEIGHT},
    mt::{
        hybrid::{config::HybridConfig, HybridEngine},
        SynchMode,
    },
    AikaError,
};

/// HighLife B36/S23 cellular automaton over a ring of vertically-stacked LPs.
#[derive(Parser, Debug)]
#[command(name = "highlife", author, version, about)]
struct Cli {
    /// Initial pattern index, 0..6 (spec.md §6.4): 0 all-zeros, 1 all-ones,
    /// 2 ones-in-middle, 3 ones-at-corners, 4 spinner-at-corner, 5 replicator,
    /// 6 diagonal.
    #[arg(long)]
    pattern: u8,

    /// Number of generations to simulate.
    #[arg(long, default_value_t = 50)]
    end: u64,

    /// Total number of logical processes (row bands), stacked vertically on a
    /// torus and distributed in contiguous blocks across `--pes` planets.
    #[arg(long, default_value_t = 1)]
    nlp: usize,

    /// Grid height. Must be divisible by `--nlp`; defaults to the scenario-S1
    /// torus height when a single LP is requested.
    #[arg(long)]
    height: Option<usize>,

    /// Synchronization protocol: 1 serial, 2 conservative (unimplemented),
    /// 3 optimistic time-warp.
    #[arg(long, default_value_t = 3)]
    synch: u8,

    /// Processing elements to run the optimistic engine on. Forced to 1 under
    /// `--synch=1` (see DESIGN.md "serial mode via a single planet").
    #[arg(long, default_value_t = 1)]
    pes: usize,

    /// Local timesteps between GVT reduction passes (spec.md §4.5).
    #[arg(long, default_value_t = 1)]
    gvt_interval: u64,

    /// Minimum event delta a forward handler may schedule at (spec.md §3).
    #[arg(long, default_value_t = 0)]
    lookahead: u64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("highlife: {err}");
            ExitCode::from(255)
        }
    }
}

fn run(cli: Cli) -> Result<(), AikaError> {
    let Some(pattern) = Pattern::from_index(cli.pattern) else {
        return Err(AikaError::ConfigError(format!(
            "unknown pattern index {} (expected 0..6)",
            cli.pattern
        )));
    };
    let Some(synch_mode) = SynchMode::from_cli_value(cli.synch) else {
        return Err(AikaError::ConfigError(format!(
            "unknown --synch value {} (expected 1, 2, or 3)",
            cli.synch
        )));
    };

    // A single planet can't roll back due to out-of-order remote messages, so
    // serial mode reuses the optimistic engine pinned to one PE rather than a
    // second code path (DESIGN.md "serial mode via a single planet").
    let pes = if synch_mode == SynchMode::Serial { 1 } else { cli.pes.max(1) };
    if cli.nlp == 0 || cli.nlp % pes != 0 {
        return Err(AikaError::ConfigError(format!(
            "--nlp={} must be a positive multiple of --pes={pes}",
            cli.nlp
        )));
    }
    let nlp_per_pe = cli.nlp / pes;

    let height = cli.height.unwrap_or(if cli.nlp == 1 { HL_DEFAULT_HEIGHT } else { cli.nlp });
    if height % cli.nlp != 0 {
        return Err(AikaError::ConfigError(format!(
            "grid height {height} must be divisible by --nlp={}",
            cli.nlp
        )));
    }
    let rows_per_lp = height / cli.nlp;

    let mut config = HybridConfig::new(pes, 64)
        .with_time_bounds(cli.end as f64, 1.0)
        .with_optimistic_sync(50, 100)
        .with_synch(synch_mode, cli.lookahead, cli.gvt_interval);
    for world_id in 0..pes {
        config = config.with_world(world_id, 4096, vec![256; nlp_per_pe])?;
    }

    let mut engine = HybridEngine::<16, 32, 8, HighLifeMsg>::create(config)?;

    for gid in 0..cli.nlp {
        let world_id = gid / nlp_per_pe;
        let local_id = gid % nlp_per_pe;
        let up_gid = (gid + cli.nlp - 1) % cli.nlp;
        let down_gid = (gid + 1) % cli.nlp;
        let up_addr = (up_gid / nlp_per_pe, up_gid % nlp_per_pe);
        let down_addr = (down_gid / nlp_per_pe, down_gid % nlp_per_pe);
        let row_offset = gid * rows_per_lp;

        let agent = HighLifeAgent::new(
            gid,
            rows_per_lp,
            row_offset,
            height,
            pattern,
            cli.end,
            up_addr,
            down_addr,
        );
        let spawned_id = engine.spawn_agent_on(world_id, Box::new(agent))?;
        debug_assert_eq!(spawned_id, local_id);
        engine.schedule(world_id, spawned_id, 1)?;
    }

    engine.run()?;
    Ok(())
}
