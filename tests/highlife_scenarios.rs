//! Integration tests for the HighLife model (spec.md §8 scenarios S1, S2),
//! driving the real `HybridEngine` end to end and inspecting the plain-text
//! grid dumps it writes under `output/`.
use std::fs;

use aika_cloning::{
    models::highlife::{HighLifeAgent, HighLifeMsg, Pattern, HL_DEFAULT_HEIGHT, HL_WIDTH},
    mt::{
        hybrid::{config::HybridConfig, HybridEngine},
        SynchMode,
    },
};

/// Lay `nlp` LPs out in a vertical ring across `pes` planets (contiguous
/// blocks, matching `src/bin/highlife.rs`'s placement policy), run them to
/// `max_generations`, and return the globally unique `gid`s used so the
/// caller can read back their output files.
#[allow(clippy::too_many_arguments)]
fn run_highlife_ring(
    pattern: Pattern,
    nlp: usize,
    pes: usize,
    height: usize,
    max_generations: u64,
    gid_offset: usize,
) -> Vec<usize> {
    let rows_per_lp = height / nlp;
    let nlp_per_pe = nlp / pes;

    let mut config = HybridConfig::new(pes, 64)
        .with_time_bounds(max_generations as f64 + 5.0, 1.0)
        .with_optimistic_sync(10, 20)
        .with_synch(SynchMode::Optimistic, 0, 1);
    for world_id in 0..pes {
        config = config
            .with_world(world_id, 4096, vec![256; nlp_per_pe])
            .unwrap();
    }

    let mut engine = HybridEngine::<16, 32, 8, HighLifeMsg>::create(config).unwrap();

    let mut gids = Vec::with_capacity(nlp);
    for pos in 0..nlp {
        let world_id = pos / nlp_per_pe;
        let up_pos = (pos + nlp - 1) % nlp;
        let down_pos = (pos + 1) % nlp;
        let up_addr = (up_pos / nlp_per_pe, up_pos % nlp_per_pe);
        let down_addr = (down_pos / nlp_per_pe, down_pos % nlp_per_pe);
        let row_offset = pos * rows_per_lp;
        let gid = gid_offset + pos;
        gids.push(gid);

        let agent = HighLifeAgent::new(
            gid,
            rows_per_lp,
            row_offset,
            height,
            pattern,
            max_generations,
            up_addr,
            down_addr,
        );
        let agent_id = engine.spawn_agent_on(world_id, Box::new(agent)).unwrap();
        engine.schedule(world_id, agent_id, 1).unwrap();
    }

    engine.run().unwrap();
    gids
}

fn read_output(gid: usize) -> String {
    fs::read_to_string(format!("output/highlife-gid={gid}.txt"))
        .unwrap_or_else(|err| panic!("missing output for gid={gid}: {err}"))
}

/// Independently-written B36/S23 evolution on a flat grid wrapped on both
/// axes, seeded from the same `Pattern::fill_band` the production agent
/// uses. Cross-checks the production banded/ghost-row implementation's
/// actual cell values after evolution, not just its header and row shape —
/// it shares no neighbor-counting or wrap code with `HighLifeAgent`.
fn reference_torus_grid(pattern: Pattern, width: usize, height: usize, generations: u64) -> Vec<u8> {
    let mut cells = vec![0u8; width * height];
    pattern.fill_band(&mut cells, height, 0, height);

    for _ in 0..generations {
        let mut next = vec![0u8; width * height];
        for y in 0..height {
            for x in 0..width {
                let mut n = 0u8;
                for dy in [-1isize, 0, 1] {
                    for dx in [-1isize, 0, 1] {
                        if dx == 0 && dy == 0 {
                            continue;
                        }
                        let ny = (y as isize + dy).rem_euclid(height as isize) as usize;
                        let nx = (x as isize + dx).rem_euclid(width as isize) as usize;
                        n += cells[ny * width + nx];
                    }
                }
                let alive = cells[y * width + x] == 1;
                let next_alive = if alive { n == 2 || n == 3 } else { n == 3 || n == 6 };
                next[y * width + x] = next_alive as u8;
            }
        }
        cells = next;
    }
    cells
}

fn parse_row_lines(text: &str, width: usize, height: usize) -> Vec<u8> {
    let row_lines: Vec<&str> = text.lines().filter(|l| l.starts_with("Row ")).collect();
    assert_eq!(row_lines.len(), height);
    let mut cells = vec![0u8; width * height];
    for (row, line) in row_lines.iter().enumerate() {
        let values = line.split(": ").nth(1).unwrap();
        let values: Vec<&str> = values.split(' ').collect();
        assert_eq!(values.len(), width);
        for (col, v) in values.iter().enumerate() {
            cells[row * width + col] = v.parse().unwrap();
        }
    }
    cells
}

/// S1: HighLife pattern 5 (replicator), single LP, 10 steps, serial. The
/// replicator's initial footprint sits well clear of row 0 and the last row
/// (spec.md §9), so it reaches the documented translation after 10 steps
/// regardless of the single-LP torus wrap — asserting against it, not just
/// the output's shape, is what actually exercises that wrap.
#[test]
fn s1_replicator_single_lp_ten_steps() {
    let gids = run_highlife_ring(Pattern::Replicator, 1, 1, HL_DEFAULT_HEIGHT, 10, 91_000);
    let text = read_output(gids[0]);

    assert!(text.starts_with("Generation: 10\n"), "unexpected header: {text}");
    let actual = parse_row_lines(&text, HL_WIDTH, HL_DEFAULT_HEIGHT);
    let expected = reference_torus_grid(Pattern::Replicator, HL_WIDTH, HL_DEFAULT_HEIGHT, 10);
    assert_eq!(
        actual, expected,
        "replicator grid after 10 generations did not match the reference B36/S23 torus evolution"
    );
}

/// S2: HighLife pattern 3 (ones-at-corners), 4 LPs stacked vertically, 100
/// steps, optimistic on 2 PEs. Final grids across all 4 LPs must be bitwise
/// identical to a serial run with the same seed and lookahead (there is no
/// RNG in this model, so "same seed" reduces to "same initial pattern").
#[test]
fn s2_four_lps_optimistic_matches_serial() {
    const NLP: usize = 4;
    const HEIGHT: usize = 8;
    const GENERATIONS: u64 = 100;

    let serial_gids = run_highlife_ring(Pattern::OnesAtCorners, NLP, 1, HEIGHT, GENERATIONS, 92_000);
    let optimistic_gids = run_highlife_ring(Pattern::OnesAtCorners, NLP, 2, HEIGHT, GENERATIONS, 93_000);

    for pos in 0..NLP {
        let serial_text = read_output(serial_gids[pos]);
        let optimistic_text = read_output(optimistic_gids[pos]);
        assert_eq!(
            serial_text, optimistic_text,
            "LP at ring position {pos} diverged between serial and optimistic runs"
        );
    }
}
