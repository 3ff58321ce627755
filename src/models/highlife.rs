//! HighLife cellular automaton model client (spec.md §1, §9: the B36/S23
//! two-rule variant of Conway's Life). One LP owns a horizontal band of rows
//! on a toroidal grid; LPs are stacked vertically and exchange ghost rows
//! with their immediate neighbors each generation.
//!
//! Grounded in `examples/original_source/highlife.h`/`highlife_driver.c`:
//! the neighbor-wraparound math (`(self + total_lps - 1) % total_lps` /
//! `(self + 1) % total_lps`), the seven init patterns, and the `HL_printWorld`
//! output format are all carried over; the reverse-computation strategy
//! (full local-state snapshot per step, restored on rollback) replaces the
//! original's "stash a grid snapshot in the message payload" trick now that
//! `ThreadedAgent::reverse` gives each LP a dedicated undo hook.
use std::{
    collections::VecDeque,
    fs,
    io::Write as _,
    path::Path,
};

use bytemuck::{Pod, Zeroable};

use crate::{
    agents::{PlanetContext, ThreadedAgent},
    objects::{Action, Event, Msg},
    AikaError,
};

/// Fixed row width. Baked in because `HighLifeMsg` ships a row as a fixed-size
/// `Pod` array (spec.md §3 "opaque message payload ... fixed maximum size").
pub const HL_WIDTH: usize = 20;

/// Default total grid height, chosen to match scenario S1's single-LP,
/// 20x22-torus run. Unlike `HL_WIDTH`, the total height is a runtime quantity
/// (`rows_per_lp * total_lps` with the remainder absorbed by the last LP) —
/// scenarios that stack more than one LP pick a height divisible by their LP
/// count rather than relying on this default.
pub const HL_DEFAULT_HEIGHT: usize = 22;

/// Which ghost row slot a `HighLifeMsg` updates on the receiver.
const DIR_ABOVE: u8 = 0;
const DIR_BELOW: u8 = 1;

/// A ghost-row exchange between vertically adjacent LPs.
#[derive(Copy, Clone, Debug, PartialEq)]
#[repr(C)]
pub struct HighLifeMsg {
    /// `DIR_ABOVE`/`DIR_BELOW`: which ghost slot the receiver should fill.
    pub dir: u8,
    pub row: [u8; HL_WIDTH],
}

unsafe impl Pod for HighLifeMsg {}
unsafe impl Zeroable for HighLifeMsg {}

/// The seven initial grid patterns (spec.md §6 `--pattern=0..6`), indexed
/// exactly as `original_source/highlife_driver.c`'s `initPattern` switch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pattern {
    AllZeros,
    AllOnes,
    OnesInMiddle,
    OnesAtCorners,
    SpinnerAtCorner,
    Replicator,
    Diagonal,
}

impl Pattern {
    pub fn from_index(idx: u8) -> Option<Self> {
        match idx {
            0 => Some(Pattern::AllZeros),
            1 => Some(Pattern::AllOnes),
            2 => Some(Pattern::OnesInMiddle),
            3 => Some(Pattern::OnesAtCorners),
            4 => Some(Pattern::SpinnerAtCorner),
            5 => Some(Pattern::Replicator),
            6 => Some(Pattern::Diagonal),
            _ => None,
        }
    }

    /// Fill this LP's local row band (`cells`, `rows_per_lp * HL_WIDTH` cells)
    /// with this pattern's value at each cell's position in the full
    /// `HL_WIDTH x total_height` torus, given the LP's starting row offset.
    pub fn fill_band(
        &self,
        cells: &mut [u8],
        rows_per_lp: usize,
        row_offset: usize,
        total_height: usize,
    ) {
        for local_row in 0..rows_per_lp {
            let gy = row_offset + local_row;
            for gx in 0..HL_WIDTH {
                let alive = self.alive_at(gx, gy, total_height);
                cells[local_row * HL_WIDTH + gx] = alive as u8;
            }
        }
    }

    fn alive_at(&self, x: usize, y: usize, height: usize) -> bool {
        match self {
            Pattern::AllZeros => false,
            Pattern::AllOnes => true,
            Pattern::OnesInMiddle => {
                let cx = HL_WIDTH / 2;
                let cy = height / 2;
                x.abs_diff(cx) <= 1 && y.abs_diff(cy) <= 1
            }
            Pattern::OnesAtCorners => {
                (x <= 1 || x >= HL_WIDTH - 2) && (y <= 1 || y >= height.saturating_sub(2))
            }
            Pattern::SpinnerAtCorner => y == 0 && x <= 2,
            Pattern::Replicator => {
                // LifeWiki "Replicator (HighLife)", anchored at (1, 1).
                const CELLS: [(usize, usize); 10] = [
                    (1, 0),
                    (2, 0),
                    (0, 1),
                    (3, 1),
                    (0, 2),
                    (4, 2),
                    (1, 3),
                    (4, 3),
                    (2, 4),
                    (3, 4),
                ];
                if x < 1 || y < 1 {
                    return false;
                }
                let (rx, ry) = (x - 1, y - 1);
                CELLS.contains(&(rx, ry))
            }
            Pattern::Diagonal => x == y % HL_WIDTH,
        }
    }
}

struct StepUndo {
    cells: Vec<u8>,
    ghost_above: Vec<u8>,
    ghost_below: Vec<u8>,
    generation: u64,
}

enum Undo {
    Step(StepUndo),
    Ghost { above: bool, previous: Vec<u8> },
}

/// One LP of the HighLife grid: a horizontal band of `rows` rows, `HL_WIDTH`
/// columns wide, plus one ghost row on either side shared with its vertical
/// neighbors.
pub struct HighLifeAgent {
    gid: usize,
    rows: usize,
    cells: Vec<u8>,
    ghost_above: Vec<u8>,
    ghost_below: Vec<u8>,
    generation: u64,
    max_generations: u64,
    pattern: Pattern,
    /// `(world_id, local_agent_id)` of the LP owning the row band above this
    /// one. Resolves to this LP's own address when it is the only LP, closing
    /// the torus through a self-addressed ghost exchange.
    up_addr: (usize, usize),
    down_addr: (usize, usize),
    undo: VecDeque<Undo>,
}

impl HighLifeAgent {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gid: usize,
        rows_per_lp: usize,
        row_offset: usize,
        total_height: usize,
        pattern: Pattern,
        max_generations: u64,
        up_addr: (usize, usize),
        down_addr: (usize, usize),
    ) -> Self {
        let mut cells = vec![0u8; rows_per_lp * HL_WIDTH];
        pattern.fill_band(&mut cells, rows_per_lp, row_offset, total_height);
        Self {
            gid,
            rows: rows_per_lp,
            cells,
            ghost_above: vec![0; HL_WIDTH],
            ghost_below: vec![0; HL_WIDTH],
            generation: 0,
            max_generations,
            pattern,
            up_addr,
            down_addr,
            undo: VecDeque::new(),
        }
    }

    #[inline]
    fn idx(&self, row: usize, col: usize) -> usize {
        row * HL_WIDTH + col
    }

    fn cell_at(&self, row: isize, col: usize) -> u8 {
        if row < 0 {
            self.ghost_above[col]
        } else if row as usize >= self.rows {
            self.ghost_below[col]
        } else {
            self.cells[self.idx(row as usize, col)]
        }
    }

    /// Count live neighbors among the 8 surrounding cells, wrapping
    /// horizontally within the row (torus) and reaching into the ghost rows
    /// vertically (`original_source/highlife_driver.c`'s `HL_countAliveCells`).
    fn count_neighbors(&self, row: usize, col: usize) -> u8 {
        let mut count = 0u8;
        for dr in [-1isize, 0, 1] {
            for dc in [-1isize, 0, 1] {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let r = row as isize + dr;
                let c = (col as isize + dc).rem_euclid(HL_WIDTH as isize) as usize;
                count += self.cell_at(r, c);
            }
        }
        count
    }

    fn next_generation(&self) -> Vec<u8> {
        let mut next = vec![0u8; self.rows * HL_WIDTH];
        for row in 0..self.rows {
            for col in 0..HL_WIDTH {
                let n = self.count_neighbors(row, col);
                let alive = self.cells[self.idx(row, col)] == 1;
                // HighLife rule B36/S23.
                let next_alive = if alive { n == 2 || n == 3 } else { n == 3 || n == 6 };
                next[self.idx(row, col)] = next_alive as u8;
            }
        }
        next
    }

    /// Write `output/highlife-gid=<id>.txt` in `HL_printWorld`'s format:
    /// ghost rows at top and bottom, local rows in between, each prefixed
    /// `Row NN: ` (spec.md §6.4).
    fn write_output(&self) -> Result<(), AikaError> {
        fs::create_dir_all("output")?;
        let path = format!("output/highlife-gid={}.txt", self.gid);
        let mut file = fs::File::create(Path::new(&path))?;
        writeln!(file, "Generation: {}", self.generation)?;
        writeln!(file, "Ghost row: {}", render_row(&self.ghost_above))?;
        for row in 0..self.rows {
            let start = self.idx(row, 0);
            writeln!(file, "Row {row:02}: {}", render_row(&self.cells[start..start + HL_WIDTH]))?;
        }
        writeln!(file, "Ghost row: {}", render_row(&self.ghost_below))?;
        Ok(())
    }
}

fn render_row(row: &[u8]) -> String {
    row.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl<const SLOTS: usize> ThreadedAgent<SLOTS, HighLifeMsg> for HighLifeAgent {
    fn step(&mut self, context: &mut PlanetContext<SLOTS, HighLifeMsg>, agent_id: usize) -> Event {
        let time = context.time;

        self.undo.push_back(Undo::Step(StepUndo {
            cells: self.cells.clone(),
            ghost_above: self.ghost_above.clone(),
            ghost_below: self.ghost_below.clone(),
            generation: self.generation,
        }));

        self.cells = self.next_generation();
        self.generation += 1;

        // Unconditional, even with a single LP: `up_addr`/`down_addr` already resolve
        // to this LP's own address in that case ((gid+total_lps-1)%total_lps and
        // (gid+1)%total_lps both reduce to `gid`), so this is a self-addressed ghost
        // exchange that closes the vertical torus wrap exactly as
        // `original_source/highlife_driver.c` does unconditionally.
        let mut top = [0u8; HL_WIDTH];
        top.copy_from_slice(&self.cells[0..HL_WIDTH]);
        let mut bottom = [0u8; HL_WIDTH];
        let bottom_start = self.idx(self.rows - 1, 0);
        bottom.copy_from_slice(&self.cells[bottom_start..bottom_start + HL_WIDTH]);

        let (up_world, up_local) = self.up_addr;
        let (down_world, down_local) = self.down_addr;

        let to_up = Msg::new(
            HighLifeMsg { dir: DIR_BELOW, row: top },
            time,
            time + 1,
            agent_id,
            Some(up_local),
        );
        let _ = context.send_mail(to_up, up_world);

        let to_down = Msg::new(
            HighLifeMsg { dir: DIR_ABOVE, row: bottom },
            time,
            time + 1,
            agent_id,
            Some(down_local),
        );
        let _ = context.send_mail(to_down, down_world);

        if self.generation < self.max_generations {
            Event::new(time, time, agent_id, Action::Timeout(1))
        } else {
            Event::new(time, time, agent_id, Action::Wait)
        }
    }

    fn read_message(
        &mut self,
        _context: &mut PlanetContext<SLOTS, HighLifeMsg>,
        msg: Msg<HighLifeMsg>,
        _agent_id: usize,
    ) {
        match msg.data.dir {
            DIR_ABOVE => {
                self.undo.push_back(Undo::Ghost {
                    above: true,
                    previous: self.ghost_above.clone(),
                });
                self.ghost_above.copy_from_slice(&msg.data.row);
            }
            DIR_BELOW => {
                self.undo.push_back(Undo::Ghost {
                    above: false,
                    previous: self.ghost_below.clone(),
                });
                self.ghost_below.copy_from_slice(&msg.data.row);
            }
            _ => {}
        }
    }

    fn finalize(&mut self, _context: &mut PlanetContext<SLOTS, HighLifeMsg>, _agent_id: usize) {
        if let Err(err) = self.write_output() {
            tracing::error!(gid = self.gid, %err, "failed to write HighLife output");
        }
    }

    fn reverse(&mut self, _context: &mut PlanetContext<SLOTS, HighLifeMsg>, _agent_id: usize) {
        match self.undo.pop_back() {
            Some(Undo::Step(frame)) => {
                self.cells = frame.cells;
                self.ghost_above = frame.ghost_above;
                self.ghost_below = frame.ghost_below;
                self.generation = frame.generation;
            }
            Some(Undo::Ghost { above, previous }) => {
                if above {
                    self.ghost_above = previous;
                } else {
                    self.ghost_below = previous;
                }
            }
            None => {}
        }
    }

    fn commit(&mut self, _context: &mut PlanetContext<SLOTS, HighLifeMsg>, _agent_id: usize) {
        self.undo.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_lp(pattern: Pattern, height: usize, max_gens: u64) -> HighLifeAgent {
        HighLifeAgent::new(0, height, 0, height, pattern, max_gens, (0, 0), (0, 0))
    }

    #[test]
    fn all_zeros_stays_empty() {
        let agent = single_lp(Pattern::AllZeros, 10, 5);
        assert!(agent.cells.iter().all(|&c| c == 0));
        let next = agent.next_generation();
        assert!(next.iter().all(|&c| c == 0));
    }

    #[test]
    fn blinker_survives_a_generation_on_its_own_lp() {
        let agent = single_lp(Pattern::SpinnerAtCorner, 10, 5);
        // row 0 has 3 live cells at (0,0),(1,0),(2,0); a B36/S23 generation
        // should keep some cells alive (not annihilate outright).
        let next = agent.next_generation();
        assert!(next.iter().any(|&c| c == 1));
    }

    #[test]
    fn reverse_restores_prior_generation_bit_identical() {
        let mut agent = single_lp(Pattern::OnesInMiddle, 12, 20);
        let before = agent.cells.clone();
        agent.undo.push_back(Undo::Step(StepUndo {
            cells: before.clone(),
            ghost_above: agent.ghost_above.clone(),
            ghost_below: agent.ghost_below.clone(),
            generation: agent.generation,
        }));
        agent.cells = agent.next_generation();
        agent.generation += 1;
        assert_ne!(agent.cells, before);

        match agent.undo.pop_back() {
            Some(Undo::Step(frame)) => {
                agent.cells = frame.cells;
                agent.generation = frame.generation;
            }
            _ => panic!("expected step undo frame"),
        }
        assert_eq!(agent.cells, before);
        assert_eq!(agent.generation, 0);
    }

    #[test]
    fn replicator_pattern_is_anchored_and_nonempty() {
        let agent = single_lp(Pattern::Replicator, HL_DEFAULT_HEIGHT, 10);
        assert!(agent.cells.iter().any(|&c| c == 1));
    }
}
