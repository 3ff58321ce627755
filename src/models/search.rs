//! Grid search model client (spec.md §1, §4.6, §6): a single walker per
//! simulated PE explores a shared, immutable grid map and forks into a second
//! PE at any cell offering more than one unvisited exit, each world
//! continuing along a different branch (spec.md §9 "global mutable
//! search-model arrays should be re-architected as per-PE immutable input +
//! per-PE writeable output merged at finalize"). The grid map itself is that
//! immutable input — loaded once, shared read-only via `Arc` — and each PE's
//! `cells` array is its own writeable output, written out independently at
//! `finalize`.
use std::{collections::VecDeque, fs, io::Write as _, sync::Arc};

use bytemuck::{Pod, Zeroable};

use crate::{
    agents::{PlanetContext, ThreadedAgent},
    models::grid::{render_results, CellRecord, Direction, GridMap},
    objects::{Action, Event, Msg},
    AikaError,
};

fn dir_code(dir: Direction) -> u8 {
    match dir {
        Direction::North => 0,
        Direction::South => 1,
        Direction::East => 2,
        Direction::West => 3,
    }
}

fn dir_from_code(code: u8) -> Option<Direction> {
    match code {
        0 => Some(Direction::North),
        1 => Some(Direction::South),
        2 => Some(Direction::East),
        3 => Some(Direction::West),
        _ => None,
    }
}

/// Marker message type. The search model never exchanges messages between
/// agents (each PE carries exactly one walker), but `ThreadedAgent` is
/// generic over a `Pod` message type, so a zero-sized one satisfies the bound.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct SearchMsg;

unsafe impl Pod for SearchMsg {}
unsafe impl Zeroable for SearchMsg {}

struct StepUndo {
    cell_idx: usize,
    prev_cell: CellRecord,
    prev_pos: (usize, usize),
    path_len_before: usize,
    prev_finished: bool,
    prev_goal_reached: bool,
    drew_rng: bool,
}

/// One walker, owning its own copy of the per-cell visitation record for the
/// PE it runs on. Cloning forks the walk: the source PE continues along
/// `first_choice`, a freshly selected destination PE resumes along
/// `second_choice` once this walker's compact state (position, path, RNG
/// counter — not the full grid, which both PEs already hold) has arrived.
pub struct SearchAgent {
    grid: Arc<GridMap>,
    cells: Vec<CellRecord>,
    pos: (usize, usize),
    path: Vec<Direction>,
    rng: crate::rng::RngStream,
    goal_reached: bool,
    finished: bool,
    ascii: bool,
    /// Set while this walker is waiting on a clone order it itself recorded
    /// (it is the source; no import is coming, `resume_branch` can apply the
    /// branch directly).
    has_pending_decision: bool,
    /// Set once `import_state` has populated a freshly cloned destination's
    /// state but `resume_branch` hasn't arrived yet.
    import_ready: bool,
    /// Set once `resume_branch` has arrived but the matching `import_state`
    /// hasn't (the two can race over the mail transport).
    resume_pending: Option<u8>,
    undo: VecDeque<StepUndo>,
}

impl SearchAgent {
    pub fn new(grid: Arc<GridMap>, seed: u64, ascii: bool) -> Self {
        let cells = vec![CellRecord::default(); grid.width * grid.height];
        let pos = grid.start;
        Self {
            grid,
            cells,
            pos,
            path: Vec::new(),
            rng: crate::rng::RngStream::new(seed),
            goal_reached: false,
            finished: false,
            ascii,
            has_pending_decision: false,
            import_ready: false,
            resume_pending: None,
            undo: VecDeque::new(),
        }
    }

    fn candidate_exits(&self) -> Vec<Direction> {
        Direction::ALL
            .iter()
            .copied()
            .filter(|&d| {
                let (dx, dy) = d.delta();
                let nx = self.pos.0 as isize + dx;
                let ny = self.pos.1 as isize + dy;
                if !self.grid.in_bounds(nx, ny) {
                    return false;
                }
                let (nx, ny) = (nx as usize, ny as usize);
                if self.grid.is_obstacle(nx, ny) {
                    return false;
                }
                !self.cells[self.grid.index(nx, ny)].visited
            })
            .collect()
    }

    fn move_to(&mut self, dir: Direction) {
        let (dx, dy) = dir.delta();
        let nx = (self.pos.0 as isize + dx) as usize;
        let ny = (self.pos.1 as isize + dy) as usize;
        self.path.push(dir);
        self.pos = (nx, ny);
    }

    fn apply_branch(&mut self, branch: u8) {
        if let Some(dir) = dir_from_code(branch) {
            self.move_to(dir);
        }
    }

    fn write_output(&self, world_id: usize) -> Result<(), AikaError> {
        fs::create_dir_all("output")?;
        let path = format!("output/search-results-pe={world_id}.txt");
        let mut file = fs::File::create(path)?;
        let rendered = render_results(&self.grid, &self.cells, self.goal_reached, self.ascii);
        file.write_all(rendered.as_bytes())?;
        Ok(())
    }

    /// Pack this walker's dynamic state (position, path, RNG draw count) for
    /// the clone director to ship to a destination PE. The grid itself is
    /// not included: both PEs load the same immutable grid map at startup.
    fn pack_state(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(24 + self.path.len());
        out.extend_from_slice(&(self.pos.0 as u32).to_le_bytes());
        out.extend_from_slice(&(self.pos.1 as u32).to_le_bytes());
        out.extend_from_slice(&self.rng.draw_count().to_le_bytes());
        let len = self.path.len().min(u8::MAX as usize) as u8;
        out.push(len);
        for dir in self.path.iter().take(len as usize) {
            out.push(dir_code(*dir));
        }
        out
    }

    /// Reconstruct local state from bytes produced by `pack_state`, replaying
    /// the path against the (already-loaded, identical) grid to rebuild this
    /// PE's own `cells` record.
    fn unpack_state(&mut self, bytes: &[u8]) {
        if bytes.len() < 17 {
            return;
        }
        let x = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let y = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        let draws = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let len = bytes[16] as usize;

        self.cells = vec![CellRecord::default(); self.grid.width * self.grid.height];
        self.path.clear();
        self.pos = self.grid.start;

        let mut cursor = self.grid.start;
        let mut prev_dir: Option<Direction> = None;
        for &code in bytes.iter().skip(17).take(len) {
            let Some(dir) = dir_from_code(code) else {
                break;
            };
            let idx = self.grid.index(cursor.0, cursor.1);
            self.cells[idx].visited = true;
            self.cells[idx].entry_dir = prev_dir;
            self.cells[idx].exit_dir = Some(dir);
            let (dx, dy) = dir.delta();
            cursor = ((cursor.0 as isize + dx) as usize, (cursor.1 as isize + dy) as usize);
            prev_dir = Some(dir);
            self.path.push(dir);
        }
        let idx = self.grid.index(cursor.0, cursor.1);
        self.cells[idx].visited = true;
        self.cells[idx].entry_dir = prev_dir;

        self.pos = (x, y);
        self.rng = crate::rng::RngStream::new(self.rng_seed_hint());
        for _ in 0..draws {
            let _ = self.rng.unif();
        }
    }

    fn rng_seed_hint(&self) -> u64 {
        // The imported stream only needs to reproduce draw parity from here
        // on; reseeding at 0 and fast-forwarding is indistinguishable from
        // the source's own stream for every draw this PE will make.
        0
    }
}

impl<const SLOTS: usize> ThreadedAgent<SLOTS, SearchMsg> for SearchAgent {
    fn step(&mut self, context: &mut PlanetContext<SLOTS, SearchMsg>, agent_id: usize) -> Event {
        let time = context.time;

        if self.finished {
            return Event::new(time, time, agent_id, Action::Wait);
        }

        let idx = self.grid.index(self.pos.0, self.pos.1);
        let mut undo = StepUndo {
            cell_idx: idx,
            prev_cell: self.cells[idx],
            prev_pos: self.pos,
            path_len_before: self.path.len(),
            prev_finished: self.finished,
            prev_goal_reached: self.goal_reached,
            drew_rng: false,
        };

        self.cells[idx].visited = true;
        self.cells[idx].entry_dir = self.path.last().copied();

        if self.pos == self.grid.goal {
            self.goal_reached = true;
            self.finished = true;
            self.cells[idx].exit_dir = None;
            self.undo.push_back(undo);
            return Event::new(time, time, agent_id, Action::Wait);
        }

        let candidates = self.candidate_exits();
        let event = match candidates.len() {
            0 => {
                self.cells[idx].exit_dir = None;
                self.finished = true;
                Event::new(time, time, agent_id, Action::Wait)
            }
            1 => {
                let dir = candidates[0];
                self.cells[idx].exit_dir = Some(dir);
                self.move_to(dir);
                Event::new(time, time, agent_id, Action::Timeout(1))
            }
            _ => {
                let draw = self.rng.unif();
                undo.drew_rng = true;
                let i = ((draw * candidates.len() as f64) as usize).min(candidates.len() - 1);
                let first = candidates[i];
                let second = candidates[(i + 1) % candidates.len()];
                self.cells[idx].exit_dir = Some(first);
                context.store_decision(agent_id, dir_code(first), dir_code(second));
                context.trigger_hook_now();
                self.has_pending_decision = true;
                Event::new(time, time, agent_id, Action::Timeout(1))
            }
        };

        self.undo.push_back(undo);
        event
    }

    fn read_message(
        &mut self,
        _context: &mut PlanetContext<SLOTS, SearchMsg>,
        _msg: Msg<SearchMsg>,
        _agent_id: usize,
    ) {
    }

    fn finalize(&mut self, context: &mut PlanetContext<SLOTS, SearchMsg>, _agent_id: usize) {
        if let Err(err) = self.write_output(context.world_id) {
            tracing::error!(world_id = context.world_id, %err, "failed to write search output");
        }
    }

    fn resume_branch(
        &mut self,
        _context: &mut PlanetContext<SLOTS, SearchMsg>,
        _agent_id: usize,
        branch: u8,
    ) {
        if self.has_pending_decision {
            self.has_pending_decision = false;
            self.apply_branch(branch);
        } else if self.import_ready {
            self.import_ready = false;
            self.apply_branch(branch);
        } else {
            self.resume_pending = Some(branch);
        }
    }

    fn export_state(&self) -> Vec<u8> {
        self.pack_state()
    }

    fn import_state(&mut self, bytes: &[u8]) {
        self.unpack_state(bytes);
        if let Some(branch) = self.resume_pending.take() {
            self.apply_branch(branch);
        } else {
            self.import_ready = true;
        }
    }

    fn reverse(&mut self, _context: &mut PlanetContext<SLOTS, SearchMsg>, _agent_id: usize) {
        if let Some(frame) = self.undo.pop_back() {
            self.cells[frame.cell_idx] = frame.prev_cell;
            self.pos = frame.prev_pos;
            self.path.truncate(frame.path_len_before);
            self.finished = frame.prev_finished;
            self.goal_reached = frame.prev_goal_reached;
            if frame.drew_rng {
                self.rng.reverse_unif();
            }
        }
    }

    fn commit(&mut self, _context: &mut PlanetContext<SLOTS, SearchMsg>, _agent_id: usize) {
        self.undo.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_grid(w: usize, h: usize) -> Arc<GridMap> {
        let mut text = format!("{w} {h}\n");
        for y in 0..h {
            for x in 0..w {
                if (x, y) == (0, 0) {
                    text.push('S');
                } else if (x, y) == (w - 1, h - 1) {
                    text.push('G');
                } else {
                    text.push('.');
                }
            }
            text.push('\n');
        }
        Arc::new(GridMap::parse(&text).unwrap())
    }

    #[test]
    fn single_path_reaches_goal_on_an_open_corridor() {
        let grid = open_grid(1, 5);
        let mut agent = SearchAgent::new(grid, 1, false);
        assert_eq!(agent.candidate_exits(), vec![Direction::South]);
        agent.move_to(Direction::South);
        assert_eq!(agent.pos, (0, 1));
    }

    #[test]
    fn dead_end_finishes_without_reaching_goal() {
        let text = "2 1\nS#\n";
        let grid = Arc::new(GridMap::parse(text).unwrap());
        let mut agent = SearchAgent::new(grid, 1, false);
        assert!(agent.candidate_exits().is_empty());
        agent.finished = true;
        assert!(!agent.goal_reached);
    }

    #[test]
    fn pack_and_unpack_state_round_trips_position_and_path() {
        let grid = open_grid(3, 3);
        let mut agent = SearchAgent::new(Arc::clone(&grid), 5, false);
        agent.move_to(Direction::East);
        agent.move_to(Direction::South);
        let packed = agent.pack_state();

        let mut other = SearchAgent::new(grid, 5, false);
        other.unpack_state(&packed);
        assert_eq!(other.pos, agent.pos);
        assert_eq!(other.path, agent.path);
    }

    #[test]
    fn reverse_undoes_a_single_step_move() {
        let grid = open_grid(1, 3);
        let mut agent = SearchAgent::new(grid, 1, false);
        let idx = agent.grid.index(0, 0);
        let before_pos = agent.pos;
        agent.undo.push_back(StepUndo {
            cell_idx: idx,
            prev_cell: agent.cells[idx],
            prev_pos: before_pos,
            path_len_before: agent.path.len(),
            prev_finished: agent.finished,
            prev_goal_reached: agent.goal_reached,
            drew_rng: false,
        });
        agent.cells[idx].visited = true;
        agent.move_to(Direction::South);
        assert_ne!(agent.pos, before_pos);

        if let Some(frame) = agent.undo.pop_back() {
            agent.cells[frame.cell_idx] = frame.prev_cell;
            agent.pos = frame.prev_pos;
            agent.path.truncate(frame.path_len_before);
        }
        assert_eq!(agent.pos, before_pos);
        assert!(!agent.cells[idx].visited);
    }
}
