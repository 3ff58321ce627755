//! Grid-file parsing and box-drawing result rendering for the search model
//! (spec.md §6). Intentionally thin: grid I/O is an external collaborator, not
//! part of the substrate's hard engineering.
use std::{fmt::Write as _, fs, path::Path};

use crate::AikaError;

/// A direction a search step can enter or leave a cell from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Offset `(dx, dy)` a step in this direction applies to a cell's coordinates.
    pub fn delta(self) -> (isize, isize) {
        match self {
            Direction::North => (0, -1),
            Direction::South => (0, 1),
            Direction::East => (1, 0),
            Direction::West => (-1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::North => Direction::South,
            Direction::South => Direction::North,
            Direction::East => Direction::West,
            Direction::West => Direction::East,
        }
    }

    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];
}

/// A parsed grid-map file: dimensions, obstacle mask, and start/goal coordinates
/// (spec.md §6 "Grid file format").
#[derive(Debug, Clone)]
pub struct GridMap {
    pub width: usize,
    pub height: usize,
    obstacles: Vec<bool>,
    pub start: (usize, usize),
    pub goal: (usize, usize),
}

impl GridMap {
    pub fn load(path: &Path) -> Result<Self, AikaError> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    /// Parse grid-map text (spec.md §6): `//` comments, a `WIDTH HEIGHT` header,
    /// then `.`/`#`/`S`/`G` cells read in row-major order, ignoring whitespace.
    /// Unknown characters warn and are treated as free (spec.md §6).
    pub fn parse(text: &str) -> Result<Self, AikaError> {
        let mut lines = text.lines().filter(|l| !l.trim_start().starts_with("//"));

        let header = lines
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| AikaError::GridParseError("empty grid file".to_string()))?;
        let mut header_fields = header.split_whitespace();
        let width: usize = header_fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AikaError::GridParseError("missing grid width".to_string()))?;
        let height: usize = header_fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| AikaError::GridParseError("missing grid height".to_string()))?;
        if !(1..=100).contains(&width) || !(1..=100).contains(&height) {
            return Err(AikaError::GridParseError(format!(
                "grid dimensions {width}x{height} out of range 1..100"
            )));
        }

        let mut obstacles = vec![false; width * height];
        let mut start = None;
        let mut goal = None;
        let mut idx = 0usize;
        for line in lines {
            for ch in line.chars() {
                if ch.is_whitespace() {
                    continue;
                }
                if idx >= width * height {
                    return Err(AikaError::GridParseError(
                        "grid file has more cells than WIDTH*HEIGHT".to_string(),
                    ));
                }
                let x = idx % width;
                let y = idx / width;
                match ch {
                    '.' => {}
                    '#' => obstacles[idx] = true,
                    'S' => {
                        if start.is_some() {
                            return Err(AikaError::GridParseError(
                                "more than one start cell".to_string(),
                            ));
                        }
                        start = Some((x, y));
                    }
                    'G' => {
                        if goal.is_some() {
                            return Err(AikaError::GridParseError(
                                "more than one goal cell".to_string(),
                            ));
                        }
                        goal = Some((x, y));
                    }
                    other => {
                        tracing::warn!(char = %other, x, y, "unknown grid character, treating as free");
                    }
                }
                idx += 1;
            }
        }
        if idx != width * height {
            return Err(AikaError::GridParseError(format!(
                "grid file has {idx} cells, expected {}",
                width * height
            )));
        }
        let start = start
            .ok_or_else(|| AikaError::GridParseError("grid file has no start cell".to_string()))?;
        let goal = goal
            .ok_or_else(|| AikaError::GridParseError("grid file has no goal cell".to_string()))?;

        Ok(Self {
            width,
            height,
            obstacles,
            start,
            goal,
        })
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn is_obstacle(&self, x: usize, y: usize) -> bool {
        self.obstacles[self.index(x, y)]
    }

    pub fn in_bounds(&self, x: isize, y: isize) -> bool {
        x >= 0 && y >= 0 && (x as usize) < self.width && (y as usize) < self.height
    }
}

/// Box-drawing glyph for a visited cell, keyed by `(entry_dir, exit_dir)`
/// (spec.md §6 lookup table). `entry = None` is the `?` row (a cell with no
/// recorded entry direction, i.e. the start cell); `exit = None` is a dead end.
pub fn box_glyph(entry: Option<Direction>, exit: Option<Direction>) -> char {
    use Direction::*;
    let Some(entry) = entry else {
        return '?';
    };
    let Some(exit) = exit else {
        return 'X';
    };
    match (entry, exit) {
        (North, North) | (South, South) | (East, East) | (West, West) => '?',
        (North, South) | (South, North) => '│',
        (East, West) | (West, East) => '─',
        (North, East) | (East, North) => '└',
        (North, West) | (West, North) => '┘',
        (South, East) | (East, South) => '┌',
        (South, West) | (West, South) => '┐',
    }
}

/// ASCII-mode glyph (`--ascii`): arrow in the direction of the exit, or `X` for
/// a dead end (spec.md §6 "(ASCII mode)").
pub fn ascii_glyph(exit: Option<Direction>) -> char {
    match exit {
        Some(Direction::North) => '^',
        Some(Direction::South) => 'v',
        Some(Direction::East) => '>',
        Some(Direction::West) => '<',
        None => 'X',
    }
}

/// Per-cell data recorded by the search model, enough to render the final grid.
#[derive(Copy, Clone, Debug, Default)]
pub struct CellRecord {
    pub visited: bool,
    pub entry_dir: Option<Direction>,
    pub exit_dir: Option<Direction>,
}

/// Render `search-results-pe=<id>.txt` (spec.md §6 "Grid output format").
pub fn render_results(
    grid: &GridMap,
    cells: &[CellRecord],
    goal_reached: bool,
    ascii: bool,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Grid: {}x{}", grid.width, grid.height);
    let _ = writeln!(out, "Start: ({}, {})", grid.start.0, grid.start.1);
    let _ = writeln!(out, "Goal: ({}, {})", grid.goal.0, grid.goal.1);
    let _ = writeln!(
        out,
        "Goal reached: {}",
        if goal_reached { "YES" } else { "NO" }
    );
    out.push('\n');

    for y in 0..grid.height {
        for x in 0..grid.width {
            let idx = grid.index(x, y);
            let cell = cells[idx];
            let ch = if grid.is_obstacle(x, y) {
                '#'
            } else if (x, y) == grid.start {
                'S'
            } else if (x, y) == grid.goal {
                if cell.visited {
                    'G'
                } else {
                    'g'
                }
            } else if cell.visited {
                if ascii {
                    ascii_glyph(cell.exit_dir)
                } else {
                    box_glyph(cell.entry_dir, cell.exit_dir)
                }
            } else {
                '.'
            };
            out.push(ch);
        }
        out.push('\n');
    }
    out
}
