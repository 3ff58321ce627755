//! Per-LP reversible uniform RNG stream (spec.md §4.2).
//!
//! Each LP owns an independent [`RngStream`]. Because `ChaCha8Rng` is a pure
//! counter-based generator, rewinding a draw does not require snapshotting the
//! generator itself: reseeding from the original seed and replaying the draw
//! log reproduces the exact same generator state. The log records each
//! draw's *kind* (`unif` vs `integer(lo, hi)`), not just a count, since the
//! two consume a different number of underlying generator bytes — replaying
//! the wrong kind at a given position would desync the stream from its
//! original sequence. Reverse handlers must call [`RngStream::reverse_unif`]
//! once per forward draw, in reverse order, to keep the stream bit-identical
//! to its pre-forward state.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One entry in a stream's draw log: which `gen_range` call was made, so a
/// replay from seed reissues the identical sequence of generator calls.
#[derive(Clone, Copy, Debug)]
enum Draw {
    Unif,
    Integer(u64, u64),
}

/// A reversible uniform RNG stream owned by a single LP.
#[derive(Clone)]
pub struct RngStream {
    seed: u64,
    rng: ChaCha8Rng,
    log: Vec<Draw>,
}

impl RngStream {
    /// Create a stream seeded for one LP. Two streams created with the same
    /// seed draw the same sequence.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            log: Vec::new(),
        }
    }

    /// Number of draws consumed since the stream was seeded (or since the most
    /// recent `reverse_unif` brought it back down). Exposed so a model's
    /// reverse handler can assert draw-count parity in tests.
    pub fn draw_count(&self) -> u64 {
        self.log.len() as u64
    }

    /// Draw a value in `[0, 1)` and advance the stream.
    pub fn unif(&mut self) -> f64 {
        let value = self.rng.gen_range(0.0..1.0);
        self.log.push(Draw::Unif);
        value
    }

    /// Draw an integer in `[lo, hi]` (inclusive) and advance the stream.
    pub fn integer(&mut self, lo: u64, hi: u64) -> u64 {
        let value = self.rng.gen_range(lo..=hi);
        self.log.push(Draw::Integer(lo, hi));
        value
    }

    /// Rewind exactly one draw. Reverse handlers must call this once per draw
    /// the matching forward handler issued, in reverse order (spec.md §4.2
    /// invariant: a full forward-then-reverse round trip returns the stream
    /// to its pre-forward state, bit for bit).
    pub fn reverse_unif(&mut self) {
        if self.log.pop().is_none() {
            return;
        }
        self.replay_log();
    }

    /// Reseed from the original seed and replay the draw log in order.
    /// `ChaCha8Rng` being a counter stream, this costs `O(log.len())`
    /// `gen_range` calls but no per-draw bookkeeping beyond the log itself.
    fn replay_log(&mut self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        for draw in &self.log {
            match *draw {
                Draw::Unif => {
                    let _: f64 = rng.gen_range(0.0..1.0);
                }
                Draw::Integer(lo, hi) => {
                    let _: u64 = rng.gen_range(lo..=hi);
                }
            }
        }
        self.rng = rng;
    }
}
