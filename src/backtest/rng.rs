//! Seeded Randomness
//!
//! Every random draw in a session comes from a `SimRng`. A single base seed is
//! split into one ChaCha stream per component, so extra draws in the strategy
//! never shift the slippage sequence and vice versa.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Components that consume randomness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RngStream {
    /// Per-date instrument shuffle in the tick stream.
    TickShuffle = 1,
    /// Instrument ordering and buy-bias draws in the strategy.
    Strategy = 2,
    /// Slippage and failure draws in the execution simulator.
    Execution = 3,
    /// Execution order of intents generated by one tick.
    OrderShuffle = 4,
}

/// Deterministic RNG handed to a single component.
#[derive(Debug, Clone)]
pub struct SimRng {
    rng: ChaCha8Rng,
    samples_drawn: u64,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            samples_drawn: 0,
        }
    }

    /// RNG for `stream`, derived from the session seed.
    pub fn for_stream(seed: u64, stream: RngStream) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(stream as u64);
        Self {
            rng,
            samples_drawn: 0,
        }
    }

    /// Get the underlying RNG for sampling.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        self.samples_drawn += 1;
        &mut self.rng
    }

    /// Number of times `rng()` was borrowed (for diagnostics).
    pub fn samples_drawn(&self) -> u64 {
        self.samples_drawn
    }
}
