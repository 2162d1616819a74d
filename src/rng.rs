use rand::{rngs::StdRng, Rng, SeedableRng};

/// Source of uniformly distributed floats. Everything random in a roll goes
/// through one of these so tests can pin outcomes.
pub trait RandomSource: Send {
    /// Next value in `[0, 1)`.
    fn next_float(&mut self) -> f64;

    /// Uniform index into a collection of `len` items. `len` must be nonzero.
    fn pick_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        ((self.next_float() * len as f64) as usize).min(len.saturating_sub(1))
    }
}

/// Reproducible generator, seeded from a `u64`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    seed: u64,
    rng: StdRng,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl RandomSource for SeededRandom {
    fn next_float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Entropy-seeded generator used in production.
#[derive(Debug, Clone)]
pub struct SystemRandom {
    rng: StdRng,
}

impl SystemRandom {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for SystemRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRandom {
    fn next_float(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Replays a fixed sequence of values, cycling once exhausted. Values are
/// clamped into `[0, 1)`.
#[derive(Debug, Clone)]
pub struct ScriptedRandom {
    values: Vec<f64>,
    index: usize,
}

impl ScriptedRandom {
    pub fn new(values: Vec<f64>) -> Self {
        debug_assert!(!values.is_empty());
        Self { values, index: 0 }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(vec![value])
    }

    /// Number of values consumed so far.
    pub fn consumed(&self) -> usize {
        self.index
    }
}

impl RandomSource for ScriptedRandom {
    fn next_float(&mut self) -> f64 {
        let value = self
            .values
            .get(self.index % self.values.len().max(1))
            .copied()
            .unwrap_or(0.0);
        self.index += 1;
        value.clamp(0.0, 1.0 - f64::EPSILON)
    }
}
