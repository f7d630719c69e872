//! Seeded RNG wrapper for reproducible behavior.
//!
//! Shared by the noise model of the virtual measurer and by fault
//! injection, so a fixed seed replays both the curve noise and the failure
//! pattern of a test run.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Seeded RNG wrapper for reproducible random behavior
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// Create a new RNG with optional seed.
    /// If seed is None, uses a random seed from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Check if an operation should fail based on the given failure rate.
    ///
    /// # Arguments
    /// * `rate` - Failure probability from 0.0 (never fail) to 1.0 (always fail)
    pub fn should_fail(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().r#gen::<f64>() < rate
    }

    /// Uniform sample in `[-amplitude, amplitude]`; 0 for a non-positive amplitude.
    pub fn uniform(&self, amplitude: f64) -> f64 {
        if amplitude <= 0.0 {
            return 0.0;
        }
        self.inner.lock().gen_range(-amplitude..=amplitude)
    }

    /// Fill a buffer with `len` uniform samples in `[-amplitude, amplitude]`.
    pub fn uniform_vec(&self, amplitude: f64, len: usize) -> Vec<f64> {
        if amplitude <= 0.0 {
            return vec![0.0; len];
        }
        let mut rng = self.inner.lock();
        (0..len).map(|_| rng.gen_range(-amplitude..=amplitude)).collect()
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng")
            .field("inner", &"<Mutex<ChaCha8Rng>>")
            .finish()
    }
}
