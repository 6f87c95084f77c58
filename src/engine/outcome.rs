//! Outcome generator.
//!
//! Draws a value uniformly from 0-9 unless an operator supplies one. Colour
//! and size are derived from the value by [`Outcome::from_value`].

use rand::Rng;

use crate::types::{GameError, Outcome};

/// Draw an outcome from the thread-local RNG, or build one from
/// `override_value` when given.
pub fn generate(override_value: Option<i64>) -> Result<Outcome, GameError> {
    generate_with(&mut rand::thread_rng(), override_value)
}

/// Same as [`generate`] with an explicit RNG.
pub fn generate_with<R: Rng>(
    rng: &mut R,
    override_value: Option<i64>,
) -> Result<Outcome, GameError> {
    match override_value {
        Some(value) => Outcome::from_value(value, true),
        None => Outcome::from_value(rng.gen_range(0..=i64::from(Outcome::MAX_VALUE)), false),
    }
}
