//! Randomness for `RandomUtil` selection.
//!
//! The engine only ever needs a uniform draw in `[0, 1)`; [`UtilityRng`]
//! is that capability. [`DefaultRng`] backs it with a `SmallRng`, seedable
//! for deterministic runs.

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use trellis_types::{Prong, Rank, Utility};

/// A source of uniform draws in `[0, 1)`.
pub trait UtilityRng {
    fn next(&mut self) -> f32;
}

/// Default PRNG: a seedable `SmallRng`.
#[derive(Debug, Clone)]
pub struct DefaultRng {
    rng: SmallRng,
}

impl DefaultRng {
    /// Creates an RNG seeded from the OS entropy source.
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    /// Creates an RNG with a fixed seed, for reproducible selection.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for DefaultRng {
    fn default() -> Self {
        Self::new()
    }
}

impl UtilityRng for DefaultRng {
    fn next(&mut self) -> f32 {
        self.rng.gen_range(0.0..1.0)
    }
}

/// Picks a prong by weighted sampling over the top-rank tier.
///
/// Only prongs whose rank equals `top` carry weight; `utilities` holds
/// zero for the others and `sum` is the total over the tier. The draw is
/// scaled by the sum and walked down the tier in prong order, so equal
/// utilities are equally likely and the walk is deterministic given the
/// draw.
///
/// A non-positive sum means the tree declared a randomized region whose
/// top tier reported no positive utility; that is a configuration error.
pub(crate) fn resolve_random<R: UtilityRng>(
    rng: &mut R,
    ranks: &[Rank],
    utilities: &[Utility],
    sum: Utility,
    top: Rank,
) -> Prong {
    debug_assert_eq!(ranks.len(), utilities.len());
    assert!(
        sum.value() > 0.0,
        "randomized region requires positive total utility at the top rank"
    );

    let mut remaining = rng.next() * sum.value();
    debug_assert!((0.0..=sum.value()).contains(&remaining));

    let mut last_top = None;
    for (index, (&rank, &utility)) in ranks.iter().zip(utilities.iter()).enumerate() {
        if rank != top {
            continue;
        }
        assert!(
            utility.value() >= 0.0,
            "negative utility on prong {index} of a randomized region"
        );
        if remaining < utility.value() {
            return Prong::new(index as u8);
        }
        remaining -= utility.value();
        last_top = Some(index);
    }

    // Rounding can push the draw past the final weight; the last top-rank
    // prong is the correct bucket.
    Prong::new(last_top.expect("top rank has at least one prong") as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRng(f32);

    impl UtilityRng for FixedRng {
        fn next(&mut self) -> f32 {
            self.0
        }
    }

    fn ranks(values: &[i8]) -> Vec<Rank> {
        values.iter().copied().map(Rank::new).collect()
    }

    fn utilities(values: &[f32]) -> Vec<Utility> {
        values.iter().copied().map(Utility::new).collect()
    }

    #[test]
    fn draw_walks_prongs_in_order() {
        let ranks = ranks(&[0, 0, 0]);
        let utilities = utilities(&[1.0, 2.0, 1.0]);
        let sum = Utility::new(4.0);
        let top = Rank::new(0);

        let cases = [(0.0, 0), (0.24, 0), (0.25, 1), (0.7, 2), (0.99, 2)];
        for (draw, expected) in cases {
            let mut rng = FixedRng(draw);
            let prong = resolve_random(&mut rng, &ranks, &utilities, sum, top);
            assert_eq!(prong, Prong::new(expected), "draw {draw}");
        }
    }

    #[test]
    fn lower_ranks_carry_no_weight() {
        let ranks = ranks(&[1, 0, 1]);
        let utilities = utilities(&[1.0, 0.0, 3.0]);
        let sum = Utility::new(4.0);
        let top = Rank::new(1);

        // A draw landing past prong 0's weight must skip the rank-0 prong.
        let mut rng = FixedRng(0.5);
        let prong = resolve_random(&mut rng, &ranks, &utilities, sum, top);
        assert_eq!(prong, Prong::new(2));
    }

    #[test]
    fn boundary_draw_lands_on_last_top_prong() {
        let ranks = ranks(&[0, 0]);
        let utilities = utilities(&[1.0, 1.0]);
        // next() returning just under 1.0 scales to just under the sum.
        let mut rng = FixedRng(0.999_999);
        let prong = resolve_random(&mut rng, &ranks, &utilities, Utility::new(2.0), Rank::new(0));
        assert_eq!(prong, Prong::new(1));
    }

    #[test]
    #[should_panic(expected = "positive total utility")]
    fn zero_sum_is_a_configuration_error() {
        let ranks = ranks(&[0]);
        let utilities = utilities(&[0.0]);
        let mut rng = FixedRng(0.5);
        let _ = resolve_random(&mut rng, &ranks, &utilities, Utility::ZERO, Rank::new(0));
    }
}
