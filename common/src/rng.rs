//! Random number generation utilities.
//!
//! The simulator never needs cryptographic randomness; it needs *repeatable*
//! randomness, so that an experiment run is fully determined by its seed.

#[cfg(any(test, feature = "test-utils"))]
use proptest::{
    arbitrary::{any, Arbitrary},
    strategy::{BoxedStrategy, Strategy},
};
use rand_core::le::read_u32_into;
pub use rand_core::{RngCore, SeedableRng};

/// A succinct trait alias for the RNG flavor used throughout the simulator.
pub trait WeakRng: RngCore {}

impl<R: RngCore> WeakRng for R {}

/// Sample a uniform `u64` in the inclusive range `[0, max]`.
//
// Widening-multiply range reduction; bias is at most (max+1)/2^64 per draw.
pub fn sample_inclusive(rng: &mut impl WeakRng, max: u64) -> u64 {
    if max == u64::MAX {
        return rng.next_u64();
    }
    let bound = u128::from(max) + 1;
    ((u128::from(rng.next_u64()) * bound) >> 64) as u64
}

/// A small, fast, _non-cryptographic_ rng with decent statistical properties.
/// Used to sample ground-truth channel liquidity and as a deterministic RNG
/// for tests.
///
/// The implementation is the same as [`Xoroshiro64Star`].
///
/// [`Xoroshiro64Star`]: https://github.com/rust-random/rngs/blob/master/rand_xoshiro/src/xoroshiro64star.rs
#[derive(Clone, Debug)]
pub struct SmallRng {
    s0: u32,
    s1: u32,
}

impl SmallRng {
    pub fn new() -> Self {
        Self {
            s0: 0xdeadbeef,
            s1: 0xf00baa44,
        }
    }

    pub fn from_u64(s: u64) -> Self {
        Self::seed_from_u64(s)
    }
}

impl Default for SmallRng {
    fn default() -> Self {
        Self::new()
    }
}

impl RngCore for SmallRng {
    #[inline]
    fn next_u32(&mut self) -> u32 {
        let r = self.s0.wrapping_mul(0x9e3779bb);
        self.s1 ^= self.s0;
        self.s0 = self.s0.rotate_left(26) ^ self.s1 ^ (self.s1 << 9);
        self.s1 = self.s1.rotate_left(13);
        r
    }

    #[inline]
    fn next_u64(&mut self) -> u64 {
        rand_core::impls::next_u64_via_u32(self)
    }

    #[inline]
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        rand_core::impls::fill_bytes_via_next(self, dest);
    }

    #[inline]
    fn try_fill_bytes(
        &mut self,
        dest: &mut [u8],
    ) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

impl SeedableRng for SmallRng {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        // zero is a pathological case for Xoroshiro64Star, just map it to
        // the default seed
        if seed == [0u8; 8] {
            Self::new()
        } else {
            let mut parts = [0u32, 0u32];
            read_u32_into(&seed, &mut parts);
            Self {
                s0: parts[0],
                s1: parts[1],
            }
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Arbitrary for SmallRng {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        // We use `no_shrink` here since shrinking an RNG seed won't produce
        // "simpler" output samples. This setting lets `proptest` know not to
        // waste time trying to shrink the rng seed.
        any::<[u8; 8]>()
            .no_shrink()
            .prop_map(SmallRng::from_seed)
            .boxed()
    }
}
