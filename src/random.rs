//! Pseudorandom generators and deviate transforms.
//!
//! [`Xoshiro256StarStar`] and [`Xoroshiro1024StarStar`] are the Blackman–Vigna
//! `**` generators. Both seed their state through [`SplitMix64`]; a zero seed
//! is replaced by [`system_seed_64`]. They implement [`rand::RngCore`], so any
//! `rand` distribution can draw from them as well.
//!
//! The deviate transforms draw uniform variates from any [`UniformSource`]:
//! normal (Marsaglia polar), Poisson (Knuth below λ = 30, Atkinson's PA
//! rejection above) and gamma (Marsaglia–Tsang).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::rngs::OsRng;
use rand::{RngCore, TryRngCore};

use crate::error::{Error, Result};
use crate::numeric::ln_gamma;

static SEED_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh 64-bit seed per call, drawn from the operating system's randomness
/// source, or from the system clock when that source is unavailable.
pub fn system_seed_64() -> u64 {
    let count = SEED_COUNTER.fetch_add(1, Ordering::Relaxed);
    match OsRng.try_next_u64() {
        Ok(seed) => seed,
        Err(_) => {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();
            SplitMix64::new(nanos ^ count.rotate_left(32)).next_u64()
        }
    }
}

/// XOR of the two halves of a [`system_seed_64`].
pub fn system_seed_32() -> u32 {
    let s = system_seed_64();
    (s ^ (s >> 32)) as u32
}

fn fill_bytes_from_u64<R: RngCore + ?Sized>(rng: &mut R, dest: &mut [u8]) {
    let mut chunks = dest.chunks_exact_mut(8);
    for chunk in &mut chunks {
        chunk.copy_from_slice(&rng.next_u64().to_le_bytes());
    }
    let rest = chunks.into_remainder();
    if !rest.is_empty() {
        let bytes = rng.next_u64().to_le_bytes();
        rest.copy_from_slice(&bytes[..rest.len()]);
    }
}

/// Uniform integer in `[0, n)` by rejection of the biased low range.
fn bounded(mut next: impl FnMut() -> u64, n: u64) -> u64 {
    if n == 0 {
        return 0;
    }
    let threshold = n.wrapping_neg() % n;
    loop {
        let x = next();
        if x >= threshold {
            return x % n;
        }
    }
}

#[inline]
fn to_unit(x: u64) -> f64 {
    (x >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
}

/// SplitMix64, used to expand a single seed into generator state.
#[derive(Debug, Clone)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e37_79b9_7f4a_7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        z ^ (z >> 31)
    }
}

macro_rules! generator_api {
    ($name:ident) => {
        impl $name {
            pub fn ui64(&mut self) -> u64 {
                self.step()
            }

            pub fn ui32(&mut self) -> u32 {
                (self.step() >> 32) as u32
            }

            /// Uniform integer in `[0, n)`; zero when `n` is zero.
            pub fn ui64n(&mut self, n: u64) -> u64 {
                bounded(|| self.step(), n)
            }

            /// Uniform integer in `[0, n)`; zero when `n` is zero.
            pub fn uin(&mut self, n: u32) -> u32 {
                bounded(|| self.step(), n as u64) as u32
            }

            /// Uniform deviate in `[0, 1)` with 53 random bits.
            pub fn uniform(&mut self) -> f64 {
                to_unit(self.step())
            }
        }

        impl RngCore for $name {
            fn next_u32(&mut self) -> u32 {
                self.ui32()
            }

            fn next_u64(&mut self) -> u64 {
                self.step()
            }

            fn fill_bytes(&mut self, dest: &mut [u8]) {
                fill_bytes_from_u64(self, dest)
            }
        }

        impl UniformSource for $name {
            fn uniform(&mut self) -> f64 {
                $name::uniform(self)
            }
        }
    };
}

/// xoshiro256**: 256 bits of state, period 2^256 − 1.
#[derive(Debug, Clone)]
pub struct Xoshiro256StarStar {
    s: [u64; 4],
}

impl Xoshiro256StarStar {
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { system_seed_64() } else { seed };
        let mut sm = SplitMix64::new(seed);
        Self {
            s: std::array::from_fn(|_| sm.next_u64()),
        }
    }

    #[inline]
    fn step(&mut self) -> u64 {
        let s = &mut self.s;
        let result = s[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        let t = s[1] << 17;
        s[2] ^= s[0];
        s[3] ^= s[1];
        s[1] ^= s[2];
        s[0] ^= s[3];
        s[2] ^= t;
        s[3] = s[3].rotate_left(45);
        result
    }
}

generator_api!(Xoshiro256StarStar);

/// xoroshiro1024**: 1024 bits of state, period 2^1024 − 1.
#[derive(Debug, Clone)]
pub struct Xoroshiro1024StarStar {
    s: [u64; 16],
    p: usize,
}

impl Xoroshiro1024StarStar {
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { system_seed_64() } else { seed };
        let mut sm = SplitMix64::new(seed);
        Self {
            s: std::array::from_fn(|_| sm.next_u64()),
            p: 0,
        }
    }

    #[inline]
    fn step(&mut self) -> u64 {
        let q = self.p;
        self.p = (self.p + 1) & 15;
        let s0 = self.s[self.p];
        let mut s15 = self.s[q];
        let result = s0.wrapping_mul(5).rotate_left(7).wrapping_mul(9);
        s15 ^= s0;
        self.s[q] = s0.rotate_left(25) ^ s15 ^ (s15 << 27);
        self.s[self.p] = s15.rotate_left(36);
        result
    }
}

generator_api!(Xoroshiro1024StarStar);

/// A source of uniform deviates in `[0, 1)`.
pub trait UniformSource {
    fn uniform(&mut self) -> f64;
}

impl<T: UniformSource + ?Sized> UniformSource for &mut T {
    fn uniform(&mut self) -> f64 {
        (**self).uniform()
    }
}

/// Standard normal deviates by the Marsaglia polar method. Each accepted
/// point yields two deviates; the second is returned by the next call.
#[derive(Debug, Clone)]
pub struct NormalRandomDeviates<R> {
    source: R,
    cached: Option<f64>,
}

impl<R: UniformSource> NormalRandomDeviates<R> {
    pub fn new(source: R) -> Self {
        Self { source, cached: None }
    }

    pub fn sample(&mut self) -> f64 {
        if let Some(v) = self.cached.take() {
            return v;
        }
        loop {
            let u = 2.0 * self.source.uniform() - 1.0;
            let v = 2.0 * self.source.uniform() - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                let f = (-2.0 * s.ln() / s).sqrt();
                self.cached = Some(v * f);
                return u * f;
            }
        }
    }

    /// Uniform deviate from the underlying source.
    pub fn uniform(&mut self) -> f64 {
        self.source.uniform()
    }
}

/// Poisson deviates.
#[derive(Debug, Clone)]
pub struct PoissonRandomDeviates<R> {
    source: R,
}

impl<R: UniformSource> PoissonRandomDeviates<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Uniform deviate in the open interval `(0, 1)`.
    fn open_uniform(&mut self) -> f64 {
        loop {
            let u = self.source.uniform();
            if u > 0.0 {
                return u;
            }
        }
    }

    /// A Poisson deviate of mean `lambda`. Non-positive means yield zero.
    pub fn sample(&mut self, lambda: f64) -> u64 {
        if !(lambda > 0.0) {
            return 0;
        }
        if lambda < 30.0 {
            let limit = (-lambda).exp();
            let mut k = 0;
            let mut p = self.source.uniform();
            while p > limit {
                k += 1;
                p *= self.source.uniform();
            }
            return k;
        }

        let beta = std::f64::consts::PI / (3.0 * lambda).sqrt();
        let alpha = beta * lambda;
        let c = 0.767 - 3.36 / lambda;
        let k = c.ln() - lambda - beta.ln();
        let ln_lambda = lambda.ln();
        loop {
            let u = self.open_uniform();
            let x = (alpha - ((1.0 - u) / u).ln()) / beta;
            let n = (x + 0.5).floor();
            if n < 0.0 {
                continue;
            }
            let v = self.open_uniform();
            let y = alpha - beta * x;
            let t = 1.0 + y.exp();
            let lhs = y + (v / (t * t)).ln();
            let rhs = k + n * ln_lambda - ln_gamma(n + 1.0);
            if lhs <= rhs {
                return n as u64;
            }
        }
    }
}

/// Gamma deviates of a fixed shape and scale.
#[derive(Debug, Clone)]
pub struct GammaRandomDeviates<R> {
    normal: NormalRandomDeviates<R>,
    shape: f64,
    scale: f64,
}

impl<R: UniformSource> GammaRandomDeviates<R> {
    pub fn new(source: R, shape: f64, scale: f64) -> Result<Self> {
        if !(shape > 0.0) {
            return Err(Error::OutOfRange {
                what: "gamma shape",
                value: shape,
            });
        }
        if !(scale > 0.0) {
            return Err(Error::OutOfRange {
                what: "gamma scale",
                value: scale,
            });
        }
        Ok(Self {
            normal: NormalRandomDeviates::new(source),
            shape,
            scale,
        })
    }

    pub fn shape(&self) -> f64 {
        self.shape
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn sample(&mut self) -> f64 {
        let boost = self.shape < 1.0;
        let a = if boost { self.shape + 1.0 } else { self.shape };
        let d = a - 1.0 / 3.0;
        let c = 1.0 / (9.0 * d).sqrt();
        let g = loop {
            let x = self.normal.sample();
            let v = 1.0 + c * x;
            if v <= 0.0 {
                continue;
            }
            let v = v * v * v;
            let u = self.normal.uniform();
            let x2 = x * x;
            if u < 1.0 - 0.0331 * x2 * x2 {
                break d * v;
            }
            if u > 0.0 && u.ln() < 0.5 * x2 + d * (1.0 - v + v.ln()) {
                break d * v;
            }
        };
        let g = if boost {
            g * self.normal.uniform().powf(1.0 / self.shape)
        } else {
            g
        };
        g * self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_generators_are_reproducible() {
        let mut a = Xoshiro256StarStar::new(42);
        let mut b = Xoshiro256StarStar::new(42);
        let mut c = Xoshiro256StarStar::new(43);
        let va: Vec<u64> = (0..16).map(|_| a.ui64()).collect();
        let vb: Vec<u64> = (0..16).map(|_| b.ui64()).collect();
        let vc: Vec<u64> = (0..16).map(|_| c.ui64()).collect();
        assert_eq!(va, vb);
        assert_ne!(va, vc);

        let mut x = Xoroshiro1024StarStar::new(42);
        let mut y = Xoroshiro1024StarStar::new(42);
        for _ in 0..100 {
            assert_eq!(x.ui64(), y.ui64());
        }
    }

    #[test]
    fn splitmix_reference_values() {
        let mut sm = SplitMix64::new(0);
        assert_eq!(sm.next_u64(), 0xe220_a839_7b1d_cdaf);
        assert_eq!(sm.next_u64(), 0x6e78_9e6a_a1b9_65f4);
    }

    #[test]
    fn zero_seed_draws_from_system() {
        let mut a = Xoshiro256StarStar::new(0);
        let mut b = Xoshiro256StarStar::new(0);
        assert_ne!(a.ui64(), b.ui64());
        assert_ne!(system_seed_64(), system_seed_64());
    }

    #[test]
    fn bounded_and_unit_ranges() {
        let mut r = Xoroshiro1024StarStar::new(9);
        for _ in 0..10_000 {
            assert!(r.ui64n(7) < 7);
            assert!(r.uin(1000) < 1000);
            let u = r.uniform();
            assert!((0.0..1.0).contains(&u));
        }
        assert_eq!(r.ui64n(0), 0);
        let mut bytes = [0u8; 13];
        r.fill_bytes(&mut bytes);
        assert!(bytes.iter().any(|&b| b != 0));
    }

    #[test]
    fn bit_frequencies_are_balanced() {
        const N: usize = 1_000_000;
        let mut r = Xoshiro256StarStar::new(0x1234_5678);
        let mut counts = [0u32; 64];
        for _ in 0..N {
            let v = r.ui64();
            for (bit, count) in counts.iter_mut().enumerate() {
                *count += ((v >> bit) & 1) as u32;
            }
        }
        let sigma = (N as f64 * 0.25).sqrt();
        // Each bit stays within 3σ with probability 0.9973, so a few of 64
        // may stray beyond it; none may reach 5σ.
        let mut outside_3 = 0;
        for (bit, &c) in counts.iter().enumerate() {
            let z = (c as f64 - N as f64 / 2.0).abs() / sigma;
            assert!(z < 5.0, "bit {bit}: z = {z:.2}");
            if z > 3.0 {
                outside_3 += 1;
            }
        }
        assert!(outside_3 <= 3);
    }

    #[test]
    fn normal_moments() {
        let mut n = NormalRandomDeviates::new(Xoshiro256StarStar::new(5));
        let v: Vec<f64> = (0..200_000).map(|_| n.sample()).collect();
        let mean = v.iter().sum::<f64>() / v.len() as f64;
        let var = v.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / v.len() as f64;
        assert!(mean.abs() < 0.01, "mean {mean}");
        assert!((var - 1.0).abs() < 0.02, "variance {var}");
    }

    #[test]
    fn poisson_means() {
        let mut rng = Xoshiro256StarStar::new(77);
        let mut p = PoissonRandomDeviates::new(&mut rng);
        for lambda in [3.5, 120.0] {
            let n = 100_000;
            let mean = (0..n).map(|_| p.sample(lambda) as f64).sum::<f64>() / n as f64;
            assert!((mean - lambda).abs() < 5.0 * (lambda / n as f64).sqrt(), "lambda {lambda}: mean {mean}");
        }
        assert_eq!(p.sample(0.0), 0);
    }

    #[test]
    fn gamma_means() {
        for (shape, scale) in [(2.5, 2.0), (0.5, 1.0)] {
            let mut g = GammaRandomDeviates::new(Xoroshiro1024StarStar::new(3), shape, scale).unwrap();
            let n = 100_000;
            let mean = (0..n).map(|_| g.sample()).sum::<f64>() / n as f64;
            let sd = (shape * scale * scale / n as f64).sqrt();
            assert!((mean - shape * scale).abs() < 5.0 * sd, "shape {shape}: mean {mean}");
        }
        assert!(GammaRandomDeviates::new(Xoshiro256StarStar::new(1), 0.0, 1.0).is_err());
    }
}
