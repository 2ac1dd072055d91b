//! Seeded Random Number Generator
//!
//! Every room owns one generator. It picks spawn points and NPC patrol
//! targets. Rooms seed it from their map id plus a fresh nonce; tests pin
//! the seed with [`DeterministicRng::new`].

use sha2::{Digest, Sha256};

use super::vec2::Vec2;

/// Domain separator for room seeds.
const ROOM_SEED_DOMAIN: &[u8] = b"ARENA_ROOM_SEED_V1";

/// Xorshift128+ generator.
///
/// # Example
///
/// ```
/// use arena_room::core::rng::DeterministicRng;
/// use arena_room::core::vec2::Vec2;
///
/// let mut a = DeterministicRng::new(7);
/// let mut b = DeterministicRng::new(7);
/// let (min, max) = (Vec2::new(100.0, 100.0), Vec2::new(1184.0, 1020.0));
/// assert_eq!(a.point_in(min, max), b.point_in(min, max));
/// ```
#[derive(Clone, Debug)]
pub struct DeterministicRng {
    s0: u64,
    s1: u64,
}

impl DeterministicRng {
    /// Generator for a fixed seed. The two state words are expanded from the
    /// seed with SplitMix64 and are never both zero.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        let s0 = splitmix64(&mut sm);
        let s1 = splitmix64(&mut sm);
        if s0 | s1 == 0 {
            return Self { s0: 1, s1: 1 };
        }
        Self { s0, s1 }
    }

    /// Generator for a freshly created room.
    pub fn for_room(map_id: &str) -> Self {
        let nonce = uuid::Uuid::new_v4().into_bytes();
        Self::new(derive_room_seed(map_id, &nonce))
    }

    /// Next raw 64-bit output.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let (s0, mut s1) = (self.s0, self.s1);
        let out = s0.wrapping_add(s1);
        s1 ^= s0;
        self.s0 = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.s1 = s1.rotate_left(37);
        out
    }

    /// Uniform index in `0..len`; 0 when `len` is 0.
    #[inline]
    pub fn index(&mut self, len: usize) -> usize {
        match len {
            0 => 0,
            n => (self.next_u64() % n as u64) as usize,
        }
    }

    /// Uniform `f32` in `[lo, hi)`; `lo` for an empty range.
    #[inline]
    pub fn range_f32(&mut self, lo: f32, hi: f32) -> f32 {
        if lo >= hi {
            return lo;
        }
        // Top 24 bits fill an f32 mantissa exactly
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        lo + unit * (hi - lo)
    }

    /// Uniform point in the rectangle spanned by `min` and `max`.
    pub fn point_in(&mut self, min: Vec2, max: Vec2) -> Vec2 {
        let x = self.range_f32(min.x, max.x);
        let y = self.range_f32(min.y, max.y);
        Vec2::new(x, y)
    }

    /// Uniform pick from a slice.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.index(items.len()))
    }
}

#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Room seed: first 8 bytes (LE) of `SHA-256(domain || map_id || nonce)`.
pub fn derive_room_seed(map_id: &str, nonce: &[u8; 16]) -> u64 {
    let digest = Sha256::new()
        .chain_update(ROOM_SEED_DOMAIN)
        .chain_update(map_id.as_bytes())
        .chain_update(nonce)
        .finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = DeterministicRng::new(12345);
        let mut b = DeterministicRng::new(12345);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn test_known_values() {
        // Room tests that pin seed 42 depend on this stream
        let mut rng = DeterministicRng::new(42);
        assert_eq!(rng.next_u64(), 16629283624882167704);
        assert_eq!(rng.next_u64(), 1420492921613871959);
        assert_eq!(rng.next_u64(), 9768315062676884790);
    }

    #[test]
    fn test_index_bounds() {
        let mut rng = DeterministicRng::new(1234);
        for _ in 0..1000 {
            assert!(rng.index(5) < 5);
        }
        assert_eq!(rng.index(0), 0);
        assert_eq!(rng.index(1), 0);
    }

    #[test]
    fn test_range_f32() {
        let mut rng = DeterministicRng::new(9999);
        for _ in 0..1000 {
            let val = rng.range_f32(100.0, 1184.0);
            assert!((100.0..1184.0).contains(&val));
        }
        assert_eq!(rng.range_f32(5.0, 5.0), 5.0);
        assert_eq!(rng.range_f32(8.0, 2.0), 8.0);
    }

    #[test]
    fn test_point_in_patrol_bounds() {
        let mut rng = DeterministicRng::new(7777);
        let min = Vec2::new(50.0, 50.0);
        let max = Vec2::new(1234.0, 1070.0);
        for _ in 0..200 {
            let p = rng.point_in(min, max);
            assert!(p.x >= min.x && p.x < max.x);
            assert!(p.y >= min.y && p.y < max.y);
        }
    }

    #[test]
    fn test_choose_spawn() {
        let mut rng = DeterministicRng::new(3);
        let none: [Vec2; 0] = [];
        assert!(rng.choose(&none).is_none());

        let spawns = [Vec2::new(200.0, 200.0), Vec2::new(1000.0, 900.0)];
        let mut seen = [false; 2];
        for _ in 0..50 {
            let pick = rng.choose(&spawns).unwrap();
            let i = spawns.iter().position(|s| s == pick).unwrap();
            seen[i] = true;
        }
        assert_eq!(seen, [true, true]);
    }

    #[test]
    fn test_room_seed_depends_on_map_and_nonce() {
        let nonce = [1u8; 16];
        let seed = derive_room_seed("map3", &nonce);
        assert_eq!(seed, derive_room_seed("map3", &nonce));
        assert_ne!(seed, derive_room_seed("map1", &nonce));
        assert_ne!(seed, derive_room_seed("map3", &[2u8; 16]));
    }

    #[test]
    fn test_for_room_differs_per_room() {
        let mut a = DeterministicRng::for_room("map1");
        let mut b = DeterministicRng::for_room("map1");
        assert_ne!(a.next_u64(), b.next_u64());
    }
}
