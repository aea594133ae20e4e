// Copyright (c) 2026 The cohsim authors. All rights reserved.

//! A generic n-way set-associative tag store.
//!
//! The cache holds only coherence metadata: each line slot carries a tag
//! and a caller-defined payload (the line state). Addresses are split as:
//!
//! ```text
//!  msb                  lsb
//!  +-----+-------+--------+
//!  | tag |  set  | offset |
//!  +-----+-------+--------+
//! ```
//!
//! where `offset` addresses bytes within a line, `set` selects the set of
//! n ways and `tag` is compared to determine a hit.

use cohsim_engine::sim_error;
use cohsim_engine::types::{SimError, SimResult};

type Tag = u64;

/// Cache geometry: `sets_n x ways_n` with `line_bytes_n` lines.
#[derive(Clone, Copy, Debug)]
pub struct CacheGeometry {
    /// Number of sets; must be a power of two.
    pub sets_n: usize,
    /// Number of ways per set.
    pub ways_n: usize,
    /// Line size in bytes; must be a power of two.
    pub line_bytes_n: usize,
}

/// Splits addresses into `{tag, set, offset}` for a given geometry.
#[derive(Clone, Copy, Debug)]
pub struct CacheAddressHelper {
    offset_bits: u32,
    set_bits: u32,
    sets_mask: u64,
}

impl CacheAddressHelper {
    /// Construct a helper; errors if the geometry is not power-of-two.
    pub fn new(geometry: &CacheGeometry) -> Result<Self, SimError> {
        if !geometry.line_bytes_n.is_power_of_two() {
            sim_error!("line_bytes_n {} is not a power of two", geometry.line_bytes_n);
        }
        if !geometry.sets_n.is_power_of_two() {
            sim_error!("sets_n {} is not a power of two", geometry.sets_n);
        }
        Ok(Self {
            offset_bits: geometry.line_bytes_n.trailing_zeros(),
            set_bits: geometry.sets_n.trailing_zeros(),
            sets_mask: geometry.sets_n as u64 - 1,
        })
    }

    /// The tag component of `addr`.
    #[must_use]
    pub fn tag(&self, addr: u64) -> Tag {
        addr >> (self.offset_bits + self.set_bits)
    }

    /// The set index component of `addr`.
    #[must_use]
    pub fn set(&self, addr: u64) -> usize {
        ((addr >> self.offset_bits) & self.sets_mask) as usize
    }

    /// The byte offset within a line.
    #[must_use]
    pub fn offset(&self, addr: u64) -> u64 {
        addr & ((1 << self.offset_bits) - 1)
    }

    /// The base address of the line containing `addr`.
    #[must_use]
    pub fn line_base(&self, addr: u64) -> u64 {
        addr & !((1u64 << self.offset_bits) - 1)
    }

    /// Reconstruct a line base address from its tag and set index.
    #[must_use]
    pub fn addr_from(&self, tag: Tag, set: usize) -> u64 {
        (tag << (self.offset_bits + self.set_bits)) | ((set as u64) << self.offset_bits)
    }
}

struct Way<T> {
    tag: Tag,
    t: T,
}

/// Set-associative tag store, generic over the line state payload.
pub struct CacheModel<T> {
    ah: CacheAddressHelper,
    ways_n: usize,
    sets: Vec<Vec<Way<T>>>,
}

impl<T> CacheModel<T> {
    /// Construct a cache with the given geometry.
    pub fn new(geometry: &CacheGeometry) -> Result<Self, SimError> {
        let ah = CacheAddressHelper::new(geometry)?;
        let sets = (0..geometry.sets_n).map(|_| Vec::new()).collect();
        Ok(Self {
            ah,
            ways_n: geometry.ways_n,
            sets,
        })
    }

    /// The address helper for this cache.
    #[must_use]
    pub fn ah(&self) -> &CacheAddressHelper {
        &self.ah
    }

    /// True when the line containing `addr` is present.
    #[must_use]
    pub fn hit(&self, addr: u64) -> bool {
        self.lookup(addr).is_some()
    }

    /// The line state for `addr`, if present.
    #[must_use]
    pub fn lookup(&self, addr: u64) -> Option<&T> {
        let tag = self.ah.tag(addr);
        self.sets[self.ah.set(addr)]
            .iter()
            .find(|w| w.tag == tag)
            .map(|w| &w.t)
    }

    /// The mutable line state for `addr`, if present.
    pub fn lookup_mut(&mut self, addr: u64) -> Option<&mut T> {
        let tag = self.ah.tag(addr);
        self.sets[self.ah.set(addr)]
            .iter_mut()
            .find(|w| w.tag == tag)
            .map(|w| &mut w.t)
    }

    /// True when installing `addr` would first require an eviction.
    #[must_use]
    pub fn requires_eviction(&self, addr: u64) -> bool {
        !self.hit(addr) && self.sets[self.ah.set(addr)].len() == self.ways_n
    }

    /// Install a line; the set must have a free way.
    pub fn install(&mut self, addr: u64, t: T) -> SimResult {
        if self.hit(addr) {
            sim_error!("install of already present line {addr:#x}");
        }
        let set = self.ah.set(addr);
        if self.sets[set].len() == self.ways_n {
            sim_error!("install into full set for line {addr:#x}");
        }
        let tag = self.ah.tag(addr);
        self.sets[set].push(Way { tag, t });
        Ok(())
    }

    /// Remove the line containing `addr`, returning its state.
    pub fn remove(&mut self, addr: u64) -> Option<T> {
        let tag = self.ah.tag(addr);
        let set = &mut self.sets[self.ah.set(addr)];
        let idx = set.iter().position(|w| w.tag == tag)?;
        Some(set.remove(idx).t)
    }

    /// Select a victim line base address in the set of `addr`: the first
    /// way whose state satisfies `evictable`.
    #[must_use]
    pub fn victim(&self, addr: u64, evictable: impl Fn(&T) -> bool) -> Option<u64> {
        let set = self.ah.set(addr);
        self.sets[set]
            .iter()
            .find(|w| evictable(&w.t))
            .map(|w| self.ah.addr_from(w.tag, set))
    }

    /// Visit every resident line as `(line_base_addr, state)`.
    pub fn for_each(&self, mut f: impl FnMut(u64, &T)) {
        for (set_idx, set) in self.sets.iter().enumerate() {
            for w in set {
                f(self.ah.addr_from(w.tag, set_idx), &w.t);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> CacheGeometry {
        CacheGeometry {
            sets_n: 64,
            ways_n: 2,
            line_bytes_n: 64,
        }
    }

    #[test]
    fn address_split() {
        let ah = CacheAddressHelper::new(&geometry()).unwrap();
        let addr = 0x0001_2345;
        assert_eq!(ah.offset(addr), 0x5);
        assert_eq!(ah.set(addr), 0x0d);
        assert_eq!(ah.tag(addr), 0x12345 >> 12);
        assert_eq!(ah.line_base(addr), 0x0001_2340);
        assert_eq!(
            ah.addr_from(ah.tag(addr), ah.set(addr)),
            ah.line_base(addr)
        );
    }

    #[test]
    fn non_pow2_geometry_is_error() {
        let g = CacheGeometry {
            sets_n: 48,
            ways_n: 2,
            line_bytes_n: 64,
        };
        assert!(CacheAddressHelper::new(&g).is_err());
    }

    #[test]
    fn install_lookup_remove() {
        let mut cache: CacheModel<u8> = CacheModel::new(&geometry()).unwrap();
        assert!(!cache.hit(0x1000));
        cache.install(0x1000, 7).unwrap();
        assert_eq!(cache.lookup(0x1000), Some(&7));
        assert_eq!(cache.lookup(0x1004), Some(&7)); // same line
        *cache.lookup_mut(0x1000).unwrap() = 8;
        assert_eq!(cache.remove(0x1000), Some(8));
        assert!(!cache.hit(0x1000));
    }

    #[test]
    fn eviction_required_when_set_full() {
        let mut cache: CacheModel<u8> = CacheModel::new(&geometry()).unwrap();
        // Three addresses mapping to the same set (stride sets_n * line).
        let stride = 64 * 64;
        cache.install(0x0, 1).unwrap();
        cache.install(stride, 2).unwrap();
        assert!(cache.requires_eviction(2 * stride));
        assert!(cache.install(2 * stride, 3).is_err());

        let victim = cache.victim(2 * stride, |s| *s == 2).unwrap();
        assert_eq!(victim, stride as u64);
        cache.remove(victim).unwrap();
        cache.install(2 * stride, 3).unwrap();
    }
}
