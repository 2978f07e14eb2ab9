//! Kernel catalog: every specialized kernel registered with the exact
//! descriptor it was built for.
//!
//! The catalog is assembled once from [`generated_combinations`] and is
//! read-only afterwards, so lookups need no synchronization and can be shared
//! across worker threads.

use crate::config::{AlgorithmMode, ConfigDescriptor, MemoryMode, TileShape};
use crate::gemm::{DynGemmKernel, GemmKernel, TiledGemm};
use anyhow::{anyhow, bail, Result};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

/// One parameter tuple of the generated space, before transpose expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combination {
    pub cache_size: usize,
    pub tile: TileShape,
    pub double_buffer: bool,
    pub bank_conflict_a: bool,
    pub bank_conflict_b: bool,
    pub memory: MemoryMode,
    pub algorithm: AlgorithmMode,
}

impl Combination {
    pub fn descriptor(&self, transpose_a: bool, transpose_b: bool) -> ConfigDescriptor {
        ConfigDescriptor {
            cache_size: self.cache_size,
            tile: self.tile,
            double_buffer: self.double_buffer,
            bank_conflict_a: self.bank_conflict_a,
            bank_conflict_b: self.bank_conflict_b,
            memory: self.memory,
            algorithm: self.algorithm,
            transpose_a,
            transpose_b,
        }
    }
}

/// Transpose pairs registered for every combination, in registration order.
pub const TRANSPOSE_PAIRS: [(bool, bool); 4] =
    [(true, true), (true, false), (false, true), (false, false)];

const fn local(
    cache_size: usize,
    tile: TileShape,
    double_buffer: bool,
    bank_conflict_a: bool,
    bank_conflict_b: bool,
) -> Combination {
    Combination {
        cache_size,
        tile,
        double_buffer,
        bank_conflict_a,
        bank_conflict_b,
        memory: MemoryMode::Local,
        algorithm: AlgorithmMode::Standard,
    }
}

const fn no_local(cache_size: usize, tile: TileShape) -> Combination {
    Combination {
        cache_size,
        tile,
        double_buffer: false,
        bank_conflict_a: false,
        bank_conflict_b: false,
        memory: MemoryMode::NoLocal,
        algorithm: AlgorithmMode::Standard,
    }
}

const GENERATED_COMBINATIONS: &[Combination] = &[
    local(64, TileShape::new(4, 4, 8, 8, 1, 1), true, false, false),
    local(64, TileShape::new(4, 4, 8, 8, 1, 1), false, false, false),
    local(64, TileShape::new(4, 4, 8, 8, 1, 1), true, true, true),
    local(64, TileShape::new(4, 4, 8, 8, 1, 1), false, true, true),
    local(64, TileShape::new(8, 8, 8, 8, 1, 1), true, false, false),
    local(64, TileShape::new(8, 8, 8, 8, 1, 1), false, true, false),
    local(128, TileShape::new(4, 4, 16, 16, 1, 1), true, false, false),
    local(128, TileShape::new(4, 4, 16, 16, 1, 1), false, false, false),
    local(128, TileShape::new(2, 2, 8, 8, 1, 1), false, false, false),
    local(128, TileShape::new(8, 4, 8, 16, 1, 1), true, false, true),
    local(128, TileShape::new(4, 8, 16, 8, 1, 1), true, true, false),
    no_local(64, TileShape::new(2, 2, 8, 8, 1, 1)),
    no_local(64, TileShape::new(4, 4, 8, 8, 1, 1)),
    no_local(64, TileShape::new(8, 8, 8, 8, 1, 1)),
    no_local(128, TileShape::new(4, 4, 16, 16, 1, 1)),
    no_local(128, TileShape::new(1, 1, 16, 16, 1, 1)),
    Combination {
        cache_size: 64,
        tile: TileShape::new(1, 1, 8, 8, 1, 1),
        double_buffer: false,
        bank_conflict_a: false,
        bank_conflict_b: false,
        memory: MemoryMode::NoLocal,
        algorithm: AlgorithmMode::Naive,
    },
    Combination {
        cache_size: 64,
        tile: TileShape::new(4, 4, 4, 4, 1, 1),
        double_buffer: false,
        bank_conflict_a: false,
        bank_conflict_b: false,
        memory: MemoryMode::NoLocal,
        algorithm: AlgorithmMode::TallSkinny,
    },
    Combination {
        cache_size: 64,
        tile: TileShape::new(2, 2, 8, 8, 1, 1),
        double_buffer: false,
        bank_conflict_a: false,
        bank_conflict_b: false,
        memory: MemoryMode::NoLocal,
        algorithm: AlgorithmMode::TallSkinny,
    },
];

/// The generated parameter space, without transpose expansion.
pub fn generated_combinations() -> &'static [Combination] {
    GENERATED_COMBINATIONS
}

#[derive(Clone)]
pub struct CatalogEntry {
    descriptor: ConfigDescriptor,
    kernel: DynGemmKernel,
}

impl CatalogEntry {
    pub fn new(descriptor: ConfigDescriptor, kernel: DynGemmKernel) -> Self {
        Self { descriptor, kernel }
    }

    pub fn descriptor(&self) -> &ConfigDescriptor {
        &self.descriptor
    }

    pub fn kernel(&self) -> &DynGemmKernel {
        &self.kernel
    }

    pub fn name(&self) -> &str {
        self.kernel.name()
    }
}

impl std::fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("descriptor", &self.descriptor)
            .field("kernel", &self.kernel.name())
            .finish()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds the catalog from the generated combinations, registering the
    /// four transpose pairs of each.
    pub fn with_generated_kernels() -> Result<Self> {
        Self::from_combinations(generated_combinations())
    }

    pub fn from_combinations(combinations: &[Combination]) -> Result<Self> {
        let mut catalog = Self::new();
        for combination in combinations {
            for (transpose_a, transpose_b) in TRANSPOSE_PAIRS {
                let descriptor = combination.descriptor(transpose_a, transpose_b);
                catalog.register(descriptor, TiledGemm::new(descriptor))?;
            }
        }
        debug!(entries = catalog.len(), "kernel catalog generated");
        Ok(catalog)
    }

    /// Process-wide catalog, generated on first use. A generation failure is
    /// kept and returned to every caller.
    pub fn global() -> Result<&'static Catalog> {
        static GLOBAL: OnceLock<Result<Catalog, String>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                Self::with_generated_kernels().map_err(|err| {
                    error!(error = %err, "generated kernel catalog is invalid");
                    format!("{err:#}")
                })
            })
            .as_ref()
            .map_err(|detail| anyhow!("generated kernel catalog is invalid: {detail}"))
    }

    pub fn register<K>(&mut self, descriptor: ConfigDescriptor, kernel: K) -> Result<()>
    where
        K: GemmKernel + 'static,
    {
        self.register_dyn(descriptor, Arc::new(kernel))
    }

    pub fn register_dyn(
        &mut self,
        descriptor: ConfigDescriptor,
        kernel: DynGemmKernel,
    ) -> Result<()> {
        if self.find(&descriptor).is_some() {
            bail!("descriptor {} is already registered", descriptor);
        }
        self.entries.push(CatalogEntry::new(descriptor, kernel));
        Ok(())
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First entry whose descriptor equals `descriptor` in every field.
    pub fn find(&self, descriptor: &ConfigDescriptor) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|entry| entry.descriptor == *descriptor)
    }

    /// Matches the flat integer/boolean form used by external search drivers.
    /// Unknown memory or algorithm codes never match.
    pub fn find_raw(&self, query: &RawQuery) -> Option<&CatalogEntry> {
        query.descriptor().and_then(|descriptor| self.find(&descriptor))
    }

    pub fn with_transpose(
        &self,
        transpose_a: bool,
        transpose_b: bool,
    ) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(move |entry| {
            entry.descriptor.transpose_a == transpose_a
                && entry.descriptor.transpose_b == transpose_b
        })
    }
}

/// A configuration request as supplied by an external search driver: plain
/// integers and booleans, not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawQuery {
    pub cache_size: i64,
    pub item_rows: i64,
    pub item_cols: i64,
    pub wg_rows: i64,
    pub wg_cols: i64,
    pub tile_rows: i64,
    pub tile_cols: i64,
    pub double_buffer: bool,
    pub bank_conflict_a: bool,
    pub bank_conflict_b: bool,
    pub mem_type: i32,
    pub algorithm: i32,
    pub transpose_a: bool,
    pub transpose_b: bool,
}

impl RawQuery {
    /// `None` when any field cannot name a catalog entry (negative sizes,
    /// unknown mode codes).
    pub fn descriptor(&self) -> Option<ConfigDescriptor> {
        let size = |value: i64| usize::try_from(value).ok();
        Some(ConfigDescriptor {
            cache_size: size(self.cache_size)?,
            tile: TileShape::new(
                size(self.item_rows)?,
                size(self.item_cols)?,
                size(self.wg_rows)?,
                size(self.wg_cols)?,
                size(self.tile_rows)?,
                size(self.tile_cols)?,
            ),
            double_buffer: self.double_buffer,
            bank_conflict_a: self.bank_conflict_a,
            bank_conflict_b: self.bank_conflict_b,
            memory: MemoryMode::from_code(self.mem_type)?,
            algorithm: AlgorithmMode::from_code(self.algorithm)?,
            transpose_a: self.transpose_a,
            transpose_b: self.transpose_b,
        })
    }
}

impl From<ConfigDescriptor> for RawQuery {
    fn from(descriptor: ConfigDescriptor) -> Self {
        let tile = descriptor.tile;
        Self {
            cache_size: descriptor.cache_size as i64,
            item_rows: tile.item_rows as i64,
            item_cols: tile.item_cols as i64,
            wg_rows: tile.wg_rows as i64,
            wg_cols: tile.wg_cols as i64,
            tile_rows: tile.tile_rows as i64,
            tile_cols: tile.tile_cols as i64,
            double_buffer: descriptor.double_buffer,
            bank_conflict_a: descriptor.bank_conflict_a,
            bank_conflict_b: descriptor.bank_conflict_b,
            mem_type: descriptor.memory.code(),
            algorithm: descriptor.algorithm.code(),
            transpose_a: descriptor.transpose_a,
            transpose_b: descriptor.transpose_b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_descriptors_are_unique() {
        let catalog = Catalog::with_generated_kernels().expect("generated catalog");
        let unique: HashSet<_> = catalog.entries().iter().map(|e| *e.descriptor()).collect();
        assert_eq!(unique.len(), catalog.len());
        assert_eq!(catalog.len(), generated_combinations().len() * TRANSPOSE_PAIRS.len());
    }

    #[test]
    fn every_registered_descriptor_finds_its_own_entry() {
        let catalog = Catalog::global().expect("generated catalog");
        assert!(!catalog.is_empty());
        for entry in catalog.entries() {
            let found = catalog.find(entry.descriptor()).expect("reflexive match");
            assert_eq!(found.name(), entry.name());

            let raw = RawQuery::from(*entry.descriptor());
            let found = catalog.find_raw(&raw).expect("reflexive raw match");
            assert_eq!(found.descriptor(), entry.descriptor());
        }
    }

    #[test]
    fn unregistered_tile_shape_does_not_match() {
        let catalog = Catalog::global().expect("generated catalog");
        let mut descriptor = *catalog.entries()[0].descriptor();
        descriptor.tile = TileShape::new(3, 5, 7, 9, 1, 1);
        assert!(catalog.find(&descriptor).is_none());
    }

    #[test]
    fn single_field_difference_does_not_match() {
        let catalog = Catalog::global().expect("generated catalog");
        let descriptor = *catalog.entries()[0].descriptor();
        let mut other = descriptor;
        other.cache_size += 1;
        assert!(catalog.find(&other).is_none());
    }

    #[test]
    fn raw_query_with_unknown_codes_does_not_match() {
        let catalog = Catalog::global().expect("generated catalog");
        let mut raw = RawQuery::from(*catalog.entries()[0].descriptor());
        raw.mem_type = 9;
        assert!(catalog.find_raw(&raw).is_none());

        let mut raw = RawQuery::from(*catalog.entries()[0].descriptor());
        raw.item_rows = -4;
        assert!(catalog.find_raw(&raw).is_none());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut catalog = Catalog::new();
        let descriptor = generated_combinations()[0].descriptor(false, false);
        catalog
            .register(descriptor, TiledGemm::new(descriptor))
            .expect("first registration");
        assert!(catalog.register(descriptor, TiledGemm::new(descriptor)).is_err());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn repeated_combination_fails_catalog_generation() {
        let combination = generated_combinations()[0];
        let err = Catalog::from_combinations(&[combination, combination]).unwrap_err();
        assert!(err.to_string().contains("already registered"), "{err}");
    }

    #[test]
    fn global_catalog_matches_generated_catalog() {
        let global = Catalog::global().expect("generated catalog");
        let fresh = Catalog::with_generated_kernels().expect("generated catalog");
        assert_eq!(global.len(), fresh.len());
        assert!(std::ptr::eq(global, Catalog::global().expect("generated catalog")));
    }

    #[test]
    fn transpose_filter_selects_a_quarter_of_the_catalog() {
        let catalog = Catalog::global().expect("generated catalog");
        let nn = catalog.with_transpose(false, false).count();
        assert_eq!(nn * TRANSPOSE_PAIRS.len(), catalog.len());
    }
}
