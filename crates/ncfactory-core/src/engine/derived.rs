use super::cache::{CacheStats, ObjectCache};
use crate::core::cfg::CacheKey;
use std::sync::Arc;

/// A second cache level keyed by a coarser identity than the objects it is fed from.
///
/// Each narrow key maps to one shared base object, built at most once from the first
/// source seen for that key. Specializing the base for a particular source happens on
/// every call and is not cached here.
pub struct DerivedCache<B: ?Sized, E> {
    bases: ObjectCache<B, E>,
}

impl<B: ?Sized, E: Clone> DerivedCache<B, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            bases: ObjectCache::new(name),
        }
    }

    /// The shared base object for `narrow_key`, derived from `source` on first request.
    pub fn base<S, F>(&self, narrow_key: &CacheKey, source: &S, derive: F) -> Result<Arc<B>, E>
    where
        S: ?Sized,
        F: FnOnce(&S) -> Result<Arc<B>, E>,
    {
        self.bases.get_or_build(narrow_key, || derive(source))
    }

    /// Looks up (or derives) the base for `narrow_key` and specializes it for `source`.
    pub fn get_or_build_derived<S, D, F, G>(
        &self,
        narrow_key: &CacheKey,
        source: &S,
        derive: F,
        specialize: G,
    ) -> Result<D, E>
    where
        S: ?Sized,
        F: FnOnce(&S) -> Result<Arc<B>, E>,
        G: FnOnce(Arc<B>, &S) -> Result<D, E>,
    {
        let base = self.base(narrow_key, source, derive)?;
        specialize(base, source)
    }

    pub fn stats(&self) -> CacheStats {
        self.bases.stats()
    }

    pub fn sweep_unreferenced(&self) -> usize {
        self.bases.sweep_unreferenced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Mixture {
        formula: &'static str,
        density: f64,
    }

    #[derive(Debug, PartialEq)]
    struct Base {
        formula: String,
    }

    #[test]
    fn base_is_derived_once_per_narrow_key() {
        let cache: DerivedCache<Base, String> = DerivedCache::new("bases");
        let derivations = AtomicUsize::new(0);
        let derive = |m: &Mixture| {
            derivations.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Base {
                formula: m.formula.to_string(),
            }))
        };
        let specialize = |base: Arc<Base>, m: &Mixture| Ok((base, m.density));

        let light = Mixture { formula: "H2O", density: 1.0 };
        let dense = Mixture { formula: "H2O", density: 2.5 };
        let (base_a, rho_a) = cache
            .get_or_build_derived(&CacheKey::new("H2O"), &light, derive, specialize)
            .unwrap();
        let (base_b, rho_b) = cache
            .get_or_build_derived(&CacheKey::new("H2O"), &dense, derive, specialize)
            .unwrap();

        assert_eq!(derivations.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&base_a, &base_b));
        assert_eq!((rho_a, rho_b), (1.0, 2.5));
        assert_eq!(cache.stats().ready, 1);
    }

    #[test]
    fn failed_derivation_is_remembered() {
        let cache: DerivedCache<Base, String> = DerivedCache::new("bases");
        let derivations = AtomicUsize::new(0);
        let source = Mixture { formula: "??", density: 1.0 };
        for _ in 0..3 {
            let err = cache
                .base(&CacheKey::new("??"), &source, |_| {
                    derivations.fetch_add(1, Ordering::SeqCst);
                    Err("unparseable formula".to_string())
                })
                .unwrap_err();
            assert_eq!(err, "unparseable formula");
        }
        assert_eq!(derivations.load(Ordering::SeqCst), 1);
    }
}
