//! Memoising wrapper for repeated predictions.
//!
//! Designs built by different experiments on the same data overlap heavily
//! (every PDP grid row of the observed value, the unperturbed data in feature
//! importance, ...). `CachedPredictor` remembers outputs per row so only rows
//! it has not seen are sent to the wrapped model.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use lru::LruCache;
use ndarray::{Array2, ArrayView1, Axis};

use crate::predictor::Predictor;

type RowKey = Vec<u64>;

/// Rows kept by `CachedPredictor::new`.
pub const DEFAULT_CACHE_CAPACITY: usize = 100_000;

fn row_key(row: ArrayView1<'_, f64>) -> RowKey {
    // -0.0 and 0.0 predict the same
    row.iter()
        .map(|&v| if v == 0.0 { 0u64 } else { v.to_bits() })
        .collect()
}

/// Least-recently-used store of model outputs per row.
pub struct CachedPredictor<P> {
    inner: P,
    store: Mutex<LruCache<RowKey, Vec<f64>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl<P: Predictor> CachedPredictor<P> {
    pub fn new(inner: P) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_CAPACITY)
    }

    /// Keep at most `capacity` rows (at least one).
    pub fn with_capacity(inner: P, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        CachedPredictor {
            inner,
            store: Mutex::new(LruCache::new(capacity)),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.store.lock().map(|s| s.cap().get()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.store.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut store) = self.store.lock() {
            store.clear();
        }
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }
}

impl<P: Predictor> Predictor for CachedPredictor<P> {
    fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let k = self.inner.output_names().len();
        let keys: Vec<RowKey> = x.axis_iter(Axis(0)).map(row_key).collect();
        let mut out = Array2::zeros((x.nrows(), k));

        // Cached rows are copied now; the others are grouped by key so each
        // distinct row is predicted once.
        let mut missing: Vec<usize> = Vec::new();
        let mut pending: HashMap<&RowKey, Vec<usize>> = HashMap::new();
        {
            let mut store = self.store.lock().map_err(|_| anyhow!("prediction cache poisoned"))?;
            for (i, key) in keys.iter().enumerate() {
                if let Some(values) = store.get(key) {
                    for (j, v) in values.iter().enumerate() {
                        out[[i, j]] = *v;
                    }
                } else {
                    let rows = pending.entry(key).or_default();
                    if rows.is_empty() {
                        missing.push(i);
                    }
                    rows.push(i);
                }
            }
        }

        if !missing.is_empty() {
            let fresh = self.inner.predict(&x.select(Axis(0), &missing))?;
            if fresh.nrows() != missing.len() || fresh.ncols() != k {
                return Err(anyhow!(
                    "Model '{}' returned {}x{} for {} rows with {} outputs",
                    self.inner.name(),
                    fresh.nrows(),
                    fresh.ncols(),
                    missing.len(),
                    k
                ));
            }
            let mut store = self.store.lock().map_err(|_| anyhow!("prediction cache poisoned"))?;
            for (row, &first) in fresh.axis_iter(Axis(0)).zip(missing.iter()) {
                let key = &keys[first];
                for &i in pending.get(key).map(|v| v.as_slice()).unwrap_or(&[]) {
                    out.row_mut(i).assign(&row);
                }
                store.put(key.clone(), row.to_vec());
            }
        }
        self.misses.fetch_add(missing.len(), Ordering::Relaxed);
        self.hits.fetch_add(x.nrows() - missing.len(), Ordering::Relaxed);
        Ok(out)
    }

    fn output_names(&self) -> Vec<String> {
        self.inner.output_names()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
