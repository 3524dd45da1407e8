//! One model and one dataset shared by several experiments.
use std::sync::Arc;

use anyhow::Result;

use crate::cache::{CachedPredictor, DEFAULT_CACHE_CAPACITY};
use crate::data::{DataSampler, Dataset};
use crate::experiment::{run, Experiment, Present};
use crate::methods::ice::{Ice, IceConfig, IceResult};
use crate::methods::importance::{FeatureImportance, FeatureImportanceConfig, FeatureImportanceResult};
use crate::methods::lime::{Lime, LimeConfig, LimeResult};
use crate::methods::pdp::{PartialDependence, PartialDependenceConfig, PartialDependenceResult};
use crate::methods::shapley::{Shapley, ShapleyConfig, ShapleyResult};
use crate::methods::tree_surrogate::{TreeSurrogate, TreeSurrogateConfig, TreeSurrogateResult};
use crate::methods::MethodConfig;
use crate::predictor::{Model, Predictor};

type SharedCache = CachedPredictor<Arc<dyn Predictor>>;

pub struct Interpretation {
    model: Model,
    sampler: DataSampler,
    seed: Option<u64>,
    cache: Option<Arc<SharedCache>>,
}

impl Interpretation {
    pub fn new(model: Model, dataset: Dataset) -> Self {
        Interpretation {
            model,
            sampler: DataSampler::new(dataset),
            seed: None,
            cache: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Memoise predictions across experiments, keeping up to
    /// `DEFAULT_CACHE_CAPACITY` rows.
    pub fn with_cache(self, enabled: bool) -> Self {
        if enabled {
            self.with_cache_capacity(DEFAULT_CACHE_CAPACITY)
        } else {
            self.without_cache()
        }
    }

    /// Memoise predictions in a least-recently-used cache of `capacity` rows.
    /// Replaces any cache already installed.
    pub fn with_cache_capacity(self, capacity: usize) -> Self {
        let mut this = self.without_cache();
        let cache = Arc::new(CachedPredictor::with_capacity(this.model.predictor(), capacity));
        this.model = this.model.map_predictor(cache.clone());
        this.cache = Some(cache);
        this
    }

    fn without_cache(mut self) -> Self {
        if let Some(inner) = self.cache.take().map(|c| c.inner().clone()) {
            self.model = self.model.map_predictor(inner);
        }
        self
    }

    /// Rows held by the prediction cache and its capacity.
    pub fn cache_usage(&self) -> Option<(usize, usize)> {
        self.cache.as_ref().map(|c| (c.len(), c.capacity()))
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn sampler(&self) -> &DataSampler {
        &self.sampler
    }

    /// Cache hits and misses so far, when caching is enabled.
    pub fn cache_stats(&self) -> Option<(usize, usize)> {
        self.cache.as_ref().map(|c| (c.hits(), c.misses()))
    }

    pub fn execute<E: Experiment>(&self, experiment: &E) -> Result<E::Output> {
        run(experiment, &self.model, &self.sampler, self.seed)
    }

    pub fn feature_importance(&self, config: FeatureImportanceConfig) -> Result<FeatureImportanceResult> {
        self.execute(&FeatureImportance::new(config)?)
    }

    pub fn partial_dependence(&self, config: PartialDependenceConfig) -> Result<PartialDependenceResult> {
        self.execute(&PartialDependence::new(config)?)
    }

    pub fn ice(&self, config: IceConfig) -> Result<IceResult> {
        self.execute(&Ice::new(config)?)
    }

    pub fn tree_surrogate(&self, config: TreeSurrogateConfig) -> Result<TreeSurrogateResult> {
        self.execute(&TreeSurrogate::new(config)?)
    }

    pub fn lime(&self, config: LimeConfig) -> Result<LimeResult> {
        self.execute(&Lime::new(config)?)
    }

    pub fn shapley(&self, config: ShapleyConfig) -> Result<ShapleyResult> {
        self.execute(&Shapley::new(config)?)
    }

    /// Run any configured method.
    pub fn run(&self, method: &MethodConfig) -> Result<Box<dyn Present>> {
        Ok(match method {
            MethodConfig::FeatureImportance(cfg) => Box::new(self.feature_importance(cfg.clone())?),
            MethodConfig::PartialDependence(cfg) => Box::new(self.partial_dependence(cfg.clone())?),
            MethodConfig::Ice(cfg) => Box::new(self.ice(cfg.clone())?),
            MethodConfig::TreeSurrogate(cfg) => Box::new(self.tree_surrogate(cfg.clone())?),
            MethodConfig::Lime(cfg) => Box::new(self.lime(cfg.clone())?),
            MethodConfig::Shapley(cfg) => Box::new(self.shapley(cfg.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::FnPredictor;
    use ndarray::{Array1, Array2};

    fn interpretation() -> Interpretation {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 4) as f64 });
        let y = Array1::from_shape_fn(20, |i| 2.0 * i as f64 + (i % 3) as f64);
        let data = Dataset::from_matrix(x, &["a", "b"]).unwrap().with_target(y).unwrap();
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| Ok(x.column(0).mapv(|a| 2.0 * a))));
        Interpretation::new(model, data).with_seed(Some(7))
    }

    #[test]
    fn test_run_dispatches_every_method() {
        let interp = interpretation();
        for mut method in MethodConfig::all_defaults() {
            if let Some(x) = method.x_interest_mut() {
                *x = vec![3.0, 1.0];
            }
            let result = interp.run(&method).unwrap();
            assert!(!result.title().is_empty(), "{}", method.name());
            assert!(!result.table().is_empty(), "{}", method.name());
        }
    }

    #[test]
    fn test_cache_serves_repeated_rows() {
        let interp = interpretation().with_cache(true);
        let cfg = PartialDependenceConfig {
            grid_size: 5,
            ..Default::default()
        };
        let first = interp.partial_dependence(cfg.clone()).unwrap();
        let (hits_before, misses_before) = interp.cache_stats().unwrap();
        let second = interp.partial_dependence(cfg).unwrap();
        let (hits_after, misses_after) = interp.cache_stats().unwrap();
        assert_eq!(first.values, second.values);
        assert_eq!(misses_after, misses_before);
        assert!(hits_after > hits_before);

        let plain = interp.with_cache(false);
        assert!(plain.cache_stats().is_none());
    }

    #[test]
    fn test_cache_capacity_bounds_rows() {
        let interp = interpretation().with_cache_capacity(8);
        assert_eq!(interp.cache_usage(), Some((0, 8)));
        let cfg = PartialDependenceConfig {
            grid_size: 5,
            ..Default::default()
        };
        let bounded = interp.partial_dependence(cfg.clone()).unwrap();
        let (rows, capacity) = interp.cache_usage().unwrap();
        assert!(rows <= capacity);

        let unbounded = interpretation().partial_dependence(cfg).unwrap();
        assert_eq!(bounded.values, unbounded.values);

        let resized = interp.with_cache_capacity(3);
        assert_eq!(resized.cache_usage(), Some((0, 3)));
    }
}
