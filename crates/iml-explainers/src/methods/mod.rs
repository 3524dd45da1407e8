//! The interpretability methods, each an `Experiment`.
pub mod ice;
pub mod importance;
pub mod lime;
pub mod pdp;
pub mod shapley;
pub mod tree_surrogate;

use serde::{Deserialize, Serialize};

use self::ice::IceConfig;
use self::importance::FeatureImportanceConfig;
use self::lime::LimeConfig;
use self::pdp::PartialDependenceConfig;
use self::shapley::ShapleyConfig;
use self::tree_surrogate::TreeSurrogateConfig;

/// One configured method, tagged by its name in JSON:
/// `{"partial_dependence": {"features": [0], "grid_size": 10}}`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MethodConfig {
    FeatureImportance(FeatureImportanceConfig),
    PartialDependence(PartialDependenceConfig),
    Ice(IceConfig),
    TreeSurrogate(TreeSurrogateConfig),
    Lime(LimeConfig),
    Shapley(ShapleyConfig),
}

impl MethodConfig {
    pub fn name(&self) -> &'static str {
        match self {
            MethodConfig::FeatureImportance(_) => "feature_importance",
            MethodConfig::PartialDependence(_) => "partial_dependence",
            MethodConfig::Ice(_) => "ice",
            MethodConfig::TreeSurrogate(_) => "tree_surrogate",
            MethodConfig::Lime(_) => "lime",
            MethodConfig::Shapley(_) => "shapley",
        }
    }

    /// Point of interest for the local methods.
    pub fn x_interest_mut(&mut self) -> Option<&mut Vec<f64>> {
        match self {
            MethodConfig::Lime(cfg) => Some(&mut cfg.x_interest),
            MethodConfig::Shapley(cfg) => Some(&mut cfg.x_interest),
            _ => None,
        }
    }

    /// Default configuration of every method.
    pub fn all_defaults() -> Vec<MethodConfig> {
        vec![
            MethodConfig::FeatureImportance(FeatureImportanceConfig::default()),
            MethodConfig::PartialDependence(PartialDependenceConfig::default()),
            MethodConfig::Ice(IceConfig::default()),
            MethodConfig::TreeSurrogate(TreeSurrogateConfig::default()),
            MethodConfig::Lime(LimeConfig::default()),
            MethodConfig::Shapley(ShapleyConfig::default()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_config_is_tagged_by_name() {
        let json = r#"[{"partial_dependence": {"features": [1], "grid_size": 7}}, {"shapley": {}}]"#;
        let methods: Vec<MethodConfig> = serde_json::from_str(json).unwrap();
        match &methods[0] {
            MethodConfig::PartialDependence(cfg) => {
                assert_eq!(cfg.features, vec![1]);
                assert_eq!(cfg.grid_size, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(methods[1].name(), "shapley");
        assert_eq!(methods[1], MethodConfig::Shapley(ShapleyConfig::default()));

        let names: Vec<&str> = MethodConfig::all_defaults().iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), 6);
        assert!(names.contains(&"tree_surrogate"));
    }

    #[test]
    fn test_experiment_names_match_config_tags() {
        use crate::experiment::Experiment;

        let pdp_config = PartialDependenceConfig {
            features: vec![0],
            ..Default::default()
        };
        let names = [
            importance::FeatureImportance::new(FeatureImportanceConfig::default()).unwrap().name(),
            pdp::PartialDependence::new(pdp_config.clone()).unwrap().name(),
            ice::Ice::new(IceConfig::default()).unwrap().name(),
            tree_surrogate::TreeSurrogate::new(TreeSurrogateConfig::default()).unwrap().name(),
            lime::Lime::new(LimeConfig::default()).unwrap().name(),
            shapley::Shapley::new(ShapleyConfig::default()).unwrap().name(),
        ];
        let mut configs = MethodConfig::all_defaults();
        configs[1] = MethodConfig::PartialDependence(pdp_config);
        for (config, name) in configs.iter().zip(names) {
            assert_eq!(config.name(), name);
        }
    }
}
