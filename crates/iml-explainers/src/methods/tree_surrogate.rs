//! Global surrogate: a shallow regression tree fitted to the model's
//! predictions on the reference data.
//!
//! The tree is a multi-output CART that minimises the summed squared error
//! over all model outputs. Numeric features split at midpoints between
//! consecutive distinct values, categorical features as `level == v` versus
//! the rest. `r_squared` measures how faithfully the tree mimics the model.
use anyhow::Result;
use ndarray::{Array2, ArrayView1};
use plotly::Plot;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::data::{DataSampler, Feature};
use crate::error::ExplainError;
use crate::experiment::{Design, Experiment, Present};
use crate::predictor::Prediction;
use crate::report::plots::{horizontal_bars, BarSeries};
use crate::stats::weighted_r_squared;
use crate::table::ResultTable;

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TreeSurrogateConfig {
    pub max_depth: usize,
    /// Smallest number of rows a leaf may hold.
    pub min_leaf_size: usize,
    pub sample_size: Option<usize>,
}

impl Default for TreeSurrogateConfig {
    fn default() -> Self {
        TreeSurrogateConfig {
            max_depth: 2,
            min_leaf_size: 5,
            sample_size: None,
        }
    }
}

pub struct TreeSurrogate {
    config: TreeSurrogateConfig,
}

impl TreeSurrogate {
    pub fn new(config: TreeSurrogateConfig) -> Result<Self> {
        if config.min_leaf_size == 0 {
            return Err(ExplainError::InvalidParameter("min_leaf_size must be at least 1".to_string()).into());
        }
        Ok(TreeSurrogate { config })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitRule {
    /// Rows with `x[feature] <= threshold` go left.
    Threshold { feature: usize, threshold: f64 },
    /// Rows with `x[feature] == level` go left.
    Level { feature: usize, level: f64 },
}

impl SplitRule {
    pub fn feature(&self) -> usize {
        match *self {
            SplitRule::Threshold { feature, .. } | SplitRule::Level { feature, .. } => feature,
        }
    }

    pub fn goes_left(&self, row: ArrayView1<f64>) -> bool {
        match *self {
            SplitRule::Threshold { feature, threshold } => row[feature] <= threshold,
            SplitRule::Level { feature, level } => row[feature] == level,
        }
    }

    fn describe(&self, features: &[Feature], left: bool) -> String {
        let name = &features[self.feature()].name;
        match *self {
            SplitRule::Threshold { threshold, .. } => {
                let op = if left { "<=" } else { ">" };
                format!("{} {} {}", name, op, crate::data::format_number(threshold))
            }
            SplitRule::Level { feature, level } => {
                let op = if left { "==" } else { "!=" };
                let label = features[feature]
                    .levels
                    .get(level as usize)
                    .cloned()
                    .unwrap_or_else(|| crate::data::format_number(level));
                format!("{} {} {}", name, op, label)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub id: usize,
    pub depth: usize,
    /// Number of training rows that reach this node.
    pub n: usize,
    /// Mean model output per output column.
    pub mean: Vec<f64>,
    pub split: Option<SplitRule>,
    pub left: Option<usize>,
    pub right: Option<usize>,
}

impl TreeNode {
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }
}

/// Multi-output CART regression tree stored as a flat node list; node 0 is
/// the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
    pub n_features: usize,
}

impl RegressionTree {
    pub fn fit(
        x: &Array2<f64>,
        y: &Array2<f64>,
        categorical: &[bool],
        max_depth: usize,
        min_leaf_size: usize,
    ) -> Result<Self> {
        if x.nrows() != y.nrows() {
            return Err(ExplainError::ShapeMismatch {
                what: "surrogate targets".to_string(),
                expected: x.nrows(),
                found: y.nrows(),
            }
            .into());
        }
        if x.nrows() == 0 {
            anyhow::bail!("cannot fit a tree on zero rows");
        }
        let mut tree = RegressionTree {
            nodes: Vec::new(),
            n_features: x.ncols(),
        };
        let indices: Vec<usize> = (0..x.nrows()).collect();
        let builder = Builder {
            x,
            y,
            categorical,
            max_depth,
            min_leaf_size,
        };
        builder.grow(&mut tree.nodes, indices, 0);
        log::debug!(
            "Fitted surrogate tree: {} nodes, {} leaves",
            tree.nodes.len(),
            tree.leaves().count()
        );
        Ok(tree)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &TreeNode> {
        self.nodes.iter().filter(|n| n.is_leaf())
    }

    /// Id of the leaf `row` falls into.
    pub fn leaf_of(&self, row: ArrayView1<f64>) -> usize {
        let mut id = 0;
        while let (Some(rule), Some(left), Some(right)) =
            (self.nodes[id].split, self.nodes[id].left, self.nodes[id].right)
        {
            id = if rule.goes_left(row) { left } else { right };
        }
        id
    }

    pub fn predict(&self, x: &Array2<f64>) -> Array2<f64> {
        let k = self.nodes.first().map(|n| n.mean.len()).unwrap_or(0);
        let mut out = Array2::zeros((x.nrows(), k));
        for (i, row) in x.outer_iter().enumerate() {
            let leaf = &self.nodes[self.leaf_of(row)];
            for (c, &m) in leaf.mean.iter().enumerate() {
                out[[i, c]] = m;
            }
        }
        out
    }
}

struct Builder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array2<f64>,
    categorical: &'a [bool],
    max_depth: usize,
    min_leaf_size: usize,
}

/// Sums and sums of squares per output over a set of rows.
#[derive(Clone)]
struct Moments {
    n: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Moments {
    fn empty(k: usize) -> Self {
        Moments {
            n: 0,
            sum: vec![0.0; k],
            sum_sq: vec![0.0; k],
        }
    }

    fn add(&mut self, y: ArrayView1<f64>) {
        self.n += 1;
        for (c, &v) in y.iter().enumerate() {
            self.sum[c] += v;
            self.sum_sq[c] += v * v;
        }
    }

    fn minus(&self, other: &Moments) -> Moments {
        Moments {
            n: self.n - other.n,
            sum: self.sum.iter().zip(&other.sum).map(|(a, b)| a - b).collect(),
            sum_sq: self.sum_sq.iter().zip(&other.sum_sq).map(|(a, b)| a - b).collect(),
        }
    }

    fn sse(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        let n = self.n as f64;
        self.sum
            .iter()
            .zip(&self.sum_sq)
            .map(|(s, sq)| (sq - s * s / n).max(0.0))
            .sum()
    }

    fn mean(&self) -> Vec<f64> {
        let n = self.n.max(1) as f64;
        self.sum.iter().map(|s| s / n).collect()
    }
}

impl<'a> Builder<'a> {
    fn moments(&self, indices: &[usize]) -> Moments {
        let mut m = Moments::empty(self.y.ncols());
        for &i in indices {
            m.add(self.y.row(i));
        }
        m
    }

    fn grow(&self, nodes: &mut Vec<TreeNode>, indices: Vec<usize>, depth: usize) -> usize {
        let moments = self.moments(&indices);
        let id = nodes.len();
        nodes.push(TreeNode {
            id,
            depth,
            n: indices.len(),
            mean: moments.mean(),
            split: None,
            left: None,
            right: None,
        });

        if depth >= self.max_depth || indices.len() < 2 * self.min_leaf_size {
            return id;
        }
        let parent_sse = moments.sse();
        let best = match self.best_split(&indices, &moments) {
            Some((rule, sse)) if sse < parent_sse - 1e-12 => rule,
            _ => return id,
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) =
            indices.into_iter().partition(|&i| best.goes_left(self.x.row(i)));
        let left = self.grow(nodes, left_idx, depth + 1);
        let right = self.grow(nodes, right_idx, depth + 1);
        let node = &mut nodes[id];
        node.split = Some(best);
        node.left = Some(left);
        node.right = Some(right);
        id
    }

    /// Best split over all features, with ties going to the lower feature index.
    fn best_split(&self, indices: &[usize], total: &Moments) -> Option<(SplitRule, f64)> {
        (0..self.x.ncols())
            .into_par_iter()
            .filter_map(|j| {
                if self.categorical.get(j).copied().unwrap_or(false) {
                    self.best_level_split(indices, total, j)
                } else {
                    self.best_threshold_split(indices, total, j)
                }
            })
            .min_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.0.feature().cmp(&b.0.feature()))
            })
    }

    fn best_threshold_split(&self, indices: &[usize], total: &Moments, j: usize) -> Option<(SplitRule, f64)> {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| {
            self.x[[a, j]]
                .partial_cmp(&self.x[[b, j]])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let n = order.len();
        let mut left = Moments::empty(self.y.ncols());
        let mut best: Option<(SplitRule, f64)> = None;
        for pos in 0..n.saturating_sub(1) {
            left.add(self.y.row(order[pos]));
            let value = self.x[[order[pos], j]];
            let next = self.x[[order[pos + 1], j]];
            if value == next || left.n < self.min_leaf_size || n - left.n < self.min_leaf_size {
                continue;
            }
            let sse = left.sse() + total.minus(&left).sse();
            if best.as_ref().map_or(true, |(_, b)| sse < *b) {
                best = Some((
                    SplitRule::Threshold {
                        feature: j,
                        threshold: (value + next) / 2.0,
                    },
                    sse,
                ));
            }
        }
        best
    }

    fn best_level_split(&self, indices: &[usize], total: &Moments, j: usize) -> Option<(SplitRule, f64)> {
        let mut levels: Vec<f64> = indices.iter().map(|&i| self.x[[i, j]]).collect();
        levels.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        levels.dedup();
        if levels.len() < 2 {
            return None;
        }
        let mut best: Option<(SplitRule, f64)> = None;
        for level in levels {
            let mut left = Moments::empty(self.y.ncols());
            for &i in indices.iter().filter(|&&i| self.x[[i, j]] == level) {
                left.add(self.y.row(i));
            }
            if left.n < self.min_leaf_size || total.n - left.n < self.min_leaf_size {
                continue;
            }
            let sse = left.sse() + total.minus(&left).sse();
            if best.as_ref().map_or(true, |(_, b)| sse < *b) {
                best = Some((SplitRule::Level { feature: j, level }, sse));
            }
        }
        best
    }
}

pub struct SampledRows {
    matrix: Array2<f64>,
}

impl Design for SampledRows {
    fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

impl Experiment for TreeSurrogate {
    type Design = SampledRows;
    type Quantity = Prediction;
    type Output = TreeSurrogateResult;

    fn name(&self) -> &'static str {
        "tree_surrogate"
    }

    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>> {
        sampler.sample_rows(self.config.sample_size, rng)
    }

    fn intervene(&self, sampled: Array2<f64>, _sampler: &DataSampler, _rng: &mut StdRng) -> Result<Self::Design> {
        Ok(SampledRows { matrix: sampled })
    }

    fn quantity(&self, _design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        Ok(predictions.clone())
    }

    fn aggregate(
        &self,
        design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output> {
        let features = sampler.dataset().features.clone();
        let categorical: Vec<bool> = features.iter().map(|f| f.is_categorical()).collect();
        let tree = RegressionTree::fit(
            &design.matrix,
            &quantity.values,
            &categorical,
            self.config.max_depth,
            self.config.min_leaf_size,
        )?;

        let fitted = tree.predict(&design.matrix);
        let ones = vec![1.0; design.matrix.nrows()];
        let r_squared: Vec<f64> = (0..quantity.n_outputs())
            .map(|k| {
                let actual = quantity.values.column(k).to_vec();
                let approx = fitted.column(k).to_vec();
                weighted_r_squared(&actual, &approx, &ones)
            })
            .collect();
        log::info!(
            "Tree surrogate with {} leaves, R² {:?}",
            tree.leaves().count(),
            r_squared
        );

        Ok(TreeSurrogateResult {
            tree,
            features,
            outputs: quantity.outputs,
            r_squared,
            max_depth: self.config.max_depth,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSurrogateResult {
    pub tree: RegressionTree,
    pub features: Vec<Feature>,
    pub outputs: Vec<String>,
    /// Fidelity of the tree to the model, per output.
    pub r_squared: Vec<f64>,
    pub max_depth: usize,
}

impl TreeSurrogateResult {
    fn check_width(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.tree.n_features {
            return Err(ExplainError::ShapeMismatch {
                what: "surrogate input columns".to_string(),
                expected: self.tree.n_features,
                found: x.ncols(),
            }
            .into());
        }
        Ok(())
    }

    /// Surrogate predictions, one column per output.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.check_width(x)?;
        Ok(self.tree.predict(x))
    }

    /// Leaf node id of every row of `x`.
    pub fn node_of(&self, x: &Array2<f64>) -> Result<Vec<usize>> {
        self.check_width(x)?;
        Ok(x.outer_iter().map(|row| self.tree.leaf_of(row)).collect())
    }

    /// One conjunction of split conditions per leaf, in node order.
    pub fn rules(&self) -> Vec<(usize, String)> {
        let mut rules = Vec::new();
        self.collect_rules(0, Vec::new(), &mut rules);
        rules.sort_by_key(|(id, _)| *id);
        rules
    }

    fn collect_rules(&self, id: usize, path: Vec<String>, out: &mut Vec<(usize, String)>) {
        let node = &self.tree.nodes[id];
        match (node.split, node.left, node.right) {
            (Some(rule), Some(left), Some(right)) => {
                let mut left_path = path.clone();
                left_path.push(rule.describe(&self.features, true));
                self.collect_rules(left, left_path, out);
                let mut right_path = path;
                right_path.push(rule.describe(&self.features, false));
                self.collect_rules(right, right_path, out);
            }
            _ => {
                let text = if path.is_empty() {
                    "(all)".to_string()
                } else {
                    path.join(" & ")
                };
                out.push((id, text));
            }
        }
    }
}

impl Present for TreeSurrogateResult {
    fn title(&self) -> String {
        let r2: Vec<String> = self.r_squared.iter().map(|r| format!("{:.3}", r)).collect();
        format!("Tree surrogate (max depth {}, R² {})", self.max_depth, r2.join(", "))
    }

    fn table(&self) -> ResultTable {
        let mut table = ResultTable::new(vec![".node", ".rule", ".n", ".class", ".value"]);
        for (id, rule) in self.rules() {
            let node = &self.tree.nodes[id];
            for (k, output) in self.outputs.iter().enumerate() {
                table.push(vec![
                    id.into(),
                    rule.clone().into(),
                    node.n.into(),
                    output.clone().into(),
                    node.mean[k].into(),
                ]);
            }
        }
        table
    }

    fn plot(&self) -> Plot {
        let rules = self.rules();
        let labels: Vec<String> = rules.iter().map(|(id, rule)| format!("[{}] {}", id, rule)).collect();
        let series = self
            .outputs
            .iter()
            .enumerate()
            .map(|(k, output)| BarSeries {
                name: output.clone(),
                values: rules.iter().map(|(id, _)| self.tree.nodes[*id].mean[k]).collect(),
                labels: labels.clone(),
            })
            .collect();
        horizontal_bars(series, &self.title(), "Mean prediction in leaf", "Leaf")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::experiment::run;
    use crate::predictor::{FnMultiPredictor, FnPredictor, Model};
    use ndarray::{array, Array1};

    fn step_data() -> DataSampler {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| if j == 0 { i as f64 } else { (i % 3) as f64 });
        DataSampler::new(Dataset::from_matrix(x, &["a", "b"]).unwrap())
    }

    #[test]
    fn test_recovers_step_function() {
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| {
            Ok(x.column(0).mapv(|a| if a > 5.0 { 10.0 } else { 0.0 }))
        }));
        let exp = TreeSurrogate::new(TreeSurrogateConfig {
            max_depth: 1,
            ..Default::default()
        })
        .unwrap();
        let res = run(&exp, &model, &step_data(), Some(1)).unwrap();

        let root = &res.tree.nodes[0];
        assert_eq!(
            root.split,
            Some(SplitRule::Threshold {
                feature: 0,
                threshold: 5.5
            })
        );
        assert!((res.r_squared[0] - 1.0).abs() < 1e-12);

        let rows = array![[2.0, 0.0], [9.0, 1.0]];
        let pred = res.predict(&rows).unwrap();
        assert_eq!(pred[[0, 0]], 0.0);
        assert_eq!(pred[[1, 0]], 10.0);
        let nodes = res.node_of(&rows).unwrap();
        assert_ne!(nodes[0], nodes[1]);

        let rules = res.rules();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].1, "a <= 5.5000");
        assert_eq!(rules[1].1, "a > 5.5000");
    }

    #[test]
    fn test_min_leaf_size_and_depth_bound_tree() {
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| Ok(x.column(0).to_owned())));
        let exp = TreeSurrogate::new(TreeSurrogateConfig::default()).unwrap();
        let res = run(&exp, &model, &step_data(), Some(1)).unwrap();
        assert!(res.tree.nodes.iter().all(|n| n.depth <= 2));
        assert!(res.tree.leaves().all(|n| n.n >= 5));
        assert!(res.tree.leaves().count() <= 4);
        assert!(res.r_squared[0] > 0.8);
    }

    #[test]
    fn test_categorical_split_uses_level_names() {
        let n = 12;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { (i % 3) as f64 } else { i as f64 });
        let data = Dataset::new(
            x,
            vec![
                Feature::categorical("colour", vec!["red".into(), "green".into(), "blue".into()]),
                Feature::numeric("noise"),
            ],
        )
        .unwrap();
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| {
            Ok(x.column(0).iter().map(|&c| if c == 1.0 { 5.0 } else { 0.0 }).collect::<Array1<f64>>())
        }));
        let exp = TreeSurrogate::new(TreeSurrogateConfig {
            max_depth: 1,
            min_leaf_size: 2,
            sample_size: None,
        })
        .unwrap();
        let res = run(&exp, &model, &DataSampler::new(data), Some(1)).unwrap();
        let rules: Vec<String> = res.rules().into_iter().map(|(_, r)| r).collect();
        assert_eq!(rules, vec!["colour == green".to_string(), "colour != green".to_string()]);
        assert!((res.r_squared[0] - 1.0).abs() < 1e-12);
        assert_eq!(res.table().len(), 2);
    }

    #[test]
    fn test_wrong_width_rejected() {
        let model = Model::new(FnPredictor::new(|x: &Array2<f64>| Ok(x.column(0).to_owned())));
        let exp = TreeSurrogate::new(TreeSurrogateConfig::default()).unwrap();
        let res = run(&exp, &model, &step_data(), Some(1)).unwrap();
        assert!(res.predict(&array![[1.0]]).is_err());
        assert!(TreeSurrogate::new(TreeSurrogateConfig {
            min_leaf_size: 0,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_split_minimises_error_summed_over_outputs() {
        // the second output varies far more, so it decides the root split
        let model = Model::new(FnMultiPredictor::new(
            |x: &Array2<f64>| {
                let mut out = Array2::zeros((x.nrows(), 2));
                for (i, r) in x.outer_iter().enumerate() {
                    out[[i, 0]] = if r[0] > 5.5 { 1.0 } else { 0.0 };
                    out[[i, 1]] = if r[1] > 1.5 { 100.0 } else { 0.0 };
                }
                Ok(out)
            },
            vec!["small".to_string(), "large".to_string()],
        ));
        let exp = TreeSurrogate::new(TreeSurrogateConfig {
            max_depth: 1,
            ..Default::default()
        })
        .unwrap();
        let res = run(&exp, &model, &step_data(), Some(1)).unwrap();

        assert_eq!(
            res.tree.nodes[0].split,
            Some(SplitRule::Threshold {
                feature: 1,
                threshold: 1.5
            })
        );
        assert!(res.tree.nodes.iter().all(|n| n.mean.len() == 2));
        assert_eq!(res.r_squared.len(), 2);
        assert!((res.r_squared[1] - 1.0).abs() < 1e-12);
        assert!(res.r_squared[0] < 0.5);

        let pred = res.predict(&array![[0.0, 2.0]]).unwrap();
        assert_eq!(pred.ncols(), 2);
        assert_eq!(pred[[0, 1]], 100.0);
    }
}
