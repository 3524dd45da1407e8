//! Partial dependence.
//!
//! Every sampled row is replicated once per grid point with the feature (or
//! pair of features) of interest set to that grid value; the model's average
//! prediction per grid point is the partial dependence curve or surface.
use anyhow::Result;
use ndarray::{s, Array2, Axis};
use plotly::common::Mode;
use plotly::layout::{Axis as PlotAxis, Layout};
use plotly::{Bar, HeatMap, Plot, Scatter};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::{DataSampler, Dataset};
use crate::error::ExplainError;
use crate::experiment::{Design, Experiment, Present};
use crate::predictor::Prediction;
use crate::stats;
use crate::table::{Cell, ResultTable};

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GridType {
    Equidistant,
    Quantile,
}

impl Default for GridType {
    fn default() -> Self {
        GridType::Equidistant
    }
}

/// Grid values for one feature: all levels for a categorical feature,
/// `grid_size` points for a numeric one.
pub fn feature_grid(data: &Dataset, feature: usize, grid_size: usize, grid_type: GridType) -> Result<Vec<f64>> {
    data.check_feature(feature)?;
    let info = &data.features[feature];
    if info.is_categorical() {
        return Ok((0..info.levels.len()).map(|l| l as f64).collect());
    }
    let column = data.x.column(feature).to_vec();
    let grid = match grid_type {
        GridType::Equidistant => stats::equidistant_grid(&column, grid_size),
        GridType::Quantile => stats::quantile_grid(&column, grid_size),
    };
    if grid.len() == 1 {
        log::warn!("Feature '{}' is constant; its grid has a single point", info.name);
    }
    if grid.is_empty() {
        anyhow::bail!("Feature '{}' has no finite values to build a grid from", info.name);
    }
    Ok(grid)
}

/// Replicate `rows` once per grid point, overwriting `features` with the
/// point's values.
pub(crate) fn grid_matrix(rows: &Array2<f64>, features: &[usize], points: &[Vec<f64>]) -> Array2<f64> {
    let n = rows.nrows();
    let mut matrix = DataSampler::replicate(rows, points.len());
    for (g, point) in points.iter().enumerate() {
        let mut block = matrix.slice_mut(s![g * n..(g + 1) * n, ..]);
        for (&j, &value) in features.iter().zip(point) {
            block.column_mut(j).fill(value);
        }
    }
    matrix
}

pub(crate) fn check_grid_size(grid_size: usize) -> Result<()> {
    if grid_size < 2 {
        return Err(ExplainError::InvalidParameter("grid_size must be at least 2".to_string()).into());
    }
    Ok(())
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PartialDependenceConfig {
    /// One feature for a curve, two for a surface.
    pub features: Vec<usize>,
    pub grid_size: usize,
    pub grid_type: GridType,
    /// Rows drawn from the data; `None` uses all of them.
    pub sample_size: Option<usize>,
}

impl Default for PartialDependenceConfig {
    fn default() -> Self {
        PartialDependenceConfig {
            features: vec![0],
            grid_size: 20,
            grid_type: GridType::Equidistant,
            sample_size: None,
        }
    }
}

pub struct PartialDependence {
    config: PartialDependenceConfig,
}

impl PartialDependence {
    pub fn new(config: PartialDependenceConfig) -> Result<Self> {
        if config.features.is_empty() || config.features.len() > 2 {
            return Err(ExplainError::InvalidParameter(format!(
                "partial dependence needs one or two features, got {}",
                config.features.len()
            ))
            .into());
        }
        if config.features.len() == 2 && config.features[0] == config.features[1] {
            return Err(ExplainError::InvalidParameter("the two features must differ".to_string()).into());
        }
        check_grid_size(config.grid_size)?;
        Ok(PartialDependence { config })
    }
}

pub struct GridDesign {
    pub(crate) matrix: Array2<f64>,
    pub(crate) n_rows: usize,
    pub(crate) points: Vec<Vec<f64>>,
}

impl Design for GridDesign {
    fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }
}

/// Mean prediction per grid point (rows) and output (columns).
pub struct GridMeans {
    means: Array2<f64>,
    outputs: Vec<String>,
}

impl Experiment for PartialDependence {
    type Design = GridDesign;
    type Quantity = GridMeans;
    type Output = PartialDependenceResult;

    fn name(&self) -> &'static str {
        "partial_dependence"
    }

    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>> {
        sampler.sample_rows(self.config.sample_size, rng)
    }

    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, _rng: &mut StdRng) -> Result<Self::Design> {
        let data = sampler.dataset();
        let grids = self
            .config
            .features
            .iter()
            .map(|&j| feature_grid(data, j, self.config.grid_size, self.config.grid_type))
            .collect::<Result<Vec<_>>>()?;

        let points: Vec<Vec<f64>> = match grids.as_slice() {
            [a] => a.iter().map(|&v| vec![v]).collect(),
            [a, b] => b
                .iter()
                .flat_map(|&vb| a.iter().map(move |&va| vec![va, vb]))
                .collect(),
            _ => unreachable!("feature count validated in PartialDependence::new"),
        };

        Ok(GridDesign {
            matrix: grid_matrix(&sampled, &self.config.features, &points),
            n_rows: sampled.nrows(),
            points,
        })
    }

    fn quantity(&self, design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        let n = design.n_rows;
        let mut means = Array2::zeros((design.points.len(), predictions.n_outputs()));
        for g in 0..design.points.len() {
            let block = predictions.values.slice(s![g * n..(g + 1) * n, ..]);
            if let Some(m) = block.mean_axis(Axis(0)) {
                means.row_mut(g).assign(&m);
            }
        }
        Ok(GridMeans {
            means,
            outputs: predictions.outputs.clone(),
        })
    }

    fn aggregate(
        &self,
        design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output> {
        let data = sampler.dataset();
        let features = &self.config.features;
        let labels = design
            .points
            .iter()
            .map(|p| features.iter().zip(p).map(|(&j, &v)| data.format_value(j, v)).collect())
            .collect();

        Ok(PartialDependenceResult {
            features: features.iter().map(|&j| data.features[j].name.clone()).collect(),
            categorical: features.iter().map(|&j| data.features[j].is_categorical()).collect(),
            grid: design.points,
            grid_labels: labels,
            outputs: quantity.outputs,
            values: quantity.means.outer_iter().map(|r| r.to_vec()).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialDependenceResult {
    pub features: Vec<String>,
    pub categorical: Vec<bool>,
    /// One entry per grid point, one value per feature.
    pub grid: Vec<Vec<f64>>,
    pub grid_labels: Vec<Vec<String>>,
    pub outputs: Vec<String>,
    /// Mean prediction per grid point and output.
    pub values: Vec<Vec<f64>>,
}

impl PartialDependenceResult {
    /// Curve (or flattened surface) for output `k`.
    pub fn curve(&self, k: usize) -> Vec<f64> {
        self.values.iter().map(|v| v[k]).collect()
    }
}

impl Present for PartialDependenceResult {
    fn title(&self) -> String {
        format!("Partial dependence of {}", self.features.join(" x "))
    }

    fn table(&self) -> ResultTable {
        let mut columns = self.features.clone();
        columns.push(".class".to_string());
        columns.push(".value".to_string());
        let mut table = ResultTable::new(columns);
        for (g, labels) in self.grid_labels.iter().enumerate() {
            for (k, output) in self.outputs.iter().enumerate() {
                let mut row: Vec<Cell> = labels
                    .iter()
                    .zip(&self.categorical)
                    .zip(&self.grid[g])
                    .map(|((label, &cat), &v)| if cat { Cell::Text(label.clone()) } else { Cell::Number(v) })
                    .collect();
                row.push(output.clone().into());
                row.push(self.values[g][k].into());
                table.push(row);
            }
        }
        table
    }

    fn plot(&self) -> Plot {
        let mut plot = Plot::new();
        let layout = Layout::new().title(self.title().as_str());

        if self.features.len() == 2 {
            // Points vary fastest along the first feature.
            let n_first = self
                .grid
                .iter()
                .take_while(|p| p[1] == self.grid[0][1])
                .count()
                .max(1);
            let xs: Vec<String> = self.grid_labels.iter().take(n_first).map(|l| l[0].clone()).collect();
            let ys: Vec<String> = self.grid_labels.iter().step_by(n_first).map(|l| l[1].clone()).collect();
            let z: Vec<Vec<f64>> = self.curve(0).chunks(n_first).map(|c| c.to_vec()).collect();
            let name = self.outputs.first().cloned().unwrap_or_default();
            plot.add_trace(HeatMap::new(xs, ys, z).name(name.as_str()));
            plot.set_layout(
                layout
                    .x_axis(PlotAxis::new().title(self.features[0].as_str()))
                    .y_axis(PlotAxis::new().title(self.features[1].as_str())),
            );
            return plot;
        }

        let labels: Vec<String> = self.grid_labels.iter().map(|l| l[0].clone()).collect();
        for (k, output) in self.outputs.iter().enumerate() {
            if self.categorical[0] {
                plot.add_trace(Bar::new(labels.clone(), self.curve(k)).name(output.as_str()));
            } else {
                let xs: Vec<f64> = self.grid.iter().map(|p| p[0]).collect();
                plot.add_trace(Scatter::new(xs, self.curve(k)).mode(Mode::Lines).name(output.as_str()));
            }
        }
        plot.set_layout(
            layout
                .x_axis(PlotAxis::new().title(self.features[0].as_str()))
                .y_axis(PlotAxis::new().title("Predicted value")),
        );
        plot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Feature;
    use crate::experiment::run;
    use crate::predictor::{FnMultiPredictor, FnPredictor, Model};
    use ndarray::{array, Array2};

    fn model() -> Model {
        // f(x) = 2 * x0 + x0 * x1
        Model::new(FnPredictor::new(|x: &Array2<f64>| {
            Ok(x.outer_iter().map(|r| 2.0 * r[0] + r[0] * r[1]).collect())
        }))
    }

    fn sampler() -> DataSampler {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 0.0], [4.0, 1.0]];
        DataSampler::new(Dataset::from_matrix(x, &["a", "b"]).unwrap())
    }

    fn run_pdp(config: PartialDependenceConfig) -> PartialDependenceResult {
        let exp = PartialDependence::new(config).unwrap();
        run(&exp, &model(), &sampler(), Some(3)).unwrap()
    }

    #[test]
    fn test_pdp_matches_closed_form() {
        let res = run_pdp(PartialDependenceConfig {
            features: vec![0],
            grid_size: 5,
            ..Default::default()
        });
        // mean(b) = 0.6, so pdp(a) = 2a + 0.6a
        assert_eq!(res.grid.len(), 5);
        for (p, v) in res.grid.iter().zip(res.curve(0)) {
            assert!((v - 2.6 * p[0]).abs() < 1e-9);
        }
        assert_eq!(res.table().len(), 5);
    }

    #[test]
    fn test_two_feature_surface() {
        let res = run_pdp(PartialDependenceConfig {
            features: vec![0, 1],
            grid_size: 3,
            ..Default::default()
        });
        assert_eq!(res.grid.len(), 9);
        for (p, v) in res.grid.iter().zip(res.curve(0)) {
            assert!((v - (2.0 * p[0] + p[0] * p[1])).abs() < 1e-9);
        }
    }

    #[test]
    fn test_categorical_grid_uses_levels() {
        let x = array![[0.0, 1.0], [1.0, 2.0], [0.0, 3.0]];
        let data = Dataset::new(
            x,
            vec![
                Feature::categorical("c", vec!["red".into(), "blue".into()]),
                Feature::numeric("n"),
            ],
        )
        .unwrap();
        assert_eq!(feature_grid(&data, 0, 20, GridType::Quantile).unwrap(), vec![0.0, 1.0]);
        assert!(feature_grid(&data, 5, 20, GridType::Quantile).is_err());
    }

    #[test]
    fn test_invalid_config() {
        assert!(PartialDependence::new(PartialDependenceConfig {
            features: vec![0, 1, 2],
            ..Default::default()
        })
        .is_err());
        assert!(PartialDependence::new(PartialDependenceConfig {
            grid_size: 1,
            ..Default::default()
        })
        .is_err());
    }

    #[test]
    fn test_pdp_per_output() {
        let model = Model::new(FnMultiPredictor::new(
            |x: &Array2<f64>| {
                let mut out = Array2::zeros((x.nrows(), 2));
                for (i, r) in x.outer_iter().enumerate() {
                    out[[i, 0]] = 2.0 * r[0] + r[0] * r[1];
                    out[[i, 1]] = -r[0];
                }
                Ok(out)
            },
            vec!["first".to_string(), "second".to_string()],
        ));
        let exp = PartialDependence::new(PartialDependenceConfig {
            features: vec![0],
            grid_size: 5,
            ..Default::default()
        })
        .unwrap();
        let res = run(&exp, &model, &sampler(), Some(3)).unwrap();
        assert_eq!(res.outputs, vec!["first".to_string(), "second".to_string()]);
        for (p, (v0, v1)) in res.grid.iter().zip(res.curve(0).into_iter().zip(res.curve(1))) {
            assert!((v0 - 2.6 * p[0]).abs() < 1e-9);
            assert!((v1 + p[0]).abs() < 1e-9);
        }
        assert_eq!(res.table().len(), 10);
    }
}
