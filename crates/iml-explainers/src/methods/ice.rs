//! Individual conditional expectation.
//!
//! Same intervention as a one-feature partial dependence, but the curves of
//! the individual rows are kept instead of averaged. Curves can be centred at
//! an anchor value so that they all start from zero.
use anyhow::Result;
use ndarray::Array2;
use plotly::common::{Line, Mode};
use plotly::layout::{Axis, Layout};
use plotly::{Plot, Scatter};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::data::DataSampler;
use crate::experiment::{Experiment, Present};
use crate::methods::pdp::{check_grid_size, feature_grid, grid_matrix, GridDesign, GridType, PartialDependenceResult};
use crate::predictor::Prediction;
use crate::table::{Cell, ResultTable};

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct IceConfig {
    pub feature: usize,
    pub grid_size: usize,
    pub grid_type: GridType,
    pub sample_size: Option<usize>,
    /// Shift every curve so it is 0 at this feature value.
    pub center_at: Option<f64>,
}

impl Default for IceConfig {
    fn default() -> Self {
        IceConfig {
            feature: 0,
            grid_size: 20,
            grid_type: GridType::Equidistant,
            sample_size: None,
            center_at: None,
        }
    }
}

pub struct Ice {
    config: IceConfig,
}

impl Ice {
    pub fn new(config: IceConfig) -> Result<Self> {
        check_grid_size(config.grid_size)?;
        Ok(Ice { config })
    }
}

/// Predictions per output, row and grid point: `curves[k][i][g]`.
pub struct IceCurves {
    curves: Vec<Vec<Vec<f64>>>,
    outputs: Vec<String>,
}

impl Experiment for Ice {
    type Design = GridDesign;
    type Quantity = IceCurves;
    type Output = IceResult;

    fn name(&self) -> &'static str {
        "ice"
    }

    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>> {
        sampler.sample_rows(self.config.sample_size, rng)
    }

    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, _rng: &mut StdRng) -> Result<Self::Design> {
        let j = self.config.feature;
        let mut grid = feature_grid(sampler.dataset(), j, self.config.grid_size, self.config.grid_type)?;
        if let Some(anchor) = self.config.center_at {
            if sampler.dataset().features[j].is_categorical() {
                anyhow::bail!("center_at is only supported for numeric features");
            }
            if !grid.contains(&anchor) {
                grid.push(anchor);
                grid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            }
        }
        let points: Vec<Vec<f64>> = grid.into_iter().map(|v| vec![v]).collect();
        Ok(GridDesign {
            matrix: grid_matrix(&sampled, &[j], &points),
            n_rows: sampled.nrows(),
            points,
        })
    }

    fn quantity(&self, design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity> {
        let n = design.n_rows;
        let n_grid = design.points.len();
        let curves = (0..predictions.n_outputs())
            .map(|k| {
                (0..n)
                    .map(|i| (0..n_grid).map(|g| predictions.values[[g * n + i, k]]).collect())
                    .collect()
            })
            .collect();
        Ok(IceCurves {
            curves,
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
        let j = self.config.feature;
        let grid: Vec<f64> = design.points.iter().map(|p| p[0]).collect();
        let mut curves = quantity.curves;

        if let Some(anchor) = self.config.center_at {
            let g0 = grid
                .iter()
                .position(|&v| v == anchor)
                .ok_or_else(|| anyhow::anyhow!("anchor {} missing from the grid", anchor))?;
            for output in curves.iter_mut() {
                for curve in output.iter_mut() {
                    let base = curve[g0];
                    curve.iter_mut().for_each(|v| *v -= base);
                }
            }
        }

        Ok(IceResult {
            feature: data.features[j].name.clone(),
            categorical: data.features[j].is_categorical(),
            grid_labels: grid.iter().map(|&v| data.format_value(j, v)).collect(),
            grid,
            outputs: quantity.outputs,
            center_at: self.config.center_at,
            curves,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IceResult {
    pub feature: String,
    pub categorical: bool,
    pub grid: Vec<f64>,
    pub grid_labels: Vec<String>,
    pub outputs: Vec<String>,
    pub center_at: Option<f64>,
    /// `curves[k][i][g]`: output `k`, sampled row `i`, grid point `g`.
    pub curves: Vec<Vec<Vec<f64>>>,
}

impl IceResult {
    pub fn n_curves(&self) -> usize {
        self.curves.first().map(|c| c.len()).unwrap_or(0)
    }

    /// Average the curves into a partial dependence result.
    pub fn to_pdp(&self) -> PartialDependenceResult {
        let n_grid = self.grid.len();
        let values = (0..n_grid)
            .map(|g| {
                self.curves
                    .iter()
                    .map(|output| {
                        let n = output.len().max(1) as f64;
                        output.iter().map(|c| c[g]).sum::<f64>() / n
                    })
                    .collect()
            })
            .collect();
        PartialDependenceResult {
            features: vec![self.feature.clone()],
            categorical: vec![self.categorical],
            grid: self.grid.iter().map(|&v| vec![v]).collect(),
            grid_labels: self.grid_labels.iter().map(|l| vec![l.clone()]).collect(),
            outputs: self.outputs.clone(),
            values,
        }
    }
}

impl Present for IceResult {
    fn title(&self) -> String {
        match self.center_at {
            Some(anchor) => format!("Centered ICE of {} (anchor {})", self.feature, anchor),
            None => format!("ICE of {}", self.feature),
        }
    }

    fn table(&self) -> ResultTable {
        let mut table = ResultTable::new(vec![self.feature.as_str(), ".class", ".id", ".value"]);
        for (k, output) in self.outputs.iter().enumerate() {
            for (i, curve) in self.curves[k].iter().enumerate() {
                for (g, &v) in curve.iter().enumerate() {
                    let x = if self.categorical {
                        Cell::Text(self.grid_labels[g].clone())
                    } else {
                        Cell::Number(self.grid[g])
                    };
                    table.push(vec![x, output.clone().into(), i.into(), v.into()]);
                }
            }
        }
        table
    }

    fn plot(&self) -> Plot {
        let mut plot = Plot::new();
        let pdp = self.to_pdp();
        for (k, output) in self.outputs.iter().enumerate() {
            for curve in &self.curves[k] {
                plot.add_trace(
                    Scatter::new(self.grid_labels.clone(), curve.clone())
                        .mode(Mode::Lines)
                        .opacity(0.3)
                        .show_legend(false)
                        .line(Line::new().color("grey")),
                );
            }
            plot.add_trace(
                Scatter::new(self.grid_labels.clone(), pdp.curve(k))
                    .mode(Mode::Lines)
                    .name(format!("PDP {}", output).as_str())
                    .line(Line::new().width(3.0)),
            );
        }
        plot.set_layout(
            Layout::new()
                .title(self.title().as_str())
                .x_axis(Axis::new().title(self.feature.as_str()))
                .y_axis(Axis::new().title("Predicted value")),
        );
        plot
    }
}
