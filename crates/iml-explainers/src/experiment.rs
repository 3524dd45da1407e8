//! The design → execute → analyse → present pipeline.
//!
//! Every interpretability method is an `Experiment`: it samples rows from the
//! reference data, intervenes on them to build a design matrix, lets the
//! model predict that matrix, extracts its quantity of interest from the
//! predictions and aggregates it into a result. `run` drives those stages in
//! order; the result then renders itself through `Present`.
use std::time::Instant;

use anyhow::{Context, Result};
use ndarray::Array2;
use plotly::Plot;
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::data::DataSampler;
use crate::predictor::{Model, Prediction};
use crate::table::ResultTable;

/// A design produced by the intervention step.
pub trait Design {
    /// Rows sent to the model.
    fn matrix(&self) -> &Array2<f64>;
}

pub trait Experiment {
    type Design: Design;
    type Quantity;
    type Output: Present;

    fn name(&self) -> &'static str;

    /// Sampling strategy: which rows of the reference data take part.
    fn sample(&self, sampler: &DataSampler, rng: &mut StdRng) -> Result<Array2<f64>>;

    /// Intervention: perturb the sampled rows into the design matrix.
    fn intervene(&self, sampled: Array2<f64>, sampler: &DataSampler, rng: &mut StdRng) -> Result<Self::Design>;

    /// Quantity of interest extracted from the design's predictions.
    fn quantity(&self, design: &Self::Design, predictions: &Prediction) -> Result<Self::Quantity>;

    /// Aggregation or fit step producing the final result.
    fn aggregate(
        &self,
        design: Self::Design,
        quantity: Self::Quantity,
        sampler: &DataSampler,
    ) -> Result<Self::Output>;
}

/// Present stage: every result can be shown as a table and a chart.
pub trait Present {
    fn title(&self) -> String;
    fn table(&self) -> ResultTable;
    fn plot(&self) -> Plot;
}

impl Present for Box<dyn Present> {
    fn title(&self) -> String {
        (**self).title()
    }

    fn table(&self) -> ResultTable {
        (**self).table()
    }

    fn plot(&self) -> Plot {
        (**self).plot()
    }
}

pub(crate) fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Run one experiment end to end.
pub fn run<E: Experiment>(
    experiment: &E,
    model: &Model,
    sampler: &DataSampler,
    seed: Option<u64>,
) -> Result<E::Output> {
    let mut rng = make_rng(seed);
    let name = experiment.name();
    let started = Instant::now();

    let sampled = experiment
        .sample(sampler, &mut rng)
        .with_context(|| format!("[{}] sampling failed", name))?;
    let n_sampled = sampled.nrows();
    let design = experiment
        .intervene(sampled, sampler, &mut rng)
        .with_context(|| format!("[{}] intervention failed", name))?;
    let matrix = design.matrix();
    if matrix.ncols() != sampler.n_features() {
        anyhow::bail!(
            "[{}] design has {} columns but the data has {} features",
            name,
            matrix.ncols(),
            sampler.n_features()
        );
    }
    log::debug!(
        "[{}] design: {} sampled rows -> {} design rows",
        name,
        n_sampled,
        matrix.nrows()
    );

    let predictions = model.predict(matrix)?;
    log::debug!(
        "[{}] executed {} predictions with {} output(s) in {:.2?}",
        name,
        predictions.n_rows(),
        predictions.n_outputs(),
        started.elapsed()
    );

    let quantity = experiment
        .quantity(&design, &predictions)
        .with_context(|| format!("[{}] quantity extraction failed", name))?;
    let output = experiment
        .aggregate(design, quantity, sampler)
        .with_context(|| format!("[{}] aggregation failed", name))?;
    log::info!("[{}] finished in {:.2?}", name, started.elapsed());
    Ok(output)
}
