use bitvec::bitvec;
use rand::{rngs::ThreadRng, Rng};

use crate::{
    base::{perform_check, EstimationError},
    element_set::ElementSet,
    fitter::Fitter,
};

/// Callbacks tracing a [`Ransac`] run. All methods default to no-ops;
/// implementors must treat the arguments as read-only snapshots.
pub trait RansacMonitor<M> {
    /// A minimal sample set was drawn and handed to the fitter; `model`
    /// is `None` when the fitter rejected the sample.
    fn model_from_minimal_sample(&mut self, _sample: ElementSet, _model: Option<&M>) {}

    /// A consensus set larger than the best so far was found. `refit` is
    /// the model recomputed from the whole consensus set; it is the
    /// original model when no refit was needed, and `None` when the
    /// refit was attempted but failed.
    fn consensus(&mut self, _model: &M, _consensus: ElementSet, _refit: Option<&M>) {}

    /// The estimator is about to return `model` with the given inliers.
    fn success(&mut self, _model: &M, _inliers: ElementSet) {}
}

impl<M> RansacMonitor<M> for () {}

/// RANSAC robust fitting algorithm.
///
/// See Martin A. Fischler and Robert C. Bolles: Random Sample Consensus:
/// A Paradigm for Model Fitting with Applications to Image Analysis and
/// Automated Cartography (Communications of the ACM 24(6), June 1981).
pub struct Ransac<R = ThreadRng> {
    inlier_threshold: f64,
    success_probability: f64,
    max_model_failures: usize,
    rng: R,
}

impl Ransac {
    /// An estimator drawing samples from the thread-local generator.
    /// `inlier_threshold` is the error above which a data element is
    /// considered an outlier; it must be non-negative.
    pub fn new(inlier_threshold: f64) -> Self {
        Self::with_rng(inlier_threshold, rand::thread_rng())
    }
}

impl<R: Rng> Ransac<R> {
    /// Like [`Ransac::new`], but with an explicit source of randomness.
    /// Two runs over the same input with generators producing identical
    /// sequences behave identically.
    pub fn with_rng(inlier_threshold: f64, rng: R) -> Self {
        assert!(
            inlier_threshold >= 0.,
            "invalid inlier threshold: {}",
            inlier_threshold
        );
        Ransac {
            inlier_threshold,
            success_probability: 0.99,
            max_model_failures: 1000,
            rng,
        }
    }

    /// Sets the desired probability of drawing at least one outlier-free
    /// minimal sample; it drives the iteration budget. Defaults to 0.99.
    ///
    /// Panics unless `0 < probability < 1`.
    pub fn set_success_probability(&mut self, probability: f64) {
        assert!(
            probability > 0. && probability < 1.,
            "invalid probability: {}",
            probability
        );
        self.success_probability = probability;
    }

    /// Sets how many times the fitter may fail to produce a model from a
    /// minimal sample before the run is abandoned. Defaults to 1000.
    pub fn set_max_model_failures(&mut self, limit: usize) {
        self.max_model_failures = limit;
    }

    pub fn perform<D, F>(&mut self, fitter: &F, data: &[D]) -> Result<F::Model, EstimationError>
    where
        F: Fitter<D>,
    {
        self.perform_monitored(fitter, data, &mut ())
    }

    pub fn perform_monitored<D, F, N>(
        &mut self,
        fitter: &F,
        data: &[D],
        monitor: &mut N,
    ) -> Result<F::Model, EstimationError>
    where
        F: Fitter<D>,
        N: RansacMonitor<F::Model>,
    {
        if let Some(model) = perform_check(fitter, data, |model, set| monitor.success(model, set))?
        {
            return Ok(model);
        }

        let minimal = fitter.minimal_sample_size();
        let mut sample = Vec::with_capacity(data.len() / 2);
        let mut sample_mask = bitvec![0; data.len()];

        // adjusted from the first accepted consensus set onwards
        let mut budget = 1usize;
        let mut failures = 0usize;

        let mut best_model = None;
        let mut best_support = 0usize;
        let mut best_inliers = bitvec![0; data.len()];

        let mut iterations = 0usize;
        while iterations < budget {
            // draw a minimal sample set
            sample.clear();
            sample_mask.fill(false);
            while sample.len() < minimal {
                let index = self.rng.gen_range(0..data.len());
                if !sample_mask[index] {
                    sample.push(index);
                    sample_mask.set(index, true);
                }
            }

            let model = fitter.compute_model(sample.iter().map(|&index| &data[index]));
            monitor.model_from_minimal_sample(ElementSet::Masked(&sample_mask), model.as_ref());

            let Some(model) = model else {
                failures += 1;
                if failures >= self.max_model_failures {
                    return Err(EstimationError::ModelFitFailureLimitExceeded);
                }
                continue;
            };

            // grow the sample into the full consensus set
            for index in 0..data.len() {
                if !sample_mask[index]
                    && fitter.error(&model, &data[index]) <= self.inlier_threshold
                {
                    sample.push(index);
                    sample_mask.set(index, true);
                }
            }

            if sample.len() > best_support {
                if sample.len() > minimal {
                    let refit = fitter.compute_model(sample.iter().map(|&index| &data[index]));
                    monitor.consensus(&model, ElementSet::Masked(&sample_mask), refit.as_ref());
                    // a failed refit keeps the minimal-sample model; every
                    // consensus element is still an inlier to it
                    best_model = Some(refit.unwrap_or(model));
                } else {
                    // no extra inliers were found, the model already comes
                    // from the whole consensus set
                    monitor.consensus(&model, ElementSet::Masked(&sample_mask), Some(&model));
                    best_model = Some(model);
                }
                best_support = sample.len();
                best_inliers.copy_from_bitslice(&sample_mask);

                let inlier_ratio = best_support as f64 / data.len() as f64;
                budget = required_iterations(self.success_probability, inlier_ratio, minimal);
                log::trace!(
                    "support {}/{}, iteration budget {}",
                    best_support,
                    data.len(),
                    budget
                );
            }
            iterations += 1;
        }

        let model = best_model.ok_or(EstimationError::NoModelFound)?;
        log::debug!(
            "returning model with support {}/{} after {} iterations",
            best_support,
            data.len(),
            iterations
        );
        monitor.success(&model, ElementSet::Masked(&best_inliers));
        Ok(model)
    }
}

/// The standard RANSAC sample count: the number of minimal-sample draws
/// needed for at least `success_probability` chance of one outlier-free
/// sample, given the inlier ratio. A non-finite or non-positive value
/// (the ratio at or near 1) collapses to 0, terminating the search.
fn required_iterations(
    success_probability: f64,
    inlier_ratio: f64,
    minimal_sample_size: usize,
) -> usize {
    let count = f64::ln_1p(-success_probability)
        / f64::ln_1p(-inlier_ratio.powi(minimal_sample_size as i32));
    if count.is_finite() && count > 0. {
        count.round() as usize
    } else {
        0
    }
}
