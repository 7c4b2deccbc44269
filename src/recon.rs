use std::collections::HashMap;

use bitvec::{bitvec, vec::BitVec};
use rand::{rngs::ThreadRng, Rng};

use crate::{
    base::{perform_check, EstimationError},
    element_set::ElementSet,
    fitter::Fitter,
};

/// Callbacks tracing a [`Recon`] run.
///
/// Each attempt draws a minimal sample set and fits a model to it, which
/// triggers [`model_from_minimal_sample`](Self::model_from_minimal_sample)
/// (with `None` when the fitter rejected the sample). The new model is
/// then checked against every previously generated one for
/// alpha-consistency, triggering
/// [`models_consistent`](Self::models_consistent) or
/// [`models_not_consistent`](Self::models_not_consistent) per comparison.
/// The search terminates successfully when three mutually consistent
/// models are found, indicated by [`success`](Self::success) with their
/// common consistent data as the inlier set.
///
/// All methods default to no-ops; implementors must treat the arguments
/// as read-only snapshots.
pub trait ReconMonitor<M> {
    fn model_from_minimal_sample(&mut self, _sample: ElementSet, _model: Option<&M>) {}

    fn models_consistent(&mut self, _new_model: &M, _existing: &M, _common: ElementSet) {}

    fn models_not_consistent(&mut self, _new_model: &M, _existing: &M) {}

    fn success(&mut self, _model: &M, _inliers: ElementSet) {}
}

impl<M> ReconMonitor<M> for () {}

/// RECON robust estimator. Unlike RANSAC it needs no inlier-error
/// threshold: two independently fit models are compared by which
/// elements they rank as low-error, and the search ends when three
/// models mutually agree.
///
/// See Rahul Raguram and Jan-Michael Frahm: RECON: Scale-Adaptive Robust
/// Estimation via Residual Consensus (ICCV, November 2011).
pub struct Recon<R = ThreadRng> {
    min_overlap_fraction: f64,
    max_attempts: usize,
    max_model_failures: usize,
    rng: R,
}

impl Default for Recon {
    fn default() -> Self {
        Self::new()
    }
}

impl Recon {
    /// An estimator drawing samples from the thread-local generator.
    pub fn new() -> Self {
        Self::with_rng(rand::thread_rng())
    }
}

impl<R: Rng> Recon<R> {
    /// Like [`Recon::new`], but with an explicit source of randomness.
    /// Two runs over the same input with generators producing identical
    /// sequences behave identically.
    pub fn with_rng(rng: R) -> Self {
        Recon {
            // alpha squared in the article
            min_overlap_fraction: 0.99 * 0.99,
            max_attempts: 200,
            max_model_failures: 1000,
            rng,
        }
    }

    /// Sets the fraction of a residual chunk that two models must rank
    /// in common to be considered consistent. Defaults to `0.99 * 0.99`.
    ///
    /// Panics unless `0 < fraction <= 1`.
    pub fn set_min_overlap_fraction(&mut self, fraction: f64) {
        assert!(
            fraction > 0. && fraction <= 1.,
            "invalid overlap fraction: {}",
            fraction
        );
        self.min_overlap_fraction = fraction;
    }

    /// Sets how many minimal samples are drawn before the search gives
    /// up with [`EstimationError::NoConsensusFound`]. Defaults to 200.
    pub fn set_max_attempts(&mut self, limit: usize) {
        self.max_attempts = limit;
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
        N: ReconMonitor<F::Model>,
    {
        if let Some(model) = perform_check(fitter, data, |model, set| monitor.success(model, set))?
        {
            return Ok(model);
        }

        let minimal = fitter.minimal_sample_size();
        let mut sample = Vec::with_capacity(minimal);
        let mut sample_mask = bitvec![0; data.len()];
        let mut failures = 0usize;

        // every distinct minimal sample tried so far, with a lookup from
        // its mask into the arena
        let mut pool: Vec<ModelData<F::Model>> = Vec::new();
        let mut pool_lookup: HashMap<BitVec, usize> = HashMap::new();
        let mut consistent_pairs: Vec<ConsistentPair> = Vec::new();

        for _ in 0..self.max_attempts {
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

            if pool_lookup.contains_key(&sample_mask) {
                // we've already tried this sample set
                continue;
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

            let new_data = ModelData::new(model, sample_mask.clone(), fitter, data);

            // previous models overlapping the new one, in pool order with
            // their common consistent data; pool order keeps seeded runs
            // reproducible
            let mut matching: Vec<(usize, BitVec)> = Vec::new();
            for (existing_index, existing) in pool.iter().enumerate() {
                if existing.sample_mask == new_data.sample_mask {
                    // same input sets, don't compare
                    continue;
                }
                match check_alpha_consistency(&new_data, existing, self.min_overlap_fraction) {
                    Some(common) => {
                        log::trace!(
                            "models {} and {} consistent on {} elements",
                            pool.len(),
                            existing_index,
                            common.count_ones()
                        );
                        monitor.models_consistent(
                            &new_data.model,
                            &existing.model,
                            ElementSet::Masked(&common),
                        );
                        matching.push((existing_index, common));
                    }
                    None => monitor.models_not_consistent(&new_data.model, &existing.model),
                }
            }

            // look for an existing consistent pair whose members both
            // match the new model: three mutually consistent models
            if !matching.is_empty() {
                let common_with = |index: usize| {
                    matching
                        .iter()
                        .find(|(existing, _)| *existing == index)
                        .map(|(_, common)| common)
                };
                for pair in &consistent_pairs {
                    let (Some(common_first), Some(common_second)) =
                        (common_with(pair.first), common_with(pair.second))
                    else {
                        continue;
                    };

                    let mut common_all = bitvec![0; data.len()];
                    for index in pair.common.iter_ones() {
                        if common_first[index] && common_second[index] {
                            common_all.set(index, true);
                        }
                    }

                    let counts = [
                        pair.common.count_ones(),
                        common_first.count_ones(),
                        common_second.count_ones(),
                    ];
                    let max = counts.into_iter().max().unwrap_or(0);
                    let min = counts.into_iter().min().unwrap_or(0);

                    if (max - min) as f64 / max as f64 <= 0.05
                        && common_all.count_ones() as f64 >= 0.02 * data.len() as f64
                    {
                        let members = common_all.iter_ones().collect::<Vec<_>>();
                        let refit = fitter.compute_model(members.iter().map(|&index| &data[index]));
                        // a failed refit falls back to the model that
                        // closed the triangle
                        let model = refit.unwrap_or(new_data.model);
                        log::debug!(
                            "consensus of three models on {} elements",
                            members.len()
                        );
                        monitor.success(&model, ElementSet::Masked(&common_all));
                        return Ok(model);
                    }
                }
            }

            let new_index = pool.len();
            pool_lookup.insert(new_data.sample_mask.clone(), new_index);
            pool.push(new_data);
            for (existing_index, common) in matching {
                consistent_pairs.push(ConsistentPair {
                    first: new_index,
                    second: existing_index,
                    common,
                });
            }
        }
        Err(EstimationError::NoConsensusFound)
    }
}

struct ModelData<M> {
    model: M,
    sample_mask: BitVec,
    /// Data indices sorted ascending by residual, ties in index order.
    by_error: Vec<usize>,
}

impl<M> ModelData<M> {
    fn new<D, F>(model: M, sample_mask: BitVec, fitter: &F, data: &[D]) -> Self
    where
        F: Fitter<D, Model = M>,
    {
        let errors = data
            .iter()
            .map(|datum| fitter.error(&model, datum))
            .collect::<Vec<_>>();
        let mut by_error = (0..data.len()).collect::<Vec<_>>();
        by_error.sort_by(|&a, &b| errors[a].total_cmp(&errors[b]));
        ModelData {
            model,
            sample_mask,
            by_error,
        }
    }
}

struct ConsistentPair {
    first: usize,
    second: usize,
    common: BitVec,
}

/// Walks both models' residual rankings in parallel, watching how much of
/// each prefix they have in common. The models are consistent if some
/// prefix covering strictly between 10% and 90% of the data overlaps by
/// at least `min_overlap_fraction`; the returned mask holds the elements
/// ranked low-error by both.
fn check_alpha_consistency<M>(
    a: &ModelData<M>,
    b: &ModelData<M>,
    min_overlap_fraction: f64,
) -> Option<BitVec> {
    let len = a.by_error.len();
    let mut seen_in_one = bitvec![0; len];
    let mut seen_in_both = bitvec![0; len];
    let mut common_count = 0usize;

    for rank in 0..len {
        let first = a.by_error[rank];
        let second = b.by_error[rank];
        if first == second {
            // the same element holds this rank under both models
            seen_in_one.set(first, true);
            seen_in_both.set(first, true);
        } else {
            for index in [first, second] {
                if seen_in_one[index] {
                    // seen before under the other model
                    seen_in_both.set(index, true);
                    common_count += 1;
                } else {
                    seen_in_one.set(index, true);
                }
            }
        }

        let chunk = (rank + 1) as f64;
        if common_count as f64 / chunk >= min_overlap_fraction {
            let coverage = chunk / len as f64;
            if coverage > 0.1 && coverage < 0.9 {
                return Some(seen_in_both);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use bitvec::bitvec;
    use rand::{rngs::StdRng, SeedableRng};

    use super::{check_alpha_consistency, ModelData, Recon, ReconMonitor};
    use crate::{
        base::EstimationError,
        element_set::ElementSet,
        fitter::Fitter,
        testing::{FailingFitter, MeanFitter},
    };

    fn ranking(by_error: Vec<usize>) -> ModelData<()> {
        let len = by_error.len();
        ModelData {
            model: (),
            sample_mask: bitvec![0; len],
            by_error,
        }
    }

    #[test]
    fn alpha_consistency_is_symmetric() {
        let cases = [
            // orderings differing by one transposition agree immediately
            (
                vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
                vec![1, 0, 2, 3, 4, 5, 6, 7, 8, 9],
            ),
            // reversed orderings only line up at full coverage
            (
                vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9],
                vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0],
            ),
            (
                vec![4, 2, 0, 1, 3, 5, 9, 7, 8, 6],
                vec![3, 4, 2, 1, 0, 8, 6, 9, 5, 7],
            ),
        ];
        for (first, second) in cases {
            let a = ranking(first);
            let b = ranking(second);
            let forward = check_alpha_consistency(&a, &b, 0.9801);
            let backward = check_alpha_consistency(&b, &a, 0.9801);
            assert_eq!(forward, backward);
        }
    }

    #[test]
    fn alpha_consistency_verdicts() {
        let a = ranking(vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        let swapped = ranking(vec![1, 0, 2, 3, 4, 5, 6, 7, 8, 9]);
        let common = check_alpha_consistency(&a, &swapped, 0.9801).unwrap();
        assert_eq!(common.iter_ones().collect::<Vec<_>>(), [0, 1]);

        // identical rankings never accumulate cross-rank matches
        let identical = ranking(vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert!(check_alpha_consistency(&a, &identical, 0.9801).is_none());

        // reversed rankings overlap fully only outside the coverage band
        let reversed = ranking(vec![9, 8, 7, 6, 5, 4, 3, 2, 1, 0]);
        assert!(check_alpha_consistency(&a, &reversed, 0.9801).is_none());
    }

    /// Fits single-element samples to precomputed residual tables:
    /// `errors[model][datum]`. Data elements are their own indices.
    struct TableFitter {
        errors: Vec<Vec<f64>>,
    }

    impl TableFitter {
        /// 70 elements: 0..59 form a cluster, two elements per model
        /// (model = index / 2), ranked by rotations of the cluster so
        /// every pair of distinct cluster models is alpha-consistent;
        /// 60..69 are outliers whose models rank the outliers first.
        fn clustered() -> Self {
            let mut errors = vec![vec![0.; 70]; 40];
            for (model, row) in errors.iter_mut().enumerate() {
                for (datum, error) in row.iter_mut().enumerate() {
                    let rank = if model < 30 {
                        if datum < 60 {
                            let step = (datum / 2 + 30 - model) % 30;
                            2 * step + datum % 2
                        } else {
                            datum
                        }
                    } else if datum >= 60 {
                        datum - 60
                    } else {
                        10 + datum
                    };
                    *error = rank as f64;
                }
            }
            TableFitter { errors }
        }
    }

    impl Fitter<usize> for TableFitter {
        type Model = usize;

        fn minimal_sample_size(&self) -> usize {
            1
        }

        fn compute_model<'a, I>(&self, mut subset: I) -> Option<usize>
        where
            I: Iterator<Item = &'a usize> + Clone,
        {
            subset
                .next()
                .map(|&datum| if datum < 60 { datum / 2 } else { 30 + datum - 60 })
        }

        fn error(&self, model: &usize, datum: &usize) -> f64 {
            self.errors[*model][*datum]
        }
    }

    #[derive(Default)]
    struct Tracer {
        distinct_samples: Vec<Vec<usize>>,
        consistent: usize,
        not_consistent: usize,
        inliers: Vec<usize>,
    }

    impl<M> ReconMonitor<M> for Tracer {
        fn model_from_minimal_sample(&mut self, sample: ElementSet, _model: Option<&M>) {
            let indices = sample.iter().collect::<Vec<_>>();
            if !self.distinct_samples.contains(&indices) {
                self.distinct_samples.push(indices);
            }
        }

        fn models_consistent(&mut self, _new: &M, _existing: &M, _common: ElementSet) {
            self.consistent += 1;
        }

        fn models_not_consistent(&mut self, _new: &M, _existing: &M) {
            self.not_consistent += 1;
        }

        fn success(&mut self, _model: &M, inliers: ElementSet) {
            self.inliers = inliers.iter().collect();
        }
    }

    #[test]
    fn undersized_data() {
        let mut recon = Recon::with_rng(StdRng::seed_from_u64(1));
        let result = recon.perform(&MeanFitter { minimal: 3 }, &[8., 8.]);
        assert_eq!(result, Err(EstimationError::NotEnoughData));
    }

    #[test]
    fn exact_size_shortcut() {
        let mut recon = Recon::with_rng(StdRng::seed_from_u64(1));
        let result = recon.perform(&MeanFitter { minimal: 2 }, &[3., 5.]);
        assert_eq!(result, Ok(4.));
    }

    #[test]
    fn finds_the_cluster() {
        let data = (0..70).collect::<Vec<_>>();
        let fitter = TableFitter::clustered();
        let mut recon = Recon::with_rng(StdRng::seed_from_u64(5));
        let mut tracer = Tracer::default();

        let model = recon
            .perform_monitored(&fitter, &data, &mut tracer)
            .unwrap();

        // the consensus is reached by cluster models on cluster elements
        assert!(model < 30);
        assert_eq!(tracer.inliers.len(), 57);
        assert!(tracer.inliers.iter().all(|&index| index < 60));
        // the triangle cannot close before three distinct samples
        assert!(tracer.distinct_samples.len() >= 3);
    }

    /// Admits exactly two models (the sampled element's parity) whose
    /// rankings differ by one transposition, so every mixed pair is
    /// consistent while same-model pairs never are.
    struct ParityFitter;

    impl Fitter<usize> for ParityFitter {
        type Model = usize;

        fn minimal_sample_size(&self) -> usize {
            1
        }

        fn compute_model<'a, I>(&self, mut subset: I) -> Option<usize>
        where
            I: Iterator<Item = &'a usize> + Clone,
        {
            subset.next().map(|&datum| datum % 2)
        }

        fn error(&self, model: &usize, datum: &usize) -> f64 {
            match (*model, *datum) {
                (1, 0) => 1.,
                (1, 1) => 0.,
                _ => *datum as f64,
            }
        }
    }

    #[test]
    fn triangle_needs_three_distinct_models() {
        // a mutually consistent triple would have to repeat one of the
        // two models, and identical rankings are never consistent, so
        // pairs form but no triangle ever closes
        let data = (0..10).collect::<Vec<_>>();
        let mut recon = Recon::with_rng(StdRng::seed_from_u64(9));
        let mut tracer = Tracer::default();
        let result = recon.perform_monitored(&ParityFitter, &data, &mut tracer);
        assert_eq!(result, Err(EstimationError::NoConsensusFound));
        assert!(tracer.consistent > 0);
        assert!(tracer.distinct_samples.len() >= 3);
    }

    #[test]
    fn balanced_clusters_reach_no_consensus() {
        // two equal-size constant clusters: every residual ranking is one
        // cluster block followed by the other, so no prefix inside the
        // 10%-90% band ever overlaps enough between opposing models, and
        // identical rankings never accumulate common points at all
        let mut data = vec![0.; 10];
        data.extend(vec![100.; 10]);

        let mut recon = Recon::with_rng(StdRng::seed_from_u64(6));
        let mut tracer = Tracer::default();
        let result = recon.perform_monitored(&MeanFitter { minimal: 1 }, &data, &mut tracer);
        assert_eq!(result, Err(EstimationError::NoConsensusFound));
        assert_eq!(tracer.consistent, 0);
        assert!(tracer.not_consistent > 0);
    }

    #[test]
    fn fitter_failure_limit() {
        let mut recon = Recon::with_rng(StdRng::seed_from_u64(7));
        recon.set_max_model_failures(5);
        let result = recon.perform(&FailingFitter { minimal: 1 }, &[1., 2., 3.]);
        assert_eq!(result, Err(EstimationError::ModelFitFailureLimitExceeded));
    }
}
