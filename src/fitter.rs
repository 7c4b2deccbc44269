/// An algorithm that can produce a model fitting a subset of the data, and
/// score how well a model explains an individual datum.
///
/// The estimators call `compute_model` with subsets of the caller's data
/// set; the subset iterator is cheap to clone, so a fitter may make
/// multiple passes. A fitter that cannot build a model from the given
/// subset (degenerate configuration, too few elements after filtering)
/// returns `None` rather than a bogus model.
pub trait Fitter<D> {
    type Model;

    /// The smallest number of elements `compute_model` can work with.
    /// Must be positive and constant over the fitter's lifetime.
    fn minimal_sample_size(&self) -> usize;

    fn compute_model<'a, I>(&self, subset: I) -> Option<Self::Model>
    where
        I: Iterator<Item = &'a D> + Clone,
        D: 'a;

    /// The error of `datum` under `model`; non-negative, lower is better.
    fn error(&self, model: &Self::Model, datum: &D) -> f64;
}
