use crate::fitter::Fitter;

/// Models a subset of `f64` data by its arithmetic mean; the error is the
/// absolute difference. Usable with any positive minimal sample size.
pub struct MeanFitter {
    pub minimal: usize,
}

impl Fitter<f64> for MeanFitter {
    type Model = f64;

    fn minimal_sample_size(&self) -> usize {
        self.minimal
    }

    fn compute_model<'a, I>(&self, subset: I) -> Option<f64>
    where
        I: Iterator<Item = &'a f64> + Clone,
    {
        let (sum, count) = subset.fold((0., 0usize), |(sum, count), x| (sum + x, count + 1));
        (count != 0).then(|| sum / count as f64)
    }

    fn error(&self, model: &f64, datum: &f64) -> f64 {
        (model - datum).abs()
    }
}

/// Never produces a model, exercising the failure-limit paths.
pub struct FailingFitter {
    pub minimal: usize,
}

impl Fitter<f64> for FailingFitter {
    type Model = f64;

    fn minimal_sample_size(&self) -> usize {
        self.minimal
    }

    fn compute_model<'a, I>(&self, _subset: I) -> Option<f64>
    where
        I: Iterator<Item = &'a f64> + Clone,
    {
        None
    }

    fn error(&self, _model: &f64, _datum: &f64) -> f64 {
        0.
    }
}
