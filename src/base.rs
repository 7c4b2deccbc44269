use thiserror::Error;

use crate::{element_set::ElementSet, fitter::Fitter};

/// The ways a robust estimation run can fail. All of these are terminal
/// for the call; a successful call always yields a valid model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EstimationError {
    #[error("not enough data to compute a model")]
    NotEnoughData,
    #[error("fitter failed to compute a model from the data set")]
    NoModelFound,
    #[error("fitter failed to compute a model from a minimal sample too many times")]
    ModelFitFailureLimitExceeded,
    #[error("maximum attempt count reached without consensus")]
    NoConsensusFound,
}

/// Shared precondition check run by every estimator before its main loop.
///
/// Fails when the data set is smaller than the fitter's minimal sample
/// size. When it is exactly the minimal size, no sampling is possible:
/// the model is fit to the entire data set, reported to the monitor via
/// `success` with the complete element set, and returned as `Some`. A
/// `None` means the data set is strictly larger and the caller must run
/// its search.
pub(crate) fn perform_check<D, F>(
    fitter: &F,
    data: &[D],
    success: impl FnOnce(&F::Model, ElementSet),
) -> Result<Option<F::Model>, EstimationError>
where
    F: Fitter<D>,
{
    let minimal = fitter.minimal_sample_size();
    if data.len() < minimal {
        return Err(EstimationError::NotEnoughData);
    }
    if data.len() == minimal {
        let model = fitter
            .compute_model(data.iter())
            .ok_or(EstimationError::NoModelFound)?;
        success(&model, ElementSet::Complete(data.len()));
        return Ok(Some(model));
    }
    Ok(None)
}
