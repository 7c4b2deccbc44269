//! Robust model estimation for data sets contaminated with outliers.
//!
//! The caller supplies the data and a [`Fitter`] that can build a model
//! from a subset and score individual elements against a model; the
//! estimators search for the model supported by the largest plausible
//! inlier subset. Two searches are provided: [`Ransac`], the classic
//! threshold-based consensus with an adaptive iteration budget, and
//! [`Recon`], which cross-validates independently sampled models by
//! residual rank and needs no inlier threshold.

mod base;
mod element_set;
mod fitter;
mod ransac;
mod recon;
#[cfg(test)]
mod testing;

pub use self::{
    base::EstimationError,
    element_set::ElementSet,
    fitter::Fitter,
    ransac::{Ransac, RansacMonitor},
    recon::{Recon, ReconMonitor},
};
