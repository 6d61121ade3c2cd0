//! Batch driver for SourceExtractor, PSFEx and GALFIT.
//!
//! Each stage works on a list of images or catalogs and can be re-run: work
//! whose output already exists is skipped.

pub mod catalog;
pub mod combine;
pub mod config;
pub mod cutout;
pub mod detect;
pub mod error;
pub mod feedme;
pub mod fit;
pub mod fits;
pub mod inputs;
pub mod logging;
pub mod mask;
pub mod merge;
pub mod model_sum;
pub mod naming;
pub mod params;
pub mod pool;
pub mod progress;
pub mod psf;
pub mod results;
pub mod runner;
pub mod select;
pub mod sigma;

#[cfg(all(test, unix))]
mod testutil;
