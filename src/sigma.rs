//! Convert a variance map into the sigma image GALFIT expects.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use tracing::{info, warn};

use crate::fits::{write_image, FitsImage, KeyValue, Plane};

const VARIANCE_SUFFIX: &str = "_var.fits";

/// `X_var.fits` -> `X_sigma.fits`. Only other names use `explicit`.
pub fn sigma_output(variance: &Path, explicit: Option<&Path>) -> Result<PathBuf> {
    let text = variance.to_string_lossy();
    match (text.strip_suffix(VARIANCE_SUFFIX), explicit) {
        (Some(base), explicit) => {
            let derived = PathBuf::from(format!("{base}_sigma.fits"));
            if let Some(ignored) = explicit.filter(|e| *e != derived.as_path()) {
                warn!(
                    "{} ends in {VARIANCE_SUFFIX}, writing {} instead of {}",
                    variance.display(),
                    derived.display(),
                    ignored.display()
                );
            }
            Ok(derived)
        }
        (None, Some(output)) => Ok(output.to_path_buf()),
        (None, None) => bail!(
            "{} does not end in {VARIANCE_SUFFIX}, name the sigma image explicitly",
            variance.display()
        ),
    }
}

pub fn sigma_plane(variance: &Plane<f32>) -> Plane<f32> {
    Plane {
        width: variance.width,
        height: variance.height,
        data: variance.data.iter().map(|v| v.sqrt()).collect(),
    }
}

/// Write the square root of `variance` to `output`, keeping its descriptive
/// header keywords.
pub fn run(variance: &Path, output: Option<&Path>) -> Result<PathBuf> {
    let output = sigma_output(variance, output)?;
    let input = FitsImage::<f32>::load(variance)?;
    let keys = input.header.descriptive_keys();
    let keys: Vec<(&str, KeyValue)> = keys.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    write_image(&output, &sigma_plane(&input.plane), &keys)?;
    info!("{} --> {}", variance.display(), output.display());
    Ok(output)
}
