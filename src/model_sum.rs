//! Paint every fitted model back into a frame the size of the original image.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::fits::{parse_section, write_image, FitsImage, KeyValue, Plane};
use crate::results::{parse_card, MODEL_HDU};

pub const DEFAULT_OUTPUT: &str = "galfit_model_sum.fits";

const SKY_KEY: &str = "2_SKY";

/// A sky-subtracted model and where it sits in the full frame.
pub struct PlacedModel {
    pub plane: Plane<f32>,
    /// Zero-based column and row of the model's first pixel.
    pub origin: (usize, usize),
    pub sky: f64,
}

pub fn read_model(path: &Path) -> Result<PlacedModel> {
    let model = FitsImage::<f32>::load_hdu(path, MODEL_HDU)?;
    let section = model
        .header
        .value("FITSECT")
        .with_context(|| format!("no FITSECT in {}", path.display()))?;
    let (x1, x2, y1, y2) = parse_section(section)?;
    if x1 == 0 || y1 == 0 || x2 < x1 || y2 < y1 {
        bail!("{} has an empty fit section {section}", path.display());
    }
    if (x2 - x1 + 1, y2 - y1 + 1) != (model.plane.width, model.plane.height) {
        bail!(
            "fit section {section} does not match the {}x{} model in {}",
            model.plane.width,
            model.plane.height,
            path.display()
        );
    }
    let sky = match model.header.card(SKY_KEY) {
        Some(card) => parse_card(card)
            .with_context(|| format!("reading {SKY_KEY} of {}", path.display()))?
            .value,
        None => bail!("no {SKY_KEY} in {}", path.display()),
    };
    Ok(PlacedModel {
        plane: model.plane,
        origin: (x1 - 1, y1 - 1),
        sky,
    })
}

/// Add `model - sky` into `frame`, rejecting models that spill over its edge.
pub fn add_model(frame: &mut Plane<f64>, model: &PlacedModel) -> Result<()> {
    let (x0, y0) = model.origin;
    if x0 + model.plane.width > frame.width || y0 + model.plane.height > frame.height {
        bail!(
            "{}x{} model at ({x0}, {y0}) falls outside the {}x{} frame",
            model.plane.width,
            model.plane.height,
            frame.width,
            frame.height
        );
    }
    for row in 0..model.plane.height {
        for col in 0..model.plane.width {
            let value = f64::from(model.plane.get(col, row)) - model.sky;
            frame.data[(y0 + row) * frame.width + x0 + col] += value;
        }
    }
    Ok(())
}

/// Sum `outputs` into a frame shaped like `reference` and write it.
/// Returns how many models were added.
pub fn run(reference: &Path, outputs: &[PathBuf], output: &Path) -> Result<usize> {
    let reference_image = FitsImage::<f32>::load(reference)?;
    let shape = &reference_image.plane;
    let mut frame = Plane::filled(shape.width, shape.height, 0.0f64);

    let mut added = 0;
    for path in outputs {
        info!("{}", path.display());
        match read_model(path).and_then(|model| add_model(&mut frame, &model)) {
            Ok(()) => added += 1,
            Err(e) => warn!("Skipping {}: {e:#}", path.display()),
        }
    }

    let summed = Plane {
        width: frame.width,
        height: frame.height,
        data: frame.data.iter().map(|v| *v as f32).collect(),
    };
    let keys = reference_image.header.descriptive_keys();
    let keys: Vec<(&str, KeyValue)> = keys.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    write_image(output, &summed, &keys)?;
    info!(models = added, "model sum written to {}", output.display());
    Ok(added)
}
