//! Blank out compact sources so only extended emission is left to fit.
//!
//! Every catalog source with `FWHM_IMAGE` below the threshold is looked up in
//! the segmentation map; its pixels go into a combined bad-pixel mask and are
//! set to NaN in a copy of the image.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::{debug, info};

use crate::catalog::{Catalog, SuffixTable};
use crate::config::MaskConfig;
use crate::fits::{write_image, FitsImage, KeyValue, Plane};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskSummary {
    pub sources: usize,
    pub pixels: usize,
}

/// Ids of sources narrower than `min_fwhm`.
pub fn compact_sources(catalog: &Catalog, min_fwhm: f64) -> Result<HashSet<i32>> {
    let mut ids = HashSet::new();
    for row in catalog.rows() {
        if row.require("FWHM_IMAGE")? < min_fwhm {
            ids.insert(row.source_id()? as i32);
        }
    }
    Ok(ids)
}

/// 1 where the segmentation label belongs to `ids`, 0 elsewhere.
pub fn bad_pixels(segmentation: &Plane<i32>, ids: &HashSet<i32>) -> Plane<i32> {
    Plane {
        width: segmentation.width,
        height: segmentation.height,
        data: segmentation
            .data
            .iter()
            .map(|label| i32::from(ids.contains(label)))
            .collect(),
    }
}

pub fn apply_mask(image: &Plane<f32>, bad: &Plane<i32>) -> Plane<f32> {
    Plane {
        width: image.width,
        height: image.height,
        data: image
            .data
            .iter()
            .zip(&bad.data)
            .map(|(&v, &b)| if b != 0 { f32::NAN } else { v })
            .collect(),
    }
}

pub fn run(
    image: &Path,
    catalog: &Path,
    segmentation: &Path,
    config: &MaskConfig,
    suffixes: &SuffixTable,
) -> Result<MaskSummary> {
    let sources = Catalog::read(catalog, suffixes)?;
    let ids = compact_sources(&sources, config.min_fwhm)
        .with_context(|| format!("reading sources from {}", catalog.display()))?;
    debug!(?ids, "masking compact sources");

    let input = FitsImage::<f32>::load(image)?;
    let segments = FitsImage::<i32>::load(segmentation)?.plane;
    let plane = &input.plane;
    if (segments.width, segments.height) != (plane.width, plane.height) {
        bail!(
            "segmentation map {} is {}x{} but {} is {}x{}",
            segmentation.display(),
            segments.width,
            segments.height,
            image.display(),
            plane.width,
            plane.height
        );
    }

    let bad = bad_pixels(&segments, &ids);
    let pixels = bad.data.iter().filter(|&&b| b != 0).count();
    write_image(&config.mask_output, &bad, &[])?;

    let keys = input.header.descriptive_keys();
    let keys: Vec<(&str, KeyValue)> = keys.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
    write_image(&config.image_output, &apply_mask(plane, &bad), &keys)?;

    info!(
        sources = ids.len(),
        pixels,
        "{} --> {}, {}",
        image.display(),
        config.mask_output.display(),
        config.image_output.display()
    );
    Ok(MaskSummary {
        sources: ids.len(),
        pixels,
    })
}
