//! Source detection with SourceExtractor.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::{DetectConfig, ToolsConfig};
use crate::naming::{replace_tail, resolve_companion};
use crate::pool::for_each_parallel;
use crate::progress::Progress;
use crate::runner::{run_logged, ToolCommand};

/// Catalog and segmentation map written for `image` (`X.fits` -> `X.cat`,
/// `X.segments`).
pub fn detection_products(image: &Path) -> (PathBuf, PathBuf) {
    (
        replace_tail(image, 5, ".cat"),
        replace_tail(image, 5, ".segments"),
    )
}

/// SourceExtractor weighting options.
pub fn weight_options(weight: Option<&Path>) -> Vec<String> {
    match weight {
        None => vec!["-WEIGHT_TYPE".into(), "NONE".into()],
        Some(path) => vec!["-WEIGHT_IMAGE".into(), path.display().to_string()],
    }
}

pub fn detect_command(
    tools: &ToolsConfig,
    config: &DetectConfig,
    image: &Path,
    weight: Option<&Path>,
) -> ToolCommand {
    let (catalog, segments) = detection_products(image);
    ToolCommand::new(&tools.sextractor)
        .arg(image)
        .arg("-c")
        .arg(&config.config)
        .arg("-PARAMETERS_NAME")
        .arg(&config.parameters)
        .args(weight_options(weight))
        .arg("-CATALOG_NAME")
        .arg(catalog)
        .args(["-CATALOG_TYPE", "ASCII_HEAD"])
        .args(["-CHECKIMAGE_TYPE", "SEGMENTATION"])
        .arg("-CHECKIMAGE_NAME")
        .arg(segments)
}

/// Run SourceExtractor for every image without a catalog.
pub fn run(images: Vec<PathBuf>, tools: &ToolsConfig, config: &DetectConfig, workers: usize, progress: &Progress) {
    info!(images = images.len(), "running source detection");
    for_each_parallel(images, workers, progress, |image| {
        let (catalog, _) = detection_products(&image);
        if catalog.exists() {
            info!("Skipping {}, catalog exists", image.display());
            return;
        }
        if !image.is_file() {
            warn!("Image {} not found", image.display());
            return;
        }
        let weight = config
            .weight
            .as_deref()
            .map(|pattern| resolve_companion(pattern, &image));
        let command = detect_command(tools, config, &image, weight.as_deref());
        info!("running sex on {}", image.display());
        if let Err(e) = run_logged(&command) {
            warn!("{e:#}");
        }
    });
}
