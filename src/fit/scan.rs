//! Per-image setup for the fit stage: locate the source list and companion
//! files, and load pixel data lazily for the feed writers.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, SourceRow, SuffixTable};
use crate::config::FitConfig;
use crate::fits::{magnitude_zero_point, read_header, FitsImage, Plane};
use crate::naming::{fit_directory, resolve_companion, stem, without_extension};
use crate::psf::SUPERSAMPLE_KEY;

/// Pixel data every cutout of one image is cut from.
#[derive(Debug)]
pub struct ImagePlanes {
    pub science: Plane<f32>,
    pub weight: Option<Plane<f32>>,
    pub segmentation: Option<Plane<i32>>,
}

/// Everything the feed writers need to know about one input image.
#[derive(Debug)]
pub struct ImageContext {
    pub image: PathBuf,
    /// Prefix of every per-source file name.
    pub basename: String,
    pub catalog: PathBuf,
    pub segmentation: Option<PathBuf>,
    pub fit_dir: PathBuf,
    pub weight: Option<PathBuf>,
    pub psf: Option<PathBuf>,
    pub psf_supersample: f64,
    pub zero_point: f64,
    planes: OnceLock<Result<Arc<ImagePlanes>, String>>,
}

impl ImageContext {
    /// Load the image, weight and segmentation planes on first use. The
    /// planes are freed with the last job referencing this image.
    pub fn planes(&self) -> Result<Arc<ImagePlanes>> {
        self.planes
            .get_or_init(|| self.load_planes().map(Arc::new).map_err(|e| format!("{e:#}")))
            .clone()
            .map_err(anyhow::Error::msg)
    }

    fn load_planes(&self) -> Result<ImagePlanes> {
        debug!("loading pixels of {}", self.image.display());
        let science = FitsImage::<f32>::load(&self.image)?.plane;
        let weight = match &self.weight {
            Some(path) => Some(
                FitsImage::<f32>::load(path)
                    .with_context(|| format!("loading weight map for {}", self.image.display()))?
                    .plane,
            ),
            None => None,
        };
        let segmentation = self.segmentation.as_deref().and_then(|path| {
            FitsImage::<i32>::load(path)
                .map(|img| img.plane)
                .map_err(|e| warn!("Unable to generate source masks from {}: {e:#}", path.display()))
                .ok()
        });
        let check = |what: &str, width: usize, height: usize| -> Result<()> {
            if (width, height) != (science.width, science.height) {
                bail!(
                    "{what} is {width}x{height} but {} is {}x{}",
                    self.image.display(),
                    science.width,
                    science.height
                );
            }
            Ok(())
        };
        if let Some(p) = &weight {
            check("weight map", p.width, p.height)?;
        }
        if let Some(p) = &segmentation {
            check("segmentation map", p.width, p.height)?;
        }
        Ok(ImagePlanes {
            science,
            weight,
            segmentation,
        })
    }
}

/// `X.fits` -> `X.<extension>`.
pub fn source_list_path(image: &Path, extension: &str) -> PathBuf {
    PathBuf::from(format!("{}.{extension}", without_extension(image).display()))
}

pub fn segmentation_path(image: &Path) -> PathBuf {
    PathBuf::from(format!("{}.segments", without_extension(image).display()))
}

/// PSF oversampling to announce in the feed.
///
/// A positive configured value wins. Zero asks the model itself: its
/// `SUPERSMP` keyword, else the inverse of PSFEx's `PSF_SAMP`, else 1.
pub fn resolve_supersample(configured: f64, psf: Option<&Path>) -> f64 {
    if configured > 0.0 {
        return configured;
    }
    let Some(psf) = psf else { return 1.0 };
    match read_header(psf, 0) {
        Ok(header) => header
            .float(SUPERSAMPLE_KEY)
            .filter(|v| *v > 0.0)
            .or_else(|| header.float("PSF_SAMP").filter(|v| *v > 0.0).map(|s| 1.0 / s))
            .unwrap_or(1.0),
        Err(e) => {
            warn!("Unable to read PSF sampling from {}: {e:#}", psf.display());
            1.0
        }
    }
}

/// Prepare `image` for fitting and read its sources.
pub fn scan_image(
    image: &Path,
    config: &FitConfig,
    suffixes: &SuffixTable,
) -> Result<(Arc<ImageContext>, Vec<SourceRow>)> {
    let catalog_path = source_list_path(image, &config.catalog_extension);
    if !catalog_path.is_file() {
        bail!("Unable to open catalog {}", catalog_path.display());
    }
    let catalog = Catalog::read(&catalog_path, suffixes)
        .with_context(|| format!("Unable to open catalog {}", catalog_path.display()))?;
    let sources = catalog
        .rows()
        .map(|row| SourceRow::from_row(&row))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("reading sources from {}", catalog_path.display()))?;

    let header = read_header(image, 0)?;
    let zero_point = magnitude_zero_point(&header);

    let segmentation = Some(segmentation_path(image)).filter(|p| p.is_file());
    if segmentation.is_none() {
        debug!("no segmentation map for {}", image.display());
    }

    let fit_dir = fit_directory(&config.subdir, image);
    if !fit_dir.is_dir() {
        info!("Creating directory: {}", fit_dir.display());
        std::fs::create_dir_all(&fit_dir)
            .with_context(|| format!("creating {}", fit_dir.display()))?;
    }

    let weight = config
        .weight
        .as_deref()
        .map(|pattern| resolve_companion(pattern, image));
    let psf = config
        .psf
        .as_deref()
        .map(|pattern| resolve_companion(pattern, image));
    let psf_supersample =
        resolve_supersample(config.psf_supersample, psf.as_deref().filter(|p| p.is_file()));

    let context = ImageContext {
        image: image.to_path_buf(),
        basename: stem(image),
        catalog: catalog_path,
        segmentation,
        fit_dir,
        weight,
        psf,
        psf_supersample,
        zero_point,
        planes: OnceLock::new(),
    };
    Ok((Arc::new(context), sources))
}
