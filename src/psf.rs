//! PSF modelling: a SourceExtractor LDAC pass followed by PSFEx.
//!
//! For `dir/X_image.fits` the products are `dir/X_image.ldac4psfex` and a set
//! of PSFEx outputs under the basename `dir/X_psf`, ending with the
//! normalised model `dir/X_psf.fits` that the fit stage consumes.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::{PsfConfig, ToolsConfig};
use crate::fits::{magnitude_zero_point, read_header, write_image, FitsImage, KeyValue, Plane};
use crate::naming::{resolve_companion, stem, without_extension};
use crate::pool::for_each_parallel;
use crate::progress::Progress;
use crate::runner::{run_logged, ToolCommand};

/// PSFEx check images, renamed after each run.
pub const CHECK_IMAGES: [&str; 5] = ["chi", "proto", "resi", "samp", "snap"];

const CHECK_IMAGE_TYPES: &str = "CHI,PROTOTYPES,SAMPLES,RESIDUALS,SNAPSHOTS";
const CHECK_PLOT_TYPES: &str = "FWHM,ELLIPTICITY,COUNTS,COUNT_FRACTION,CHI2,RESIDUALS";

/// Header keyword recording the model's oversampling.
pub const SUPERSAMPLE_KEY: &str = "SUPERSMP";

pub fn ldac_catalog(image: &Path) -> PathBuf {
    with_suffix(&without_extension(image), ".ldac4psfex")
}

/// Basename of every PSFEx product for `image`.
pub fn psf_basename(image: &Path) -> PathBuf {
    let base = without_extension(image).to_string_lossy().into_owned();
    let base = base.strip_suffix("_image").unwrap_or(&base);
    PathBuf::from(format!("{base}_psf"))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{suffix}", base.display()))
}

/// Model size in model pixels: 64 image pixels, rounded up to odd.
pub fn psf_size(supersample: f64) -> usize {
    let size = (64.0 * supersample) as usize;
    if size % 2 == 0 {
        size + 1
    } else {
        size
    }
}

pub fn ldac_command(
    tools: &ToolsConfig,
    config: &PsfConfig,
    image: &Path,
    weight: Option<&Path>,
    zero_point: f64,
) -> ToolCommand {
    let weight_opts: Vec<String> = match weight {
        None => vec!["-WEIGHT_TYPE".into(), "NONE".into()],
        Some(path) => vec![
            "-WEIGHT_TYPE".into(),
            "MAP_VAR".into(),
            "-WEIGHT_IMAGE".into(),
            path.display().to_string(),
        ],
    };
    ToolCommand::new(&tools.sextractor)
        .arg(image)
        .arg("-c")
        .arg(&config.sex_config)
        .arg("-PARAMETERS_NAME")
        .arg(&config.sex_parameters)
        .args(weight_opts)
        .arg("-CATALOG_NAME")
        .arg(ldac_catalog(image))
        .args(["-CATALOG_TYPE", "FITS_LDAC"])
        .args(["-WEIGHT_THRESH", "1e8"])
        .arg("-MAG_ZEROPOINT")
        .arg(format!("{zero_point:.4}"))
}

pub fn psfex_command(tools: &ToolsConfig, config: &PsfConfig, ldac: &Path, basename: &Path) -> ToolCommand {
    let bn = basename.display();
    let names = |parts: &[&str]| {
        parts
            .iter()
            .map(|p| format!("{bn}.{p}"))
            .collect::<Vec<_>>()
            .join(",")
    };
    let check_images = names(&["chi.fits", "proto.fits", "samp.fits", "resi.fits", "snap.fits"]);
    let check_plots = names(&["fwhm", "ellipticity", "counts", "countfrac", "chi2", "resi"]);
    let pixel = format!("{:.3}", 1.0 / config.supersample);
    let size = psf_size(config.supersample);

    ToolCommand::new(&tools.psfex)
        .arg("-c")
        .arg(&config.psfex_config)
        .args(["-CHECKIMAGE_TYPE", CHECK_IMAGE_TYPES])
        .arg("-CHECKIMAGE_NAME")
        .arg(check_images)
        .args(["-CHECKPLOT_TYPE", CHECK_PLOT_TYPES])
        .arg("-CHECKPLOT_NAME")
        .arg(check_plots)
        .args(["-OUTCAT_TYPE", "FITS_LDAC"])
        .arg("-OUTCAT_NAME")
        .arg(format!("{bn}.out.cat"))
        .args(["-PSF_SUFFIX", ".psf"])
        .args(["-WRITE_XML", "Y"])
        .arg("-XML_NAME")
        .arg(format!("{bn}.psfexlog.xml"))
        .arg("-PSF_SAMPLING")
        .arg(&pixel)
        .arg("-PSF_PIXELSIZE")
        .arg(&pixel)
        .arg("-PSF_SIZE")
        .arg(format!("{size},{size}"))
        .arg(ldac)
}

/// PSFEx appends the catalog name to every check image; strip it again.
/// Returns how many files were renamed.
pub fn rename_check_images(basename: &Path, image: &Path) -> usize {
    let image_stem = stem(image);
    let mut renamed = 0;
    for part in CHECK_IMAGES {
        let from = with_suffix(basename, &format!(".{part}_{image_stem}.fits"));
        let to = with_suffix(basename, &format!(".{part}.fits"));
        debug!("Renaming {} --> {}", from.display(), to.display());
        if std::fs::rename(&from, &to).is_ok() {
            renamed += 1;
        }
    }
    renamed
}

/// Cut the first `NAXIS2 x NAXIS2` model out of the prototype mosaic,
/// normalise it to unit sum and write it with its oversampling.
pub fn extract_model(proto: &Path, output: &Path, supersample: f64) -> Result<()> {
    let mosaic = FitsImage::<f32>::load_hdu(proto, 0)?;
    let size = mosaic.plane.height;
    let corner = mosaic.plane.section(0, size, 0, size);
    let total: f64 = corner.data.iter().map(|&v| f64::from(v)).sum();
    if total == 0.0 || !total.is_finite() {
        anyhow::bail!("PSF prototype in {} sums to {total}", proto.display());
    }
    let data = corner
        .data
        .iter()
        .map(|&v| (f64::from(v) / total) as f32)
        .collect();
    let model = Plane::new(corner.width, corner.height, data)?;
    write_image(
        output,
        &model,
        &[(SUPERSAMPLE_KEY, KeyValue::Float(supersample))],
    )
}

/// Full PSF extraction for one image. Returns the model path.
pub fn process_image(tools: &ToolsConfig, config: &PsfConfig, image: &Path) -> Result<PathBuf> {
    let ldac = ldac_catalog(image);
    if ldac.exists() {
        info!("Re-using existing LDAC catalog {}", ldac.display());
    } else {
        let header = read_header(image, 0)?;
        let weight = config
            .weight
            .as_deref()
            .map(|pattern| resolve_companion(pattern, image));
        let command = ldac_command(tools, config, image, weight.as_deref(), magnitude_zero_point(&header));
        info!("running sex on {}", image.display());
        run_logged(&command)?;
    }

    let basename = psf_basename(image);
    let command = psfex_command(tools, config, &ldac, &basename);
    info!(command = %command.display(), "running psfex");
    run_logged(&command)?;
    rename_check_images(&basename, image);

    let proto = with_suffix(&basename, ".proto.fits");
    let output = with_suffix(&basename, ".fits");
    extract_model(&proto, &output, config.supersample)
        .with_context(|| format!("extracting PSF model for {}", image.display()))?;
    Ok(output)
}

pub fn run(images: Vec<PathBuf>, tools: &ToolsConfig, config: &PsfConfig, workers: usize, progress: &Progress) {
    info!(images = images.len(), supersample = config.supersample, "extracting PSF models");
    let images: Vec<PathBuf> = images.into_iter().filter(|p| p.is_file()).collect();
    for_each_parallel(images, workers, progress, |image| {
        match process_image(tools, config, &image) {
            Ok(model) => info!("PSF model for {} written to {}", image.display(), model.display()),
            Err(e) => warn!("PSF extraction failed for {}: {e:#}", image.display()),
        }
    });
}
