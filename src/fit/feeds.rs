//! Stage one: cutouts, constraints and feed file for a single source.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::debug;

use super::scan::ImageContext;
use crate::catalog::SourceRow;
use crate::config::FitConfig;
use crate::cutout::{mask_for_source, CutoutBox};
use crate::feedme::{
    position_limits, render_constraints, render_feed, FeedHeader, ObjectModel, NONE,
};
use crate::fits::{write_image, KeyValue};
use crate::naming::{bare_name, SourceFiles};

/// One catalog row waiting for its feed.
#[derive(Debug, Clone)]
pub struct SourceJob {
    pub context: Arc<ImageContext>,
    pub source: SourceRow,
}

/// A feed ready for the fitter.
#[derive(Debug, Clone, PartialEq)]
pub struct FitJob {
    pub feed: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    /// Directory the fitter runs in; feed references are relative to it.
    pub dir: PathBuf,
}

impl FitJob {
    fn for_files(files: &SourceFiles, dir: &Path) -> Self {
        Self {
            feed: files.feed.clone(),
            output: files.output.clone(),
            log: files.log.clone(),
            dir: dir.to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// A feed from an earlier run was found and left alone.
    Reused,
    Written,
}

/// Write everything GALFIT needs for `job`, unless a feed already exists.
pub fn prepare_feed(job: &SourceJob, config: &FitConfig) -> Result<(FitJob, FeedOutcome)> {
    let ctx = &job.context;
    let source = &job.source;
    let files = SourceFiles::new(&ctx.fit_dir, &ctx.basename, source.id);
    let fit_job = FitJob::for_files(&files, &ctx.fit_dir);

    if files.feed.exists() {
        debug!("Skipping existing feed-file {}", files.feed.display());
        return Ok((fit_job, FeedOutcome::Reused));
    }

    let planes = ctx.planes()?;
    let science = &planes.science;
    let cutout = CutoutBox::around(source, config.max_size, science.width, science.height);
    if cutout.is_empty() {
        bail!(
            "source {} at ({}, {}) lies outside {}",
            source.id,
            source.x_image,
            source.y_image,
            ctx.image.display()
        );
    }
    let origin = [
        ("SRC_X1", KeyValue::Int(cutout.x1 as i64)),
        ("SRC_Y1", KeyValue::Int(cutout.y1 as i64)),
    ];

    write_image(&files.image, &cutout.cut(science), &origin)?;

    let sigma = match &planes.weight {
        Some(weight) => {
            write_image(&files.sigma, &cutout.cut(weight), &origin)?;
            bare_name(&files.sigma)
        }
        None => NONE.to_string(),
    };

    let mask = match &planes.segmentation {
        Some(segmentation) => {
            let mask = mask_for_source(&cutout.cut(segmentation), source.id);
            write_image(&files.mask, &mask, &origin)?;
            bare_name(&files.mask)
        }
        None => NONE.to_string(),
    };

    let psf = match ctx.psf.as_deref().filter(|p| p.is_file()) {
        Some(model) => {
            std::fs::copy(model, &files.psf).with_context(|| {
                format!("copying {} to {}", model.display(), files.psf.display())
            })?;
            bare_name(&files.psf)
        }
        None => NONE.to_string(),
    };

    let (dx, dy) = position_limits(source);
    std::fs::write(&files.constraints, render_constraints(dx, dy))
        .with_context(|| format!("writing {}", files.constraints.display()))?;

    let header = FeedHeader {
        image: bare_name(&files.image),
        output: bare_name(&files.output),
        sigma,
        psf,
        psf_supersample: ctx.psf_supersample as i64,
        mask,
        constraints: bare_name(&files.constraints),
        region_width: cutout.width(),
        region_height: cutout.height(),
        convolution_box: config.convolution_box,
        zero_point: ctx.zero_point,
        pixel_scale: config.pixel_scale,
    };
    let object = ObjectModel::from_source(source, &cutout, config.profile, config.sersic_n);

    // written last: its presence marks the source as prepared
    let partial = files.feed.with_extension("galfeed.partial");
    std::fs::write(&partial, render_feed(&header, &object))
        .with_context(|| format!("writing {}", partial.display()))?;
    std::fs::rename(&partial, &files.feed)
        .with_context(|| format!("moving feed into place at {}", files.feed.display()))?;

    Ok((fit_job, FeedOutcome::Written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::scan::scan_image;
    use crate::fit::tests::{suffixes, write_field};
    use crate::fits::{FitsImage, Plane};
    use crate::psf::SUPERSAMPLE_KEY;

    #[test]
    fn writes_cutouts_constraints_and_feed() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_field(dir.path());
        let config = FitConfig::default();
        let (context, sources) = scan_image(&image, &config, &suffixes()).unwrap();
        let job = SourceJob {
            context,
            source: sources[0],
        };

        let (fit_job, outcome) = prepare_feed(&job, &config).unwrap();
        assert_eq!(outcome, FeedOutcome::Written);
        assert_eq!(fit_job.dir, dir.path().join("galfit/"));
        assert_eq!(fit_job.feed, dir.path().join("galfit/field.00001.galfeed"));

        let cutout = FitsImage::<f32>::load(&dir.path().join("galfit/field.00001.image.fits")).unwrap();
        // fwhm 4 at (21, 21): [8, 32) on both axes
        assert_eq!((cutout.plane.width, cutout.plane.height), (24, 24));
        assert_eq!(cutout.header.int("SRC_X1"), Some(8));

        let mask = FitsImage::<i32>::load(&dir.path().join("galfit/field.00001.segm.fits")).unwrap();
        assert!(!mask.plane.data.contains(&1));
        assert!(mask.plane.data.contains(&2));

        let feed = std::fs::read_to_string(&fit_job.feed).unwrap();
        assert!(feed.contains("A) field.00001.image.fits "));
        assert!(feed.contains("C) none "));
        assert!(feed.contains("F) field.00001.segm.fits "));
        assert!(feed.contains("H) 0 24 0 24 "));
        assert!(feed.contains("J) 25.000 "));
        assert!(dir.path().join("galfit/field.00001.constraints").is_file());
        assert!(!dir.path().join("galfit/field.00001.galfeed.partial").exists());
    }

    fn feed_with_psf(keys: &[(&str, KeyValue)]) -> String {
        let dir = tempfile::tempdir().unwrap();
        let image = write_field(dir.path());
        let model = dir.path().join("field.psf.fits");
        write_image(&model, &Plane::filled(5, 5, 0.04f32), keys).unwrap();

        let mut config = FitConfig::default();
        config.psf = Some(".fits:.psf.fits".into());
        config.psf_supersample = 0.0;
        let (context, sources) = scan_image(&image, &config, &suffixes()).unwrap();
        let job = SourceJob {
            context,
            source: sources[0],
        };
        let (fit_job, _) = prepare_feed(&job, &config).unwrap();

        let copy = dir.path().join("galfit/field.00001.psf.fits");
        assert_eq!(std::fs::read(&copy).unwrap(), std::fs::read(&model).unwrap());
        std::fs::read_to_string(&fit_job.feed).unwrap()
    }

    #[test]
    fn psf_is_copied_and_sampling_read_from_psfex() {
        let feed = feed_with_psf(&[("PSF_SAMP", KeyValue::Float(0.5))]);
        assert!(feed.contains(
            "\nD) field.00001.psf.fits   #        # Input PSF image and (optional) diffusion kernel\n"
        ));
        assert!(feed.contains("\nE) 2                   # PSF fine sampling factor relative to data\n"));
    }

    #[test]
    fn supersample_key_wins_over_psf_samp() {
        let feed = feed_with_psf(&[
            ("PSF_SAMP", KeyValue::Float(0.5)),
            (SUPERSAMPLE_KEY, KeyValue::Float(3.0)),
        ]);
        assert!(feed.contains("\nD) field.00001.psf.fits "));
        assert!(feed.contains("\nE) 3 "));
    }

    #[test]
    fn missing_psf_leaves_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_field(dir.path());
        let mut config = FitConfig::default();
        config.psf = Some(".fits:.psf.fits".into());
        let (context, sources) = scan_image(&image, &config, &suffixes()).unwrap();
        let job = SourceJob {
            context,
            source: sources[0],
        };
        let (fit_job, _) = prepare_feed(&job, &config).unwrap();
        let feed = std::fs::read_to_string(&fit_job.feed).unwrap();
        assert!(feed.contains("\nD) none "));
        assert!(feed.contains("\nE) 1 "));
        assert!(!dir.path().join("galfit/field.00001.psf.fits").exists());
    }

    #[test]
    fn existing_feed_is_reused_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let image = write_field(dir.path());
        let config = FitConfig::default();
        let (context, sources) = scan_image(&image, &config, &suffixes()).unwrap();
        std::fs::write(dir.path().join("galfit/field.00002.galfeed"), "hand edited").unwrap();

        let job = SourceJob {
            context,
            source: sources[1],
        };
        let (_, outcome) = prepare_feed(&job, &config).unwrap();
        assert_eq!(outcome, FeedOutcome::Reused);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("galfit/field.00002.galfeed")).unwrap(),
            "hand edited"
        );
        assert!(!dir.path().join("galfit/field.00002.image.fits").exists());
    }
}
