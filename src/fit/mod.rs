//! Automated GALFIT fitting of every catalogued source.
//!
//! Images are scanned on the calling thread and their sources fanned out
//! over a bounded queue to the feed writers. Each prepared feed becomes a job
//! on a second bounded queue drained by the fit runners, so fitting starts as
//! soon as the first feed exists. Dropping a queue's last sender shuts its
//! consumers down; a reporter thread polls the shared counters until both
//! pools have finished.

pub mod feeds;
pub mod runs;
pub mod scan;

use std::path::PathBuf;
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::progress::{report_until, CounterSnapshot, FitCounters, Progress};
use crate::runner::ProblemLog;

pub use feeds::{prepare_feed, FeedOutcome, FitJob, SourceJob};
pub use runs::{run_fit, RunOutcome};
pub use scan::{scan_image, ImageContext};

/// Fit every source of every image in `images`.
pub fn run(images: Vec<PathBuf>, config: &PipelineConfig, show_progress: bool) -> CounterSnapshot {
    let fit = &config.fit;
    let workers = config.worker_count();
    let suffixes = config.suffix_table();
    let galfit = config.tools.galfit.as_str();

    let counters = FitCounters::default();
    let problems = ProblemLog::new(&fit.problem_log);
    let progress = Progress::bar(0, "galfit runs", show_progress);

    let (source_tx, source_rx) = bounded::<SourceJob>(config.queue_depth);
    let (fit_tx, fit_rx) = bounded::<FitJob>(config.queue_depth);
    let (stop_tx, stop_rx) = bounded::<()>(0);

    info!(
        images = images.len(),
        workers,
        timeout = ?fit.timeout(),
        "starting galfit pipeline"
    );

    let summary = thread::scope(|scope| {
        let counters = &counters;
        let problems = &problems;

        let reporter = {
            let (progress, stop_rx) = (&progress, &stop_rx);
            scope.spawn(move || report_until(counters, fit.poll_interval(), stop_rx, progress))
        };

        let runners: Vec<_> = (0..workers)
            .map(|worker_id| {
                let fit_rx = fit_rx.clone();
                scope.spawn(move || {
                    debug!(worker_id, "galfit worker started");
                    while let Ok(job) = fit_rx.recv() {
                        run_fit(&job, galfit, fit, problems, counters);
                    }
                    debug!(worker_id, "galfit worker shutting down");
                })
            })
            .collect();
        drop(fit_rx);

        let writers: Vec<_> = (0..workers)
            .map(|worker_id| {
                let source_rx = source_rx.clone();
                let fit_tx = fit_tx.clone();
                scope.spawn(move || {
                    debug!(worker_id, "feed writer started");
                    while let Ok(job) = source_rx.recv() {
                        match prepare_feed(&job, fit) {
                            Ok((fit_job, _)) => {
                                counters.job_queued();
                                if fit_tx.send(fit_job).is_err() {
                                    warn!("galfit workers have shut down");
                                    break;
                                }
                            }
                            Err(e) => {
                                counters.feed_failed();
                                warn!(
                                    "Unable to prepare source {} of {}: {e:#}",
                                    job.source.id,
                                    job.context.image.display()
                                );
                            }
                        }
                    }
                    debug!(worker_id, "feed writer shutting down");
                })
            })
            .collect();
        drop(source_rx);
        drop(fit_tx);

        'images: for image in &images {
            let (context, sources) = match scan_image(image, fit, &suffixes) {
                Ok(found) => found,
                Err(e) => {
                    warn!("Skipping {}: {e:#}", image.display());
                    continue;
                }
            };
            info!("{}: {} sources", image.display(), sources.len());
            for source in sources {
                let job = SourceJob {
                    context: context.clone(),
                    source,
                };
                if source_tx.send(job).is_err() {
                    warn!("feed writers have shut down");
                    break 'images;
                }
            }
        }
        drop(source_tx);

        for (name, handles) in [("feed writer", writers), ("galfit worker", runners)] {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if handle.join().is_err() {
                    warn!("{name} {worker_id} panicked");
                }
            }
        }
        drop(stop_tx);
        reporter.join().unwrap_or_else(|_| counters.snapshot())
    });

    info!(
        feeds = summary.feeds,
        completed = summary.completed,
        skipped = summary.skipped,
        timeouts = summary.timeouts,
        failures = summary.failures,
        feed_failures = summary.feed_failures,
        "galfit pipeline finished"
    );
    summary
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::SuffixTable;
    use crate::fits::{write_image, KeyValue, Plane};
    use std::path::Path;

    pub(crate) fn suffixes() -> SuffixTable {
        PipelineConfig::default().suffix_table()
    }

    /// A 60x60 field with two sources, a segmentation map and a source list.
    /// Returns the image path.
    pub(crate) fn write_field(dir: &Path) -> PathBuf {
        let image = dir.join("field.fits");
        let mut science = Plane::filled(60, 60, 1.0f32);
        let mut segments = Plane::filled(60, 60, 0i32);
        for row in 0..60usize {
            for col in 0..60 {
                let idx = row * 60 + col;
                if col.abs_diff(20) <= 3 && row.abs_diff(20) <= 3 {
                    segments.data[idx] = 1;
                    science.data[idx] = 10.0;
                } else if (28..34).contains(&col) && (28..34).contains(&row) {
                    segments.data[idx] = 2;
                    science.data[idx] = 5.0;
                }
            }
        }
        write_image(&image, &science, &[("FLUXMAG0", KeyValue::Float(1e10))]).unwrap();
        write_image(&dir.join("field.segments"), &segments, &[]).unwrap();
        std::fs::write(
            dir.join("field.udgcat"),
            "\
#   1 NUMBER                 Running object number
#   2 X_IMAGE                Object position along x [pixel]
#   3 Y_IMAGE                Object position along y [pixel]
#   4 FWHM_IMAGE             FWHM assuming a gaussian core [pixel]
#   5 ERRX2WIN_IMAGE         Variance of windowed pos along x [pixel**2]
#   6 ERRY2WIN_IMAGE         Variance of windowed pos along y [pixel**2]
#   7 MAG_AUTO               Kron-like elliptical aperture magnitude [mag]
#   8 FLUX_RADIUS            Fraction-of-light radii [pixel]
#  10 ELONGATION             A_IMAGE/B_IMAGE
#  11 THETA_IMAGE            Position angle (CCW/x) [deg]
1 21.0 21.0 4.0 0.01 0.04 22.5 3.0 5.0 1.25 10.0
2 31.5 31.5 2.0 0.09 0.09 23.1 2.0 3.5 1.1 -45.0
",
        )
        .unwrap();
        image
    }
}
