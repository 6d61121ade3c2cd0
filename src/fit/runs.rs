//! Stage two: one GALFIT invocation per feed.

use std::time::Instant;

use tracing::{debug, info, warn};

use super::feeds::FitJob;
use crate::config::FitConfig;
use crate::naming::bare_name;
use crate::progress::FitCounters;
use crate::runner::{Completion, ProblemLog, ToolCommand};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Output from an earlier run exists.
    Existing,
    DryRun,
    Finished { code: Option<i32> },
    TimedOut,
    NotStarted,
}

pub fn fit_command(galfit: &str, job: &FitJob, config: &FitConfig) -> ToolCommand {
    ToolCommand::new(galfit)
        .arg(bare_name(&job.feed))
        .current_dir(&job.dir)
        .timeout(config.timeout())
}

/// Run the fitter for `job` and account for it in `counters`.
pub fn run_fit(
    job: &FitJob,
    galfit: &str,
    config: &FitConfig,
    problems: &ProblemLog,
    counters: &FitCounters,
) -> RunOutcome {
    if job.output.exists() && !config.redo {
        debug!("Skipping galfit run for completed file ({})", job.output.display());
        counters.job_skipped();
        return RunOutcome::Existing;
    }

    let command = fit_command(galfit, job, config);
    if config.dry_run {
        info!(dir = %job.dir.display(), "{}", command.display());
        counters.job_skipped();
        return RunOutcome::DryRun;
    }

    let start = Instant::now();
    let outcome = match command.run() {
        Ok(output) => match output.completion {
            Completion::Exited(code) => {
                if code != Some(0) {
                    counters.failed();
                    warn!(
                        feed = %job.feed.display(),
                        ?code,
                        "galfit return code was not 0"
                    );
                }
                if let Err(e) = std::fs::write(&job.log, output.combined()) {
                    warn!("Unable to write {}: {e}", job.log.display());
                }
                RunOutcome::Finished { code }
            }
            Completion::TimedOut => {
                counters.timed_out();
                warn!(feed = %job.feed.display(), "Terminating galfit after timeout");
                let note = format!(
                    "timeout after {:.1}s: {} (in {})",
                    output.elapsed.as_secs_f64(),
                    command.display(),
                    job.dir.display()
                );
                if let Err(e) = problems.append(&note) {
                    warn!("{e:#}");
                }
                RunOutcome::TimedOut
            }
        },
        Err(e) => {
            counters.failed();
            warn!(feed = %job.feed.display(), "{e}");
            RunOutcome::NotStarted
        }
    };
    let elapsed = start.elapsed();
    debug!("{} ==> {:?} after {:.3}s", command.display(), outcome, elapsed.as_secs_f64());
    counters.job_ran(elapsed);
    outcome
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::fake_tool;
    use std::path::Path;
    use std::time::Duration;

    fn job(dir: &Path) -> FitJob {
        FitJob {
            feed: dir.join("f.00001.galfeed"),
            output: dir.join("f.00001.galfit.fits"),
            log: dir.join("f.00001.galfit.log"),
            dir: dir.to_path_buf(),
        }
    }

    fn queued(counters: &FitCounters) -> &FitCounters {
        counters.job_queued();
        counters
    }

    #[test]
    fn completed_fit_writes_log() {
        let dir = tempfile::tempdir().unwrap();
        let galfit = fake_tool(
            dir.path(),
            "galfit",
            "echo \"fitting $1\"; echo warn >&2; touch \"$(basename \"$1\" .galfeed).galfit.fits\"",
        );
        let job = job(dir.path());
        let counters = FitCounters::default();
        let problems = ProblemLog::new(dir.path().join("problems.log"));

        let outcome = run_fit(
            &job,
            galfit.to_str().unwrap(),
            &FitConfig::default(),
            &problems,
            queued(&counters),
        );
        assert_eq!(outcome, RunOutcome::Finished { code: Some(0) });
        assert!(job.output.exists());
        assert_eq!(
            std::fs::read_to_string(&job.log).unwrap(),
            "fitting f.00001.galfeed\nwarn\n"
        );
        let snap = counters.snapshot();
        assert_eq!((snap.pending, snap.completed, snap.failures), (0, 1, 0));
    }

    #[test]
    fn existing_output_is_skipped_unless_redo() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let galfit = fake_tool(dir.path(), "galfit", &format!("touch {}", marker.display()));
        let job = job(dir.path());
        std::fs::write(&job.output, b"").unwrap();
        let counters = FitCounters::default();
        let problems = ProblemLog::new(dir.path().join("problems.log"));
        let mut config = FitConfig::default();

        let outcome = run_fit(&job, galfit.to_str().unwrap(), &config, &problems, queued(&counters));
        assert_eq!(outcome, RunOutcome::Existing);
        assert!(!marker.exists());
        assert_eq!(counters.snapshot().skipped, 1);

        config.redo = true;
        let outcome = run_fit(&job, galfit.to_str().unwrap(), &config, &problems, queued(&counters));
        assert_eq!(outcome, RunOutcome::Finished { code: Some(0) });
        assert!(marker.exists());
    }

    #[test]
    fn dry_run_does_not_invoke() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let galfit = fake_tool(dir.path(), "galfit", &format!("touch {}", marker.display()));
        let config = FitConfig {
            dry_run: true,
            ..FitConfig::default()
        };
        let counters = FitCounters::default();
        let problems = ProblemLog::new(dir.path().join("problems.log"));
        let outcome = run_fit(
            &job(dir.path()),
            galfit.to_str().unwrap(),
            &config,
            &problems,
            queued(&counters),
        );
        assert_eq!(outcome, RunOutcome::DryRun);
        assert!(!marker.exists());
        assert_eq!(counters.snapshot().pending, 0);
    }

    #[test]
    fn timeout_is_noted_in_problem_log() {
        let dir = tempfile::tempdir().unwrap();
        let galfit = fake_tool(dir.path(), "galfit", "exec sleep 30");
        let config = FitConfig {
            timeout_secs: 0.3,
            ..FitConfig::default()
        };
        let counters = FitCounters::default();
        let problems = ProblemLog::new(dir.path().join("problems.log"));
        let start = Instant::now();
        let outcome = run_fit(
            &job(dir.path()),
            galfit.to_str().unwrap(),
            &config,
            &problems,
            queued(&counters),
        );
        assert_eq!(outcome, RunOutcome::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(10));
        let noted = std::fs::read_to_string(problems.path()).unwrap();
        assert!(noted.contains("timeout after"));
        assert!(noted.contains("f.00001.galfeed"));
        let snap = counters.snapshot();
        assert_eq!((snap.timeouts, snap.completed, snap.pending), (1, 1, 0));
    }

    #[test]
    fn failing_fit_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let galfit = fake_tool(dir.path(), "galfit", "echo bad feed >&2; exit 1");
        let counters = FitCounters::default();
        let problems = ProblemLog::new(dir.path().join("problems.log"));
        let job = job(dir.path());
        let outcome = run_fit(
            &job,
            galfit.to_str().unwrap(),
            &FitConfig::default(),
            &problems,
            queued(&counters),
        );
        assert_eq!(outcome, RunOutcome::Finished { code: Some(1) });
        assert_eq!(counters.snapshot().failures, 1);
        assert_eq!(std::fs::read_to_string(&job.log).unwrap(), "bad feed\n");
    }
}
