//! Attach GALFIT results to the source lists they were fitted from.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, Column, SuffixTable};
use crate::fits::read_header;
use crate::naming::{fit_directory, replace_tail, stem, SourceFiles};
use crate::pool::for_each_parallel;
use crate::progress::Progress;
use crate::results::{read_fit_record, FitRecord, MODEL_HDU};

pub const COMBINED_SUFFIX: &str = ".galcomb.cat2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombineOutcome {
    Written { rows: usize, fitted: usize },
    /// Fits of one catalog produced different parameter sets.
    Mismatch { counts: Vec<usize> },
}

/// `X.cat` -> (`X.<extension>`, `X.galcomb.cat2`).
pub fn combine_paths(catalog: &Path, extension: &str) -> (PathBuf, PathBuf) {
    (
        replace_tail(catalog, 4, &format!(".{extension}")),
        replace_tail(catalog, 4, COMBINED_SUFFIX),
    )
}

fn read_result(path: &Path) -> Option<FitRecord> {
    if !path.is_file() {
        debug!("no fit output {}", path.display());
        return None;
    }
    match read_header(path, MODEL_HDU) {
        Ok(header) => Some(read_fit_record(&header)),
        Err(e) => {
            warn!("Unable to read fit results from {}: {e:#}", path.display());
            None
        }
    }
}

/// Extend the source list with a value, error and flag column per fitted
/// parameter and write it to `output`.
pub fn combine_catalog(
    source_list: &Path,
    output: &Path,
    subdir: &str,
    suffixes: &SuffixTable,
) -> Result<CombineOutcome> {
    let catalog = Catalog::read(source_list, suffixes)?;
    if catalog.is_empty() {
        bail!("no sources in {}", source_list.display());
    }
    let fit_dir = fit_directory(subdir, source_list);
    let basename = stem(source_list);

    let records = catalog
        .rows()
        .map(|row| -> Result<Option<FitRecord>> {
            let id = row.source_id()?;
            Ok(read_result(&SourceFiles::new(&fit_dir, &basename, id).output))
        })
        .collect::<Result<Vec<_>>>()
        .with_context(|| format!("reading source ids from {}", source_list.display()))?;

    let mut counts: Vec<usize> = records.iter().flatten().map(FitRecord::len).collect();
    counts.sort_unstable();
    counts.dedup();
    let mut layouts = records.iter().flatten().map(|r| &r.labels);
    let template = layouts.next().cloned().unwrap_or_default();
    if counts.len() > 1 || layouts.any(|labels| *labels != template) {
        return Ok(CombineOutcome::Mismatch { counts });
    }

    let fitted = records.iter().filter(|r| r.is_some()).count();
    let mut columns = Vec::with_capacity(template.len() * 3);
    for label in &template {
        columns.push(Column::new(label.clone(), "GALFIT best-fit value"));
        columns.push(Column::new(format!("{label}_ERR"), "GALFIT uncertainty"));
        columns.push(Column::new(
            format!("{label}_FLAG"),
            "0 free, 1 fixed, 2 problematic, 99 unavailable",
        ));
    }
    let values = records
        .iter()
        .map(|record| match record {
            Some(record) => record.values.iter().flat_map(|v| v.as_triple()).collect(),
            None => vec![f64::NAN; columns.len()],
        })
        .collect();

    let rows = catalog.len();
    catalog.with_columns(columns, values)?.write(output)?;
    Ok(CombineOutcome::Written { rows, fitted })
}

pub fn run(
    catalogs: Vec<PathBuf>,
    extension: &str,
    subdir: &str,
    suffixes: &SuffixTable,
    workers: usize,
    progress: &Progress,
) {
    info!(catalogs = catalogs.len(), "combining galfit results");
    for_each_parallel(catalogs, workers, progress, |catalog| {
        let (source_list, output) = combine_paths(&catalog, extension);
        if !source_list.is_file() {
            warn!("Unable to open catalog {}", source_list.display());
            return;
        }
        match combine_catalog(&source_list, &output, subdir, suffixes) {
            Ok(CombineOutcome::Written { rows, fitted }) => {
                info!("{} ({fitted} of {rows} fitted) --> {}", source_list.display(), output.display());
            }
            Ok(CombineOutcome::Mismatch { counts }) => {
                warn!(
                    ?counts,
                    "Number of parameters returned from GALFIT do not match, not writing {}",
                    output.display()
                );
            }
            Err(e) => warn!("Error with catalog {}: {e:#}", source_list.display()),
        }
    });
}
