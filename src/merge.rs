//! Stack many catalogs sharing one column layout into a single file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::catalog::{Catalog, SuffixTable};
use crate::pool::map_parallel;
use crate::progress::Progress;

/// Read `inputs` in parallel and write them, in input order, to `output`.
/// Unreadable inputs are logged and left out. Returns the number of rows written.
pub fn run(
    inputs: Vec<PathBuf>,
    output: &Path,
    suffixes: &SuffixTable,
    workers: usize,
    progress: &Progress,
) -> Result<usize> {
    info!(catalogs = inputs.len(), "merging catalogs");
    let catalogs = map_parallel(inputs, workers, progress, |path| {
        info!("Reading catalog from {} ...", path.display());
        Catalog::read(&path, suffixes)
            .map_err(|e| warn!("Skipping {}: {e}", path.display()))
            .ok()
    });

    let combined = Catalog::vstack(catalogs.into_iter().flatten().collect())
        .context("combining catalogs")?;
    combined.write(output)?;
    info!("wrote {} sources to {}", combined.len(), output.display());
    Ok(combined.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "\
#   1 NUMBER                 Running object number
#   2 MAG_AUTO               Kron-like elliptical aperture magnitude [mag]
";

    #[test]
    fn stacks_in_input_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut inputs = Vec::new();
        for (name, rows) in [("a.cat", "1 20.5\n2 21.0\n"), ("b.cat", "7 19.25\n")] {
            let path = dir.path().join(name);
            std::fs::write(&path, format!("{HEADER}{rows}")).unwrap();
            inputs.push(path);
        }
        inputs.push(dir.path().join("missing.cat"));
        let output = dir.path().join("combined_catalog.cat");

        let rows = run(inputs, &output, &SuffixTable::new(), 3, &Progress::hidden()).unwrap();
        assert_eq!(rows, 3);
        let combined = Catalog::read(&output, &SuffixTable::new()).unwrap();
        assert_eq!(combined.column("NUMBER").unwrap(), vec![1.0, 2.0, 7.0]);
        assert_eq!(combined.column("MAG_AUTO").unwrap(), vec![20.5, 21.0, 19.25]);
    }

    #[test]
    fn nothing_readable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("combined_catalog.cat");
        let result = run(
            vec![dir.path().join("missing.cat")],
            &output,
            &SuffixTable::new(),
            1,
            &Progress::hidden(),
        );
        assert!(result.is_err());
        assert!(!output.exists());
    }
}
