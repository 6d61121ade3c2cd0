//! Candidate selection: keep catalog rows passing every threshold.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, SuffixTable};
use crate::error::CatalogError;
use crate::naming::replace_tail;
use crate::pool::for_each_parallel;
use crate::progress::Progress;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Comparison {
    pub fn holds(self, lhs: f64, rhs: f64) -> bool {
        match self {
            Comparison::Lt => lhs < rhs,
            Comparison::Le => lhs <= rhs,
            Comparison::Gt => lhs > rhs,
            Comparison::Ge => lhs >= rhs,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub column: String,
    pub op: Comparison,
    pub value: f64,
}

impl Criterion {
    pub fn new(column: impl Into<String>, op: Comparison, value: f64) -> Self {
        Self {
            column: column.into(),
            op,
            value,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op.symbol(), self.value)
    }
}

/// Rows of `catalog` satisfying all `criteria`. Every referenced column must
/// exist, even when the catalog is empty.
pub fn select_rows(catalog: &Catalog, criteria: &[Criterion]) -> Result<Catalog, CatalogError> {
    let indices = criteria
        .iter()
        .map(|c| catalog.column_index(&c.column))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(catalog.filter(|row| {
        criteria
            .iter()
            .zip(&indices)
            .all(|(c, &i)| c.op.holds(row.values()[i], c.value))
    }))
}

/// `X.cat` -> `X<suffix>`.
pub fn selection_output(input: &Path, suffix: &str) -> PathBuf {
    replace_tail(input, 4, suffix)
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    Existing,
    Written { total: usize, kept: usize },
    Rejected(String),
}

/// Select from one catalog file into `output`.
pub fn select_catalog(
    input: &Path,
    output: &Path,
    criteria: &[Criterion],
    suffixes: &SuffixTable,
) -> SelectOutcome {
    if output.exists() {
        return SelectOutcome::Existing;
    }
    let result = Catalog::read(input, suffixes).and_then(|catalog| {
        if catalog.is_empty() {
            return Err(CatalogError::Empty);
        }
        let selected = select_rows(&catalog, criteria)?;
        selected.write(output)?;
        Ok((catalog.len(), selected.len()))
    });
    match result {
        Ok((total, kept)) => SelectOutcome::Written { total, kept },
        Err(e) => SelectOutcome::Rejected(e.to_string()),
    }
}

/// Run the selection over `inputs` on a worker pool.
pub fn run(
    inputs: Vec<PathBuf>,
    criteria: &[Criterion],
    output_suffix: &str,
    suffixes: &SuffixTable,
    workers: usize,
    progress: &Progress,
) {
    let rules: Vec<String> = criteria.iter().map(ToString::to_string).collect();
    info!(catalogs = inputs.len(), criteria = %rules.join(" && "), "selecting candidates");
    for_each_parallel(inputs, workers, progress, |input| {
        let output = selection_output(&input, output_suffix);
        match select_catalog(&input, &output, criteria, suffixes) {
            SelectOutcome::Existing => {
                info!("Skipping existing {}", output.display());
            }
            SelectOutcome::Written { total, kept } => {
                info!("{} ({total} sources) --> {} ({kept})", input.display(), output.display());
            }
            SelectOutcome::Rejected(reason) => {
                warn!("Error with catalog {}: {reason}", input.display());
            }
        }
    });
}
