//! SourceExtractor `ASCII_HEAD` catalogs.
//!
//! The header is a run of `#  <n> <NAME> <description> [<unit>]` lines, one per
//! catalog parameter, where `<n>` is the 1-based column of the parameter's
//! first value. Vector parameters (e.g. `FLUX_RADIUS` with several fractions)
//! occupy every column up to the next header entry and are expanded into one
//! named column per element.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use crate::error::CatalogError;

/// Element names for vector columns, keyed by parameter name.
pub type SuffixTable = HashMap<String, Vec<String>>;

/// Parse `NAME:a,b::OTHER:c` into a [`SuffixTable`]. An empty string yields an
/// empty table.
pub fn parse_suffix_table(defs: &str) -> Result<SuffixTable, CatalogError> {
    let mut table = SuffixTable::new();
    for item in defs.split("::").filter(|s| !s.trim().is_empty()) {
        let (key, values) = item
            .split_once(':')
            .ok_or_else(|| CatalogError::BadSuffixTable(item.to_string()))?;
        let values: Vec<String> = values.split(',').map(|v| v.trim().to_string()).collect();
        if key.trim().is_empty() || values.iter().any(String::is_empty) {
            return Err(CatalogError::BadSuffixTable(item.to_string()));
        }
        table.insert(key.trim().to_string(), values);
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub description: String,
    pub unit: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            unit: None,
        }
    }
}

/// A parsed header entry before vector expansion.
struct HeaderEntry {
    number: usize,
    column: Column,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    columns: Vec<Column>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<f64>>,
}

impl Catalog {
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<f64>>) -> Result<Self, CatalogError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(CatalogError::RowWidth {
                    line: i + 1,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Ok(Self {
            columns,
            index,
            rows,
        })
    }

    pub fn read(path: &Path, suffixes: &SuffixTable) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, suffixes)
    }

    pub fn parse(text: &str, suffixes: &SuffixTable) -> Result<Self, CatalogError> {
        let mut entries: Vec<HeaderEntry> = Vec::new();
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut row_lines: Vec<usize> = Vec::new();

        for (lineno, line) in text.lines().enumerate() {
            let line_no = lineno + 1;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Some(comment) = trimmed.strip_prefix('#') {
                if let Some(entry) = parse_header_line(comment, line_no)? {
                    entries.push(entry);
                }
                continue;
            }
            let row = trimmed
                .split_whitespace()
                .map(|tok| {
                    tok.parse::<f64>().map_err(|_| CatalogError::BadValue {
                        line: line_no,
                        token: tok.to_string(),
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            rows.push(row);
            row_lines.push(line_no);
        }

        let width = match (rows.first(), entries.last()) {
            (Some(row), _) => row.len(),
            (None, Some(last)) => last.number,
            (None, None) => 0,
        };
        let columns = expand_columns(entries, width, suffixes);

        for (row, line) in rows.iter().zip(&row_lines) {
            if row.len() != columns.len() {
                return Err(CatalogError::RowWidth {
                    line: *line,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Self::new(columns, rows)
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Result<usize, CatalogError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| CatalogError::MissingColumn(name.to_string()))
    }

    /// Every value of column `name`, in row order.
    pub fn column(&self, name: &str) -> Result<Vec<f64>, CatalogError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[idx]).collect())
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            catalog: self,
            values,
        })
    }

    /// Rows for which `keep` returns true, in a catalog with the same columns.
    pub fn filter<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&Row<'_>) -> bool,
    {
        let rows = self
            .rows()
            .filter(|row| keep(row))
            .map(|row| row.values.to_vec())
            .collect();
        Self {
            columns: self.columns.clone(),
            index: self.index.clone(),
            rows,
        }
    }

    /// Append `columns` with one value per row taken from `values`.
    pub fn with_columns(
        mut self,
        columns: Vec<Column>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self, CatalogError> {
        if values.len() != self.rows.len() {
            return Err(CatalogError::LayoutMismatch(format!(
                "{} value rows for {} catalog rows",
                values.len(),
                self.rows.len()
            )));
        }
        for (row, extra) in self.rows.iter_mut().zip(values) {
            if extra.len() != columns.len() {
                return Err(CatalogError::LayoutMismatch(format!(
                    "{} extra values for {} extra columns",
                    extra.len(),
                    columns.len()
                )));
            }
            row.extend(extra);
        }
        self.columns.extend(columns);
        Self::new(self.columns, self.rows)
    }

    /// Concatenate catalogs sharing one column layout.
    pub fn vstack(catalogs: Vec<Catalog>) -> Result<Self, CatalogError> {
        let mut iter = catalogs.into_iter();
        let mut combined = iter.next().ok_or(CatalogError::Empty)?;
        for (i, next) in iter.enumerate() {
            let names = |c: &Catalog| c.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>();
            if names(&combined) != names(&next) {
                return Err(CatalogError::LayoutMismatch(format!(
                    "catalog {} has columns {:?}, expected {:?}",
                    i + 2,
                    names(&next),
                    names(&combined)
                )));
            }
            combined.rows.extend(next.rows);
        }
        Ok(combined)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for (i, col) in self.columns.iter().enumerate() {
            let _ = write!(out, "# {:>3} {:<22} {}", i + 1, col.name, col.description);
            if let Some(unit) = &col.unit {
                let _ = write!(out, " [{unit}]");
            }
            out.push('\n');
        }
        for row in &self.rows {
            let line: Vec<String> = row.iter().map(|v| format_value(*v)).collect();
            out.push_str(&line.join(" "));
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), CatalogError> {
        std::fs::write(path, self.to_text()).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    catalog: &'a Catalog,
    values: &'a [f64],
}

impl Row<'_> {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.catalog.index.get(name).map(|&i| self.values[i])
    }

    pub fn require(&self, name: &str) -> Result<f64, CatalogError> {
        self.get(name)
            .ok_or_else(|| CatalogError::MissingColumn(name.to_string()))
    }

    pub fn values(&self) -> &[f64] {
        self.values
    }

    /// The `NUMBER` column as a source id; must be a positive whole number.
    pub fn source_id(&self) -> Result<u32, CatalogError> {
        let number = self.require("NUMBER")?;
        if number.fract() != 0.0 || !(1.0..=u32::MAX as f64).contains(&number) {
            return Err(CatalogError::BadSourceId(number));
        }
        Ok(number as u32)
    }
}

/// The catalog quantities the fit stage reads for one detected source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceRow {
    pub id: u32,
    pub x_image: f64,
    pub y_image: f64,
    pub fwhm: f64,
    pub err_x2: f64,
    pub err_y2: f64,
    pub mag_auto: f64,
    pub flux_radius_50: f64,
    pub elongation: f64,
    pub theta: f64,
}

impl SourceRow {
    pub fn from_row(row: &Row<'_>) -> Result<Self, CatalogError> {
        Ok(Self {
            id: row.source_id()?,
            x_image: row.require("X_IMAGE")?,
            y_image: row.require("Y_IMAGE")?,
            fwhm: row.require("FWHM_IMAGE")?,
            err_x2: row.require("ERRX2WIN_IMAGE")?,
            err_y2: row.require("ERRY2WIN_IMAGE")?,
            mag_auto: row.require("MAG_AUTO")?,
            flux_radius_50: row.require("FLUX_RADIUS_50")?,
            elongation: row.require("ELONGATION")?,
            theta: row.require("THETA_IMAGE")?,
        })
    }
}

fn parse_header_line(comment: &str, line: usize) -> Result<Option<HeaderEntry>, CatalogError> {
    let mut tokens = comment.split_whitespace();
    let number = match tokens.next().map(str::parse::<usize>) {
        Some(Ok(n)) => n,
        // free-form comment
        _ => return Ok(None),
    };
    let name = tokens.next().ok_or_else(|| CatalogError::BadHeader {
        line,
        text: comment.trim().to_string(),
    })?;
    if number == 0 {
        return Err(CatalogError::BadHeader {
            line,
            text: comment.trim().to_string(),
        });
    }
    let mut rest: Vec<&str> = tokens.collect();
    let unit = match rest.last() {
        Some(last) if last.starts_with('[') && last.ends_with(']') => {
            let unit = last[1..last.len() - 1].to_string();
            rest.pop();
            Some(unit)
        }
        _ => None,
    };
    Ok(Some(HeaderEntry {
        number,
        column: Column {
            name: name.to_string(),
            description: rest.join(" "),
            unit,
        },
    }))
}

fn expand_columns(mut entries: Vec<HeaderEntry>, width: usize, suffixes: &SuffixTable) -> Vec<Column> {
    if entries.is_empty() {
        return (1..=width)
            .map(|n| Column::new(format!("COLUMN_{n}"), ""))
            .collect();
    }
    entries.sort_by_key(|e| e.number);

    let mut columns = Vec::with_capacity(width);
    for (i, entry) in entries.iter().enumerate() {
        let next = entries
            .get(i + 1)
            .map(|e| e.number)
            .unwrap_or(width.max(entry.number) + 1);
        let span = next.saturating_sub(entry.number).max(1);
        if span == 1 {
            columns.push(entry.column.clone());
            continue;
        }
        let names = suffixes.get(&entry.column.name);
        for element in 0..span {
            let suffix = names
                .and_then(|n| n.get(element).cloned())
                .unwrap_or_else(|| (element + 1).to_string());
            columns.push(Column {
                name: format!("{}_{suffix}", entry.column.name),
                ..entry.column.clone()
            });
        }
    }
    columns
}

/// Render a catalog value: integers without a fraction, everything else in
/// the shortest form that reads back identically.
pub fn format_value(v: f64) -> String {
    if v.is_nan() {
        "nan".to_string()
    } else if v.is_infinite() {
        let text = if v > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else if v.abs() >= 1e-4 && v.abs() < 1e10 {
        format!("{v}")
    } else {
        format!("{v:e}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
#   1 NUMBER                 Running object number
#   2 X_IMAGE                Object position along x                                    [pixel]
#   3 FLUX_RADIUS            Fraction-of-light radii                                    [pixel]
#   5 MAG_AUTO               Kron-like elliptical aperture magnitude                    [mag]
1 10.5 3.2 5.1 21.3
2 40.25 7.9 12.0 23.8
";

    fn default_suffixes() -> SuffixTable {
        parse_suffix_table("FLUX_RADIUS:50,80").unwrap()
    }

    #[test]
    fn expands_vector_columns_with_suffixes() {
        let cat = Catalog::parse(SAMPLE, &default_suffixes()).unwrap();
        let names: Vec<&str> = cat.columns().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["NUMBER", "X_IMAGE", "FLUX_RADIUS_50", "FLUX_RADIUS_80", "MAG_AUTO"]
        );
        assert_eq!(cat.columns()[1].unit.as_deref(), Some("pixel"));
        let second = cat.rows().nth(1).unwrap();
        assert_eq!(second.get("FLUX_RADIUS_80"), Some(12.0));
    }

    #[test]
    fn falls_back_to_numeric_suffixes() {
        let cat = Catalog::parse(SAMPLE, &SuffixTable::new()).unwrap();
        assert!(cat.column_index("FLUX_RADIUS_2").is_ok());
    }

    #[test]
    fn last_header_can_be_a_vector() {
        let text = "#   1 NUMBER id\n#   2 FLUX_APER aperture fluxes\n7 1.0 2.0 3.0\n";
        let cat = Catalog::parse(text, &SuffixTable::new()).unwrap();
        assert_eq!(cat.columns().len(), 4);
        assert_eq!(cat.columns()[3].name, "FLUX_APER_3");
    }

    #[test]
    fn rejects_short_rows() {
        let text = format!("{SAMPLE}3 1.0 2.0\n");
        let err = Catalog::parse(&text, &default_suffixes()).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::RowWidth {
                line: 7,
                expected: 5,
                found: 3
            }
        ));
    }

    #[test]
    fn rejects_non_numeric_values() {
        let text = "#   1 NUMBER id\nabc\n";
        assert!(matches!(
            Catalog::parse(text, &SuffixTable::new()),
            Err(CatalogError::BadValue { line: 2, .. })
        ));
    }

    #[test]
    fn headerless_catalogs_get_positional_names() {
        let cat = Catalog::parse("1 2 3\n4 5 6\n", &SuffixTable::new()).unwrap();
        assert_eq!(cat.columns()[2].name, "COLUMN_3");
    }

    #[test]
    fn written_text_reads_back() {
        let cat = Catalog::parse(SAMPLE, &default_suffixes()).unwrap();
        let again = Catalog::parse(&cat.to_text(), &default_suffixes()).unwrap();
        assert_eq!(again, cat);
    }

    #[test]
    fn vstack_requires_matching_layouts() {
        let a = Catalog::parse(SAMPLE, &default_suffixes()).unwrap();
        let b = Catalog::parse(SAMPLE, &default_suffixes()).unwrap();
        let stacked = Catalog::vstack(vec![a.clone(), b]).unwrap();
        assert_eq!(stacked.len(), 4);
        assert_eq!(stacked.column("NUMBER").unwrap(), vec![1.0, 2.0, 1.0, 2.0]);

        let other = Catalog::parse("#   1 NUMBER id\n1\n", &SuffixTable::new()).unwrap();
        assert!(matches!(
            Catalog::vstack(vec![a, other]),
            Err(CatalogError::LayoutMismatch(_))
        ));
        assert!(matches!(Catalog::vstack(vec![]), Err(CatalogError::Empty)));
    }

    #[test]
    fn source_ids_must_be_whole_and_positive() {
        let text = "#   1 NUMBER id\n12\n-3\n4.5\n0\n";
        let cat = Catalog::parse(text, &SuffixTable::new()).unwrap();
        let ids: Vec<_> = cat.rows().map(|r| r.source_id()).collect();
        assert_eq!(ids[0].as_ref().ok(), Some(&12));
        for bad in &ids[1..] {
            assert!(matches!(bad, Err(CatalogError::BadSourceId(_))));
        }
    }

    #[test]
    fn suffix_table_syntax() {
        let table = parse_suffix_table("FLUX_RADIUS:50,80::FLUX_APER:3,6,9").unwrap();
        assert_eq!(table["FLUX_APER"], vec!["3", "6", "9"]);
        assert!(parse_suffix_table("").unwrap().is_empty());
        assert!(parse_suffix_table("FLUX_RADIUS").is_err());
    }

    #[test]
    fn value_formatting() {
        assert_eq!(format_value(17.0), "17");
        assert_eq!(format_value(21.375), "21.375");
        assert_eq!(format_value(f64::NAN), "nan");
        assert_eq!(format_value(2.5e-7), "2.5e-7");
    }
}
