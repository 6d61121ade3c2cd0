//! Column names from a SourceExtractor output parameter file.

use std::path::Path;

use anyhow::{Context, Result};

/// Expand parameter-file text into one name per catalog column.
///
/// Blank and `#` lines are skipped and only the first token of a line
/// counts. A vector parameter `NAME(n)` yields `n` copies of `NAME`.
pub fn expand_parameters(text: &str, prefix: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or_default();
        if !first.contains('(') || first.starts_with('(') {
            names.push(format!("{prefix}{first}"));
            continue;
        }
        // counts may be written `NAME( 3 )`, so parse from the full line
        let (name, rest) = line.split_once('(').unwrap_or((line, ""));
        let count = rest
            .split(')')
            .next()
            .unwrap_or_default()
            .trim()
            .parse::<usize>()
            .with_context(|| format!("line {}: bad element count in {line:?}", lineno + 1))?;
        let name = format!("{prefix}{}", name.trim());
        names.extend(std::iter::repeat(name).take(count));
    }
    Ok(names)
}

pub fn read_parameters(path: &Path, prefix: &str) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading parameter file {}", path.display()))?;
    expand_parameters(&text, prefix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn expands_vectors_and_skips_comments() {
        let text = "\
# detection parameters
NUMBER
X_IMAGE          # barycentre (pixels)

FLUX_RADIUS(2)
MAG_AUTO
";
        assert_eq!(
            expand_parameters(text, "").unwrap(),
            vec!["NUMBER", "X_IMAGE", "FLUX_RADIUS", "FLUX_RADIUS", "MAG_AUTO"]
        );
    }

    #[test]
    fn prefix_applies_to_every_name() {
        assert_eq!(
            expand_parameters("NUMBER\nFLUX_APER(1)\n", "g_").unwrap(),
            vec!["g_NUMBER", "g_FLUX_APER"]
        );
    }

    #[test]
    fn bad_count_is_an_error() {
        assert!(expand_parameters("FLUX_APER(x)\n", "").is_err());
    }
}
