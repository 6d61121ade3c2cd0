//! File naming conventions shared by every stage.
//!
//! Per-source artifacts are named `<basename>.<id:05>.<kind>` inside the fit
//! directory so fit outputs can be matched back to catalog rows.

use std::path::{Path, PathBuf};

/// Every file belonging to one source in a fit directory.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFiles {
    pub feed: PathBuf,
    pub output: PathBuf,
    pub log: PathBuf,
    pub image: PathBuf,
    pub sigma: PathBuf,
    pub mask: PathBuf,
    pub constraints: PathBuf,
    pub psf: PathBuf,
}

impl SourceFiles {
    pub fn new(dir: &Path, basename: &str, id: u32) -> Self {
        let file = |kind: &str| dir.join(source_file_name(basename, id, kind));
        Self {
            feed: file("galfeed"),
            output: file("galfit.fits"),
            log: file("galfit.log"),
            image: file("image.fits"),
            sigma: file("sigma.fits"),
            mask: file("segm.fits"),
            constraints: file("constraints"),
            psf: file("psf.fits"),
        }
    }
}

pub fn source_file_name(basename: &str, id: u32, kind: &str) -> String {
    format!("{basename}.{id:05}.{kind}")
}

/// Bare file name of `path` as text, as referenced from inside a feed file.
pub fn bare_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` with its final extension removed (`a/b.fits` -> `a/b`).
pub fn without_extension(path: &Path) -> PathBuf {
    path.with_extension("")
}

/// File stem of `path` as text (`a/b.fits` -> `b`).
pub fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `path` as text without its last `n` characters.
pub fn strip_suffix_chars(path: &Path, n: usize) -> String {
    let text = path.to_string_lossy();
    let keep = text.chars().count().saturating_sub(n);
    text.chars().take(keep).collect()
}

/// Drop the last `n` characters of `path` and append `suffix`.
///
/// Catalog products are named by chopping a fixed-length extension off the
/// input (`img.fits` -> `img.cat`, `img.cat` -> `img.udgcat`).
pub fn replace_tail(path: &Path, n: usize, suffix: &str) -> PathBuf {
    let mut out = strip_suffix_chars(path, n);
    out.push_str(suffix);
    PathBuf::from(out)
}

/// Resolve a companion file for `image`.
///
/// A value of the form `search:replace` substitutes every occurrence of
/// `search` in the image path; anything else is used literally.
pub fn resolve_companion(pattern: &str, image: &Path) -> PathBuf {
    match pattern.split_once(':') {
        Some((search, replace)) if !search.is_empty() => {
            PathBuf::from(image.to_string_lossy().replace(search, replace))
        }
        _ => PathBuf::from(pattern),
    }
}

/// Directory receiving feeds, cutouts and fit outputs for `image`.
///
/// `search:replace` patterns are applied to the image path; a plain value is
/// taken relative to the image's directory.
pub fn fit_directory(subdir: &str, image: &Path) -> PathBuf {
    if subdir.contains(':') {
        resolve_companion(subdir, image)
    } else {
        image
            .parent()
            .map(|p| p.join(subdir))
            .unwrap_or_else(|| PathBuf::from(subdir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn source_ids_are_zero_padded() {
        let files = SourceFiles::new(Path::new("run/galfit"), "field_image", 42);
        assert_eq!(files.feed, PathBuf::from("run/galfit/field_image.00042.galfeed"));
        assert_eq!(files.output, PathBuf::from("run/galfit/field_image.00042.galfit.fits"));
        assert_eq!(files.mask, PathBuf::from("run/galfit/field_image.00042.segm.fits"));
        assert_eq!(bare_name(&files.constraints), "field_image.00042.constraints");
    }

    #[test]
    fn ids_wider_than_padding_are_kept() {
        assert_eq!(source_file_name("b", 123456, "galfeed"), "b.123456.galfeed");
    }

    #[test]
    fn companion_substitution() {
        let image = Path::new("data/f1_image.fits");
        assert_eq!(
            resolve_companion("_image.fits:_var.fits", image),
            PathBuf::from("data/f1_var.fits")
        );
        assert_eq!(
            resolve_companion("weights.fits", image),
            PathBuf::from("weights.fits")
        );
    }

    #[test]
    fn fit_directory_relative_to_image() {
        let image = Path::new("data/f1_image.fits");
        assert_eq!(fit_directory("galfit/", image), PathBuf::from("data/galfit/"));
        assert_eq!(
            fit_directory("_image.fits:_fits", image),
            PathBuf::from("data/f1_fits")
        );
    }

    #[test]
    fn tail_replacement() {
        assert_eq!(
            replace_tail(Path::new("data/f1.fits"), 5, ".cat"),
            PathBuf::from("data/f1.cat")
        );
        assert_eq!(
            replace_tail(Path::new("data/f1.cat"), 4, ".galcomb.cat2"),
            PathBuf::from("data/f1.galcomb.cat2")
        );
        assert_eq!(strip_suffix_chars(Path::new("ab"), 5), "");
    }

    #[test]
    fn extension_helpers() {
        assert_eq!(without_extension(Path::new("a/b.fits")), PathBuf::from("a/b"));
        assert_eq!(stem(Path::new("a/b.fits")), "b");
    }
}
