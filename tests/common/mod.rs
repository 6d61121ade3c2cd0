//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use galpipe::fits::{write_image, KeyValue, Plane};

#[cfg(unix)]
#[path = "../../src/testutil.rs"]
mod testutil;

#[cfg(unix)]
pub use testutil::fake_tool;

/// A 40x40 image with three isolated sources, its segmentation map and a
/// selected source list. Returns the image path.
pub fn write_field(dir: &Path, name: &str) -> PathBuf {
    let image = dir.join(format!("{name}.fits"));
    let mut science = Plane::filled(40, 40, 0.5f32);
    let mut segments = Plane::filled(40, 40, 0i32);
    for (label, (cx, cy)) in [(1, (8usize, 8usize)), (2, (20, 20)), (3, (31, 12))] {
        for row in cy - 2..=cy + 2 {
            for col in cx - 2..=cx + 2 {
                segments.data[row * 40 + col] = label;
                science.data[row * 40 + col] = 4.0;
            }
        }
    }
    write_image(&image, &science, &[("FLUXMAG0", KeyValue::Float(1e10))]).unwrap();
    write_image(&dir.join(format!("{name}.segments")), &segments, &[]).unwrap();
    std::fs::write(
        dir.join(format!("{name}.udgcat")),
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
1 9.0 9.0 2.0 0.01 0.01 22.5 2.0 3.0 1.2 15.0
2 21.0 21.0 2.5 0.02 0.02 23.0 2.5 3.5 1.5 -30.0
3 32.0 13.0 2.0 0.01 0.04 23.5 1.5 2.5 1.1 80.0
",
    )
    .unwrap();
    image
}
