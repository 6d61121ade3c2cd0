//! GALFIT feed and constraint files.
//!
//! The text layout is fixed by GALFIT's parser: a lettered keyword block for
//! the image, PSF and fit region, then one numbered parameter block per model
//! component. Output from [`render_feed`] and [`render_constraints`] must stay
//! byte-identical to what existing fit directories contain, otherwise resumed
//! runs would rewrite every feed.

use serde::{Deserialize, Serialize};

use crate::catalog::SourceRow;
use crate::cutout::{source_center, CutoutBox};

/// Placeholder GALFIT accepts for an absent optional file.
pub const NONE: &str = "none";

/// Light profile used for the galaxy component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    #[default]
    Sersic,
    Devauc,
    Expdisk,
}

impl Profile {
    pub fn name(self) -> &'static str {
        match self {
            Profile::Sersic => "sersic",
            Profile::Devauc => "devauc",
            Profile::Expdisk => "expdisk",
        }
    }
}

/// Keyword block (`A)` .. `P)`) of a feed file. File references are bare
/// names relative to the fit directory GALFIT runs in.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedHeader {
    pub image: String,
    pub output: String,
    pub sigma: String,
    pub psf: String,
    pub psf_supersample: i64,
    pub mask: String,
    pub constraints: String,
    pub region_width: usize,
    pub region_height: usize,
    pub convolution_box: u32,
    pub zero_point: f64,
    pub pixel_scale: f64,
}

/// Initial guesses for the galaxy component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectModel {
    pub profile: Profile,
    pub x: f64,
    pub y: f64,
    pub magnitude: f64,
    pub half_light_radius: f64,
    pub sersic_n: f64,
    pub axis_ratio: f64,
    pub position_angle: f64,
}

impl ObjectModel {
    /// Seed the model from catalog measurements, in cutout coordinates.
    ///
    /// SourceExtractor reports elongation a/b and PA from the x axis; GALFIT
    /// wants b/a and PA from up.
    pub fn from_source(source: &SourceRow, cutout: &CutoutBox, profile: Profile, sersic_n: f64) -> Self {
        let (x, y) = source_center(source);
        Self {
            profile,
            x: x - cutout.x1 as f64,
            y: y - cutout.y1 as f64,
            magnitude: source.mag_auto,
            half_light_radius: source.flux_radius_50,
            sersic_n,
            axis_ratio: 1.0 / source.elongation,
            position_angle: 90.0 - source.theta,
        }
    }
}

/// Positional freedom for the fit, from the windowed centroid variances.
pub fn position_limits(source: &SourceRow) -> (f64, f64) {
    let limit = |var: f64| (3.0 * var.sqrt() + 1.0).min(2.0);
    (limit(source.err_x2), limit(source.err_y2))
}

pub fn render_constraints(dx: f64, dy: f64) -> String {
    format!("\n1   x   {dx:.2} {dx:.2}\n1   y   {dy:.2} {dy:.2}\n\n")
}

pub fn render_feed(header: &FeedHeader, object: &ObjectModel) -> String {
    let mut out = render_header(header);
    out.push_str(&render_objects(object));
    out
}

fn render_header(h: &FeedHeader) -> String {
    let lines = [
        format!("A) {}         # Input data image (FITS file)", h.image),
        format!("B) {}   # Output data image block", h.output),
        format!(
            "C) {}                # Sigma image name (made from data if blank or \"none\")",
            h.sigma
        ),
        format!(
            "D) {}   #        # Input PSF image and (optional) diffusion kernel",
            h.psf
        ),
        format!(
            "E) {}                   # PSF fine sampling factor relative to data",
            h.psf_supersample
        ),
        format!(
            "F) {}                # Bad pixel mask (FITS image or ASCII coord list)",
            h.mask
        ),
        format!(
            "G) {}                # File with parameter constraints (ASCII file)",
            h.constraints
        ),
        format!(
            "H) {} {} {} {}   # Image region to fit (xmin xmax ymin ymax)",
            0, h.region_width, 0, h.region_height
        ),
        format!(
            "I) {size}    {size}          # Size of the convolution box (x y)",
            size = h.convolution_box
        ),
        format!("J) {:.3}              # Magnitude photometric zeropoint", h.zero_point),
        format!(
            "K) {ps:.3} {ps:.3}            # Plate scale (dx dy)    [arcsec per pixel]",
            ps = h.pixel_scale
        ),
        "O) regular             # Display type (regular, curses, both)".to_string(),
        "P) 0                   # Choose: 0=optimize, 1=model, 2=imgblock, 3=subcomps".to_string(),
    ];
    format!("\n{}\n\n", lines.join("\n"))
}

fn render_objects(m: &ObjectModel) -> String {
    let mut lines = vec![
        String::new(),
        "# Object number: 1".to_string(),
        format!("0) {}                 #  object type", m.profile.name()),
        format!("1) {}  {}  1 1  #  position x, y", m.x as i64, m.y as i64),
        format!("3) {:.3}     1          #  Integrated magnitude", m.magnitude),
        format!(
            "4) {:.3}      1          #  R_e (half-light radius)   [pix]",
            m.half_light_radius
        ),
    ];
    if m.profile == Profile::Sersic {
        lines.push(format!(
            "5) {:.3}      1          #  Sersic index n (de Vaucouleurs n=4)",
            m.sersic_n
        ));
        for i in 6..=8 {
            lines.push(format!("{i}) 0.0000      0          #     -----"));
        }
    }
    lines.extend([
        format!("9) {:.3}      1          #  axis ratio (b/a)", m.axis_ratio),
        format!(
            "10) {:.3}    1          #  position angle (PA) [deg: Up=0, Left=90]",
            m.position_angle
        ),
        "Z) 0                      #  output option (0 = resid., 1 = Don't subtract)".to_string(),
        String::new(),
    ]);
    let alternatives: Vec<Profile> = [Profile::Sersic, Profile::Devauc, Profile::Expdisk]
        .into_iter()
        .filter(|p| *p != m.profile)
        .collect();
    for (i, profile) in alternatives.into_iter().enumerate() {
        if i > 0 {
            lines.push("#".to_string());
        }
        lines.extend(commented_component(profile, m));
    }
    lines.extend([
        String::new(),
        "# Object number: 2".to_string(),
        "0) sky                    #  object type".to_string(),
        "1) 0.0000      1          #  sky background at center of fitting region [ADUs]"
            .to_string(),
        "2) 0.0000      0          #  dsky/dx (sky gradient in x)".to_string(),
        "3) 0.0000      0          #  dsky/dy (sky gradient in y)".to_string(),
        "Z) 0                      #  output option (0 = resid., 1 = Don't subtract)".to_string(),
        String::new(),
        String::new(),
    ]);
    lines.join("\n")
}

/// The same component under another profile, commented out, so a feed can
/// be switched by hand without retyping the guesses.
fn commented_component(profile: Profile, m: &ObjectModel) -> Vec<String> {
    let mut lines = vec![
        "# # Object number: 1".to_string(),
        format!("#  0) {}                 #  object type", profile.name()),
        format!("#  1) {}  {}  1 1  #  position x, y", m.x as i64, m.y as i64),
        format!("#  3) {:.3}     1          #  Integrated magnitude", m.magnitude),
        format!(
            "#  4) {:.3}      1          #  R_e (half-light radius)   [pix]",
            m.half_light_radius
        ),
    ];
    if profile == Profile::Sersic {
        lines.push(format!(
            "#  5) {:.3}      1          #  Sersic index n (de Vaucouleurs n=4)",
            m.sersic_n
        ));
    }
    lines.extend([
        format!("#  9) {:.3}      1          #  axis ratio (b/a)", m.axis_ratio),
        format!(
            "# 10) {:.3}    1          #  position angle (PA) [deg: Up=0, Left=90]",
            m.position_angle
        ),
        "#  Z) 0                      #  output option (0 = resid., 1 = Don't subtract)".to_string(),
    ]);
    lines
}
