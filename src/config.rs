//! Layered pipeline configuration.
//!
//! Sources, highest priority last:
//! 1. Built-in defaults
//! 2. `galpipe.toml` in the working directory, or the file passed with `--config`
//! 3. Environment variables (`GALPIPE_*` prefix, `__` between nested keys)
//!
//! `GALPIPE_FIT__TIMEOUT_SECS=120` maps to `fit.timeout_secs`,
//! `GALPIPE_TOOLS__GALFIT=/opt/galfit` to `tools.galfit`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::catalog::{parse_suffix_table, SuffixTable};
use crate::error::ConfigError;
use crate::feedme::Profile;
use crate::select::{Comparison, Criterion};

/// Configuration file looked for when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "galpipe.toml";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Worker threads per pool; 0 uses every available core.
    #[serde(default)]
    pub workers: usize,
    /// Capacity of the bounded job queues.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub detect: DetectConfig,
    #[serde(default)]
    pub psf: PsfConfig,
    #[serde(default)]
    pub select: SelectConfig,
    #[serde(default)]
    pub fit: FitConfig,
    #[serde(default)]
    pub merge: MergeConfig,
    #[serde(default)]
    pub mask: MaskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

const fn default_queue_depth() -> usize {
    256
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tools: ToolsConfig::default(),
            workers: 0,
            queue_depth: default_queue_depth(),
            catalog: CatalogConfig::default(),
            detect: DetectConfig::default(),
            psf: PsfConfig::default(),
            select: SelectConfig::default(),
            fit: FitConfig::default(),
            merge: MergeConfig::default(),
            mask: MaskConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Executables, looked up on `PATH` unless given as paths.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolsConfig {
    pub sextractor: String,
    pub psfex: String,
    pub galfit: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            sextractor: "sex".into(),
            psfex: "psfex".into(),
            galfit: "galfit".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Element names for vector columns, `NAME:a,b::OTHER:c`.
    pub array_suffixes: String,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            array_suffixes: "FLUX_RADIUS:50,80".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DetectConfig {
    /// SourceExtractor configuration file.
    pub config: PathBuf,
    /// SourceExtractor output parameter list.
    pub parameters: PathBuf,
    /// Weight map, literal or `search:replace` on the image path.
    #[serde(default)]
    pub weight: Option<String>,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            config: "sex.conf".into(),
            parameters: "default.param".into(),
            weight: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PsfConfig {
    pub sex_config: PathBuf,
    pub sex_parameters: PathBuf,
    pub psfex_config: PathBuf,
    /// Variance map, literal or `search:replace` on the image path.
    #[serde(default)]
    pub weight: Option<String>,
    /// PSF model pixels per image pixel.
    pub supersample: f64,
}

impl Default for PsfConfig {
    fn default() -> Self {
        Self {
            sex_config: "sex4psfex.conf".into(),
            sex_parameters: "sex4psfex.param".into(),
            psfex_config: "psfex.conf".into(),
            weight: None,
            supersample: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectConfig {
    /// All must hold for a source to be kept.
    pub criteria: Vec<Criterion>,
    /// Replaces the last four characters of the input catalog name.
    pub output_suffix: String,
}

impl Default for SelectConfig {
    fn default() -> Self {
        Self {
            criteria: vec![
                Criterion::new("MAG_AUTO", Comparison::Lt, 24.0),
                Criterion::new("MU_MAX", Comparison::Gt, 24.0),
                Criterion::new("FLUX_RADIUS_50", Comparison::Gt, 6.0),
            ],
            output_suffix: ".udgcat".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FitConfig {
    /// Extension of the per-image source list next to each image.
    pub catalog_extension: String,
    /// Fit directory: relative to the image directory, or `search:replace`.
    pub subdir: String,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub psf: Option<String>,
    /// PSF oversampling; 0 reads it from the PSF model header.
    pub psf_supersample: f64,
    /// Cap on the cutout half size in pixels; non-positive disables the cap.
    pub max_size: f64,
    /// Wall-clock limit per fit; non-positive disables it.
    pub timeout_secs: f64,
    pub pixel_scale: f64,
    pub convolution_box: u32,
    pub sersic_n: f64,
    pub profile: Profile,
    /// Re-run fits whose output already exists.
    pub redo: bool,
    /// Log fit commands without running them.
    pub dry_run: bool,
    pub problem_log: PathBuf,
    pub poll_interval_ms: u64,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            catalog_extension: "udgcat".into(),
            subdir: "galfit/".into(),
            weight: None,
            psf: None,
            psf_supersample: 1.0,
            max_size: -1.0,
            timeout_secs: 60.0,
            pixel_scale: 0.18,
            convolution_box: 100,
            sersic_n: 1.5,
            profile: Profile::Sersic,
            redo: false,
            dry_run: false,
            problem_log: "galfit_problems.log".into(),
            poll_interval_ms: 1000,
        }
    }
}

impl FitConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0.0).then(|| Duration::from_secs_f64(self.timeout_secs))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MergeConfig {
    pub output: PathBuf,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            output: "combined_catalog.cat".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaskConfig {
    /// Sources with a smaller `FWHM_IMAGE` are masked.
    pub min_fwhm: f64,
    pub mask_output: PathBuf,
    pub image_output: PathBuf,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            min_fwhm: 6.0,
            mask_output: "bad_mask_combined.fits".into(),
            image_output: "image_masked.fits".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Also write debug-level logs here.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl PipelineConfig {
    /// Load from all sources and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(explicit)?.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the provider chain. An explicit file must exist; the default
    /// file is optional.
    pub fn figment(explicit: Option<&Path>) -> Result<Figment, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        match explicit {
            Some(path) if !path.exists() => {
                return Err(ConfigError::MissingFile {
                    path: path.to_path_buf(),
                })
            }
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                let local = PathBuf::from(DEFAULT_CONFIG_FILE);
                if local.exists() {
                    figment = figment.merge(Toml::file(local));
                }
            }
        }

        Ok(figment.merge(Env::prefixed("GALPIPE_").split("__")))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
            ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.into(),
            }
        }

        if self.queue_depth == 0 {
            return Err(invalid("queue_depth", "must be at least 1"));
        }
        if !(self.psf.supersample > 0.0) {
            return Err(invalid("psf.supersample", "must be positive"));
        }
        if !(self.fit.psf_supersample >= 0.0) {
            return Err(invalid("fit.psf_supersample", "must not be negative"));
        }
        if !(self.fit.pixel_scale > 0.0) {
            return Err(invalid("fit.pixel_scale", "must be positive"));
        }
        if self.fit.convolution_box == 0 {
            return Err(invalid("fit.convolution_box", "must be positive"));
        }
        if self.fit.poll_interval_ms == 0 {
            return Err(invalid("fit.poll_interval_ms", "must be positive"));
        }
        if self.fit.catalog_extension.is_empty() {
            return Err(invalid("fit.catalog_extension", "must not be empty"));
        }
        if !(self.mask.min_fwhm > 0.0) {
            return Err(invalid("mask.min_fwhm", "must be positive"));
        }
        if self.select.output_suffix.is_empty() {
            return Err(invalid("select.output_suffix", "must not be empty"));
        }
        parse_suffix_table(&self.catalog.array_suffixes)
            .map_err(|e| invalid("catalog.array_suffixes", e.to_string()))?;
        Ok(())
    }

    /// Pool size with 0 resolved to the machine's parallelism.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    pub fn suffix_table(&self) -> SuffixTable {
        // checked in validate()
        parse_suffix_table(&self.catalog.array_suffixes).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.tools.galfit, "galfit");
        assert_eq!(config.fit.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.select.criteria.len(), 3);
        assert_eq!(config.mask.min_fwhm, 6.0);
        assert_eq!(config.suffix_table()["FLUX_RADIUS"], vec!["50", "80"]);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn figment_builds_without_files() {
        Jail::expect_with(|_jail| {
            let config = PipelineConfig::load(None).expect("defaults load");
            assert_eq!(config.queue_depth, 256);
            assert_eq!(config.fit.subdir, "galfit/");
            Ok(())
        });
    }

    #[test]
    fn local_file_then_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                DEFAULT_CONFIG_FILE,
                r#"
                workers = 3

                [fit]
                timeout_secs = 5.0
                profile = "devauc"

                [tools]
                galfit = "/opt/galfit/bin/galfit"
                "#,
            )?;
            jail.set_env("GALPIPE_FIT__TIMEOUT_SECS", "7.5");
            let config = PipelineConfig::load(None).expect("config loads");
            assert_eq!(config.workers, 3);
            assert_eq!(config.fit.profile, Profile::Devauc);
            assert_eq!(config.fit.timeout_secs, 7.5);
            assert_eq!(config.tools.galfit, "/opt/galfit/bin/galfit");
            assert_eq!(config.tools.sextractor, "sex");
            Ok(())
        });
    }

    #[test]
    fn select_criteria_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "strict.toml",
                r#"
                [[select.criteria]]
                column = "MAG_AUTO"
                op = "<="
                value = 22.5
                "#,
            )?;
            let config = PipelineConfig::load(Some(Path::new("strict.toml"))).expect("loads");
            assert_eq!(
                config.select.criteria,
                vec![Criterion::new("MAG_AUTO", Comparison::Le, 22.5)]
            );
            Ok(())
        });
    }

    #[test]
    fn queue_depth_survives_partial_file() {
        Jail::expect_with(|jail| {
            jail.create_file(DEFAULT_CONFIG_FILE, "workers = 2\n")?;
            let config = PipelineConfig::load(None).expect("config loads");
            assert_eq!(config.queue_depth, 256);

            jail.set_env("GALPIPE_QUEUE_DEPTH", "0");
            assert!(matches!(
                PipelineConfig::load(None),
                Err(ConfigError::InvalidValue { ref field, .. }) if field == "queue_depth"
            ));
            Ok(())
        });
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        Jail::expect_with(|_jail| {
            let err = PipelineConfig::load(Some(Path::new("nope.toml"))).unwrap_err();
            assert!(matches!(err, ConfigError::MissingFile { .. }));
            Ok(())
        });
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = PipelineConfig::default();
        config.fit.pixel_scale = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "fit.pixel_scale"
        ));

        let mut config = PipelineConfig::default();
        config.catalog.array_suffixes = "FLUX_RADIUS".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_positive_timeout_disables_limit() {
        let mut fit = FitConfig::default();
        fit.timeout_secs = 0.0;
        assert_eq!(fit.timeout(), None);
    }
}
