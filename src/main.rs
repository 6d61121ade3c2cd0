use std::path::PathBuf;

use anyhow::bail;
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::info;

use galpipe::config::PipelineConfig;
use galpipe::feedme::Profile;
use galpipe::inputs::{self, CATALOG_EXTENSIONS, IMAGE_EXTENSIONS};
use galpipe::progress::Progress;
use galpipe::{
    combine, detect, fit, logging, mask, merge, model_sum, params, psf, select, sigma,
};

#[derive(Parser)]
#[command(
    name = "galpipe",
    version,
    about = "Run SourceExtractor, PSFEx and GALFIT over batches of FITS images"
)]
struct Cli {
    /// Configuration file (default: ./galpipe.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads per pool (default: all cores)
    #[arg(long, global = true)]
    nprocs: Option<usize>,

    /// More output; repeat for trace level
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Errors only, no progress bars
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Also write debug-level logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect sources with SourceExtractor
    Detect(DetectArgs),
    /// Build a PSF model per image with SourceExtractor and PSFEx
    Psf(PsfArgs),
    /// Keep catalog rows passing the selection criteria
    Select(SelectArgs),
    /// Fit every selected source with GALFIT
    Fit(FitArgs),
    /// Attach GALFIT results to their source catalogs
    Combine(CombineArgs),
    /// Stack catalogs into one
    Merge(MergeArgs),
    /// Blank out compact sources in an image using its segmentation map
    Mask(MaskArgs),
    /// Print the column names a SourceExtractor parameter file produces
    Params(ParamsArgs),
    /// Convert a variance map to a sigma image
    Sigma(SigmaArgs),
    /// Sum GALFIT models into a frame shaped like a reference image
    ModelSum(ModelSumArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// Images, or directories of images
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// SourceExtractor configuration
    #[arg(long = "conf")]
    sex_config: Option<PathBuf>,
    /// SourceExtractor parameter list
    #[arg(long = "params")]
    parameters: Option<PathBuf>,
    /// Weight map, literal or search:replace on the image name
    #[arg(long)]
    weight: Option<String>,
}

#[derive(Args)]
struct PsfArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// PSF pixels per image pixel
    #[arg(long)]
    supersample: Option<f64>,
    /// Variance map, literal or search:replace on the image name
    #[arg(long)]
    weight: Option<String>,
}

#[derive(Args)]
struct SelectArgs {
    /// Catalogs, or directories of `.cat` files
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Args)]
struct FitArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Extension of the source list next to each image
    #[arg(long)]
    catext: Option<String>,
    /// Fit directory, relative to the image or search:replace
    #[arg(long)]
    subdir: Option<String>,
    #[arg(long)]
    weight: Option<String>,
    #[arg(long)]
    psf: Option<String>,
    /// PSF oversampling; 0 reads it from the PSF header
    #[arg(long)]
    psfres: Option<f64>,
    /// Cap on the cutout half size in pixels
    #[arg(long)]
    maxsize: Option<f64>,
    /// Seconds before a GALFIT run is killed; 0 disables
    #[arg(long)]
    timeout: Option<f64>,
    #[arg(long, value_enum)]
    profile: Option<Profile>,
    /// Re-run fits that already have output
    #[arg(long)]
    redo: bool,
    /// Prepare feeds and log the GALFIT commands without running them
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct CombineArgs {
    /// Detection catalogs (`X.cat`), or directories of them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(long)]
    catext: Option<String>,
    #[arg(long)]
    subdir: Option<String>,
}

#[derive(Args)]
struct MergeArgs {
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct MaskArgs {
    image: PathBuf,
    /// SourceExtractor catalog of the image
    catalog: PathBuf,
    /// Segmentation check image of the same run
    segmentation: PathBuf,
    /// Mask sources with FWHM_IMAGE below this many pixels
    #[arg(long)]
    min_fwhm: Option<f64>,
    /// Combined bad-pixel mask
    #[arg(long)]
    mask_output: Option<PathBuf>,
    /// Masked copy of the image
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ParamsArgs {
    file: PathBuf,
    /// Prepended to every name
    #[arg(default_value = "")]
    prefix: String,
}

#[derive(Args)]
struct SigmaArgs {
    variance: PathBuf,
    /// Used only when the input does not end in `_var.fits`
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ModelSumArgs {
    reference: PathBuf,
    #[arg(required = true)]
    outputs: Vec<PathBuf>,
    #[arg(short, long, default_value = model_sum::DEFAULT_OUTPUT)]
    output: PathBuf,
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration.
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(n) = self.nprocs {
            config.workers = n;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        match &self.command {
            Command::Detect(args) => {
                let detect = &mut config.detect;
                set(&mut detect.config, &args.sex_config);
                set(&mut detect.parameters, &args.parameters);
                set_some(&mut detect.weight, &args.weight);
            }
            Command::Psf(args) => {
                set(&mut config.psf.supersample, &args.supersample);
                set_some(&mut config.psf.weight, &args.weight);
            }
            Command::Fit(args) => {
                let fit = &mut config.fit;
                set(&mut fit.catalog_extension, &args.catext);
                set(&mut fit.subdir, &args.subdir);
                set_some(&mut fit.weight, &args.weight);
                set_some(&mut fit.psf, &args.psf);
                set(&mut fit.psf_supersample, &args.psfres);
                set(&mut fit.max_size, &args.maxsize);
                set(&mut fit.timeout_secs, &args.timeout);
                set(&mut fit.profile, &args.profile);
                fit.redo |= args.redo;
                fit.dry_run |= args.dry_run;
            }
            Command::Combine(args) => {
                set(&mut config.fit.catalog_extension, &args.catext);
                set(&mut config.fit.subdir, &args.subdir);
            }
            Command::Merge(args) => set(&mut config.merge.output, &args.output),
            Command::Mask(args) => {
                set(&mut config.mask.min_fwhm, &args.min_fwhm);
                set(&mut config.mask.mask_output, &args.mask_output);
                set(&mut config.mask.image_output, &args.output);
            }
            Command::Select(_) | Command::Params(_) | Command::Sigma(_) | Command::ModelSum(_) => {}
        }
    }
}

fn set<T: Clone>(target: &mut T, value: &Option<T>) {
    if let Some(v) = value {
        *target = v.clone();
    }
}

fn set_some<T: Clone>(target: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        *target = value.clone();
    }
}

fn expand(paths: &[PathBuf], extensions: &[&str]) -> anyhow::Result<Vec<PathBuf>> {
    let found = inputs::expand(paths, extensions);
    if found.is_empty() {
        bail!("no input files found in {}", display_list(paths));
    }
    Ok(found)
}

fn display_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    cli.apply(&mut config);
    config.validate()?;

    logging::init(cli.quiet, cli.verbose, config.logging.file.as_deref())?;
    let show_progress = !cli.quiet;
    let workers = config.worker_count();
    let suffixes = config.suffix_table();
    let bar = |count: usize, what: &str| Progress::bar(count as u64, what, show_progress);

    match &cli.command {
        Command::Detect(args) => {
            let images = expand(&args.inputs, IMAGE_EXTENSIONS)?;
            let progress = bar(images.len(), "images");
            detect::run(images, &config.tools, &config.detect, workers, &progress);
            progress.finish("detection done");
        }
        Command::Psf(args) => {
            let images = expand(&args.inputs, IMAGE_EXTENSIONS)?;
            let progress = bar(images.len(), "images");
            psf::run(images, &config.tools, &config.psf, workers, &progress);
            progress.finish("psf models done");
        }
        Command::Select(args) => {
            let catalogs = expand(&args.inputs, CATALOG_EXTENSIONS)?;
            let progress = bar(catalogs.len(), "catalogs");
            select::run(
                catalogs,
                &config.select.criteria,
                &config.select.output_suffix,
                &suffixes,
                workers,
                &progress,
            );
            progress.finish("selection done");
        }
        Command::Fit(args) => {
            let images = expand(&args.inputs, IMAGE_EXTENSIONS)?;
            fit::run(images, &config, show_progress);
        }
        Command::Combine(args) => {
            let catalogs = expand(&args.inputs, CATALOG_EXTENSIONS)?;
            let progress = bar(catalogs.len(), "catalogs");
            combine::run(
                catalogs,
                &config.fit.catalog_extension,
                &config.fit.subdir,
                &suffixes,
                workers,
                &progress,
            );
            progress.finish("combining done");
        }
        Command::Merge(args) => {
            let catalogs = expand(&args.inputs, CATALOG_EXTENSIONS)?;
            let progress = bar(catalogs.len(), "catalogs");
            merge::run(catalogs, &config.merge.output, &suffixes, workers, &progress)?;
            progress.finish("all done!");
        }
        Command::Mask(args) => {
            mask::run(
                &args.image,
                &args.catalog,
                &args.segmentation,
                &config.mask,
                &suffixes,
            )?;
        }
        Command::Params(args) => {
            for name in params::read_parameters(&args.file, &args.prefix)? {
                println!("{name}");
            }
        }
        Command::Sigma(args) => {
            sigma::run(&args.variance, args.output.as_deref())?;
        }
        Command::ModelSum(args) => {
            model_sum::run(&args.reference, &args.outputs, &args.output)?;
        }
    }
    info!("finished");
    Ok(())
}
