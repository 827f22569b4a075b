//! AC-GAN for compositing pose-conditioned synthetic renders
//!
//! Main entry point providing CLI interface for:
//! - Training the AC-GAN on `syn`, `mnist` or `cifar10`
//! - Generating samples for a chosen class and pose
//! - Inspecting a paired dataset root

use anyhow::Result;
use clap::{Parser, Subcommand};
use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use rust_acgan_syn::{
    data::{
        array_to_tensor, BatchSource, ClassTaxonomy, ImageTransform, LabeledImageSet, LabeledKind, PairedDataLoader,
        PairedDataset, PairedSampleIndex, PoseAnnotation, IMG_EXTENSIONS, REAL_DIR, SYNTHETIC_DIR,
    },
    model::{ConditionSpec, LatentEncoder, ACGAN},
    training::{AdversarialTrainer, TrainerConfig, TrainerState},
    utils::{
        ensure_config_exists, find_latest_checkpoint, load_checkpoint, save_image_grid, Config, DatasetKind,
        GRID_COLUMNS,
    },
};

/// AC-GAN trainer for synthetic-over-real compositing
#[derive(Parser)]
#[command(name = "acgan_syn")]
#[command(author = "rust_acgan_syn developers")]
#[command(version = "0.1.0")]
#[command(about = "Train a class- and pose-conditioned AC-GAN that composites renders onto real backgrounds")]
struct Cli {
    /// Path to configuration file (.json or .toml)
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug, Default)]
struct TrainArgs {
    /// Dataset kind
    #[arg(long, value_enum)]
    dataset: Option<DatasetKind>,

    /// Path to dataset
    #[arg(long)]
    dataroot: Option<String>,

    /// Number of data loading workers
    #[arg(long)]
    workers: Option<usize>,

    /// Input batch size
    #[arg(long)]
    batch_size: Option<usize>,

    /// Height/width of the input images
    #[arg(long)]
    image_size: Option<i64>,

    /// Size of the latent z vector
    #[arg(long)]
    nz: Option<i64>,

    #[arg(long)]
    ngf: Option<i64>,

    #[arg(long)]
    ndf: Option<i64>,

    /// Number of epochs to train for
    #[arg(long)]
    niter: Option<usize>,

    /// Learning rate
    #[arg(long)]
    lr: Option<f64>,

    /// Adam beta1
    #[arg(long)]
    beta1: Option<f64>,

    /// Enable CUDA
    #[arg(long)]
    cuda: bool,

    /// Path to generator parameters (to continue training)
    #[arg(long)]
    net_g: Option<String>,

    /// Path to discriminator parameters (to continue training)
    #[arg(long)]
    net_d: Option<String>,

    /// Folder to output images and model checkpoints
    #[arg(long)]
    outf: Option<String>,

    /// Manual seed
    #[arg(long)]
    manual_seed: Option<u64>,

    /// Continue from the latest checkpoint in the output folder
    #[arg(long)]
    resume: bool,

    /// Hide the progress bar
    #[arg(long)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Train the AC-GAN model
    Train(TrainArgs),

    /// Generate samples from a generator checkpoint
    Generate {
        /// Path to generator parameters (netG_epoch_N.pt)
        #[arg(short, long)]
        model: String,

        /// Class index to condition on
        #[arg(long, default_value = "0")]
        class: usize,

        /// Number of classes the model was trained with (read from the
        /// dataset when omitted)
        #[arg(long)]
        num_classes: Option<usize>,

        #[arg(long)]
        azimuth: Option<i32>,

        #[arg(long)]
        elevation: Option<i32>,

        #[arg(long)]
        tilt: Option<i32>,

        #[arg(long)]
        distance: Option<i32>,

        /// Number of samples to generate
        #[arg(short, long, default_value = "64")]
        num_samples: usize,

        /// Output image path
        #[arg(short, long, default_value = "generated.png")]
        output: String,

        /// Manual seed
        #[arg(long)]
        manual_seed: Option<u64>,
    },

    /// Index a paired dataset root and report class counts
    Index {
        /// Dataset root holding `syn/` and `real/`
        #[arg(long)]
        dataroot: Option<String>,
    },

    /// Write the default configuration file unless one already exists
    Init {
        /// Output configuration file path
        #[arg(short, long, default_value = "config.json")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbosity.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Train(args) => {
            train_model(&cli.config, args)?;
        }
        Commands::Generate {
            model,
            class,
            num_classes,
            azimuth,
            elevation,
            tilt,
            distance,
            num_samples,
            output,
            manual_seed,
        } => {
            let pose = match (azimuth, elevation, tilt, distance) {
                (None, None, None, None) => None,
                (a, e, t, d) => Some(PoseAnnotation::new(
                    a.unwrap_or(0),
                    e.unwrap_or(0),
                    t.unwrap_or(0),
                    d.unwrap_or(0),
                )),
            };
            generate_samples(
                &cli.config,
                &model,
                class,
                num_classes,
                pose,
                num_samples,
                &output,
                manual_seed,
            )?;
        }
        Commands::Index { dataroot } => {
            index_dataset(&cli.config, dataroot)?;
        }
        Commands::Init { output } => {
            init_config(&output)?;
        }
    }

    Ok(())
}

fn load_config(config_path: &str) -> Result<Config> {
    if Path::new(config_path).exists() {
        Config::from_file(config_path)
    } else {
        info!("Config file not found, using defaults");
        Ok(Config::default())
    }
}

/// Fold command-line flags over the file configuration
fn apply_overrides(config: &mut Config, args: &TrainArgs) {
    if let Some(v) = args.dataset {
        config.data.dataset = v;
    }
    if let Some(v) = &args.dataroot {
        config.data.dataroot = v.clone();
    }
    if let Some(v) = args.workers {
        config.data.workers = v;
    }
    if let Some(v) = args.batch_size {
        config.data.batch_size = v;
    }
    if let Some(v) = args.image_size {
        config.data.image_size = v;
    }
    if let Some(v) = args.nz {
        config.model.latent_dim = v;
    }
    if let Some(v) = args.ngf {
        config.model.ngf = v;
    }
    if let Some(v) = args.ndf {
        config.model.ndf = v;
    }
    if let Some(v) = args.niter {
        config.training.epochs = v;
    }
    if let Some(v) = args.lr {
        config.training.lr = v;
    }
    if let Some(v) = args.beta1 {
        config.training.beta1 = v;
    }
    if args.cuda {
        config.training.device = "cuda".to_string();
    }
    if let Some(v) = &args.net_g {
        config.training.net_g = Some(v.clone());
    }
    if let Some(v) = &args.net_d {
        config.training.net_d = Some(v.clone());
    }
    if let Some(v) = &args.outf {
        config.training.outf = v.clone();
    }
    if let Some(v) = args.manual_seed {
        config.training.seed = Some(v);
    }
    if args.no_progress {
        config.training.progress_bar = false;
    }
}

fn resolve_seed(seed: Option<u64>) -> u64 {
    let seed = seed.unwrap_or_else(|| rand::thread_rng().gen_range(1..=10000));
    info!("Random Seed: {}", seed);
    seed
}

/// Batch source for the configured dataset
fn build_source(config: &Config) -> Result<Box<dyn BatchSource>> {
    let data = &config.data;
    let source: Box<dyn BatchSource> = match data.dataset {
        DatasetKind::Syn => {
            let index = build_index(&data.dataroot)?;
            log_class_counts(&index);
            let dataset = PairedDataset::from_index(
                index,
                ImageTransform::symmetric(data.image_size as u32),
                data.length_policy,
                data.pairing,
            )?;
            Box::new(PairedDataLoader::new(dataset, data.loader_config())?)
        }
        DatasetKind::Mnist | DatasetKind::Cifar10 => {
            let kind = if data.dataset == DatasetKind::Mnist {
                LabeledKind::Mnist
            } else {
                LabeledKind::Cifar10
            };
            let set = LabeledImageSet::load(kind, &data.dataroot, data.image_size, data.batch_size)?;
            Box::new(set.with_shuffle(data.shuffle))
        }
    };
    Ok(source)
}

fn condition_spec(config: &Config, num_classes: usize) -> ConditionSpec {
    if config.data.dataset == DatasetKind::Syn && config.model.pose_conditioning {
        ConditionSpec::with_pose(num_classes, config.model.pose_binning)
    } else {
        ConditionSpec::class_only(num_classes)
    }
}

/// Train the AC-GAN model
fn train_model(config_path: &str, args: TrainArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let seed = resolve_seed(config.training.seed);
    let state = TrainerState::seeded(seed);

    // Determine device
    let device = config.get_device();
    info!("Using device: {:?}", device);

    let outf = PathBuf::from(&config.training.outf);
    std::fs::create_dir_all(&outf)?;
    let mut run_config = config.clone();
    run_config.training.seed = Some(seed);
    run_config.save_json(outf.join("config.json"))?;

    let mut source = build_source(&config)?;
    let num_classes = source.num_classes();
    let spec = condition_spec(&config, num_classes);
    let encoder = LatentEncoder::new(config.model.latent_dim as usize, spec)?;

    let mut model = ACGAN::with_defaults(
        config.data.image_size,
        source.channels(),
        num_classes as i64,
        config.model.latent_dim,
        config.model.ngf,
        config.model.ndf,
        config.model.dropout,
        device,
    )?;
    if let Some(path) = &config.training.net_g {
        model.load_generator(path)?;
        info!("Loaded generator from {}", path);
    }
    if let Some(path) = &config.training.net_d {
        model.load_discriminator(path)?;
        info!("Loaded discriminator from {}", path);
    }

    // Resume from checkpoint if requested
    let mut start_epoch = 0;
    let mut restored = None;
    if args.resume {
        match find_latest_checkpoint(&outf) {
            Some(epoch) => {
                let (_meta, metrics) = load_checkpoint(&mut model, &outf, epoch)?;
                info!("Resumed from epoch {}", epoch);
                start_epoch = epoch + 1;
                restored = Some(metrics);
            }
            None => warn!("No checkpoint found in {}, starting from scratch", outf.display()),
        }
    }

    let trainer_config = TrainerConfig {
        epochs: config.training.epochs,
        lr: config.training.lr,
        beta1: config.training.beta1,
        snapshot_every: config.training.snapshot_every,
        output_dir: outf,
        halt_on_non_finite: config.training.halt_on_non_finite,
        progress_bar: config.training.progress_bar,
        fixed_batch_size: config.data.batch_size,
        ..Default::default()
    };

    let mut trainer = AdversarialTrainer::new(model, encoder, trainer_config, state)?;
    if let Some(metrics) = restored {
        trainer = trainer.with_metrics(metrics);
    }

    let reports = trainer.train(&mut *source, start_epoch)?;
    info!("Finished {} epochs", reports.len());

    Ok(())
}

fn taxonomy_size(config: &Config) -> Result<usize> {
    match config.data.dataset {
        DatasetKind::Syn => {
            let taxonomy = ClassTaxonomy::from_dir(&Path::new(&config.data.dataroot).join(REAL_DIR))?;
            Ok(taxonomy.len())
        }
        DatasetKind::Mnist | DatasetKind::Cifar10 => Ok(10),
    }
}

/// Generate a grid of samples for one class (and pose)
#[allow(clippy::too_many_arguments)]
fn generate_samples(
    config_path: &str,
    model_path: &str,
    class: usize,
    num_classes: Option<usize>,
    pose: Option<PoseAnnotation>,
    num_samples: usize,
    output_path: &str,
    seed: Option<u64>,
) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;
    let device = config.get_device();
    let state = TrainerState::seeded(resolve_seed(seed.or(config.training.seed)));
    let mut rng = state.rng;

    let num_classes = match num_classes {
        Some(n) => n,
        None => taxonomy_size(&config)?,
    };
    let encoder = LatentEncoder::new(config.model.latent_dim as usize, condition_spec(&config, num_classes))?;

    let mut model = ACGAN::with_defaults(
        config.data.image_size,
        config.channels(),
        num_classes as i64,
        config.model.latent_dim,
        config.model.ngf,
        config.model.ndf,
        config.model.dropout,
        device,
    )?;
    model.load_generator(model_path)?;
    info!("Loaded generator from {}", model_path);

    let classes = vec![class; num_samples.max(1)];
    let poses = pose.map(|p| vec![p; classes.len()]);
    let latent = encoder.encode(&mut rng, &classes, poses.as_deref())?;
    let samples = model.generate_from_noise(&array_to_tensor(&latent, device));

    save_image_grid(&samples, output_path, GRID_COLUMNS)?;
    info!("Saved {} samples of class {} to {}", classes.len(), class, output_path);

    Ok(())
}

fn log_class_counts(index: &PairedSampleIndex) {
    info!(
        "Indexed {} synthetic and {} real samples in {} classes under {}",
        index.synthetic().len(),
        index.real().len(),
        index.num_classes(),
        index.root().display()
    );
    for (class, synthetic, real) in index.class_counts() {
        info!("  - {}: {} synthetic, {} real", class, synthetic, real);
    }
}

/// Index a paired dataset and report what it holds
fn index_dataset(config_path: &str, dataroot: Option<String>) -> Result<()> {
    let config = load_config(config_path)?;
    let root = dataroot.unwrap_or(config.data.dataroot);
    let index = build_index(&root)?;
    log_class_counts(&index);
    Ok(())
}

/// Index `root`, describing the expected layout when it does not match
fn build_index(root: &str) -> Result<PairedSampleIndex> {
    PairedSampleIndex::build(root, &IMG_EXTENSIONS).map_err(|e| {
        if e.is_dataset_error() {
            error!(
                "Expected renders as {root}/{SYNTHETIC_DIR}/<class>/<hash>_<hash>_a<az>_e<el>_t<tilt>_d<dist>.<ext> \
                 and backgrounds as {root}/{REAL_DIR}/<class>/<image>"
            );
        }
        e.into()
    })
}

/// Initialize default configuration file
fn init_config(output_path: &str) -> Result<()> {
    let existed = Path::new(output_path).exists();
    ensure_config_exists(output_path)?;
    if existed {
        info!("Configuration already exists at {}, left unchanged", output_path);
    } else {
        info!("Created default configuration at {}", output_path);
    }
    Ok(())
}
