#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info};
use promptseg::bootstrap::CapabilityRegistry;
use promptseg::capability::{Component, Readiness};
use promptseg::config::PipelineConfig;
use promptseg::device::DeviceTag;
use promptseg::pipeline::Pipeline;
use promptseg::segmenter::self_check;
use promptseg::state::AppState;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, global = true, help = "JSON settings file, defaults are used when omitted")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "run on the CPU even if an accelerator is available")]
    cpu: bool,

    #[arg(long, global = true, help = "override the storage root for artifacts")]
    storage_root: Option<PathBuf>,

    #[arg(long, global = true, help = "whether to enable verbose mode")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the object described by PROMPT in IMAGE and store the results
    Segment {
        #[arg(help = "path to image")]
        image: PathBuf,

        #[arg(help = "what to look for, e.g. \"the burger\"")]
        prompt: String,

        #[arg(long, help = "also write the object on a transparent background")]
        cutout: bool,
    },
    /// Load the segmenter and run it on a synthetic image
    CheckSegmenter,
    /// Fetch missing checkpoints and report which models can be loaded
    Bootstrap,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::load(self.config.as_deref())
            .with_context(|| format!("loading settings from {:?}", self.config))?;
        if self.cpu {
            config.force_cpu = true;
        }
        if let Some(root) = &self.storage_root {
            config.storage_root = root.clone();
        }
        if let Command::Segment { cutout: true, .. } = self.command {
            config.annotation.write_cutout = true;
        }
        debug!("settings: {:?}", config);
        Ok(config)
    }
}

fn segment(state: Arc<AppState>, image: &Path, prompt: &str) -> anyhow::Result<ExitCode> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {:?}", image))?;
    let pipeline = Pipeline::new(state);
    let now = Instant::now();
    let outcome = pipeline.try_segment(&bytes, prompt);
    info!("segmentation took {:.3}s", now.elapsed().as_secs_f32());
    match outcome {
        Ok(pair) => {
            println!("original: {}", pair.original.display());
            println!("result: {}", pair.result.display());
            if let Some(cutout) = pair.cutout {
                println!("cutout: {}", cutout.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn check_segmenter(state: &AppState) -> anyhow::Result<ExitCode> {
    let device = state.device();
    println!("device: {}", DeviceTag::of(device));
    let mut segmenter = match state.bootstrapper().bootstrap_segmenter(device) {
        Readiness::Ready(segmenter) => segmenter,
        Readiness::Unavailable(u) => {
            eprintln!("{}", u);
            return Ok(ExitCode::FAILURE);
        }
    };
    let report = self_check(segmenter.as_mut())?;
    println!(
        "box prompt: {} mask(s), {} foreground pixels",
        report.box_masks, report.box_foreground
    );
    println!(
        "point prompt: {} mask(s), {} foreground pixels",
        report.point_masks, report.point_foreground
    );
    Ok(ExitCode::SUCCESS)
}

fn bootstrap(state: &AppState) -> ExitCode {
    let bootstrapper = state.bootstrapper();
    let device = state.device();
    let mut ready = true;
    for component in [Component::Detector, Component::Segmenter] {
        let readiness = match component {
            Component::Detector => bootstrapper.bootstrap_detector(device).map(|_| ()),
            Component::Segmenter => bootstrapper.bootstrap_segmenter(device).map(|_| ()),
        };
        match readiness {
            Readiness::Ready(()) => println!("{}: ready on {}", component, DeviceTag::of(device)),
            Readiness::Unavailable(u) => {
                ready = false;
                println!("{}: {}", component, u);
            }
        }
    }
    if ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Cli::parse();
    let env = Env::new().filter_or("PROMPTSEG_LOG", if args.verbose { "debug" } else { "info" });
    env_logger::init_from_env(env);

    let config = args.load_config()?;
    let state = Arc::new(AppState::new(config, CapabilityRegistry::with_builtin())?);
    info!(
        "storage root {:?}, models root {:?}",
        state.config().storage_root,
        state.config().models.root
    );

    match &args.command {
        Command::Segment { image, prompt, .. } => segment(state, image, prompt),
        Command::CheckSegmenter => check_segmenter(&state),
        Command::Bootstrap => Ok(bootstrap(&state)),
    }
}
