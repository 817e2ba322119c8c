//! snapshot - one-shot still-image detection
//!
//! Validates and decodes an image file, runs a single detection pass
//! through the capture loop, prints the detection sequence as JSON, and
//! optionally writes the composited overlay PNG.

use std::cell::RefCell;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;

use sightline::ui::Ui;
use sightline::{
    CaptureLoop, Context, Detection, DiscardRenderer, LoopState, ManualScheduler, OverlayRenderer,
    PngSink, SightlineConfig, StillImage,
};

#[derive(Parser, Debug)]
#[command(name = "snapshot", about = "Run object detection over one image")]
struct Args {
    /// Image file to detect (JPEG, PNG, GIF, or WebP).
    image: PathBuf,

    /// Write the composited overlay PNG here.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Progress output: auto, plain, or pretty.
    #[arg(long)]
    ui: Option<String>,

    /// Seconds to wait for the detection pass.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let ui = Ui::from_args(args.ui.as_deref(), std::io::stderr().is_terminal());

    let cfg = SightlineConfig::load()?;

    let still = {
        let _stage = ui.stage("load image");
        StillImage::open(&args.image, &cfg.upload).map_err(|err| anyhow!("{}", err))?
    };

    let ctx = {
        let _stage = ui.stage("initialize detector");
        Context::init(&cfg)?
    };

    let renderer: Box<dyn OverlayRenderer> = match &args.out {
        Some(path) => Box::new(PngSink::new(path.clone())),
        None => Box::new(DiscardRenderer),
    };

    let results: Rc<RefCell<Vec<Detection>>> = Rc::new(RefCell::new(Vec::new()));
    let results_sink = results.clone();

    let mut capture = CaptureLoop::new(
        ctx.spawn_worker()?,
        cfg.model.params.clone(),
        cfg.camera.clone(),
        renderer,
        ManualScheduler::new(),
        Box::new(move |detections| {
            *results_sink.borrow_mut() = detections.to_vec();
        }),
    );

    {
        let _stage = ui.stage("detect objects");
        capture.run_still_blocking(&still, Duration::from_secs(args.timeout))?;
    }

    if capture.state() == LoopState::Error {
        let message = capture
            .last_error()
            .unwrap_or("detection failed")
            .to_string();
        return Err(anyhow!("{}", message));
    }

    let detections = results.borrow();
    println!("{}", serde_json::to_string_pretty(&*detections)?);
    if let Some(path) = &args.out {
        eprintln!("overlay written to {}", path.display());
    }
    Ok(())
}
