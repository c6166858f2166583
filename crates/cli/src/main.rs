use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use playback::{ScriptVideoService, ServiceConfig, ServiceEvent, TracingReporter};
use renderer::{open_source, HeadlessRenderer};
use timeline::{lerp_items_at, Frame, FrameSize, KeyFrame, KeyFrameData, Point, Project, Segment, ShapeKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vse-cli", version, about = "Headless seek and playback over a synthetic source")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the properties of a source descriptor.
    Probe {
        descriptor: PathBuf,
    },
    /// Play the source with masking and cropping applied.
    Play(PlayArgs),
    /// Render one frame and print its interpolation items.
    Seek(SeekArgs),
}

#[derive(Parser, Debug)]
struct PlayArgs {
    descriptor: PathBuf,

    /// Annotation project JSON; demo segments are used when omitted.
    #[arg(long)]
    project: Option<PathBuf>,

    /// Frame to start from.
    #[arg(long, default_value_t = 0)]
    from: Frame,

    /// Pause once this frame has been rendered.
    #[arg(long)]
    pause_after: Option<Frame>,

    /// Render as fast as possible instead of holding the frame rate.
    #[arg(long, default_value_t = false)]
    no_hold: bool,

    /// Cadence multiplier.
    #[arg(long, default_value_t = 1.0)]
    rate: f64,
}

#[derive(Parser, Debug)]
struct SeekArgs {
    descriptor: PathBuf,

    frame: Frame,

    /// Annotation project JSON; demo segments are used when omitted.
    #[arg(long)]
    project: Option<PathBuf>,

    /// Write the rendered preview as a grayscale PNG.
    #[arg(long)]
    png: Option<PathBuf>,
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();
    let cli = Cli::parse();
    match cli.cmd {
        Command::Probe { descriptor } => cmd_probe(&descriptor),
        Command::Play(args) => cmd_play(args),
        Command::Seek(args) => cmd_seek(args),
    }
}

fn cmd_probe(descriptor: &Path) -> Result<()> {
    let info = open_source(descriptor)?.info();
    println!("has video:   {}", info.has_video);
    println!("frames:      {}", info.frame_count);
    println!("frame rate:  {}/{} ({:.3} fps)", info.frame_rate.num, info.frame_rate.den, info.frame_rate.as_f64());
    println!("frame size:  {}x{}", info.frame_size.width, info.frame_size.height);
    println!("duration:    {:?}", info.frame_rate.duration_of(info.frame_count));
    Ok(())
}

fn cmd_play(args: PlayArgs) -> Result<()> {
    let config = ServiceConfig { hold_frame_rate: !args.no_hold, rate: args.rate };
    let service = open_service(&args.descriptor, args.project.as_deref(), config)?;
    if args.from != 0 {
        service.seek_frame(args.from)?;
    }

    let events = service.subscribe();
    let mut session = service.start_video_playback()?;
    let control = session.control();
    let poll_interval = service.context().frame_rate().frame_period().min(Duration::from_millis(10));

    let outcome = loop {
        let outcome = session.poll();
        for event in events.try_iter() {
            if let ServiceEvent::FrameChanged { current, .. } = event {
                info!(frame = current, position = ?service.context().video_position(), "frame");
                if args.pause_after.is_some_and(|n| current >= n) {
                    control.pause();
                }
            }
        }
        if let Some(outcome) = outcome {
            break outcome;
        }
        thread::sleep(poll_interval);
    };

    println!(
        "stopped at frame {} ({:?}{}); current frame {}",
        outcome.last_frame,
        outcome.reason,
        if outcome.faulted { ", faulted" } else { "" },
        service.context().frame_number()
    );
    Ok(())
}

fn cmd_seek(args: SeekArgs) -> Result<()> {
    let config = ServiceConfig { hold_frame_rate: false, ..Default::default() };
    let service = open_service(&args.descriptor, args.project.as_deref(), config)?;
    service.seek_frame(args.frame)?;

    let project = service.project();
    let masking = lerp_items_at(args.frame, project.masking.active_at(args.frame));
    let cropping = lerp_items_at(args.frame, project.cropping.active_at(args.frame));
    println!("masking:  {}", serde_json::to_string_pretty(&masking)?);
    println!("cropping: {}", serde_json::to_string_pretty(&cropping)?);

    if let Some(out) = args.png {
        let image = service.with_backend(|b| b.preview_image()).context("nothing rendered")?;
        image.save(&out).with_context(|| format!("write png '{}'", out.display()))?;
        eprintln!("wrote {}", out.display());
    }
    Ok(())
}

fn open_service(descriptor: &Path, project: Option<&Path>, config: ServiceConfig) -> Result<ScriptVideoService<HeadlessRenderer>> {
    let service = ScriptVideoService::with_config(HeadlessRenderer::new(), config, std::sync::Arc::new(TracingReporter));
    service
        .load_script_from_file_source(descriptor)
        .with_context(|| format!("load '{}'", descriptor.display()))?;

    let project = match project {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read project '{}'", path.display()))?;
            Project::from_json(&text).with_context(|| format!("parse project '{}'", path.display()))?
        }
        None => {
            let state = service.context().snapshot();
            demo_project(descriptor, state.seekable_frame_count, state.frame_size)?
        }
    };
    if project.script_file_source.as_deref().is_some_and(|p| p != descriptor) {
        warn!("project was made for a different script");
    }
    service.set_project(project)?;
    Ok(service)
}

/// An ellipse mask sweeping across the frame and a crop that tightens over
/// the whole clip.
fn demo_project(descriptor: &Path, last: Frame, size: FrameSize) -> Result<Project> {
    if last < 0 {
        bail!("source has no frames");
    }
    let (w, h) = (size.width as f64, size.height as f64);
    let mut project = Project::new(descriptor);

    let ellipse = |x: f64| KeyFrameData::Ellipse { center: Point::new(x, h / 2.0), radius_x: w / 8.0, radius_y: h / 6.0 };
    let crop = |inset: f64| KeyFrameData::Crop { left: inset, top: inset, width: w - 2.0 * inset, height: h - 2.0 * inset, angle: 0.0 };

    let mut mask_frames = vec![KeyFrame::new(0, ellipse(w / 8.0))];
    let mut crop_frames = vec![KeyFrame::new(0, crop(0.0))];
    if last > 0 {
        mask_frames.push(KeyFrame::new(last, ellipse(w * 7.0 / 8.0)));
        crop_frames.push(KeyFrame::new(last, crop(w.min(h) / 8.0)));
    }
    project.masking.add_segment(Segment::new(0, 0, last, "sweep", ShapeKind::Ellipse, mask_frames)?)?;
    project.cropping.add_segment(Segment::new(0, 0, last, "tighten", ShapeKind::Crop, crop_frames)?)?;
    Ok(project)
}
