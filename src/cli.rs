use crate::{
    config::Config,
    report::{BatchReport, InputReport},
    service::{self, OcrService},
    util::{ensure_dir, now_rfc3339, read_payload, sha256_hex},
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ocr-dispatch")]
#[command(about = "Bounded worker-pool OCR dispatcher (batch admission + deadlines + pluggable engine)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./ocr-dispatch.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check that the configured engine can start.
    Doctor {},
    /// Recognize a single image.
    Image {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = 1)]
        id: i64,
    },
    /// Recognize several images as one batch; ids follow argument order from 1.
    Batch {
        #[arg(long, num_args = 1.., required = true)]
        input: Vec<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = match &cfg_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let _guard = init_logging(&args, &cfg)?;
    if let Some(path) = &cfg_path {
        info!("config loaded from {}", path.display());
    }

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg),
        Command::Image { input, id } => image(&cfg, input, *id),
        Command::Batch { input, report } => batch(&cfg, input, report.as_deref()),
    }
}

fn resolve_config_path(user: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = user {
        return Some(p.to_path_buf());
    }
    let default = PathBuf::from("ocr-dispatch.toml");
    default.exists().then_some(default)
}

fn init_logging(args: &Args, cfg: &Config) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries the JSON result, so log lines go to stderr.
    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_names(true)
            .boxed()
    };

    let (file_layer, guard) = if cfg.logging.write_to_file && !cfg.logging.file_path.is_empty() {
        let path = Path::new(&cfg.logging.file_path);
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_thread_names(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn doctor(cfg: &Config) -> Result<()> {
    let diag = service::doctor(cfg)?;
    println!("{}", serde_json::to_string_pretty(&diag)?);
    if !diag.ok {
        return Err(anyhow!("engine is not usable"));
    }
    Ok(())
}

fn image(cfg: &Config, input: &Path, id: i64) -> Result<()> {
    let payload = read_payload(input)?;
    info!("image id={id} {} ({} bytes)", input.display(), payload.len());

    let svc = OcrService::from_config(cfg)?;
    let result = svc.process_image(id, payload);
    svc.shutdown();

    let resp = result.map_err(|e| anyhow!("{} ({})", e, e.status_code()))?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

fn batch(cfg: &Config, inputs: &[PathBuf], report_override: Option<&Path>) -> Result<()> {
    let mut items = Vec::with_capacity(inputs.len());
    let mut input_reports = Vec::with_capacity(inputs.len());
    for (id, path) in (1i64..).zip(inputs) {
        let payload = read_payload(path)?;
        input_reports.push(InputReport {
            id,
            path: path.display().to_string(),
            bytes: payload.len() as u64,
            sha256: sha256_hex(&payload),
        });
        items.push((id, payload));
    }

    let svc = OcrService::from_config(cfg)?;
    let started = now_rfc3339();
    let result = svc.process_batch(items);
    let stats = svc.stats();
    svc.shutdown();

    let response = result.map_err(|e| anyhow!("{} ({})", e, e.status_code()))?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let report_path = report_override.map(PathBuf::from).or_else(|| {
        cfg.output
            .write_report_json
            .then(|| PathBuf::from(&cfg.output.report_path))
    });
    if let Some(path) = report_path {
        let report = BatchReport {
            started,
            finished: now_rfc3339(),
            inputs: input_reports,
            response,
            pool: stats,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report: {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    Ok(())
}
