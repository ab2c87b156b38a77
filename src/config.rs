use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
pub const MIN_DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub pool: Pool,
    #[serde(default)]
    pub dispatch: Dispatch,
    #[serde(default)]
    pub engine: Engine,
    #[serde(default)]
    pub postprocess: Postprocess,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub logging: Logging,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw).with_context(|| "parsing TOML")?;
        Ok(cfg)
    }

    /// Worker count after defaulting: 0 means available parallelism, never
    /// fewer than four threads in that case.
    pub fn resolved_workers(&self) -> usize {
        if self.pool.num_workers > 0 {
            return self.pool.num_workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .max(MIN_DEFAULT_WORKERS)
    }

    pub fn resolved_queue_size(&self) -> usize {
        if self.pool.max_queue_size == 0 {
            DEFAULT_MAX_QUEUE_SIZE
        } else {
            self.pool.max_queue_size
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pool {
    pub num_workers: usize,
    pub max_queue_size: usize,
}
impl Default for Pool {
    fn default() -> Self {
        Self {
            num_workers: 0,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatch {
    pub default_timeout_ms: u64,
    pub extended_timeout_ms: u64,
    pub large_payload_threshold_bytes: usize,
}
impl Default for Dispatch {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            extended_timeout_ms: 120_000,
            large_payload_threshold_bytes: 5 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Engine {
    pub kind: String,
    pub tesseract_exe: String,
    pub tessdata_dir: String,
    pub language: String,
    #[serde(default)]
    pub page_seg_mode: Option<u32>,
    pub process_timeout_seconds: u64,
    pub max_image_pixels: u64,
}
impl Default for Engine {
    fn default() -> Self {
        Self {
            kind: "tesseract".into(),
            tesseract_exe: "auto".into(),
            tessdata_dir: "".into(),
            language: "eng".into(),
            page_seg_mode: None,
            process_timeout_seconds: 600,
            max_image_pixels: 100_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Postprocess {
    pub enabled: bool,
    pub normalize_unicode: bool,
    pub normalize_newlines: bool,
    pub trim_trailing_whitespace: bool,
    pub collapse_blank_lines: bool,
    pub control_chars_to_sanitize: Vec<u8>,
    pub remove_by_regex: bool,
    #[serde(default)]
    pub regex: PostprocessRegex,
}
impl Default for Postprocess {
    fn default() -> Self {
        Self {
            enabled: true,
            normalize_unicode: true,
            normalize_newlines: true,
            trim_trailing_whitespace: true,
            collapse_blank_lines: true,
            // C0 controls and DEL, keeping tab, newline and carriage return.
            // Covers the form feed tesseract appends after each page.
            control_chars_to_sanitize: (0u8..32)
                .filter(|&c| !matches!(c, 9 | 10 | 13))
                .chain(std::iter::once(127))
                .collect(),
            remove_by_regex: false,
            regex: Default::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessRegex {
    pub patterns: Vec<String>,
}
impl Default for PostprocessRegex {
    fn default() -> Self {
        Self {
            patterns: vec!["^[\\W_]{1,3}$".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Output {
    pub write_report_json: bool,
    pub report_path: String,
}
impl Default for Output {
    fn default() -> Self {
        Self {
            write_report_json: false,
            report_path: "out/ocr-report.json".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logging {
    pub level: String,
    pub json: bool,
    pub write_to_file: bool,
    pub file_path: String,
}
impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            write_to_file: false,
            file_path: "out/ocr-dispatch.log".into(),
        }
    }
}
