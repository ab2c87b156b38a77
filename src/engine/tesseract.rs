use super::{CancelFlag, Engine, EngineDiag, EngineError, EngineFactory};
use crate::config;
use anyhow::{Context, Result, anyhow};
use image::{GrayImage, ImageFormat};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Output, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Builds `TesseractEngine`s that drive the `tesseract` CLI over stdin/stdout.
#[derive(Debug, Clone)]
pub struct TesseractFactory {
    exe: PathBuf,
    tessdata_dir: Option<PathBuf>,
    language: String,
    page_seg_mode: Option<u32>,
    timeout: Option<Duration>,
}

impl TesseractFactory {
    pub fn from_config(cfg: &config::Engine) -> Self {
        let tessdata_dir = if cfg.tessdata_dir.trim().is_empty() {
            None
        } else {
            Some(expand_tilde(cfg.tessdata_dir.trim()))
        };
        let timeout = if cfg.process_timeout_seconds > 0 {
            Some(Duration::from_secs(cfg.process_timeout_seconds))
        } else {
            None
        };
        Self {
            exe: resolve_tesseract_exe(&cfg.tesseract_exe),
            tessdata_dir,
            language: cfg.language.clone(),
            page_seg_mode: cfg.page_seg_mode,
            timeout,
        }
    }

    fn version(&self) -> Result<String> {
        let output = Command::new(&self.exe)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("spawning {}", self.exe.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "{} --version exited with {}",
                self.exe.display(),
                output.status
            ));
        }
        // Older builds print the banner on stderr.
        let banner = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn check_language_data(&self) -> Result<()> {
        let Some(dir) = &self.tessdata_dir else {
            return Ok(());
        };
        if !dir.is_dir() {
            return Err(anyhow!("tessdata_dir does not exist: {}", dir.display()));
        }
        for lang in self.language.split('+').filter(|l| !l.is_empty()) {
            let path = dir.join(format!("{lang}.traineddata"));
            if !path.exists() {
                return Err(anyhow!("missing language data: {}", path.display()));
            }
        }
        Ok(())
    }
}

impl EngineFactory for TesseractFactory {
    fn create(&self) -> Result<Box<dyn Engine>, EngineError> {
        if self.language.trim().is_empty() {
            return Err(EngineError::Init("engine.language is empty".into()));
        }
        self.check_language_data()
            .map_err(|e| EngineError::Init(format!("{e:#}")))?;
        let version = self
            .version()
            .map_err(|e| EngineError::Init(format!("{e:#}")))?;
        debug!("tesseract ready: {version} lang={}", self.language);
        Ok(Box::new(TesseractEngine {
            factory: self.clone(),
        }))
    }

    fn doctor(&self) -> EngineDiag {
        let version = self.version();
        let data = self.check_language_data();
        let error = match (&version, &data) {
            (Err(e), _) | (_, Err(e)) => Some(format!("{e:#}")),
            _ => None,
        };
        EngineDiag {
            engine: "tesseract".into(),
            version: version.ok(),
            language: self.language.clone(),
            ok: error.is_none(),
            error,
        }
    }
}

pub struct TesseractEngine {
    factory: TesseractFactory,
}

impl TesseractEngine {
    fn command(&self) -> Command {
        let f = &self.factory;
        let mut cmd = Command::new(&f.exe);
        cmd.arg("stdin").arg("stdout");
        cmd.arg("-l").arg(&f.language);
        if let Some(dir) = &f.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(dir);
        }
        if let Some(psm) = f.page_seg_mode {
            cmd.arg("--psm").arg(psm.to_string());
        }
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd
    }

    fn run(&self, png: &[u8]) -> Result<String> {
        let mut child = self
            .command()
            .spawn()
            .with_context(|| format!("spawning {}", self.factory.exe.display()))?;

        // A process that exits early closes its end of the pipe; the write
        // error is held until the child is reaped so its stderr is reported.
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(png).and_then(|()| stdin.flush()),
            None => Err(io::Error::other("stdin not captured")),
        };

        let output = match self.factory.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => child
                .wait_with_output()
                .with_context(|| "waiting for tesseract")?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            ));
        }
        written.with_context(|| "writing image to tesseract")?;

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Engine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, image: &GrayImage, cancel: &CancelFlag) -> Result<String, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| EngineError::Extract(format!("re-encoding image: {e}")))?;
        self.run(png.get_ref())
            .map_err(|e| EngineError::Extract(format!("{e:#}")))
    }
}

fn resolve_tesseract_exe(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("auto") {
        if let Ok(env_val) = std::env::var("TESSERACT_EXE") {
            let p = expand_tilde(&env_val);
            if p.exists() {
                return p;
            }
        }
        return PathBuf::from("tesseract");
    }
    expand_tilde(raw)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Output> {
    // Drain pipes while waiting so a chatty process can't block on a full
    // stdout/stderr buffer.
    let stdout_reader = child.stdout.take();
    let stderr_reader = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut out) = stdout_reader {
            out.read_to_end(&mut buf).with_context(|| "read stdout")?;
        }
        Ok(buf)
    });

    let stderr_thread = std::thread::spawn(move || -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        if let Some(mut err) = stderr_reader {
            err.read_to_end(&mut buf).with_context(|| "read stderr")?;
        }
        Ok(buf)
    });

    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().with_context(|| "try_wait")? {
            let stdout = stdout_thread
                .join()
                .map_err(|_| anyhow!("stdout reader thread panicked"))??;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() > timeout {
            warn!("tesseract process timed out after {:?}", timeout);
            let _ = child.kill();
            child.wait().with_context(|| "wait after kill")?;
            let stderr = stderr_thread
                .join()
                .map_err(|_| anyhow!("stderr reader thread panicked"))??;
            let _ = stdout_thread.join();
            return Err(anyhow!(
                "tesseract exceeded process timeout ({:?}); stderr: {}",
                timeout,
                String::from_utf8_lossy(&stderr).trim()
            ));
        }

        std::thread::sleep(Duration::from_millis(20));
    }
}
