use crate::config::Postprocess;
use anyhow::{Context, Result};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

/// Cleans recognized text before it is returned to the caller.
#[derive(Debug, Clone)]
pub struct TextCleaner {
    cfg: Postprocess,
    drop_patterns: Vec<Regex>,
}

impl TextCleaner {
    pub fn new(cfg: &Postprocess) -> Result<Self> {
        let drop_patterns = if cfg.remove_by_regex {
            cfg.regex
                .patterns
                .iter()
                .map(|p| Regex::new(p).with_context(|| format!("invalid postprocess regex: {p}")))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };
        Ok(Self {
            cfg: cfg.clone(),
            drop_patterns,
        })
    }

    pub fn clean(&self, raw: &str) -> String {
        if !self.cfg.enabled {
            return raw.to_string();
        }

        let mut text = raw.to_string();

        if self.cfg.normalize_newlines {
            text = text.replace("\r\n", "\n").replace('\r', "\n");
        }

        if self.cfg.normalize_unicode {
            text = text.nfkc().collect::<String>();
        }

        text = sanitize_control_chars(&text, &self.cfg.control_chars_to_sanitize);

        if self.cfg.trim_trailing_whitespace {
            text = text
                .lines()
                .map(|l| l.trim_end())
                .collect::<Vec<_>>()
                .join("\n");
        }

        if !self.drop_patterns.is_empty() {
            text = text
                .lines()
                .filter(|line| !self.drop_patterns.iter().any(|r| r.is_match(line.trim())))
                .collect::<Vec<_>>()
                .join("\n");
        }

        if self.cfg.collapse_blank_lines {
            text = collapse_blank_lines(&text);
        }

        text.trim_matches('\n').to_string()
    }
}

fn sanitize_control_chars(s: &str, codes: &[u8]) -> String {
    if codes.is_empty() {
        return s.to_string();
    }

    let mut mask = [false; 128];
    for &code in codes {
        if (code as usize) < mask.len() {
            mask[code as usize] = true;
        }
    }

    s.chars()
        .filter(|&ch| {
            // Line structure survives regardless of the configured set.
            if ch == '\n' || ch == '\t' {
                return true;
            }
            let cp = ch as u32;
            cp >= 128 || !mask[cp as usize]
        })
        .collect()
}

fn collapse_blank_lines(s: &str) -> String {
    let mut out = Vec::new();
    let mut prev_blank = false;
    for line in s.lines() {
        let blank = line.trim().is_empty();
        if blank && prev_blank {
            continue;
        }
        out.push(line);
        prev_blank = blank;
    }
    out.join("\n")
}
