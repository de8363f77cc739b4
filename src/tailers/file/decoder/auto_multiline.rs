// SPDX-License-Identifier: Apache-2.0

//! Detection of the line prefix that starts a multi-line log entry.
//!
//! The detector scores a sample of non-blank lines against a table of common
//! timestamp layouts. Once the sample is complete, the best layout is adopted
//! if enough of the sample matched it. Until then no pattern is reported.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, info};

use crate::tailers::file::error::{Error, Result};

const TIMESTAMP_FORMATS: &[&str] = &[
    // 2021-07-12T12:55:15.123Z, 2021-07-12 12:55:15
    r"^\d+-\d+-\d+(T| )\d+:\d+:\d+(\.\d+)?(Z\d*:?\d*)?",
    // Jul 12, 2021 12:55:15 PM
    r"^[A-Za-z_]+ \d+, \d+ \d+:\d+:\d+ (AM|PM)",
    // Mon Jan  2 15:04:05 2006
    r"^[A-Za-z_]+ [A-Za-z_]+ +\d+ \d+:\d+:\d+ \d+",
    // Mon Jan  2 15:04:05 MST 2006
    r"^[A-Za-z_]+ [A-Za-z_]+ +\d+ \d+:\d+:\d+( [A-Za-z_]+ \d+)?",
    // 02 Jan 06 15:04 MST
    r"^\d+ [A-Za-z_]+ \d+ \d+:\d+ [A-Za-z_]+",
    // 2006/01/02 15:04:05
    r"^\d{4}/\d{2}/\d{2} \d{2}:\d{2}:\d{2}",
    // [02/Jan/2006:15:04:05
    r"^\[\d{2}/[A-Za-z]{3}/\d{4}:\d{2}:\d{2}:\d{2}",
    // Jan  2 15:04:05
    r"^[A-Za-z]{3} +\d+ \d{2}:\d{2}:\d{2}",
];

#[derive(Debug, Clone)]
pub struct AutoMultilineConfig {
    /// Non-blank lines inspected before a decision is made
    pub sample_size: usize,
    /// Minimum fraction of the sample the winning pattern must match
    pub match_threshold: f64,
    /// How long an aggregated entry waits for continuation lines
    pub flush_timeout: Duration,
}

impl Default for AutoMultilineConfig {
    fn default() -> Self {
        Self {
            sample_size: 500,
            match_threshold: 0.48,
            flush_timeout: Duration::from_secs(1),
        }
    }
}

pub struct AutoMultilineDetector {
    config: AutoMultilineConfig,
    candidates: Vec<(Regex, usize)>,
    sampled: usize,
    complete: bool,
    detected: Option<Regex>,
}

impl AutoMultilineDetector {
    pub fn new(config: AutoMultilineConfig) -> Result<Self> {
        if config.sample_size == 0 {
            return Err(Error::Config(
                "auto multi-line sample size must be at least 1".to_string(),
            ));
        }

        let candidates = TIMESTAMP_FORMATS
            .iter()
            .map(|pattern| {
                Regex::new(pattern)
                    .map(|re| (re, 0))
                    .map_err(|e| Error::Config(format!("invalid timestamp pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            config,
            candidates,
            sampled: 0,
            complete: false,
            detected: None,
        })
    }

    pub fn config(&self) -> &AutoMultilineConfig {
        &self.config
    }

    /// Score one line. Blank lines are not part of the sample.
    pub fn observe(&mut self, line: &[u8]) {
        if self.complete || line.is_empty() {
            return;
        }

        let text = String::from_utf8_lossy(line);
        for (pattern, matches) in self.candidates.iter_mut() {
            if pattern.is_match(&text) {
                *matches += 1;
            }
        }
        self.sampled += 1;

        if self.sampled >= self.config.sample_size {
            self.decide();
        }
    }

    fn decide(&mut self) {
        self.complete = true;

        let best = self
            .candidates
            .iter()
            .enumerate()
            .max_by(|(ia, (_, a)), (ib, (_, b))| a.cmp(b).then(ib.cmp(ia)));

        if let Some((_, (pattern, matches))) = best {
            let ratio = *matches as f64 / self.sampled as f64;
            if *matches > 0 && ratio >= self.config.match_threshold {
                info!(pattern = pattern.as_str(), ratio, "Detected multi-line pattern");
                self.detected = Some(pattern.clone());
                return;
            }
            debug!(ratio, "No multi-line pattern reached the match threshold");
        }
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn detected(&self) -> Option<&Regex> {
        self.detected.as_ref()
    }
}
