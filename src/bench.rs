//! Toggle benchmark
//!
//! Measures how fast one pin can be toggled through each access path:
//! - `line`: the kernel GPIO character device
//! - `direct`: read-modify-write of the mapped registers on every toggle
//! - `cached`: stores of precomputed register words
//!
//! One sample is an on/off pair, i.e. two toggles.

use crate::direct::{CachedPin, DirectPin};
use crate::error::{Error, Result};
use crate::line::{LineProvider, OutputLine};
use crate::registry::Pin;
use crate::window::WindowMap;
use chrono::Local;
use colored::Colorize;
use serde::Serialize;
use std::path::Path;
use std::time::{Duration, Instant};

/// Default number of on/off pairs per strategy
pub const DEFAULT_SAMPLES: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Kernel GPIO line writes
    Line,
    /// Read-modify-write of the mapped registers
    Direct,
    /// Stores of precomputed register words
    Cached,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Line, Strategy::Direct, Strategy::Cached];

    /// Skips the slow comparison paths
    pub const FAST: [Strategy; 1] = [Strategy::Cached];

    pub fn description(self) -> &'static str {
        match self {
            Strategy::Line => "GPIO character device",
            Strategy::Direct => "direct register read-modify-write",
            Strategy::Cached => "direct register, precomputed words",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Line => write!(f, "line"),
            Strategy::Direct => write!(f, "direct"),
            Strategy::Cached => write!(f, "cached"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub strategy: Strategy,
    pub samples: u64,
    pub elapsed_secs: f64,
    pub toggles_per_sec: f64,
}

impl StrategyResult {
    fn new(strategy: Strategy, samples: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let toggles = (samples * 2) as f64;
        Self {
            strategy,
            samples,
            elapsed_secs: secs,
            toggles_per_sec: if secs > 0.0 { toggles / secs } else { f64::INFINITY },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub pin: String,
    pub name: String,
    pub timestamp: String,
    pub results: Vec<StrategyResult>,
}

pub struct Bench<'a, L: LineProvider> {
    pin: &'a Pin,
    windows: &'a WindowMap,
    lines: &'a mut L,
}

impl<'a, L: LineProvider> Bench<'a, L> {
    pub fn new(pin: &'a Pin, windows: &'a WindowMap, lines: &'a mut L) -> Result<Self> {
        pin.resolved()?;
        Ok(Self {
            pin,
            windows,
            lines,
        })
    }

    /// Time `samples` on/off pairs with one strategy
    pub fn run(&mut self, strategy: Strategy, samples: u64) -> Result<StrategyResult> {
        if samples == 0 {
            return Err(Error::InvalidArgument("sample count must be positive".to_string()));
        }
        log::info!(
            "Pin {}: {} pairs via {}",
            self.pin.key,
            samples,
            strategy.description()
        );

        let elapsed = match strategy {
            Strategy::Line => {
                let mut line = self.lines.request_output(self.pin.key)?;
                let start = Instant::now();
                for _ in 0..samples {
                    line.set_value(true)?;
                    line.set_value(false)?;
                }
                start.elapsed()
            }
            Strategy::Direct => {
                let direct = DirectPin::new(self.pin, self.windows)?;
                let start = Instant::now();
                for _ in 0..samples {
                    direct.write(true)?;
                    direct.write(false)?;
                }
                start.elapsed()
            }
            Strategy::Cached => {
                let cached = CachedPin::prepare(self.pin, self.windows)?;
                let start = Instant::now();
                for _ in 0..samples {
                    cached.pulse()?;
                }
                start.elapsed()
            }
        };

        let result = StrategyResult::new(strategy, samples, elapsed);
        log::debug!(
            "{}: {:.3}s, {:.0} toggles/s",
            strategy,
            result.elapsed_secs,
            result.toggles_per_sec
        );
        Ok(result)
    }

    /// Run several strategies in order
    pub fn run_all(&mut self, strategies: &[Strategy], samples: u64) -> Result<BenchReport> {
        let results = strategies
            .iter()
            .map(|&s| self.run(s, samples))
            .collect::<Result<Vec<_>>>()?;
        Ok(BenchReport {
            pin: self.pin.key.to_string(),
            name: self.pin.name.clone(),
            timestamp: Local::now().to_rfc3339(),
            results,
        })
    }
}

impl BenchReport {
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn write_toml(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_toml()?).map_err(|e| Error::io(path, e))
    }

    /// Speed-up of `strategy` over the kernel line path, when both ran
    pub fn speedup(&self, strategy: Strategy) -> Option<f64> {
        let rate = |s: Strategy| {
            self.results
                .iter()
                .find(|r| r.strategy == s)
                .map(|r| r.toggles_per_sec)
        };
        Some(rate(strategy)? / rate(Strategy::Line)?)
    }

    pub fn print_report(&self) {
        println!("{}", "=".repeat(70));
        println!(
            "{}",
            format!("Toggle Benchmark: pin {} ({})", self.pin, self.name)
                .cyan()
                .bold()
        );
        println!("{}", "=".repeat(70));

        for r in &self.results {
            let speedup = match (r.strategy, self.speedup(r.strategy)) {
                (Strategy::Line, _) | (_, None) => String::new(),
                (_, Some(x)) => format!("  ({x:.1}x line)").dimmed().to_string(),
            };
            println!(
                "  {:<8} {:>14.0} toggles/s  {:>9.3}s  {}{}",
                r.strategy.to_string().white().bold(),
                r.toggles_per_sec,
                r.elapsed_secs,
                r.strategy.description().dimmed(),
                speedup
            );
        }

        println!("\n{}", "=".repeat(70));
    }
}
