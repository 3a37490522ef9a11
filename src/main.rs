//! GPIO Register Map
//!
//! Finds the register word and bit behind each GPIO line of a board by
//! toggling the line through the kernel and watching memory, then drives
//! pins straight through `/dev/mem`.
//!
//! # Usage
//!
//! ```bash
//! # Probe the pins listed in a board file and write the pin map
//! sudo gpio-regmap discover -i board.txt -o pins.txt
//!
//! # Re-probe one pin that came out ambiguous, failing if it still is
//! sudo gpio-regmap discover -i board.txt -o pins.txt --pin 1.7 --strict
//!
//! # Check a board file without touching hardware
//! gpio-regmap discover -i board.txt -o pins.txt --dry-run
//!
//! # Inspect, read and drive pins from a pin map
//! gpio-regmap show -i pins.txt
//! sudo gpio-regmap read -i pins.txt --pin 0.3
//! sudo gpio-regmap write -i pins.txt --pin 0.3 1
//!
//! # Compare kernel line writes with direct register writes
//! sudo gpio-regmap bench -i pins.txt --pin 0.3 -n 1000000 --report bench.toml
//! sudo gpio-regmap bench -i pins.txt --pin 0.3 --strategy direct,cached
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use gpio_regmap::bench::{Bench, Strategy, DEFAULT_SAMPLES};
use gpio_regmap::board::store::render;
use gpio_regmap::board::{self, BoardDescriptor};
use gpio_regmap::direct::DirectPin;
use gpio_regmap::registry::{PinKey, PinRegistry, Polarity, Role};
use gpio_regmap::window::WindowMap;

/// GPIO Register Map
///
/// Register discovery and direct drive for memory-mapped GPIO
#[derive(Parser)]
#[command(name = "gpio-regmap")]
#[command(author = "Prasanna Gautam")]
#[command(version)]
#[command(about = "Discover GPIO data registers and drive pins through them")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe pins listed in a board file and write the pin map
    Discover {
        /// Board file with chips, candidate offsets and seed pins
        #[arg(short, long)]
        input: PathBuf,

        /// Pin map to write
        #[arg(short, long)]
        output: PathBuf,

        /// Only probe these pins (e.g., 1.7)
        #[arg(long = "pin")]
        pins: Vec<PinKey>,

        /// Check the board file against memory windows and print the plan
        #[arg(long)]
        dry_run: bool,

        /// Count pins with no register change as failures and exit non-zero
        #[arg(long)]
        strict: bool,
    },

    /// Print the pins of a pin map
    Show {
        /// Pin map file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Read a pin's level from its input register
    Read {
        /// Pin map file
        #[arg(short, long)]
        input: PathBuf,

        /// Pin as <chip>.<line>
        #[arg(short, long)]
        pin: PinKey,
    },

    /// Drive a pin through its output registers
    Write {
        /// Pin map file
        #[arg(short, long)]
        input: PathBuf,

        /// Pin as <chip>.<line>
        #[arg(short, long)]
        pin: PinKey,

        /// Level to drive
        #[arg(value_parser = clap::value_parser!(u8).range(0..=1))]
        value: u8,
    },

    /// Measure toggle rates for each access path
    Bench {
        /// Pin map file
        #[arg(short, long)]
        input: PathBuf,

        /// Pin as <chip>.<line>
        #[arg(short, long)]
        pin: PinKey,

        /// On/off pairs per strategy
        #[arg(short = 'n', long, default_value_t = DEFAULT_SAMPLES)]
        samples: u64,

        /// Only run the cached register path
        #[arg(long, conflicts_with = "strategy")]
        fast_only: bool,

        /// Strategies to run, in order (default: all)
        #[arg(short, long, value_enum, value_delimiter = ',')]
        strategy: Vec<Strategy>,

        /// Write the results as TOML
        #[arg(short, long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Discover {
            input,
            output,
            pins,
            dry_run,
            strict,
        } => handle_discover(&input, &output, &pins, dry_run, strict),
        Commands::Show { input } => handle_show(&input),
        Commands::Read { input, pin } => handle_read(&input, pin),
        Commands::Write { input, pin, value } => handle_write(&input, pin, value == 1),
        Commands::Bench {
            input,
            pin,
            samples,
            fast_only,
            strategy,
            report,
        } => {
            let strategies = if fast_only {
                Strategy::FAST.to_vec()
            } else if strategy.is_empty() {
                Strategy::ALL.to_vec()
            } else {
                strategy
            };
            handle_bench(&input, pin, samples, &strategies, report.as_deref())
        }
    }
}

fn load_map(input: &Path) -> Result<(BoardDescriptor, PinRegistry)> {
    board::load_pin_map(input)
        .with_context(|| format!("Failed to load pin map: {}", input.display()))
}

#[cfg(unix)]
fn open_windows(board: &BoardDescriptor) -> Result<WindowMap> {
    WindowMap::open(board).with_context(|| {
        format!(
            "Failed to map GPIO registers from {} (root required)",
            board.mem_path.display()
        )
    })
}

#[cfg(not(unix))]
fn open_windows(_board: &BoardDescriptor) -> Result<WindowMap> {
    anyhow::bail!("Physical register access is only supported on unix")
}

#[cfg(unix)]
fn open_lines(board: &BoardDescriptor) -> Result<gpio_regmap::line::CdevLines> {
    let nodes = board.chips.iter().map(|c| c.gpio_dev).collect();
    Ok(gpio_regmap::line::CdevLines::new(nodes))
}

fn handle_discover(
    input: &Path,
    output: &Path,
    only: &[PinKey],
    dry_run: bool,
    strict: bool,
) -> Result<()> {
    let (board, mut registry) = board::parse_input(input)
        .with_context(|| format!("Failed to load board file: {}", input.display()))?;

    println!(
        "{} Board: {} ({} chips, {} groups, {} pins)",
        "[*]".cyan().bold(),
        board.description.white(),
        board.chips.len(),
        board.groups.len(),
        registry.len()
    );

    if registry.is_empty() {
        return Err(gpio_regmap::Error::EmptyRegistry)
            .with_context(|| format!("No seed pins in {}", input.display()));
    }

    if dry_run {
        return dry_run_discover(&board, &registry, input);
    }

    #[cfg(unix)]
    {
        use gpio_regmap::probe::Prober;

        if !only.is_empty() && output.exists() {
            carry_over(&mut registry, output, only)?;
        }

        let windows = open_windows(&board)?;
        let mut lines = open_lines(&board)?;
        let (summary, written) = Prober::new(&board, &windows, &mut lines)
            .strict(strict)
            .discover(&mut registry, only, input, output)
            .with_context(|| format!("Discovery into {} failed", output.display()))?;

        let status = if summary.ambiguous + summary.failed == 0 {
            "[OK]".green().bold()
        } else {
            "[WARNING]".yellow().bold()
        };
        println!(
            "{} {} resolved, {} ambiguous, {} failed; {} pins written to {}",
            status,
            summary.resolved,
            summary.ambiguous,
            summary.failed,
            written,
            output.display()
        );

        if strict && summary.failed > 0 {
            anyhow::bail!("{} of {} pins failed", summary.failed, summary.probed);
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = (output, only, strict, &mut registry);
        anyhow::bail!("Discovery needs the GPIO character device")
    }
}

/// Keep pins resolved by an earlier run that are not being re-probed
fn carry_over(registry: &mut PinRegistry, previous: &Path, only: &[PinKey]) -> Result<()> {
    let (_, old) = load_map(previous)?;
    let mut kept = 0;
    for pin in old.pins().filter(|p| !only.contains(&p.key)) {
        if let Some(seed) = registry.get_mut(pin.key) {
            seed.resolved = pin.resolved.clone();
            kept += 1;
        }
    }
    log::info!("Kept {} pins from {}", kept, previous.display());
    Ok(())
}

/// Read every candidate register through memory windows and print the pin map
/// that would be written, without probing
fn dry_run_discover(board: &BoardDescriptor, registry: &PinRegistry, input: &Path) -> Result<()> {
    let windows = WindowMap::in_memory(board);
    for (idx, group) in board.groups.iter().enumerate() {
        for role in Role::ALL {
            let offset = board.candidates.resolve(role, idx);
            windows
                .read32(board.group_window(idx), offset)
                .with_context(|| format!("Group {} {} candidate {:#x}", group.name, role, offset))?;
        }
    }
    println!(
        "{} All candidate offsets fit their chip windows",
        "[OK]".green().bold()
    );

    let source = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let (text, _) = render(registry, &source)?;
    println!("\n{}", text);
    Ok(())
}

fn handle_show(input: &Path) -> Result<()> {
    let (board, registry) = load_map(input)?;

    println!("{}", "=".repeat(70));
    println!("{}", format!("Pin Map: {}", board.description).cyan().bold());
    println!("{}", "=".repeat(70));

    println!("\n{}", "Chips:".white().bold());
    for (idx, chip) in board.chips.iter().enumerate() {
        println!(
            "  {}: base {:#010x}, size {:#x}, gpiochip{}",
            idx, chip.base, chip.size, chip.gpio_dev
        );
    }

    println!("\n{}", "Pins:".white().bold());
    for pin in registry.pins() {
        let Some(resolved) = &pin.resolved else {
            println!("  {} {} {}", pin.key, pin.name, "[unresolved]".yellow());
            continue;
        };
        let style = if resolved.registers.shares_output_register() {
            "shared"
        } else {
            "set/clear"
        };
        println!(
            "\n  {} {} ({}, {})",
            pin.key.to_string().white().bold(),
            pin.name,
            resolved.group.cyan(),
            style.dimmed()
        );
        for reg in resolved.registers.iter() {
            let polarity = match reg.polarity {
                Polarity::Assert => "",
                Polarity::ClearViaAnd => " (and)",
            };
            println!(
                "    {:<8} {:#04x} {:#010x}{}",
                reg.role.to_string(),
                reg.offset,
                reg.mask,
                polarity.dimmed()
            );
        }
    }

    println!("\n{}", "=".repeat(70));
    println!(
        "{} of {} pins resolved",
        registry.resolved_count(),
        registry.len()
    );
    Ok(())
}

fn handle_read(input: &Path, key: PinKey) -> Result<()> {
    let (board, registry) = load_map(input)?;
    let pin = registry.get(key)?;
    let windows = open_windows(&board)?;
    let level = DirectPin::new(pin, &windows)?.read()?;

    let shown = if level { "1".green().bold() } else { "0".red().bold() };
    println!("{} {} = {}", pin.key, pin.name, shown);
    Ok(())
}

fn handle_write(input: &Path, key: PinKey, value: bool) -> Result<()> {
    let (board, registry) = load_map(input)?;
    let pin = registry.get(key)?;
    let windows = open_windows(&board)?;
    DirectPin::new(pin, &windows)?
        .write(value)
        .with_context(|| format!("Failed to drive pin {}", key))?;

    println!(
        "{} {} {} driven {}",
        "[OK]".green().bold(),
        pin.key,
        pin.name,
        if value { "high" } else { "low" }
    );
    Ok(())
}

#[cfg(unix)]
fn handle_bench(
    input: &Path,
    key: PinKey,
    samples: u64,
    strategies: &[Strategy],
    report: Option<&Path>,
) -> Result<()> {
    let (board, registry) = load_map(input)?;
    let pin = registry.get(key)?;
    let windows = open_windows(&board)?;
    let mut lines = open_lines(&board)?;

    let results = Bench::new(pin, &windows, &mut lines)?
        .run_all(strategies, samples)
        .context("Benchmark failed")?;
    results.print_report();

    if let Some(path) = report {
        results
            .write_toml(path)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        println!(
            "{} Report written to {}",
            "[OK]".green().bold(),
            path.display()
        );
    }
    Ok(())
}

#[cfg(not(unix))]
fn handle_bench(
    _input: &Path,
    _key: PinKey,
    _samples: u64,
    _strategies: &[Strategy],
    _report: Option<&Path>,
) -> Result<()> {
    anyhow::bail!("Benchmarking needs the GPIO character device")
}
