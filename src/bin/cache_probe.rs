//! Cache calibration and occupancy sampling from the command line.
//!
//! `calibrate` prints the median sweep latency per working-set size with the
//! likely cache level transitions marked. `sample` collects one or more
//! occupancy traces while whatever else is running on the machine competes for
//! the cache.
use anyhow::{Context, anyhow};
use cache_occupancy_rs::calibrator::{Calibration, DEFAULT_JUMP_RATIO};
use cache_occupancy_rs::config::{self, CalibratorConfig, SamplerConfig};
use cache_occupancy_rs::node::{spawn_calibrator, spawn_sampler};
use cache_occupancy_rs::{format_size, format_size_fixed_int};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::process::ExitCode;
use std::time::Duration;

// use faster/smaller `mimalloc` allocator
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(version, about = "Cache calibration and occupancy sampling")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Measure median sweep latency for increasing working-set sizes
    Calibrate {
        #[command(flatten)]
        common: Common,
        /// Working-set sizes in cache lines, strictly increasing
        #[arg(long, value_delimiter = ',', default_values_t = config::DEFAULT_SIZES)]
        sizes: Vec<usize>,
        /// Timed trials per size
        #[arg(long, default_value_t = config::DEFAULT_REPETITIONS)]
        repetitions: usize,
    },
    /// Count probe sweeps per window to produce occupancy traces
    Sample {
        #[command(flatten)]
        common: Common,
        /// Probe buffer size in bytes [default: detected last level cache size]
        #[arg(long)]
        buffer_size: Option<usize>,
        /// Total duration of one trace in milliseconds
        #[arg(long, default_value_t = 10_000)]
        duration: u64,
        /// Window length in milliseconds
        #[arg(long, default_value_t = 10)]
        window: u64,
        /// Number of traces to collect
        #[arg(long, default_value_t = 1)]
        trials: usize,
    },
}

#[derive(Args, Debug)]
struct Common {
    /// Cache line size in bytes [default: detected]
    #[arg(long)]
    line_size: Option<usize>,
    /// CPU core to pin the measurement thread to
    #[arg(long)]
    core: Option<usize>,
    /// Print results as JSON
    #[arg(long)]
    json: bool,
}

impl Common {
    fn line_size(&self) -> usize {
        self.line_size.unwrap_or_else(config::detect_line_size)
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Cmd::Calibrate { common, sizes, repetitions } => calibrate(&common, sizes, repetitions),
        Cmd::Sample { common, buffer_size, duration, window, trials } => sample(
            &common,
            buffer_size.unwrap_or_else(config::detect_llc_size),
            Duration::from_millis(duration),
            Duration::from_millis(window),
            trials,
        ),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn calibrate(common: &Common, sizes: Vec<usize>, repetitions: usize) -> anyhow::Result<()> {
    let line_size = common.line_size();
    let config = CalibratorConfig::default()
        .with_line_size(line_size)
        .with_sizes(sizes)
        .with_repetitions(repetitions);

    let worker = spawn_calibrator(config, common.core).context("spawning calibrator thread")?;
    let result = worker.run().context("calibrator stopped before replying")?;
    worker.shutdown().map_err(|_| anyhow!("calibrator thread panicked"))?;
    let calibration = result.context("calibration failed")?;

    if common.json {
        let json = serde_json::to_string_pretty(&calibration)?;
        println!("{}", json);
    } else {
        print_calibration(&calibration, line_size);
    }
    Ok(())
}

fn print_calibration(calibration: &Calibration, line_size: usize) {
    let jumps = calibration.jumps(DEFAULT_JUMP_RATIO);

    println!("{:>10} {:>10} {:>14} {:>12}", "Lines", "Size", "Median (ms)", "ns/line");
    println!("{:-<10} {:-<10} {:-<14} {:-<12}", "", "", "", "");
    for sample in calibration {
        // Show jump indicator for significant per-line latency increases
        let jump = if jumps.contains(sample) { " ←" } else { "" };
        println!(
            "{:>10} {:>10} {:>14.6} {:>12.2}{}",
            sample.lines,
            format_size_fixed_int((sample.lines * line_size) as u64),
            sample.latency_ms(),
            sample.per_line_ns(),
            jump
        );
    }
    println!("\n← indicates significant latency jump (cache level transition)");
}

fn sample(
    common: &Common,
    buffer_size: usize,
    duration: Duration,
    window: Duration,
    trials: usize,
) -> anyhow::Result<()> {
    let config = SamplerConfig::default()
        .with_line_size(common.line_size())
        .with_buffer_size(buffer_size)
        .with_duration(duration)
        .with_window(window);
    config.validate()?;

    info!(
        "Collecting {} trace(s) with a {} probe buffer",
        trials,
        format_size(buffer_size as f32)
    );

    let worker = spawn_sampler(config, common.core).context("spawning sampler thread")?;
    let mut traces = Vec::with_capacity(trials);
    for trial in 0..trials {
        let trace = worker
            .run()
            .context("sampler stopped before replying")?
            .with_context(|| format!("sampling trial {}", trial))?;

        if !common.json {
            if let Some(stats) = trace.stats() {
                println!(
                    "trial {:>4}: {} windows, sweeps/window min {} max {} range {}",
                    trial, stats.samples, stats.min, stats.max, stats.range
                );
            }
        }
        traces.push(trace);
    }
    worker.shutdown().map_err(|_| anyhow!("sampler thread panicked"))?;

    if common.json {
        let json = serde_json::to_string(&traces)?;
        println!("{}", json);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> Common {
        Common { line_size: Some(64), core: None, json: true }
    }

    #[test]
    fn calibration_errors_keep_their_cause() {
        let err = calibrate(&quiet(), vec![10, 1], 3).unwrap_err();
        let chain = format!("{:#}", err);
        assert!(chain.starts_with("calibration failed: misconfiguration"), "{}", chain);
        assert!(err.downcast_ref::<cache_occupancy_rs::Error>().is_some());
    }

    #[test]
    fn sampler_misconfiguration_is_reported_before_spawning() {
        let err = sample(
            &quiet(),
            64 * 1024,
            Duration::from_millis(10),
            Duration::from_millis(20),
            1,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<cache_occupancy_rs::Error>(),
            Some(cache_occupancy_rs::Error::Misconfiguration(_))
        ));
    }

    #[test]
    fn sample_runs_requested_trials() {
        assert!(sample(&quiet(), 64 * 1024, Duration::from_millis(20), Duration::from_millis(10), 2).is_ok());
    }
}
