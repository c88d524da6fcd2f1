//! Simulate command handler.

use std::time::Duration;

use anyhow::{Context, Result};
use duplex_core::{DuplexSettings, load_settings, validate_settings};

use crate::commands::SimulateArgs;
use crate::sim::{self, SimulationOptions, SimulationReport};

/// Resolve settings from `args`: file or defaults, then CLI overrides.
pub fn settings_from_args(args: &SimulateArgs) -> Result<DuplexSettings> {
    let mut settings = match &args.config {
        Some(path) => load_settings(path)
            .with_context(|| format!("Settings file {} rejected", path.display()))?,
        None => DuplexSettings::with_defaults(),
    };

    if let Some(rate) = args.sample_rate {
        settings.engine.sample_rate = rate;
    }
    if let Some(dir) = &args.record {
        settings.recording.enabled = true;
        settings.recording.directory.clone_from(dir);
    }

    validate_settings(&settings)?;
    Ok(settings.sanitized())
}

/// Translate CLI arguments into simulation knobs.
pub fn options_from_args(args: &SimulateArgs) -> SimulationOptions {
    let defaults = SimulationOptions::default();
    SimulationOptions {
        texts: if args.texts.is_empty() {
            defaults.texts
        } else {
            args.texts.clone()
        },
        barge_in: args.barge_in_ms.map(Duration::from_millis),
        echo_gain: args.echo_gain,
        noise_amplitude: args.noise,
        timeout: Duration::from_secs(args.timeout_secs),
    }
}

/// Run the simulation and print a summary.
pub fn execute(args: &SimulateArgs) -> Result<()> {
    let settings = settings_from_args(args)?;
    let options = options_from_args(args);

    let report = sim::run(&settings, &options)?;
    print_report(&settings, &report);

    if !report.settled {
        anyhow::bail!("playback did not settle within {}s", args.timeout_secs);
    }
    Ok(())
}

fn print_report(settings: &DuplexSettings, report: &SimulationReport) {
    let engine = &report.engine;
    let events = &report.events;

    println!();
    println!("  Playback");
    println!("    utterances synthesized : {}", events.audio_ready);
    println!("    finished               : {}", events.finished);
    println!("    discarded              : {}", events.discarded);
    println!("    failed                 : {}", events.failed + events.synthesis_failed);
    if let Some(latency) = report.barge_in_latency {
        println!("    barge-in settled in    : {} ms", latency.as_millis());
        println!("    echo left in the room  : {} samples", report.echo_pending);
    }

    println!();
    println!("  Echo cancellation @ {} Hz", settings.engine.sample_rate);
    println!("    active                 : {}", engine.active);
    println!("    frames processed       : {}", engine.frames_processed);
    println!("    frames passed through  : {}", engine.frames_passed_through);
    println!("    avg process() time     : {:.1} us", engine.avg_processing_time_us);
    println!("    delay hint             : {} ms", engine.delay_hint_ms);
    println!("    reference dropped      : {} samples", engine.reference.dropped_samples);
    match report.capture.attenuation_db() {
        Some(db) => println!("    echo attenuation       : {db:.1} dB"),
        None => println!("    echo attenuation       : n/a (no echo captured)"),
    }
    if let Some(erle) = report.erle_db {
        println!("    native ERLE            : {erle:.1} dB");
    }
    if settings.recording.enabled {
        println!(
            "    recordings             : {}",
            settings.recording.directory.display()
        );
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::{Cli, Commands};

    fn simulate_args(argv: &[&str]) -> SimulateArgs {
        let mut full = vec!["duplex", "simulate"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Commands::Simulate(args) => args,
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let args = simulate_args(&["--sample-rate", "16000", "--record", "/tmp/aec"]);
        let settings = settings_from_args(&args).unwrap();
        assert_eq!(settings.engine.sample_rate, 16_000);
        assert!(settings.recording.enabled);
        assert_eq!(settings.recording.directory, std::path::Path::new("/tmp/aec"));
    }

    #[test]
    fn unsupported_rate_is_rejected() {
        let args = simulate_args(&["--sample-rate", "44100"]);
        assert!(settings_from_args(&args).is_err());
    }

    #[test]
    fn default_texts_fill_in() {
        let options = options_from_args(&simulate_args(&[]));
        assert_eq!(options.texts.len(), 2);
        assert_eq!(options.barge_in, None);

        let options = options_from_args(&simulate_args(&["-t", "hi", "--barge-in-ms", "5"]));
        assert_eq!(options.texts, vec!["hi"]);
        assert_eq!(options.barge_in, Some(Duration::from_millis(5)));
    }
}
