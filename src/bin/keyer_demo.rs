// src/bin/keyer_demo.rs  —  keyer-demo entry point
//
// Short scripted keying session exercising the library end to end: an
// iambic squeeze, then a straight-key sign-off, with every key edge echoed
// through the keying callback. Run with RUST_LOG=debug for the internal
// trace.

use anyhow::{Context, Result};
use clap::Parser;
use cw_keyer::{Generator, Key, KeyValue};
use serde::Deserialize;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

/// The example config is embedded in the binary at compile time.
const DEFAULT_CONFIG_TOML: &str = include_str!("../../config.toml.example");

// ── CLI ───────────────────────────────────────────────────────────────────────
#[derive(Parser, Debug)]
#[command(
    name    = "keyer-demo",
    about   = "cw-keyer demonstration  |  scripted sidetone session",
    version,
)]
struct Cli {
    /// Config file path (TOML; optional)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Send speed in WPM (4..60)
    #[arg(long)]
    wpm: Option<u32>,

    /// Sidetone frequency Hz (0..4000)
    #[arg(long)]
    tone: Option<u32>,

    /// Volume percent (0..100)
    #[arg(long)]
    volume: Option<u32>,

    /// Mark weighting percent (20..80)
    #[arg(long)]
    weighting: Option<u32>,

    /// Curtis mode B (default: mode A)
    #[arg(long, action)]
    curtis_b: bool,

    /// Number of squeeze elements to key before the sign-off
    #[arg(long, default_value_t = 12)]
    elements: u32,

    /// Print the built-in default config.toml to stdout and exit
    #[arg(long, action)]
    print_config: bool,
}

// ── TOML file structure ───────────────────────────────────────────────────────
#[derive(Debug, Clone, Deserialize, Default)]
struct FileConfig {
    keyer: Option<KeyerCfg>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyerCfg {
    wpm:       Option<u32>,
    tone_hz:   Option<u32>,
    volume:    Option<u32>,
    weighting: Option<u32>,
    curtis_b:  Option<bool>,
}

// ── Resolved config ───────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
struct DemoConfig {
    wpm:       u32,
    tone_hz:   u32,
    volume:    u32,
    weighting: u32,
    curtis_b:  bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self { wpm: 18, tone_hz: 620, volume: 70, weighting: 50, curtis_b: false }
    }
}

impl DemoConfig {
    fn load(cli: &Cli) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(path) = &cli.config {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Reading config {path:?}"))?;
            let fc: FileConfig = toml::from_str(&raw)
                .with_context(|| format!("Parsing config {path:?}"))?;
            if let Some(k) = fc.keyer {
                if let Some(v) = k.wpm       { cfg.wpm       = v; }
                if let Some(v) = k.tone_hz   { cfg.tone_hz   = v; }
                if let Some(v) = k.volume    { cfg.volume    = v; }
                if let Some(v) = k.weighting { cfg.weighting = v; }
                if let Some(v) = k.curtis_b  { cfg.curtis_b  = v; }
            }
        }

        if let Some(v) = cli.wpm       { cfg.wpm       = v; }
        if let Some(v) = cli.tone      { cfg.tone_hz   = v; }
        if let Some(v) = cli.volume    { cfg.volume    = v; }
        if let Some(v) = cli.weighting { cfg.weighting = v; }
        if cli.curtis_b                { cfg.curtis_b  = true; }
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    if cli.print_config {
        print!("{DEFAULT_CONFIG_TOML}");
        return Ok(());
    }

    let cfg = DemoConfig::load(&cli)?;

    // ── Generator + key ───────────────────────────────────────────────────────
    let gen = Generator::with_default_sink();
    gen.set_send_speed(cfg.wpm)?;
    gen.set_frequency(cfg.tone_hz)?;
    gen.set_volume(cfg.volume)?;
    gen.set_weighting(cfg.weighting)?;

    let key = Key::new();
    key.register_generator(&gen);
    if cfg.curtis_b {
        key.ik_enable_curtis_b();
    }
    key.register_keying_callback(|at, value| {
        let edge = match value {
            KeyValue::Closed => "mark ",
            KeyValue::Open   => "space",
        };
        println!("{:>5}.{:06}  {edge}", at.seconds, at.microseconds);
    });

    gen.start();
    println!(
        "keyer-demo: {} WPM, {} Hz, Curtis mode {}",
        cfg.wpm,
        cfg.tone_hz,
        if cfg.curtis_b { "B" } else { "A" },
    );

    // ── Iambic squeeze ────────────────────────────────────────────────────────
    println!("squeezing both paddles for {} elements…", cli.elements);
    key.ik_notify_paddle_event(true, true)?;
    for _ in 0..cli.elements {
        key.ik_wait_for_element()?;
    }
    key.ik_notify_paddle_event(false, false)?;
    key.ik_wait_for_keyer()?;

    // ── Straight-key sign-off: dit dit ────────────────────────────────────────
    println!("straight-key sign-off…");
    let dot = Duration::from_micros(gen.durations().dot_us as u64);
    for _ in 0..2 {
        key.sk_notify_event(KeyValue::Closed)?;
        thread::sleep(dot);
        key.sk_notify_event(KeyValue::Open)?;
        thread::sleep(dot);
    }
    gen.wait_for_tone_queue();

    gen.stop();
    println!("done — 73!");
    Ok(())
}
