use anyhow::{Context, Result, bail};
use clap::Parser;
use owo_colors::OwoColorize;
use roundtable::audio::pcm::samples_to_pcm16_le_bytes;
use roundtable::cli::{Cli, Commands, ConfigAction, SimulateArgs};
use roundtable::config::Config;
use roundtable::session::{MockBehavior, MockClientFactory, MockStep};
use roundtable::speaker::{Speaker, Voice, default_roster};
use roundtable::summarizer::{MockGenerator, SummaryGenerator};
use roundtable::transcript::TranscriptEntry;
use roundtable::{Orchestrator, OrchestratorEvent};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Lines the simulated speakers take turns saying.
const REMARKS: [&str; 5] = [
    "I cannot agree with what was just said.",
    "Let me build on that point before we lose it.",
    "History has already answered this question for us.",
    "We keep ignoring the practical side of all this.",
    "The people in this room are not the ones who will decide.",
];

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Simulate(args) => {
            let config = load_config(cli.config.as_deref())?;
            run_simulation(config, args).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Speakers => list_speakers(),
    }

    Ok(())
}

/// Install the log subscriber. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "roundtable=info,warn",
        (false, 1) => "roundtable=debug,info",
        (false, _) => "roundtable=trace,debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config)
/// 2. Default config path (~/.config/roundtable/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    Ok(config.with_env_overrides())
}

fn config_path(custom_path: Option<&Path>) -> Result<PathBuf> {
    match custom_path {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(Config::default_path()?),
    }
}

/// Handle configuration commands.
fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Init { force } => {
            let path = config_path(custom_path)?;
            if path.exists() && !force {
                bail!(
                    "{} already exists (use --force to overwrite)",
                    path.display()
                );
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            std::fs::write(&path, toml::to_string_pretty(&Config::default())?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
        }
        ConfigAction::Path => {
            println!("{}", config_path(custom_path)?.display());
        }
    }
    Ok(())
}

fn list_speakers() {
    for speaker in default_roster() {
        let voice = match &speaker.voice {
            Voice::Prebuilt { name } => name.clone(),
            Voice::Cloned { mime_type, .. } => format!("cloned ({mime_type})"),
        };
        println!(
            "{:<12} {:<24} {}",
            speaker.id.as_str().bold(),
            speaker.name,
            voice.dimmed()
        );
    }
}

/// A short sawtooth so volume events have something to measure.
fn tone(samples: usize) -> Vec<u8> {
    let wave: Vec<i16> = (0..samples)
        .map(|i| ((i % 64) as i16 - 32) * 200)
        .collect();
    samples_to_pcm16_le_bytes(&wave)
}

/// Scripted sessions: each speaker cycles through the remarks from its own offset.
fn simulated_factory(roster: &[Speaker], speech: Duration) -> MockClientFactory {
    roster
        .iter()
        .enumerate()
        .fold(MockClientFactory::new(), |factory, (offset, speaker)| {
            let behavior = (0..REMARKS.len())
                .fold(MockBehavior::default(), |behavior, k| {
                    let remark = REMARKS[(offset + k) % REMARKS.len()];
                    behavior.with_turn(vec![
                        MockStep::Audio(tone(2400)),
                        MockStep::Text(remark.to_string()),
                        MockStep::Delay(speech),
                        MockStep::TurnComplete,
                    ])
                })
                .with_fallback(vec![
                    MockStep::Text("I have nothing to add.".to_string()),
                    MockStep::Delay(speech),
                    MockStep::TurnComplete,
                ]);
            factory.with_behavior(speaker.id.as_str(), behavior)
        })
}

#[cfg_attr(not(feature = "gemini"), allow(unused_variables))]
fn summary_generator(config: &Config) -> Arc<dyn SummaryGenerator> {
    #[cfg(feature = "gemini")]
    {
        if let Some(key) = config.generation.api_key.as_deref() {
            info!("summaries generated by Gemini");
            return Arc::new(roundtable::summarizer::gemini::GeminiGenerator::new(key));
        }
    }
    Arc::new(MockGenerator::new())
}

fn print_entry(entry: &TranscriptEntry) {
    if entry.is_human {
        println!("{}: {}", entry.speaker.green().bold(), entry.text);
    } else if entry.speaker == roundtable::defaults::SYSTEM_SPEAKER {
        println!("{}", format!("-- {} --", entry.text).dimmed());
    } else {
        println!("{}: {}", entry.speaker.cyan().bold(), entry.text);
    }
}

async fn run_simulation(mut config: Config, args: SimulateArgs) -> Result<()> {
    config.orchestration.chaos_mode = args.chaos;
    config.orchestration.allow_self_reply = args.self_reply;
    if let Some(topic) = args.topic {
        config.conversation.topic = topic;
    }
    config.validate()?;
    info!(version = %roundtable::version_string(), "starting simulation");

    let roster = default_roster();
    let factory = Arc::new(simulated_factory(&roster, args.speech));
    let generator = summary_generator(&config);
    if !args.json {
        println!("{} {}", "Topic:".bold(), config.conversation.topic);
        println!();
    }

    let mut orchestrator = Orchestrator::new(config, roster, factory, generator);
    if let Some(seed) = args.seed {
        orchestrator = orchestrator.with_seed(seed);
    }
    let (handle, task) = orchestrator.spawn();
    let mut events = handle.subscribe();
    handle.start().await?;

    let deadline = tokio::time::sleep(args.duration);
    tokio::pin!(deadline);
    let mut lines = 0;
    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!(elapsed = %humantime::format_duration(args.duration), "simulation time is up");
                break;
            }
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if args.json {
                        println!("{}", serde_json::to_string(&event)?);
                    }
                    if let OrchestratorEvent::TranscriptAppended { entry } = &event {
                        if !args.json {
                            print_entry(entry);
                        }
                        lines += 1;
                        if lines >= args.turns {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    handle.shutdown().await?;
    task.await.context("orchestrator task failed")?;
    Ok(())
}
