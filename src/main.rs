// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! MathLens: photograph a math problem, get a worked solution
//!
//! Command-line front end. The browser UI lives in `mathlens-web`.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use mathlens::config::AppConfig;
use mathlens::gemini::GeminiClient;
use mathlens::imaging::{self, Rotation};
use mathlens::session::{CapturedImage, SessionStore};
use mathlens::tutor::Tutor;
use mathlens::{MathLensError, Result};

/// MathLens CLI - solve math problems from photos
#[derive(Parser, Debug)]
#[command(name = "mathlens")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version = "1.0.0")]
#[command(about = "Solve math problems from photos with a hosted vision model", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Solve the problem in an image, then ask follow-up doubts
    Solve {
        /// Photo of the problem
        image: PathBuf,

        /// Rotate the photo clockwise first (multiple of 90)
        #[arg(long, allow_hyphen_values = true)]
        rotate: Option<i32>,

        /// Follow-up doubt, asked after the solution (repeatable)
        #[arg(short, long)]
        doubt: Vec<String>,

        /// Output format for results
        #[arg(long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Rotate an image and save it as JPEG
    Rotate {
        /// Input image
        input: PathBuf,

        /// Output JPEG path
        output: PathBuf,

        /// Clockwise rotation in degrees (multiple of 90)
        #[arg(short, long, allow_hyphen_values = true)]
        degrees: i32,
    },

    /// Show AI engine status
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Write a default config.json
    Init {
        /// Directory to initialize (default: current)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Force overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct SolveOutput {
    solution: String,
    clarifications: Vec<ClarificationOutput>,
}

#[derive(Serialize)]
struct ClarificationOutput {
    doubt: String,
    answer: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Commands::Solve { image, rotate, doubt, format } => {
            run_solve(config, image, rotate, doubt, &format).await
        }
        Commands::Rotate { input, output, degrees } => {
            run_rotate(&config, &input, &output, degrees)
        }
        Commands::Status => run_status(config).await,
        Commands::Config { action } => run_config_command(config, action),
        Commands::Init { dir, force } => run_init(dir, force),
    }
}

fn build_client(config: &AppConfig) -> Result<GeminiClient> {
    let api_key = config.api_key()?;
    GeminiClient::new(&config.ai_engine, api_key)
}

/// Solve one photo and answer any doubts in order
async fn run_solve(
    config: AppConfig,
    path: PathBuf,
    rotate: Option<i32>,
    doubts: Vec<String>,
    format: &str,
) -> Result<()> {
    let mut bytes = std::fs::read(&path)?;
    if let Some(degrees) = rotate {
        let rotation = Rotation::from_degrees(degrees)?;
        bytes = imaging::rotate_bytes(&bytes, rotation, config.image.jpeg_quality)?;
    }
    let mime_type = imaging::detect_mime(&bytes)?;
    debug!("Loaded {:?} ({}, {} bytes)", path, mime_type, bytes.len());

    let client = build_client(&config)?;
    let tutor = Tutor::new(Arc::new(client), config.prompts.clone(), config.image.clone());

    let store = SessionStore::new();
    let id = store.create();
    store.with_session(&id, |session| {
        session.capture(CapturedImage::new(bytes, mime_type));
        Ok(())
    })?;

    info!("Solving {:?}", path);
    let solution = tutor.solve(&store, &id).await?;
    if format == "text" {
        println!("{}", solution.trim());
    }

    let mut clarifications = Vec::new();
    for doubt in doubts {
        let clarification = tutor.clarify(&store, &id, &doubt).await?;
        if format == "text" {
            println!("\n> {}\n", clarification.doubt);
            println!("{}", clarification.answer.trim());
        }
        clarifications.push(ClarificationOutput {
            doubt: clarification.doubt,
            answer: clarification.answer,
        });
    }

    if format == "json" {
        let output = SolveOutput { solution, clarifications };
        println!("{}", serde_json::to_string_pretty(&output)?);
    }

    Ok(())
}

/// Rotate an image file
fn run_rotate(config: &AppConfig, input: &Path, output: &Path, degrees: i32) -> Result<()> {
    let rotation = Rotation::from_degrees(degrees)?;
    let bytes = std::fs::read(input)?;
    let rotated = imaging::rotate_bytes(&bytes, rotation, config.image.jpeg_quality)?;
    std::fs::write(output, rotated)?;

    println!("Rotated {} by {} degrees -> {}", input.display(), rotation.degrees(), output.display());
    Ok(())
}

/// Run status check
async fn run_status(config: AppConfig) -> Result<()> {
    println!("MathLens v1.0.0 Status");
    println!("======================");
    println!("API URL: {}", config.ai_engine.url);
    println!("Model: {}", config.ai_engine.model);

    let client = match build_client(&config) {
        Ok(client) => client,
        Err(e) => {
            println!("API key: Error - {}", e);
            return Ok(());
        }
    };
    println!("API key: set ({})", config.ai_engine.api_key_env);

    match client.health_check().await {
        Ok(()) => println!("API: Reachable"),
        Err(e) => {
            println!("API: Error - {}", e);
            return Ok(());
        }
    }

    match client.list_models().await {
        Ok(models) => {
            println!("\nAvailable models:");
            for m in &models {
                let marker = if m == client.model() { "→" } else { " " };
                println!("  {} {}", marker, m);
            }
        }
        Err(e) => println!("  Error listing models: {}", e),
    }

    Ok(())
}

/// Run config commands
fn run_config_command(config: AppConfig, action: ConfigCommands) -> Result<()> {
    match action {
        ConfigCommands::Show => {
            let json = serde_json::to_string_pretty(&config)?;
            println!("{}", json);
        }
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {:?}", output);
        }
    }

    Ok(())
}

/// Initialize a new MathLens directory
fn run_init(dir: Option<PathBuf>, force: bool) -> Result<()> {
    let target = dir.unwrap_or_else(|| PathBuf::from("."));
    let config_path = target.join("config.json");

    if config_path.exists() && !force {
        return Err(MathLensError::Config(
            "config.json already exists. Use --force to overwrite".to_string()
        ));
    }

    std::fs::create_dir_all(&target)?;
    let config = AppConfig::default();
    config.save(&config_path)?;

    println!("MathLens initialized in {:?}", target);
    println!("\nCreated:");
    println!("  - config.json");
    println!("\nNext steps:");
    println!("  1. Export {}=<your key> (or put it in .env)", config.ai_engine.api_key_env);
    println!("  2. Start the web UI: mathlens-web --open");

    Ok(())
}
