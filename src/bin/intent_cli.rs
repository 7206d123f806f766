/*!
 * Intent CLI - natural-language system actions from the terminal
 *
 * Classifies requests, runs commands in the sandbox, explains failures and
 * feeds corrections back into the learning store.
 */

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use intent_core::command_builder::plan_command;
use intent_core::lexicon::normalize_package_name;
use intent_core::structured_log::init_logger;
use intent_core::{
    slog_debug, AppConfig, Engine, Entity, EntityType, ErrorContext, Intent, IntentAction,
    JsonFileStore, KeyValueStore, MemoryStore, Pipeline, RecoveryPlan, SandboxError,
};

#[derive(Parser)]
#[command(name = "intent_cli")]
#[command(about = "Intent Core - natural-language requests to safe NixOS actions", long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.intent_core/config.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Keep learned corrections in memory only
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a request without running anything
    Classify {
        #[arg(required = true)]
        text: Vec<String>,

        /// Print the full result as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Run a command in the sandbox
    Run {
        /// Time limit in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Output limit in bytes across stdout and stderr
        #[arg(long)]
        max_output: Option<usize>,

        #[arg(long)]
        allow_network: bool,

        #[arg(long)]
        allow_write: bool,

        command: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Classify a request, plan it and run it
    Do {
        #[arg(required = true)]
        text: Vec<String>,

        /// Don't ask before privileged or destructive commands
        #[arg(short, long)]
        yes: bool,
    },

    /// Explain an error message and suggest fixes
    Diagnose {
        message: String,

        /// Command that failed
        #[arg(long)]
        command: Option<String>,

        /// What the user originally asked for
        #[arg(long)]
        input: Option<String>,

        #[arg(short, long)]
        json: bool,
    },

    /// Teach the classifier what a request should have meant
    Correct {
        input: String,

        /// Intended action, e.g. install, remove, search
        action: String,

        #[arg(short, long)]
        package: Option<String>,

        /// Record the correction as rejected
        #[arg(long)]
        reject: bool,
    },

    /// Complete a request from previously corrected inputs
    Suggest { partial: String },

    /// Show learning statistics
    Stats,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    if let Commands::Version = cli.command {
        println!("intent_cli v{}", env!("CARGO_PKG_VERSION"));
        println!("Intent Core natural-language action pipeline");
        return Ok(0);
    }

    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logger(config.logging.to_log_config());
    slog_debug!("CLI", "started", json!({ "ephemeral": cli.ephemeral }));

    if cli.ephemeral {
        let pipeline = Pipeline::open(MemoryStore::new(), config.sandbox.clone()).await;
        dispatch(&pipeline, cli.command).await
    } else {
        let store = JsonFileStore::new_with_path(&config.learning.store_dir);
        let pipeline = Pipeline::open(store, config.sandbox.clone()).await;
        dispatch(&pipeline, cli.command).await
    }
}

async fn dispatch<S: KeyValueStore>(pipeline: &Pipeline<S>, command: Commands) -> Result<i32> {
    match command {
        Commands::Classify { text, json } => {
            let result = pipeline.process_input(&text.join(" "));
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_intent(&result.intent, result.engine);
            }
            Ok(0)
        }

        Commands::Run {
            timeout_ms,
            max_output,
            allow_network,
            allow_write,
            command,
            args,
        } => {
            let mut policy = pipeline.policy().clone();
            if let Some(ms) = timeout_ms {
                policy.max_execution_time_ms = ms;
            }
            if let Some(bytes) = max_output {
                policy.max_output_bytes = bytes;
            }
            policy.allow_network |= allow_network;
            policy.allow_file_write |= allow_write;

            match pipeline.execute(&command, &args, &policy).await {
                Ok(result) => {
                    print!("{}", result.stdout);
                    eprint!("{}", result.stderr);
                    if result.success {
                        return Ok(0);
                    }
                    let message = if result.stderr.trim().is_empty() {
                        format!("command failed with exit code {:?}", result.exit_code)
                    } else {
                        result.stderr.clone()
                    };
                    let plan = pipeline.analyze_error(
                        ErrorContext::new(message).with_command(result.sanitized_command.clone()),
                    );
                    print_recovery(&plan);
                    Ok(result.exit_code.filter(|c| *c != 0).unwrap_or(1))
                }
                Err(SandboxError::InvalidPolicy(reason)) => bail!("invalid sandbox policy: {}", reason),
                Err(e) => {
                    eprintln!("Refused: {}", e);
                    print_recovery(&pipeline.analyze_error(ErrorContext::new(e.to_string())));
                    Ok(2)
                }
            }
        }

        Commands::Do { text, yes } => {
            let text = text.join(" ");
            let result = pipeline.process_input(&text);
            print_intent(&result.intent, result.engine);

            if let Ok(plan) = plan_command(&result.intent) {
                println!("Plan: {} ({})", plan.command_line(), plan.description);
                if plan.requires_confirmation && !yes && !confirm("Run this command?")? {
                    println!("Cancelled.");
                    return Ok(1);
                }
            }

            let report = pipeline.run_intent(&result.intent).await;
            if let Some(execution) = &report.result {
                print!("{}", execution.stdout);
                eprint!("{}", execution.stderr);
            }
            match &report.recovery {
                Some(plan) => {
                    print_recovery(plan);
                    Ok(1)
                }
                None => Ok(0),
            }
        }

        Commands::Diagnose {
            message,
            command,
            input,
            json,
        } => {
            let mut context = ErrorContext::new(message);
            if let Some(command) = command {
                context = context.with_command(command);
            }
            if let Some(input) = input {
                context = context.with_user_input(input);
            }
            let plan = pipeline.analyze_error(context);
            if json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_recovery(&plan);
            }
            Ok(0)
        }

        Commands::Correct {
            input,
            action,
            package,
            reject,
        } => {
            let action: IntentAction = action.parse().map_err(anyhow::Error::msg)?;
            let recognized = pipeline.process_input(&input).intent;
            let entities = package
                .map(|p| vec![Entity::new(EntityType::Package, normalize_package_name(&p), 1.0)])
                .unwrap_or_default();
            let corrected = Intent {
                action,
                entities,
                confidence: 1.0,
                raw_input: input.clone(),
                source: Engine::Learned,
            };

            let correction = pipeline
                .record_correction(&input, &recognized, &corrected, !reject)
                .await;
            println!(
                "Recorded {} ({} -> {}, {})",
                correction.id,
                recognized.action,
                corrected.action,
                if reject { "rejected" } else { "accepted" }
            );
            Ok(0)
        }

        Commands::Suggest { partial } => {
            for suggestion in pipeline.get_suggestions(&partial) {
                println!("{}", suggestion);
            }
            Ok(0)
        }

        Commands::Stats => {
            let report = json!({
                "learning": pipeline.learning_stats(),
                "common_errors": pipeline.common_errors(),
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(0)
        }

        Commands::Version => Ok(0),
    }
}

fn print_intent(intent: &Intent, engine: Engine) {
    println!(
        "{} (confidence {:.2}, {})",
        intent.action, intent.confidence, engine
    );
    for entity in &intent.entities {
        println!("  {}: {}", entity.entity_type, entity.value);
    }
}

fn print_recovery(plan: &RecoveryPlan) {
    println!();
    println!("{} [{}]", plan.explanation, plan.error_type);
    for (i, suggestion) in plan.suggestions.iter().enumerate() {
        let command = suggestion
            .command
            .as_deref()
            .map(|c| format!(": {}", c))
            .unwrap_or_default();
        let confirm = if suggestion.requires_confirmation { " (asks first)" } else { "" };
        println!(
            "  {}. {}{} [{:.0}%]{}",
            i + 1,
            suggestion.action,
            command,
            suggestion.confidence * 100.0,
            confirm
        );
    }
    if let Some(more) = &plan.learn_more {
        println!("Learn more: {}", more);
    }
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("Failed to read answer")?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
