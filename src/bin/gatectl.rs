//! gatectl — portcullis operator CLI
//!
//! Inspect moderation and sanitization decisions, and inspect or reset
//! rate limit state in the configured cache.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use portcullis::{
    CacheStore, ContentModerator, FieldClass, GatewayConfig, HealthStatus, RateDecision,
    RateLimiter, sanitize,
};

/// Portcullis operator CLI
#[derive(Parser)]
#[command(name = "gatectl")]
#[command(version = portcullis::PKG_VERSION)]
#[command(about = "Admission and safety gateway operator tool")]
struct Args {
    /// Config file (default: ~/.portcullis/config.toml, then /etc/portcullis/config.toml)
    #[arg(short, long, env = "PORTCULLIS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score text for content risk
    Moderate {
        /// Text to moderate (or omit to read from stdin)
        text: Option<String>,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compute the standalone spam score (0-100)
    SpamScore {
        /// Text to score (or omit to read from stdin)
        text: Option<String>,
    },

    /// Run a field sanitizer
    Sanitize {
        /// Field class
        #[arg(value_enum)]
        field: Field,
        /// Input (or omit to read from stdin)
        text: Option<String>,
    },

    /// Inspect or reset rate limit state
    Quota {
        #[command(subcommand)]
        action: QuotaAction,
    },

    /// Check cache health
    Health,
}

#[derive(Subcommand)]
enum QuotaAction {
    /// Show remaining quota without consuming it
    Peek { identifier: String, resource: String },
    /// Clear stored state for an identifier (or every identifier with --all)
    Reset {
        identifier: Option<String>,
        resource: String,
        #[arg(long, conflicts_with = "identifier")]
        all: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Field {
    Topic,
    Feedback,
    Email,
    Name,
}

impl From<Field> for FieldClass {
    fn from(field: Field) -> Self {
        match field {
            Field::Topic => FieldClass::Topic,
            Field::Feedback => FieldClass::Feedback,
            Field::Email => FieldClass::Email,
            Field::Name => FieldClass::Name,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    // Commands that don't need the cache
    match &args.command {
        Command::Moderate { text, json } => {
            let text = resolve_text(text.clone(), "moderate")?;
            let result = ContentModerator::new().moderate(&text);
            if *json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("risk: {} ({})", result.risk_level, result.risk_score);
                if !result.flags.is_empty() {
                    let flags: Vec<&str> = result.flags.iter().map(|f| f.as_str()).collect();
                    println!("flags: {}", flags.join(", "));
                }
                for reason in &result.reasons {
                    println!("  - {reason}");
                }
                if result.filtered_text != text {
                    println!("filtered: {}", result.filtered_text);
                }
            }
            return Ok(());
        }

        Command::SpamScore { text } => {
            let text = resolve_text(text.clone(), "spam-score")?;
            println!("{}", ContentModerator::new().spam_score(&text));
            return Ok(());
        }

        Command::Sanitize { field, text } => {
            let text = resolve_text(text.clone(), "sanitize")?;
            match sanitize::validate((*field).into(), &text) {
                Ok(clean) => println!("{clean}"),
                Err(e) => {
                    eprintln!("rejected ({}): {e}", e.code());
                    std::process::exit(1);
                }
            }
            return Ok(());
        }

        Command::Quota { .. } | Command::Health => {}
    }

    let config = GatewayConfig::discover(args.config.as_deref())?;
    let cache = Arc::new(CacheStore::connect(&config.cache).await?);

    match args.command {
        Command::Health => {
            let health = cache.health().await;
            println!("gatectl {}", portcullis::PKG_VERSION);
            println!("backend: {}", health.backend);
            println!("status: {}", health.status);
            println!("detail: {}", health.detail);
            if health.status == HealthStatus::Unhealthy {
                std::process::exit(2);
            }
        }

        Command::Quota { action } => {
            let limiter = RateLimiter::new(cache.clone(), config.limits);
            match action {
                QuotaAction::Peek {
                    identifier,
                    resource,
                } => {
                    let decision = limiter.peek(&identifier, &resource).await;
                    print_decision(&decision);
                }
                QuotaAction::Reset {
                    identifier: Some(identifier),
                    resource,
                    all: false,
                } => {
                    let outcome = limiter.reset(&identifier, &resource).await;
                    if let Some(reason) = outcome.reason() {
                        return Err(format!("reset failed: {reason}").into());
                    }
                    println!("reset {resource}:{identifier} (existed: {})", outcome.value());
                }
                QuotaAction::Reset {
                    resource, all: true, ..
                } => {
                    let outcome = limiter.reset_resource(&resource).await;
                    if let Some(reason) = outcome.reason() {
                        return Err(format!("reset failed: {reason}").into());
                    }
                    println!("reset {} keys for {resource}", outcome.value());
                }
                QuotaAction::Reset { .. } => {
                    return Err("quota reset: pass an identifier or --all".into());
                }
            }
        }

        Command::Moderate { .. } | Command::SpamScore { .. } | Command::Sanitize { .. } => {
            unreachable!("handled above")
        }
    }

    Ok(())
}

fn print_decision(decision: &RateDecision) {
    for (name, value) in decision.headers() {
        println!("{name}: {value}");
    }
    if decision.degraded {
        println!("(cache unavailable; values are not authoritative)");
    }
}

/// Resolve text input from an optional CLI argument and/or stdin.
///
/// - arg only → arg
/// - stdin only → stdin
/// - both → `"{arg}\n\n{stdin}"`
/// - neither → error
fn resolve_text(arg: Option<String>, command: &str) -> Result<String, Box<dyn std::error::Error>> {
    let stdin_text = if io::stdin().is_terminal() {
        None
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        let trimmed = buf.trim().to_string();
        (!trimmed.is_empty()).then_some(trimmed)
    };

    match (arg, stdin_text) {
        (Some(a), Some(s)) => Ok(format!("{a}\n\n{s}")),
        (Some(a), None) => Ok(a),
        (None, Some(s)) => Ok(s),
        (None, None) => {
            Err(format!("{command}: no input provided (pass text as argument or via stdin)").into())
        }
    }
}
