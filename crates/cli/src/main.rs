mod error;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use policy::{Capability, Denial, Gate, LoadedPolicy, PolicyConfig, ToolMeta, matcher};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use error::{Error, Result};

const POLICY_FILE: &str = "capgate.toml";
const LOG_ENV: &str = "CAPGATE_LOG";

#[derive(Parser)]
#[command(name = "capgate")]
#[command(about = "Dry-run capability policies for sandboxed tool calls", long_about = None)]
#[command(version)]
struct Cli {
    /// Print decisions as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse capability strings and print their normalized form
    Parse {
        #[arg(required = true)]
        capabilities: Vec<String>,
    },
    /// Check whether granted capabilities satisfy needed ones
    Match {
        /// Needed capability (repeatable)
        #[arg(long = "need", required = true)]
        needs: Vec<String>,
        /// Granted capability (repeatable)
        #[arg(long = "grant")]
        grants: Vec<String>,
    },
    /// Evaluate a tool call against a policy file
    Check {
        #[arg(short, long, default_value = POLICY_FILE)]
        policy: PathBuf,
        /// Evaluate under a named scope instead of the root policy
        #[arg(short, long)]
        scope: Option<String>,
        /// Tool name
        tool: String,
        /// Extra required capability (repeatable)
        #[arg(long = "requires")]
        requires: Vec<String>,
        /// Extra effect tag (repeatable)
        #[arg(long = "effect")]
        effects: Vec<String>,
        /// Mark the tool as requiring a trusted context
        #[arg(long)]
        trusted: bool,
    },
    /// Evaluate a single capability against a policy file
    CheckCap {
        #[arg(short, long, default_value = POLICY_FILE)]
        policy: PathBuf,
        #[arg(short, long)]
        scope: Option<String>,
        capability: String,
    },
}

/// Outcome printed for `check` and `check-cap`.
#[derive(Debug, Serialize)]
struct Decision<'a> {
    subject: &'a str,
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    denial: Option<&'a Denial>,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(output) => println!("{output}"),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .try_init()
        .ok();
}

fn run(cli: Cli) -> Result<String> {
    match cli.command {
        Commands::Parse { capabilities } => cmd_parse(&capabilities),
        Commands::Match { needs, grants } => cmd_match(&needs, &grants),
        Commands::Check {
            policy,
            scope,
            tool,
            requires,
            effects,
            trusted,
        } => {
            let loaded = load_policy(&policy)?;
            let meta = tool_meta(&loaded, &tool, &requires, &effects, trusted)?;
            cmd_check(&loaded, scope.as_deref(), &meta, cli.json)
        }
        Commands::CheckCap {
            policy,
            scope,
            capability,
        } => {
            let loaded = load_policy(&policy)?;
            cmd_check_cap(&loaded, scope.as_deref(), &capability, cli.json)
        }
    }
}

fn cmd_parse(capabilities: &[String]) -> Result<String> {
    let parsed = policy::parse_all(capabilities)?;
    Ok(parsed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n"))
}

fn cmd_match(needs: &[String], grants: &[String]) -> Result<String> {
    let needs = policy::parse_all(needs)?;
    let grants = policy::parse_all(grants)?;
    if matcher::satisfied(&needs, &grants) {
        Ok("satisfied".to_string())
    } else {
        let missing: Vec<String> = needs
            .iter()
            .filter(|need| !matcher::satisfied(std::slice::from_ref(*need), &grants))
            .map(ToString::to_string)
            .collect();
        Err(Error::Unsatisfied(missing.join(", ")))
    }
}

fn cmd_check(
    loaded: &LoadedPolicy,
    scope: Option<&str>,
    tool: &ToolMeta,
    json: bool,
) -> Result<String> {
    let policy = loaded.select(scope)?;
    let result = Gate::default().can_call(Some(policy.as_ref()), tool);
    render(&tool.name, result, json)
}

fn cmd_check_cap(
    loaded: &LoadedPolicy,
    scope: Option<&str>,
    capability: &str,
    json: bool,
) -> Result<String> {
    let policy = loaded.select(scope)?;
    let capability = Capability::parse(capability)?;
    let result = Gate::default().check(Some(policy.as_ref()), &capability);
    render(&capability.to_string(), result, json)
}

fn render(subject: &str, result: std::result::Result<(), Denial>, json: bool) -> Result<String> {
    if json {
        let decision = Decision {
            subject,
            allowed: result.is_ok(),
            denial: result.as_ref().err(),
        };
        let out = serde_json::to_string(&decision)?;
        return match result {
            Ok(()) => Ok(out),
            // The JSON still goes to stdout; the exit code carries the denial.
            Err(denial) => {
                println!("{out}");
                Err(Error::Denied(denial))
            }
        };
    }
    match result {
        Ok(()) => Ok(format!("allow {subject}")),
        Err(denial) => Err(Error::Denied(denial)),
    }
}

fn load_policy(path: &Path) -> Result<LoadedPolicy> {
    if !path.exists() {
        return Err(Error::PolicyNotFound {
            path: path.to_path_buf(),
        });
    }
    debug!(path = %path.display(), "loading policy");
    Ok(PolicyConfig::load(path)?.build()?)
}

/// Start from the tool described in the policy file, if any, and add the
/// requirements given on the command line.
fn tool_meta(
    loaded: &LoadedPolicy,
    name: &str,
    requires: &[String],
    effects: &[String],
    trusted: bool,
) -> Result<ToolMeta> {
    let mut meta = loaded
        .tool(name)
        .cloned()
        .unwrap_or_else(|| ToolMeta::new(name));
    meta.required_caps.extend(policy::parse_all(requires)?);
    meta.effects.extend(effects.iter().cloned());
    meta.requires_trust |= trusted;
    Ok(meta)
}
