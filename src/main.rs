//! policy-bridge CLI: inspect the schema, compile and run queries, ask questions.

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use policy_bridge::cancel::CancelToken;
use policy_bridge::compile::compile;
use policy_bridge::config::{BridgeConfig, KbBackend};
use policy_bridge::pipeline::{Assistant, run_query};
use policy_bridge::schema::SchemaRegistry;
use policy_bridge::term::ArgValue;

#[derive(Parser)]
#[command(
    name = "policy-bridge",
    version,
    about = "Answer returns-policy questions from a Prolog knowledge base"
)]
struct Cli {
    /// Config file (defaults to $POLICY_BRIDGE_CONFIG, then ./policy-bridge.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the predicates the compiler accepts.
    Schema {
        /// Validate and list this schema file instead of the configured one.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Compile a predicate call and print the query without running it.
    Compile {
        /// Predicate name.
        predicate: String,

        /// Argument as NAME=VALUE. VALUE is read as JSON when it parses, text otherwise.
        #[arg(long = "arg", value_parser = parse_arg)]
        args: Vec<(String, ArgValue)>,
    },

    /// Compile and run a predicate call, print the normalized result as JSON.
    Query {
        /// Predicate name.
        predicate: String,

        /// Argument as NAME=VALUE. VALUE is read as JSON when it parses, text otherwise.
        #[arg(long = "arg", value_parser = parse_arg)]
        args: Vec<(String, ArgValue)>,

        /// Use this fact file instead of the configured backend.
        #[arg(long)]
        facts: Option<PathBuf>,
    },

    /// Run one question through the full pipeline.
    Ask {
        /// The question, in plain English.
        question: String,

        /// Also print the debug payload.
        #[arg(long)]
        debug: bool,
    },

    /// Print the effective configuration as TOML.
    Config,
}

/// Parse `NAME=VALUE`.
fn parse_arg(raw: &str) -> std::result::Result<(String, ArgValue), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got \"{raw}\""))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty argument name in \"{raw}\""));
    }
    let value = match serde_json::from_str::<serde_json::Value>(value) {
        Ok(json) => ArgValue::from(json),
        Err(_) => ArgValue::Text(value.to_string()),
    };
    Ok((name.to_string(), value))
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = BridgeConfig::discover(cli.config.as_deref())?;

    match cli.command {
        Commands::Schema { file } => {
            let registry = match file {
                Some(path) => SchemaRegistry::from_toml_file(&path)?,
                None => config.schema.load()?,
            };
            println!("{} predicates:", registry.len());
            print!("{}", registry.catalog());
        }

        Commands::Compile { predicate, args } => {
            let registry = config.schema.load()?;
            let args: BTreeMap<String, ArgValue> = args.into_iter().collect();
            let query = compile(&registry, &predicate, &args)?;
            println!("{query}");
            if !query.output_vars.is_empty() {
                println!("outputs: {}", query.output_vars.join(", "));
            }
        }

        Commands::Query {
            predicate,
            args,
            facts,
        } => {
            if let Some(path) = facts {
                config.kb.backend = KbBackend::Facts;
                config.kb.facts_file = path;
            }
            let registry = config.schema.load()?;
            let kb = config.kb.open()?;
            let args: BTreeMap<String, ArgValue> = args.into_iter().collect();
            let answer = run_query(&registry, kb.as_ref(), &predicate, &args, &CancelToken::new())?;
            println!(
                "{}",
                serde_json::to_string_pretty(&answer).into_diagnostic()?
            );
        }

        Commands::Ask { question, debug } => {
            let assistant = Assistant::from_config(&config)?;
            let reply = assistant.answer(&question, &CancelToken::new())?;
            println!("{}", reply.response);
            if let Some(explanation) = &reply.explanation {
                println!("\nWhy: {explanation}");
            }
            if debug {
                println!(
                    "\n{}",
                    serde_json::to_string_pretty(&reply.debug).into_diagnostic()?
                );
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_arg_reads_json_or_text() {
        assert_eq!(
            parse_arg("Region=uk").unwrap(),
            ("Region".into(), ArgValue::Text("uk".into()))
        );
        assert_eq!(
            parse_arg("DaysSinceDelivery=15").unwrap(),
            ("DaysSinceDelivery".into(), ArgValue::from(15i64))
        );
        assert_eq!(
            parse_arg("Note=\"it's\"").unwrap().1,
            ArgValue::Text("it's".into())
        );
        assert_eq!(parse_arg("Flag=true").unwrap().1, ArgValue::Bool(true));
    }

    #[test]
    fn parse_arg_rejects_malformed() {
        assert!(parse_arg("Region").is_err());
        assert!(parse_arg("=uk").is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
