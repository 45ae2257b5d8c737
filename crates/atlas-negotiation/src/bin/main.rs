//! Schema negotiation engine entry point
//!
//! Contract generation and evidence negotiation over rendered DOM snapshots.

use atlas_negotiation::augmenter::{AugmentationFuture, AugmentationRequest, AugmentationResponse};
use atlas_negotiation::contracts::*;
use atlas_negotiation::{
    AugmentationClient, DocumentSnapshot, ExtractionPipeline, InMemoryLedger, LlmAugmenter,
    NegotiationConfig, SchemaContractGenerator,
};
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "atlas-negotiate")]
#[command(about = "Evidence-first schema negotiation")]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML/YAML/JSON)
    #[arg(short, long, global = true, env = "ATLAS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a field contract for a query
    Contract {
        /// Natural-language extraction request
        #[arg(short, long)]
        query: String,

        /// Page URL hint
        #[arg(short, long)]
        url: Option<String>,

        /// Known contracts to adapt (JSON/YAML list)
        #[arg(short, long)]
        known: Option<PathBuf>,
    },

    /// Negotiate a schema against a DOM snapshot
    Negotiate {
        /// DOM snapshot (JSON)
        #[arg(short, long)]
        snapshot: PathBuf,

        /// Natural-language extraction request
        #[arg(short, long)]
        query: String,

        /// Use this contract instead of generating one
        #[arg(long)]
        contract: Option<PathBuf>,

        /// Known contracts to adapt (JSON/YAML list)
        #[arg(short, long)]
        known: Option<PathBuf>,

        /// Recorded augmentation response to replay as Track B
        #[arg(long)]
        augmentation: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "json")]
        output: String,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to configuration file
        #[arg(short, long)]
        file: PathBuf,
    },
}

/// Replays a recorded augmentation response
struct ReplayClient {
    response: AugmentationResponse,
}

impl AugmentationClient for ReplayClient {
    fn call(&self, _request: AugmentationRequest) -> AugmentationFuture {
        let response = self.response.clone();
        Box::pin(async move { Ok(response) })
    }
}

fn read_structured<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    Ok(if is_yaml {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    })
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NegotiationConfig> {
    let config = match path {
        Some(path) => NegotiationConfig::from_file(path)?,
        None => NegotiationConfig::default(),
    };
    Ok(config.apply_env_overrides()?)
}

fn load_known(path: Option<&Path>) -> anyhow::Result<Vec<SchemaContract>> {
    match path {
        Some(path) => read_structured(path),
        None => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Contract { query, url, known } => {
            let config = load_config(cli.config.as_deref())?;
            let known = load_known(known.as_deref())?;
            let generator = SchemaContractGenerator::new(config.generator);
            let contract = generator.generate(&query, url.as_deref(), None, &known);
            println!("{}", serde_json::to_string_pretty(&contract)?);
        }

        Commands::Negotiate {
            snapshot,
            query,
            contract,
            known,
            augmentation,
            output,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let document = DocumentSnapshot::from_json(&std::fs::read_to_string(&snapshot)?)?;
            let request = ExtractionRequest::new(query, "cli");

            let mut pipeline = ExtractionPipeline::new(config.clone())
                .with_ledger(Arc::new(InMemoryLedger::new()));
            if let Some(path) = augmentation {
                let response = AugmentationResponse::from_json(&std::fs::read_to_string(&path)?)?;
                let client = Arc::new(ReplayClient { response });
                pipeline = pipeline.with_augmenter(LlmAugmenter::new(client, config.augmentation.clone()));
            }

            tracing::info!(
                "Agent ID: {}, Version: {}",
                NegotiationDecisionEvent::AGENT_ID,
                NegotiationDecisionEvent::AGENT_VERSION
            );

            let outcome = match contract {
                Some(path) => {
                    let contract: SchemaContract = read_structured(&path)?;
                    pipeline.run_with_contract(&request, contract, &document).await
                }
                None => {
                    let known = load_known(known.as_deref())?;
                    pipeline.run(&request, &document, &known).await
                }
            };

            match output.as_str() {
                "json" => {
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                _ => {
                    let result = &outcome.result;
                    if let Some(failure) = &result.error {
                        println!("Negotiation failed: {}", failure.message);
                        println!("  Field: {}", failure.field);
                        println!("  Tried: {}", failure.strategies_attempted.join(", "));
                    } else {
                        println!("Negotiated schema for contract {}", outcome.contract.id);
                        for field in &result.final_schema {
                            let value = result
                                .final_data
                                .get(&field.name)
                                .map(|f| f.value.as_text())
                                .unwrap_or_default();
                            println!("  [{}] {}: {}", field.kind.as_str(), field.name, value);
                        }
                        for record in &result.changes.pruned {
                            println!("  pruned {} ({})", record.field, record.reason);
                        }
                        for record in &result.changes.added {
                            println!("  added {} (support {})", record.field, record.support);
                        }
                        println!(
                            "  Reliability: {:.2}",
                            result.evidence_summary.reliability_score
                        );
                    }
                }
            }

            if !outcome.result.is_success() {
                std::process::exit(1);
            }
        }

        Commands::CheckConfig { file } => {
            let config = NegotiationConfig::from_file(&file)?;
            println!(
                "{}",
                serde_json::json!({
                    "valid": true,
                    "quorum": {
                        "min_entities": config.quorum.min_entities,
                        "min_blocks": config.quorum.min_blocks,
                    },
                    "constraints": config.constraint_labels(),
                })
            );
        }
    }

    Ok(())
}
