use anyhow::{Context, Result};
use bat::PrettyPrinter;
use clap::{Parser, Subcommand};
use cliclack::spinner;
use console::style;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use webpilot::handler::LlmHandler;
use webpilot::inference::act::{ActOutcome, ActRequest};
use webpilot::inference::extract::{DefaultExtraction, ExtractRequest, ExtractionResult};
use webpilot::inference::observe::ObserveRequest;
use webpilot::inference::verify::VerifyRequest;
use webpilot::models::content::ImageContent;
use webpilot::providers::base::Provider;
use webpilot::providers::factory;

mod configuration;
mod error;

use configuration::Settings;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML configuration file, WEBPILOT_* environment variables take precedence
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ask the model a free-form question
    Ask { question: String },

    /// Pick the next action to take on a chunk of the page
    Act {
        #[arg(short, long)]
        instruction: String,

        /// File with the serialized elements of the chunk
        #[arg(short, long)]
        elements: PathBuf,

        /// Steps already taken
        #[arg(long)]
        steps: Option<String>,

        /// PNG screenshot of the page
        #[arg(long)]
        screenshot: Option<PathBuf>,
    },

    /// Check whether a goal has been accomplished
    Verify {
        #[arg(short, long)]
        goal: String,

        #[arg(long)]
        steps: String,

        #[arg(short, long)]
        elements: Option<PathBuf>,

        #[arg(long)]
        screenshot: Option<PathBuf>,
    },

    /// List the elements matching an instruction
    Observe {
        #[arg(short, long)]
        instruction: String,

        #[arg(short, long)]
        elements: PathBuf,

        #[arg(long)]
        screenshot: Option<PathBuf>,
    },

    /// Extract content from one or more chunks, in order
    Extract {
        #[arg(short, long)]
        instruction: String,

        /// One file per chunk of serialized elements
        #[arg(required = true)]
        chunks: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("webpilot=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let handler = build_handler(Settings::load(cli.config.as_deref())?)?;

    match cli.command {
        Command::Ask { question } => {
            let answer = waiting("thinking", handler.ask(&question)).await?;
            render(&answer)?;
        }
        Command::Act {
            instruction,
            elements,
            steps,
            screenshot,
        } => {
            let request = ActRequest {
                steps,
                screenshot: load_screenshot(screenshot.as_deref()).await?,
                ..ActRequest::new(instruction, read_file(&elements).await?)
            };
            let outcome = waiting("choosing an action", handler.act(request)).await?;
            print_json(&outcome_json(outcome)?)?;
        }
        Command::Verify {
            goal,
            steps,
            elements,
            screenshot,
        } => {
            let dom_elements = match elements {
                Some(path) => Some(read_file(&path).await?),
                None => None,
            };
            let request = VerifyRequest {
                dom_elements,
                screenshot: load_screenshot(screenshot.as_deref()).await?,
                ..VerifyRequest::new(goal, steps)
            };
            let completed =
                waiting("verifying", handler.verify_act_completion(request)).await?;
            print_json(&json!({ "completed": completed }))?;
        }
        Command::Observe {
            instruction,
            elements,
            screenshot,
        } => {
            let request = ObserveRequest {
                screenshot: load_screenshot(screenshot.as_deref()).await?,
                ..ObserveRequest::new(instruction, read_file(&elements).await?)
            };
            let observed = waiting("observing", handler.observe(request)).await?;
            print_json(&serde_json::to_value(observed)?)?;
        }
        Command::Extract {
            instruction,
            chunks,
        } => {
            let mut contents = Vec::with_capacity(chunks.len());
            for path in &chunks {
                contents.push(read_file(path).await?);
            }
            let extraction = extract_chunks(&handler, &instruction, &contents);
            if let Some(result) = waiting("extracting", extraction).await? {
                print_json(&serde_json::to_value(result)?)?;
            }
        }
    }

    Ok(())
}

fn build_handler(settings: Settings) -> Result<LlmHandler> {
    let provider: Arc<dyn Provider> =
        Arc::from(factory::get_provider(settings.provider.into_config())?);
    Ok(LlmHandler::new(provider).with_options(settings.inference.into_options()))
}

/// Scan the chunks in order until one reports the instruction satisfied
async fn extract_chunks(
    handler: &LlmHandler,
    instruction: &str,
    chunks: &[String],
) -> Result<Option<ExtractionResult<DefaultExtraction>>> {
    let chunks_total = chunks.len();
    let mut previously_extracted = DefaultExtraction::default();
    let mut progress = String::new();
    let mut last = None;

    for (index, dom_elements) in chunks.iter().enumerate() {
        let request = ExtractRequest {
            instruction: instruction.to_string(),
            progress: progress.clone(),
            previously_extracted: previously_extracted.clone(),
            dom_elements: dom_elements.clone(),
            chunks_seen: index + 1,
            chunks_total,
            model: None,
        };
        tracing::debug!(chunk = index + 1, chunks_total, "extracting chunk");
        let result = handler.extract(request).await?;

        previously_extracted = result.data.clone();
        progress = result.metadata.progress.clone();
        let completed = result.metadata.completed;
        last = Some(result);

        if completed {
            tracing::info!(chunks_seen = index + 1, chunks_total, "extraction completed");
            break;
        }
    }

    Ok(last)
}

async fn waiting<T, F>(message: &str, task: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    let spin = spinner();
    spin.start(message);
    let result = task.await;
    match &result {
        Ok(_) => spin.stop(""),
        Err(_) => spin.error(style("request failed").red()),
    }
    result
}

fn outcome_json(outcome: ActOutcome) -> Result<Value> {
    Ok(match outcome {
        ActOutcome::Resolved(action) => serde_json::to_value(action)?,
        ActOutcome::Skipped { reason } => json!({ "skipped": true, "reason": reason }),
        ActOutcome::Exhausted { attempts } => json!({ "exhausted": true, "attempts": attempts }),
    })
}

async fn read_file(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

async fn load_screenshot(path: Option<&Path>) -> Result<Option<ImageContent>> {
    match path {
        Some(path) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read screenshot {}", path.display()))?;
            Ok(Some(ImageContent::png(&bytes)))
        }
        None => Ok(None),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render(content: &str) -> Result<()> {
    PrettyPrinter::new()
        .input_from_bytes(content.as_bytes())
        .language("markdown")
        .print()
        .map_err(|e| anyhow::anyhow!("Failed to render answer: {}", e))?;
    Ok(())
}
