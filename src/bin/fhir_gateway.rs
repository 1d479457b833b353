use clap::{Parser, Subcommand, ValueEnum};
use futures::{StreamExt, TryStreamExt};
use octofhir_ig_gateway::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fhir-gateway")]
#[command(about = "Validate FHIR resources against implementation guides")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long, env = "FHIR_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate one or more resource files
    Validate {
        /// Resource files
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Declared content type (inferred from the file extension when omitted)
        #[arg(long)]
        content_type: Option<String>,
        /// Target profile, repeatable
        #[arg(short, long = "profile")]
        profiles: Vec<String>,
        /// Guide selector (`name#version`), repeatable
        #[arg(long = "ig")]
        guides: Vec<String>,
        /// Pin the FHIR version instead of detecting it
        #[arg(long)]
        fhir_version: Option<String>,
        /// Reuse the engine of an earlier session
        #[arg(long)]
        session: Option<String>,
        /// Response layout
        #[arg(long, value_enum, default_value = "issues")]
        shape: Shape,
        /// Echo the normalized document in the response
        #[arg(long)]
        formatted: bool,
        /// Directory holding the validator artifact
        #[arg(long, env = "FHIR_GATEWAY_VALIDATOR_DIR")]
        validator_dir: Option<PathBuf>,
        /// Per-file validation budget in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Files validated at the same time
        #[arg(long, default_value = "4")]
        concurrency: usize,
    },
    /// List the guides this gateway advertises
    Catalog,
    /// Normalize captured validator output (reads stdin when no file is given)
    ParseReport {
        file: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "tolerant")]
        variant: Variant,
        /// Treat output without a summary banner as empty
        #[arg(long)]
        require_banner: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Shape {
    Issues,
    OperationOutcome,
}

impl From<Shape> for ResponseShape {
    fn from(shape: Shape) -> Self {
        match shape {
            Shape::Issues => ResponseShape::Issues,
            Shape::OperationOutcome => ResponseShape::OperationOutcome,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum Variant {
    Classic,
    Tolerant,
}

impl From<Variant> for GrammarVariant {
    fn from(variant: Variant) -> Self {
        match variant {
            Variant::Classic => GrammarVariant::Classic,
            Variant::Tolerant => GrammarVariant::Tolerant,
        }
    }
}

#[tokio::main]
async fn main() -> std::result::Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = GatewayConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    info!("Starting FHIR gateway CLI");

    match cli.command {
        Commands::Validate {
            files,
            content_type,
            profiles,
            guides,
            fhir_version,
            session,
            shape,
            formatted,
            validator_dir,
            timeout_secs,
            concurrency,
        } => {
            if validator_dir.is_some() {
                config.engine.working_dir = validator_dir;
            }
            if let Some(secs) = timeout_secs {
                config.engine.timeout_secs = secs;
            }
            let service = Arc::new(OrchestrationService::from_config(&config)?);
            // One session for the whole batch so the engine is built once.
            let session = session.map(SessionKey::new).unwrap_or_else(SessionKey::mint);

            let template = ValidationRequest {
                content_type: content_type.unwrap_or_default(),
                profiles,
                guides,
                version: fhir_version,
                session_key: Some(session),
                include_formatted_resource: Some(formatted),
                ..ValidationRequest::default()
            };

            let responses: Vec<(PathBuf, ValidationResponse)> = futures::stream::iter(files)
                .map(|path| {
                    let service = Arc::clone(&service);
                    let mut request = template.clone();
                    async move {
                        request.document = tokio::fs::read(&path).await?;
                        if request.content_type.is_empty() {
                            request.content_type = content_type_for(&path).to_string();
                        }
                        let response = service.respond(request).await;
                        Ok::<_, GatewayError>((path, response))
                    }
                })
                .buffered(concurrency.max(1))
                .try_collect()
                .await?;

            let failed = responses
                .iter()
                .any(|(_, response)| response.issues.has_errors());
            let shape = ResponseShape::from(shape);

            let output = if responses.len() == 1 {
                let (_, response) = responses.into_iter().next().ok_or("no response")?;
                response.render(shape)?
            } else {
                let mut rendered = Vec::with_capacity(responses.len());
                for (path, response) in responses {
                    rendered.push(serde_json::json!({
                        "file": path.display().to_string(),
                        "response": response.render(shape)?,
                    }));
                }
                serde_json::Value::Array(rendered)
            };
            println!("{}", serde_json::to_string_pretty(&output)?);

            info!(cache = ?service.cache().stats(), "Validation complete");
            Ok(if failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Catalog => {
            let entries = parse_catalog(&config.validation.catalog, &config.validation.registry_url)?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::ParseReport {
            file,
            variant,
            require_banner,
        } => {
            let raw = match file {
                Some(path) => tokio::fs::read_to_string(path).await?,
                None => {
                    let mut raw = String::new();
                    tokio::io::stdin().read_to_string(&mut raw).await?;
                    raw
                }
            };
            let parsed = ReportParser::for_variant(variant.into())
                .with_require_banner(require_banner)
                .parse_detailed(&raw);
            println!("{}", serde_json::to_string_pretty(&parsed)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("xml") => DocumentFormat::Xml.mime_type(),
        _ => DocumentFormat::Json.mime_type(),
    }
}
