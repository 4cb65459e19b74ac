use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cr_lookup::config::LookupConfig;
use cr_lookup::models::{GeographyFilter, PersonType};
use cr_lookup::LookupEngine;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cr-lookup")]
#[command(about = "Costa Rica person and business lookup client")]
struct Args {
    /// Backend base URL (or set CR_LOOKUP_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Bearer token (or set CR_LOOKUP_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Look up a cedula (fisica or juridica)
    Cedula {
        id: String,
        /// Merge external enrichment sources
        #[arg(long)]
        enrich: bool,
    },
    /// Search by phone number
    Telefono { phone: String },
    /// Search by name fragment
    Nombre { term: String },
    /// Search by geography
    Geo {
        #[arg(long)]
        provincia: Option<String>,
        #[arg(long)]
        canton: Option<String>,
        #[arg(long)]
        distrito: Option<String>,
        /// fisica or juridica
        #[arg(long, value_parser = parse_person_type)]
        tipo: Option<PersonType>,
        #[arg(long)]
        sector: Option<String>,
    },
    /// Look up up to 50 cedulas from a file (or stdin with "-")
    Lote {
        input: PathBuf,
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        enrich: bool,
    },
    /// List provincias
    Provincias,
    /// List cantones of a provincia
    Cantones { provincia: String },
    /// List distritos of a canton
    Distritos { canton: String },
    /// Check backend health
    Health,
}

fn parse_person_type(raw: &str) -> std::result::Result<PersonType, String> {
    match raw.trim().to_lowercase().as_str() {
        "fisica" | "física" => Ok(PersonType::Fisica),
        "juridica" | "jurídica" => Ok(PersonType::Juridica),
        other => Err(format!("unknown person type '{}'", other)),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_batch_input(input: &Path) -> Result<String> {
    if input.as_os_str() == "-" {
        let mut text = String::new();
        std::io::Read::read_to_string(&mut std::io::stdin(), &mut text)?;
        return Ok(text);
    }
    std::fs::read_to_string(input).with_context(|| format!("failed to read {}", input.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = LookupConfig::from_env()?;
    if let Some(url) = args.base_url {
        config.base_url = url;
    }
    if args.token.is_some() {
        config.token = args.token;
    }
    if let Some(timeout) = args.timeout {
        config.timeout_secs = timeout;
    }
    if let Command::Lote { concurrency: Some(n), .. } = &args.command {
        config.batch_concurrency = *n;
    }
    if let Command::Lote { enrich: true, .. } = &args.command {
        config.batch_enrich = true;
    }

    let engine = LookupEngine::from_config(config)?;
    info!("cr-lookup starting...");

    match args.command {
        Command::Cedula { id, enrich } => {
            let result = engine.dispatcher().by_identifier(&id, enrich).await?;
            print_json(&result)?;
        }
        Command::Telefono { phone } => {
            print_json(&engine.dispatcher().by_phone(&phone).await?)?;
        }
        Command::Nombre { term } => {
            print_json(&engine.dispatcher().by_name(&term).await?)?;
        }
        Command::Geo {
            provincia,
            canton,
            distrito,
            tipo,
            sector,
        } => {
            let filter = GeographyFilter {
                provincia_id: provincia,
                canton_id: canton,
                distrito_id: distrito,
                person_type: tipo,
                sector,
            };
            print_json(&engine.dispatcher().by_geography(&filter).await?)?;
        }
        Command::Lote { input, .. } => {
            let text = read_batch_input(&input)?;
            let report = engine.batch().run(&text).await?;
            print_json(&report)?;
        }
        Command::Provincias => {
            print_json(&*engine.geography().list_provincias().await?)?;
        }
        Command::Cantones { provincia } => {
            print_json(&*engine.geography().list_cantones(&provincia).await?)?;
        }
        Command::Distritos { canton } => {
            print_json(&*engine.geography().list_distritos(&canton).await?)?;
        }
        Command::Health => {
            print_json(&engine.health().await?)?;
        }
    }

    Ok(())
}
