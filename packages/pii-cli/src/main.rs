//! PII extraction batch runner
//!
//! Runs every configured PII type over a set of text documents and writes
//! the findings as JSON.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use pii_extraction::ai::OpenAiChat;
use pii_extraction::{
    Document, DocumentExtractor, DocumentReport, MemoryStore, Orchestrator, Person,
    PersonDirectory, PiiCatalog, PiiType, PromptLibrary,
};
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Debug, Parser)]
#[command(name = "pii-extract", about = "Extract PII from text documents with an LLM")]
struct Args {
    /// Text files to process; the file stem is the document id
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// PII catalog (YAML); overrides PROPERTIES_FILE
    #[arg(long)]
    properties: Option<PathBuf>,

    /// Only run these PII types (repeatable)
    #[arg(long = "pii")]
    pii: Vec<String>,

    /// Known persons per document (JSON)
    #[arg(long)]
    persons: Option<PathBuf>,

    /// Skip person recognition; person-centric types use the persons file only
    #[arg(long)]
    no_person_recognition: bool,

    /// Output file; stdout when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Prompt cache directory; overrides PROMPT_CACHE_DIR
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Template override directory; overrides PROMPT_DIR
    #[arg(long)]
    prompt_dir: Option<PathBuf>,

    /// Regenerate every prompt even when cached
    #[arg(long)]
    force_regenerate: bool,

    /// Run the prompt critique loop on freshly generated prompts
    #[arg(long)]
    refine: bool,

    /// PII types processed concurrently; overrides MAX_CONCURRENCY
    #[arg(long)]
    max_concurrency: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pii_extraction=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .with_writer(std::io::stderr),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(path) = &args.properties {
        config.properties_file = path.clone();
    }
    if let Some(dir) = &args.cache_dir {
        config.prompt_cache_dir = dir.clone();
    }
    if let Some(dir) = &args.prompt_dir {
        config.prompt_dir = Some(dir.clone());
    }
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }
    config.refine_prompts |= args.refine;

    let catalog = PiiCatalog::from_yaml_file(&config.properties_file)
        .with_context(|| format!("Failed to load {}", config.properties_file.display()))?;
    let pii_types = select_pii_types(&catalog, &args.pii)?;
    tracing::info!(pii_types = pii_types.len(), documents = args.inputs.len(), "Starting extraction");

    let library = match &config.prompt_dir {
        Some(dir) => PromptLibrary::builtin()
            .load_overrides(dir)
            .with_context(|| format!("Failed to load templates from {}", dir.display()))?,
        None => PromptLibrary::builtin(),
    };

    let mut store = MemoryStore::new();
    if let Some(path) = &args.persons {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let value: Value = serde_json::from_str(&raw).context("Persons file must be JSON")?;
        for (document_id, persons) in parse_persons(&value)? {
            store = store.with_persons(document_id, persons);
        }
    }
    let store = Arc::new(store);

    let orchestrator = Orchestrator::new(
        Arc::new(chat_client(&config, &config.model_dynamic)),
        Arc::new(chat_client(&config, &config.model_prompt_creator)),
        library,
        config
            .extraction_config(args.force_regenerate)
            .with_person_recognition(!args.no_person_recognition),
    );
    let extractor = DocumentExtractor::new(orchestrator, store.clone(), store.clone());

    let mut reports = Vec::with_capacity(args.inputs.len());
    for path in &args.inputs {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let document_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .with_context(|| format!("No file name in {}", path.display()))?;

        let report = extractor.run(&Document::new(document_id, text), &pii_types).await;
        print_summary(&report);
        reports.push(report);
    }

    let output = json!({
        "findings": store.snapshot()?,
        "persons": store.persons_snapshot(),
        "reports": reports,
    });
    let rendered = serde_json::to_string_pretty(&output)?;
    match &args.output {
        Some(path) => std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{rendered}"),
    }

    Ok(())
}

fn chat_client(config: &Config, model: &str) -> OpenAiChat {
    let mut client = OpenAiChat::new(config.api_key.clone()).with_model(model);
    if let Some(url) = &config.base_url {
        client = client.with_base_url(url.clone());
    }
    if let Some(temperature) = config.temperature {
        client = client.with_temperature(temperature);
    }
    client
}

fn select_pii_types(catalog: &PiiCatalog, names: &[String]) -> Result<Vec<PiiType>> {
    if names.is_empty() {
        return Ok(catalog.iter().cloned().collect());
    }
    names
        .iter()
        .map(|name| -> Result<PiiType> { Ok(catalog.get(name)?.clone()) })
        .collect()
}

/// Read `{document_id: {person_id: {"full name", "abbreviations", "alias"}}}`.
fn parse_persons(value: &Value) -> Result<Vec<(String, PersonDirectory)>> {
    let Some(documents) = value.as_object() else {
        bail!("Persons file must map document ids to persons");
    };

    let mut parsed = Vec::with_capacity(documents.len());
    for (document_id, persons) in documents {
        let Some(persons) = persons.as_object() else {
            bail!("Persons of {document_id} must be an object");
        };
        let mut directory = PersonDirectory::new();
        for (person_id, entry) in persons {
            let full_name = entry
                .get("full name")
                .or_else(|| entry.get("full_name"))
                .and_then(Value::as_str)
                .with_context(|| format!("Person {person_id} has no full name"))?;
            let mut person = Person::new(person_id.clone(), full_name);
            for abbreviation in strings(entry.get("abbreviations")) {
                person = person.with_abbreviation(abbreviation);
            }
            for alias in strings(entry.get("alias").or_else(|| entry.get("aliases"))) {
                person = person.with_alias(alias);
            }
            directory.insert(person);
        }
        parsed.push((document_id.clone(), directory));
    }
    Ok(parsed)
}

fn strings(value: Option<&Value>) -> impl Iterator<Item = &str> {
    value
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn print_summary(report: &DocumentReport) {
    let status = if report.is_complete() {
        "done".green().bold()
    } else {
        "partial".yellow().bold()
    };
    eprintln!(
        "{} {} ({} chunks, {} records)",
        status,
        report.document_id.bright_cyan(),
        report.chunks,
        report.records()
    );
    for failure in &report.failed {
        let hint = if failure.retryable { " (retryable)" } else { "" };
        eprintln!("  {} {}: {}{}", "failed".red(), failure.pii, failure.error, hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_persons() {
        let value = json!({
            "doc-1": {
                "p-1": {"full name": "Anna Schmidt", "abbreviations": ["A. S."], "alias": []},
                "p-2": {"full_name": "Bernd Meier", "aliases": ["Bernie"]}
            }
        });
        let parsed = parse_persons(&value).unwrap();
        assert_eq!(parsed.len(), 1);
        let (document_id, directory) = &parsed[0];
        assert_eq!(document_id, "doc-1");
        assert_eq!(directory.len(), 2);
        assert!(directory.get("p-2").unwrap().aliases.contains("Bernie"));

        assert!(parse_persons(&json!({"doc-1": {"p-1": {}}})).is_err());
        assert!(parse_persons(&json!([])).is_err());
    }

    #[test]
    fn test_select_pii_types() {
        let catalog: PiiCatalog = [PiiType::new("email", "Email"), PiiType::new("phone", "Phone")]
            .into_iter()
            .collect();
        assert_eq!(select_pii_types(&catalog, &[]).unwrap().len(), 2);
        let selected = select_pii_types(&catalog, &["phone".to_string()]).unwrap();
        assert_eq!(selected[0].name, "phone");
        assert!(select_pii_types(&catalog, &["iban".to_string()]).is_err());
    }
}
