//! CLI entry point for Ntropy.
//!
//! This binary provides the `ntropy` command for creating the credential
//! store, managing provider credentials and calling the connected providers.

mod cli;
mod helpers;

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use ntropy_auth::{ConnectReport, VaultConfig, VaultController, VaultState, key_source};
use ntropy_providers::connections::{self, SimilarityQuery};
use ntropy_providers::types::{ChatMessage, ChatRequest, Document, EmbeddingInput, GenerateRequest};
use ntropy_providers::{ConnectionManager, ProviderRegistry};
use ntropy_vault::{CredentialRecord, CredentialUpdate};
use tracing::info;

use crate::cli::{Cli, Commands, CredentialArgs};
use crate::helpers::{confirm, credential_table, init_tracing, parse_json_object, vector_preview};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing("info");

    let config = VaultConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?
        .with_overrides(cli.vault.clone(), cli.key_file.clone());
    info!(store = %config.store_path.display(), "configuration loaded");

    let app = App::new(config, cli.key.clone());

    match cli.command {
        Commands::Init { force } => app.cmd_init(force),
        Commands::Add(args) => app.cmd_add(args),
        Commands::Update { fields, id } => app.cmd_update(fields, id),
        Commands::Delete { service, id } => app.cmd_delete(&service, id.as_deref()),
        Commands::List { json } => app.cmd_list(json),
        Commands::Connect => app.cmd_connect(),
        Commands::Models { model } => app.cmd_models(model.as_deref()),
        Commands::Embed {
            model,
            text,
            image,
            settings,
            json,
        } => app.cmd_embed(&model, text, image, settings.as_deref(), json).await,
        Commands::Chat {
            service,
            model,
            system,
            images,
            max_tokens,
            prompt,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt).with_images(images));
            let mut request = ChatRequest::new(model, messages);
            request.max_tokens = max_tokens;
            app.cmd_chat(&service, &request).await
        }
        Commands::Generate {
            service,
            model,
            system,
            prompt,
        } => {
            let mut request = GenerateRequest::new(model, prompt);
            request.system = system;
            app.cmd_generate(&service, &request).await
        }
        Commands::Search {
            store,
            model,
            top_k,
            namespace,
            query,
        } => {
            let query = SimilarityQuery {
                model,
                input: EmbeddingInput::text(query),
                settings: None,
                top_k,
                namespace,
            };
            app.cmd_search(&store, query).await
        }
    }
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

struct App {
    vault: VaultController,
    registry: Arc<ProviderRegistry>,
    connections: ConnectionManager,
    inline_key: Option<String>,
}

impl App {
    fn new(config: VaultConfig, inline_key: Option<String>) -> Self {
        let registry = Arc::new(ProviderRegistry::builtin());
        let connections = ConnectionManager::new();
        let vault = VaultController::new(config, Arc::clone(&registry), connections.clone());
        Self {
            vault,
            registry,
            connections,
            inline_key,
        }
    }

    /// Unlock the store and register every connection.
    fn connect(&self) -> Result<ConnectReport> {
        if self.vault.state() == VaultState::Uninitialized {
            bail!(
                "no credential store at {}; run `ntropy init` first",
                self.vault.config().store_path.display()
            );
        }
        let key = key_source(self.inline_key.clone(), None, self.vault.config());
        let report = self
            .vault
            .connect(key, None)
            .context("failed to unlock the credential store")?;
        for skipped in &report.skipped {
            eprintln!("warning: skipped {}: {}", skipped.service_name, skipped.reason);
        }
        Ok(report)
    }

    // -- Subcommand: init ---------------------------------------------------

    fn cmd_init(&self, force: bool) -> Result<()> {
        let path = &self.vault.config().store_path;
        let mut overwrite = force;

        if !force && path.exists() {
            let stdin = io::stdin();
            let question = format!(
                "A credential store already exists at {}. Overwrite it? Every stored secret will be lost.",
                path.display()
            );
            if !confirm(&mut stdin.lock(), &mut io::stdout(), &question)? {
                println!("Aborted.");
                return Ok(());
            }
            overwrite = true;
        }

        let created = self
            .vault
            .create(overwrite)
            .context("failed to create the credential store")?;

        let mut out = io::stdout().lock();
        writeln!(out)?;
        writeln!(out, "  Credential store created at {}", created.store_path.display())?;
        writeln!(out, "  Private key written to {}", created.private_key_path.display())?;
        writeln!(out)?;
        writeln!(out, "{}", created.private_key_pem.trim_end())?;
        writeln!(out)?;
        writeln!(
            out,
            "  WARNING: this private key is the only way to decrypt your stored credentials."
        )?;
        writeln!(
            out,
            "  Back it up now. If it is lost, every stored secret is permanently unrecoverable."
        )?;
        Ok(())
    }

    // -- Subcommands: credentials -------------------------------------------

    fn cmd_add(&self, args: CredentialArgs) -> Result<()> {
        self.connect()?;

        let mut record = CredentialRecord::new(&args.service);
        record.name = args.name;
        record.api_key = args.api_key;
        record.access_key = args.access_key;
        record.secret_access_key = args.secret_access_key;
        if let Some(raw) = args.setting.as_deref() {
            record.other_setting = Some(parse_json_object(raw, "--setting")?);
        }

        if !self.registry.contains(&args.service) {
            eprintln!(
                "warning: no provider named {} (known: {})",
                args.service,
                self.registry.names().join(", ")
            );
        }

        let id = self
            .vault
            .add_provider(record)
            .with_context(|| format!("failed to add {} credential", args.service))?;
        println!("Added {} credential {id}", args.service);
        Ok(())
    }

    fn cmd_update(&self, args: CredentialArgs, id: Option<String>) -> Result<()> {
        self.connect()?;

        let mut update = CredentialUpdate::new(&args.service);
        update.id = id;
        update.name = args.name;
        update.api_key = args.api_key;
        update.access_key = args.access_key;
        update.secret_access_key = args.secret_access_key;
        if let Some(raw) = args.setting.as_deref() {
            update.other_setting = Some(parse_json_object(raw, "--setting")?);
        }

        let changed = self
            .vault
            .update_provider(update)
            .with_context(|| format!("failed to update {} credentials", args.service))?;
        println!("Updated {changed} {} credential(s)", args.service);
        Ok(())
    }

    fn cmd_delete(&self, service: &str, id: Option<&str>) -> Result<()> {
        self.connect()?;

        let deleted = match id {
            Some(id) => {
                let owned = self
                    .vault
                    .get_credentials(Some(service))?
                    .iter()
                    .any(|r| r.id.as_deref() == Some(id));
                if !owned || !self.vault.delete_provider_by_id(id)? {
                    bail!("no {service} credential with id {id}");
                }
                1
            }
            None => self.vault.delete_provider(service)?,
        };
        println!("Deleted {deleted} {service} credential(s)");
        Ok(())
    }

    fn cmd_list(&self, json: bool) -> Result<()> {
        self.connect()?;
        if json {
            println!("{}", self.vault.list_providers()?);
        } else {
            let records = self.vault.redacted_providers()?;
            if records.is_empty() {
                println!("No credentials stored.");
            } else {
                print!("{}", credential_table(&records));
            }
        }
        Ok(())
    }

    fn cmd_connect(&self) -> Result<()> {
        let report = self.connect()?;
        println!(
            "Connected {} provider(s), skipped {}",
            report.registered.len(),
            report.skipped.len()
        );
        for name in self.connections.names() {
            println!("  {name}");
        }
        Ok(())
    }

    // -- Subcommand: models -------------------------------------------------

    fn cmd_models(&self, model: Option<&str>) -> Result<()> {
        let Some(model) = model else {
            for (service, models) in self.registry.list_models() {
                println!("{service}");
                for model in models {
                    println!("  {model}");
                }
            }
            return Ok(());
        };

        let Some(info) = self.registry.model_settings(model) else {
            bail!("unknown embedding model {model}");
        };
        println!("{} ({})", info.name, info.service);
        println!("  {}", info.description);
        println!("  defaults: {}", info.default_settings());
        for (setting, accepted) in info.settings_help {
            println!("  {setting}: {accepted}");
        }
        Ok(())
    }

    // -- Subcommands: provider calls ----------------------------------------

    async fn cmd_embed(
        &self,
        model: &str,
        text: Option<String>,
        image: Option<String>,
        settings: Option<&str>,
        json: bool,
    ) -> Result<()> {
        let input = match (text, image) {
            (Some(text), _) => EmbeddingInput::text(text),
            (None, Some(image)) => EmbeddingInput::Document(Document::image(0, image)),
            (None, None) => bail!("pass --text or --image"),
        };
        let settings = settings
            .map(|raw| parse_json_object(raw, "--settings"))
            .transpose()?;

        self.connect()?;
        let vector = connections::embeddings_for_model(
            &self.registry,
            &self.connections,
            model,
            input,
            settings.as_ref(),
        )
        .await
        .with_context(|| format!("embedding with {model} failed"))?;

        if json {
            println!("{}", serde_json::to_string_pretty(&vector)?);
        } else {
            println!("{} dimensions {}", vector.size, vector_preview(&vector.vector, 8));
        }
        Ok(())
    }

    async fn cmd_chat(&self, service: &str, request: &ChatRequest) -> Result<()> {
        self.connect()?;
        let response = connections::chat(&self.connections, service, request)
            .await
            .with_context(|| format!("chat with {service} failed"))?;

        println!("{}", response.content);
        if let Some(usage) = response.usage {
            info!(
                model = %response.model,
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                "chat complete"
            );
        }
        Ok(())
    }

    async fn cmd_generate(&self, service: &str, request: &GenerateRequest) -> Result<()> {
        self.connect()?;
        let text = connections::generate(&self.connections, service, request)
            .await
            .with_context(|| format!("generation with {service} failed"))?;
        println!("{text}");
        Ok(())
    }

    async fn cmd_search(&self, store: &str, query: SimilarityQuery) -> Result<()> {
        self.connect()?;
        let matches = connections::similarity_search(&self.registry, &self.connections, store, query)
            .await
            .with_context(|| format!("search against {store} failed"))?;

        if matches.is_empty() {
            println!("No matches.");
        }
        for m in matches {
            let content = m
                .metadata
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            println!("{:.4}  {}  {}", m.score, m.id, content);
        }
        Ok(())
    }
}
