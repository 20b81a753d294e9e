//! CLI argument definitions for `ntropy`.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Ntropy: encrypted provider credentials and model access for RAG pipelines.
#[derive(Parser)]
#[command(
    name = "ntropy",
    version,
    about = "Ntropy credential vault and model providers",
    long_about = "Stores third-party API credentials encrypted with a local RSA keypair and \
                  brings up embedding, chat and vector store connections from them."
)]
pub struct Cli {
    /// Configuration file (defaults to config/ntropy.toml when present).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path of the credential store.
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,

    /// Private key file used to unlock the store.
    #[arg(long, global = true)]
    pub key_file: Option<PathBuf>,

    /// Private key PEM passed inline. Takes precedence over --key-file.
    #[arg(long, global = true)]
    pub key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new credential store and keypair.
    Init {
        /// Overwrite an existing store without asking.
        #[arg(long)]
        force: bool,
    },

    /// Store a provider credential.
    Add(CredentialArgs),

    /// Change fields of stored credentials. Omitted fields are kept.
    Update {
        #[command(flatten)]
        fields: CredentialArgs,

        /// Only update the credential with this id.
        #[arg(long)]
        id: Option<String>,
    },

    /// Delete stored credentials for a service.
    Delete {
        service: String,

        /// Only delete the credential with this id.
        #[arg(long)]
        id: Option<String>,
    },

    /// List stored credentials with secrets masked.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Unlock the store and bring up every provider connection.
    Connect,

    /// List embedding models, or show one model's settings.
    Models {
        /// Show default settings for this model.
        model: Option<String>,
    },

    /// Compute an embedding.
    Embed {
        #[arg(long, short)]
        model: String,

        /// Text to embed.
        #[arg(long, short, conflicts_with = "image")]
        text: Option<String>,

        /// Image path or URL to embed.
        #[arg(long)]
        image: Option<String>,

        /// Model settings as a JSON object.
        #[arg(long)]
        settings: Option<String>,

        /// Print the full vector as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Send a single chat message.
    Chat {
        /// Provider service name (e.g. OpenAI, Anthropic, Ollama).
        #[arg(long, short)]
        service: String,

        #[arg(long, short)]
        model: String,

        #[arg(long)]
        system: Option<String>,

        /// Image paths or URLs attached to the message.
        #[arg(long = "image")]
        images: Vec<String>,

        #[arg(long)]
        max_tokens: Option<u32>,

        prompt: String,
    },

    /// Single-shot completion (Ollama).
    Generate {
        #[arg(long, short, default_value = "Ollama")]
        service: String,

        #[arg(long, short)]
        model: String,

        #[arg(long)]
        system: Option<String>,

        prompt: String,
    },

    /// Embed a query and search a vector store.
    Search {
        /// Vector store service name.
        #[arg(long, default_value = "Pinecone")]
        store: String,

        /// Embedding model for the query.
        #[arg(long, short)]
        model: String,

        #[arg(long, short = 'k', default_value_t = 5)]
        top_k: usize,

        #[arg(long)]
        namespace: Option<String>,

        query: String,
    },
}

/// Credential fields shared by `add` and `update`.
#[derive(Args, Debug, Clone)]
pub struct CredentialArgs {
    /// Provider service name (e.g. AWS, OpenAI, Pinecone).
    #[arg(long, short)]
    pub service: String,

    /// Human-readable label.
    #[arg(long, short)]
    pub name: Option<String>,

    #[arg(long)]
    pub api_key: Option<String>,

    #[arg(long)]
    pub access_key: Option<String>,

    #[arg(long)]
    pub secret_access_key: Option<String>,

    /// Non-secret settings as a JSON object, e.g. '{"region_name":"us-west-2"}'.
    #[arg(long)]
    pub setting: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ntropy",
            "list",
            "--json",
            "--vault",
            "/tmp/v.db",
            "--key-file",
            "/tmp/k.pem",
        ])
        .unwrap();
        assert_eq!(cli.vault, Some(PathBuf::from("/tmp/v.db")));
        assert_eq!(cli.key_file, Some(PathBuf::from("/tmp/k.pem")));
        assert!(matches!(cli.command, Commands::List { json: true }));
    }

    #[test]
    fn add_parses_credential_fields() {
        let cli = Cli::try_parse_from([
            "ntropy",
            "add",
            "--service",
            "AWS",
            "--access-key",
            "AKIA",
            "--secret-access-key",
            "s",
            "--setting",
            r#"{"region_name":"us-west-2"}"#,
        ])
        .unwrap();
        let Commands::Add(args) = cli.command else {
            panic!("expected add");
        };
        assert_eq!(args.service, "AWS");
        assert_eq!(args.access_key.as_deref(), Some("AKIA"));
        assert!(args.api_key.is_none());
    }

    #[test]
    fn embed_text_and_image_conflict() {
        let result = Cli::try_parse_from([
            "ntropy", "embed", "-m", "m", "--text", "a", "--image", "b.png",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn chat_collects_repeated_images() {
        let cli = Cli::try_parse_from([
            "ntropy", "chat", "-s", "Ollama", "-m", "llava", "--image", "a.png", "--image",
            "b.png", "describe",
        ])
        .unwrap();
        let Commands::Chat { images, prompt, .. } = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(images.len(), 2);
        assert_eq!(prompt, "describe");
    }
}
