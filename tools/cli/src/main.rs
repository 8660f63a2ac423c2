//! reevault CLI - Command line interface for vault operations.
//!
//! This tool provides a command-line interface for creating vaults and
//! reading, writing and searching their documents.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use reevault_crypto::KdfParams;
use reevault_vault::{DocumentBody, DocumentUpdate, FieldKind, Header, VaultEngine};

/// Environment variable read before prompting for a password.
const PASSWORD_ENV: &str = "REEVAULT_PASSWORD";

#[derive(Parser)]
#[command(name = "reevault")]
#[command(about = "reevault - Encrypted document vaults")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory containing the vault.
    #[arg(short, long, global = true, default_value = ".")]
    path: PathBuf,

    /// Vault name.
    #[arg(short, long, global = true, default_value = "default")]
    name: String,

    /// Cipher: "aes", "xchacha", "multi" or "auto".
    #[arg(short, long, global = true, default_value = "auto")]
    encryption: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new vault.
    Create {
        /// KDF strength: "interactive", "moderate", or "sensitive".
        #[arg(short, long, default_value = "moderate")]
        strength: String,

        /// Store the configuration base64-encoded.
        #[arg(long)]
        secure: bool,
    },

    /// Show vault information.
    Info,

    /// Count documents without unlocking.
    Count,

    /// Write a new version of a document.
    Put {
        /// Document name.
        document: String,

        /// Body as a JSON object.
        #[arg(short, long, default_value = "{}")]
        body: String,

        /// Header fields as a JSON object.
        #[arg(long, default_value = "{}")]
        header: String,
    },

    /// Print a document.
    Get {
        /// Document name.
        document: String,

        /// Print every version instead of the merged body.
        #[arg(long)]
        history: bool,
    },

    /// Remove a document.
    Rm {
        /// Document name.
        document: String,
    },

    /// List headers, optionally filtered by a search expression.
    Search {
        /// Expression such as `tags=a,b#urls=example.com`.
        expression: Option<String>,
    },

    /// Declare a new header field.
    AddField {
        /// Field name.
        field: String,

        /// Field kind: "single", "list" or "tree".
        #[arg(default_value = "list")]
        kind: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let target = Target {
        parent: cli.path,
        name: cli.name,
        encryption: cli.encryption,
    };

    match cli.command {
        Commands::Create { strength, secure } => cmd_create(&target, &strength, secure),
        Commands::Info => cmd_info(&target),
        Commands::Count => cmd_count(&target),
        Commands::Put {
            document,
            body,
            header,
        } => cmd_put(&target, &document, &body, &header),
        Commands::Get { document, history } => cmd_get(&target, &document, history),
        Commands::Rm { document } => cmd_rm(&target, &document),
        Commands::Search { expression } => cmd_search(&target, expression.as_deref()),
        Commands::AddField { field, kind } => cmd_add_field(&target, &field, &kind),
    }
}

/// Which vault a command operates on.
struct Target {
    parent: PathBuf,
    name: String,
    encryption: String,
}

impl Target {
    fn engine(&self) -> Result<VaultEngine> {
        let engine = VaultEngine::new(&self.name, &self.parent, &self.encryption, None)
            .context("Invalid vault settings")?;
        // Console logging is already installed.
        Ok(engine.file_logging(false))
    }

    fn open(&self) -> Result<VaultEngine> {
        let mut engine = self.engine()?;
        let password = read_password("Enter password: ")?;
        engine.load(&password).context("Failed to open vault")?;
        Ok(engine)
    }
}

/// Password from the environment, or prompt securely.
fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password(prompt).context("Failed to read password")
}

fn parse_object(raw: &str, what: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str(raw).with_context(|| format!("Invalid {} JSON", what))? {
        serde_json::Value::Object(map) => Ok(map),
        _ => bail!("The {} must be a JSON object", what),
    }
}

/// Create a new vault.
fn cmd_create(target: &Target, strength: &str, secure: bool) -> Result<()> {
    info!("Creating new vault: {}", target.name);

    let kdf_params = match strength {
        "interactive" => KdfParams::interactive(),
        "moderate" => KdfParams::moderate(),
        "sensitive" => KdfParams::sensitive(),
        _ => {
            bail!("Invalid strength. Use: interactive, moderate, or sensitive");
        }
    };

    let password = read_password("Enter password: ")?;
    if std::env::var(PASSWORD_ENV).is_err() {
        let confirm = read_password("Confirm password: ")?;
        if password != confirm {
            bail!("Passwords do not match");
        }
    }

    let mut engine = target
        .engine()?
        .kdf_params(kdf_params)
        .secure_config(secure);
    engine.create(&password).context("Failed to create vault")?;

    println!("Vault created successfully!");
    println!("  Name: {}", engine.name());
    println!("  Location: {}", engine.path().display());
    println!("  Secure config: {}", engine.is_secure_config());

    engine.close();
    Ok(())
}

/// Show vault information.
fn cmd_info(target: &Target) -> Result<()> {
    let engine = target.open()?;
    let config = engine.config().context("Vault config not loaded")?;

    println!("Vault Information:");
    println!("  Name: {}", config.vault_name);
    println!("  Location: {}", engine.path().display());
    println!("  Documents: {}", engine.count()?);
    println!("  Created: {} by {}@{}", config.creation_date, config.creation_user, config.creation_machine);
    println!("  Updated: {} by {}@{}", config.last_updated, config.updating_user, config.updating_machine);
    println!("  Created with: {}", config.creation_version);
    if let Some(version) = &config.last_version {
        println!("  Last written with: {}", version);
    }
    println!("  Header fields:");
    for (field, kind) in config.header_set.iter() {
        println!("    {}: {}", field, kind);
    }

    engine.close();
    Ok(())
}

/// Count documents.
fn cmd_count(target: &Target) -> Result<()> {
    let engine = target.engine()?;
    if !engine.exists() {
        bail!("No vault at {}", engine.path().display());
    }
    println!("{}", engine.count()?);
    Ok(())
}

/// Write a document version.
fn cmd_put(target: &Target, document: &str, body: &str, header: &str) -> Result<()> {
    let update = DocumentUpdate {
        header: parse_object(header, "header")?,
        body: parse_object(body, "body")?,
    };

    let engine = target.open()?;
    let version = engine
        .update(document, update)
        .with_context(|| format!("Failed to write {}", document))?;

    println!("Wrote {} (version {})", document, version);
    engine.close();
    Ok(())
}

/// Print a document.
fn cmd_get(target: &Target, document: &str, history: bool) -> Result<()> {
    let engine = target.open()?;
    let view = engine
        .read_file(document, history)
        .with_context(|| format!("Failed to read {}", document))?;

    let body = match &view.body {
        DocumentBody::Merged(payload) => serde_json::Value::Object(payload.clone()),
        DocumentBody::History(versions) => serde_json::to_value(versions)?,
    };
    let output = serde_json::json!({ "header": view.header, "body": body });
    println!("{}", serde_json::to_string_pretty(&output)?);

    engine.close();
    Ok(())
}

/// Remove a document.
fn cmd_rm(target: &Target, document: &str) -> Result<()> {
    let engine = target.open()?;
    engine
        .remove_file(document)
        .with_context(|| format!("Failed to remove {}", document))?;

    println!("Removed: {}", document);
    engine.close();
    Ok(())
}

/// List matching headers.
fn cmd_search(target: &Target, expression: Option<&str>) -> Result<()> {
    let engine = target.open()?;
    let headers = engine.list_headers(expression).context("Search failed")?;

    if headers.is_empty() {
        println!("No documents found.");
    } else {
        for (name, header) in &headers {
            print_header(name, header);
        }
    }

    engine.close();
    Ok(())
}

fn print_header(name: &str, header: &Header) {
    if header.is_empty() {
        println!("{}", name);
    } else {
        println!("{}  {}", name, serde_json::Value::Object(header.clone()));
    }
}

/// Declare a header field.
fn cmd_add_field(target: &Target, field: &str, kind: &str) -> Result<()> {
    let kind: FieldKind = kind.parse().context("Invalid field kind")?;

    let engine = target.open()?;
    if engine.add_header_field(field, kind)? {
        println!("Added header field {} ({})", field, kind);
    } else {
        println!("Header field {} already exists or is reserved", field);
    }

    engine.close();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reevault_vault::Payload;
    use std::path::Path;

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "reevault", "get", "doc", "--history", "--path", "/tmp", "--name", "notes",
        ])
        .unwrap();

        assert_eq!(cli.path, Path::new("/tmp"));
        assert_eq!(cli.name, "notes");
        assert!(matches!(cli.command, Commands::Get { history: true, .. }));
    }

    #[test]
    fn test_parse_object_requires_object() {
        assert!(parse_object(r#"{"a": 1}"#, "body").is_ok());
        assert!(parse_object("[1, 2]", "body").is_err());
        assert!(parse_object("not json", "body").is_err());
    }

    #[test]
    fn test_payload_alias_is_object_map() {
        let payload: Payload = parse_object(r#"{"k": "v"}"#, "body").unwrap();
        assert_eq!(payload.get("k"), Some(&serde_json::json!("v")));
    }
}
