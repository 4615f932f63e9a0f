use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use docport::store::{DirectoryStore, LocalArtifactStore, LocalAttachmentStorage};
use docport::{
    ExportRequest, ImportOptions, ImportRequest, ImportSource, PortConfig, PortService,
    SchemaCatalog,
};

#[derive(Parser)]
#[clap(author, version, about = "Export and import documents as portable archives")]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// TOML config file; DOCPORT_* environment variables override it
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    /// Directory holding documents.json and attachments.json
    #[clap(short, long, global = true, default_value = "docport-store")]
    store: PathBuf,
    /// Schema catalog (.yaml, .yml or .json)
    #[clap(long, global = true)]
    schema: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export documents and what they relate to into an archive
    Export {
        /// Row ids to export, e.g. t1:en:draft
        #[clap(required = true)]
        ids: Vec<String>,
        /// Related document types to follow
        #[clap(short, long, value_delimiter = ',')]
        related_types: Vec<String>,
        #[clap(short, long)]
        format: Option<String>,
        /// Directory the archive is published to
        #[clap(short, long, default_value = "exports")]
        out: PathBuf,
    },
    /// Import an archive into the store
    Import {
        file: PathBuf,
        #[clap(long, default_value = "en")]
        locale: String,
        #[clap(short, long)]
        format: Option<String>,
        #[clap(long)]
        drafts_only: bool,
        #[clap(long)]
        update_key: Option<String>,
        #[clap(long)]
        override_locale: bool,
    },
    /// Continue an import that stopped on a locale mismatch
    Resume {
        token: String,
        #[clap(long, default_value = "en")]
        locale: String,
        #[clap(long)]
        drafts_only: bool,
        #[clap(long)]
        update_key: Option<String>,
    },
    /// Apply a staged import to the chosen duplicate documents
    Overwrite {
        token: String,
        /// Content identities (aposDocId) to overwrite
        #[clap(required = true)]
        ids: Vec<String>,
        #[clap(long, default_value = "en")]
        locale: String,
    },
    /// List the archive formats
    Formats,
    /// List the exportable relationship types of a document type
    RelatedTypes { doc_type: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    let config = load_config(args.config.as_deref())?;
    let registry = match &args.schema {
        Some(path) => SchemaCatalog::load(path)
            .with_context(|| format!("loading schema {}", path.display()))?,
        None => SchemaCatalog::default(),
    };

    match args.command {
        Commands::Export {
            ids,
            related_types,
            format,
            out,
        } => {
            let service = open_service(&args.store, &out, registry, config).await?;
            info!("Exporting {} documents", ids.len());
            let mut request = ExportRequest::new(ids).with_related_types(related_types);
            if let Some(format) = format {
                request = request.with_format(format);
            }
            let result = service.export(request).await?;
            // The artifact outlives this process; drop the in-process expiry.
            service.shutdown().await;
            print_json(&result)?;
        }
        Commands::Import {
            file,
            locale,
            format,
            drafts_only,
            update_key,
            override_locale,
        } => {
            let service =
                open_service(&args.store, Path::new("exports"), registry, config.clone()).await?;
            info!("Importing {}", file.display());
            let upload = copy_upload(&file, &config.work_dir).await?;
            let options = ImportOptions {
                locale,
                drafts_only,
                update_key,
                override_locale,
            };
            let outcome = service
                .import(ImportRequest {
                    source: ImportSource::Upload {
                        path: upload,
                        filename: file_name(&file),
                        mime_type: None,
                    },
                    format,
                    options,
                })
                .await?;
            // Staged imports stay on disk for a later resume or overwrite.
            service.shutdown().await;
            print_json(&outcome)?;
        }
        Commands::Resume {
            token,
            locale,
            drafts_only,
            update_key,
        } => {
            let service =
                open_service(&args.store, Path::new("exports"), registry, config).await?;
            let options = ImportOptions {
                locale,
                drafts_only,
                update_key,
                override_locale: true,
            };
            let outcome = service
                .import(ImportRequest {
                    source: ImportSource::Staged { token },
                    format: None,
                    options,
                })
                .await?;
            service.shutdown().await;
            print_json(&outcome)?;
        }
        Commands::Overwrite { token, ids, locale } => {
            let service =
                open_service(&args.store, Path::new("exports"), registry, config).await?;
            let summary = service
                .overwrite_duplicates(&token, &ids, &ImportOptions::new(locale))
                .await?;
            service.shutdown().await;
            print_json(&summary)?;
        }
        Commands::Formats => {
            for format in docport::FormatRegistry::default().list() {
                println!(
                    "{}\t.{}\t{}{}",
                    format.name,
                    format.extension,
                    format.label,
                    if format.include_attachments {
                        ""
                    } else {
                        " (no attachments)"
                    }
                );
            }
        }
        Commands::RelatedTypes { doc_type } => {
            let service =
                open_service(&args.store, Path::new("exports"), registry, config).await?;
            for related in service.related_types(&doc_type) {
                println!("{}", related);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PortConfig> {
    let config = match path {
        Some(path) => PortConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PortConfig::default(),
    };
    Ok(config.apply_env())
}

async fn open_service(
    store_dir: &Path,
    out: &Path,
    registry: SchemaCatalog,
    config: PortConfig,
) -> Result<PortService> {
    let store = DirectoryStore::open(store_dir)
        .await
        .with_context(|| format!("opening store {}", store_dir.display()))?;
    let attachments = LocalAttachmentStorage::new(store_dir.join("attachments"));
    Ok(PortService::new(
        Arc::new(store),
        Arc::new(attachments),
        Arc::new(LocalArtifactStore::new(out)),
        Arc::new(registry),
        config,
    ))
}

/// The service consumes its upload, so hand it a copy of the user's file.
async fn copy_upload(file: &Path, work_dir: &Path) -> Result<PathBuf> {
    let uploads = work_dir.join("uploads");
    tokio::fs::create_dir_all(&uploads)
        .await
        .with_context(|| format!("creating {}", uploads.display()))?;
    let dest = uploads.join(format!("{}-{}", Uuid::new_v4().simple(), file_name(file)));
    tokio::fs::copy(file, &dest)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    Ok(dest)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level.to_string()))
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_arguments() {
        let cli = Cli::try_parse_from([
            "docport",
            "--store",
            "data",
            "export",
            "a1:en:draft",
            "a2:en:draft",
            "--related-types",
            "topic,@apostrophecms/image",
            "-f",
            "zip",
        ])
        .unwrap();
        assert_eq!(cli.store, PathBuf::from("data"));
        match cli.command {
            Commands::Export {
                ids,
                related_types,
                format,
                out,
            } => {
                assert_eq!(ids, vec!["a1:en:draft", "a2:en:draft"]);
                assert_eq!(related_types, vec!["topic", "@apostrophecms/image"]);
                assert_eq!(format.as_deref(), Some("zip"));
                assert_eq!(out, PathBuf::from("exports"));
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn import_defaults() {
        let cli = Cli::try_parse_from(["docport", "import", "topics.csv"]).unwrap();
        match cli.command {
            Commands::Import {
                file,
                locale,
                drafts_only,
                override_locale,
                ..
            } => {
                assert_eq!(file, PathBuf::from("topics.csv"));
                assert_eq!(locale, "en");
                assert!(!drafts_only);
                assert!(!override_locale);
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn config_file_is_optional() {
        let config = load_config(None).unwrap();
        assert!(!config.default_format.is_empty());
    }

    #[tokio::test]
    async fn upload_copy_keeps_original() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("topics.csv");
        std::fs::write(&original, "type,title\n").unwrap();

        let copy = copy_upload(&original, &dir.path().join("work")).await.unwrap();
        assert!(original.exists());
        assert!(copy.file_name().unwrap().to_string_lossy().ends_with("-topics.csv"));
        assert_eq!(std::fs::read(copy).unwrap(), b"type,title\n");
    }
}
