use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sitestudio::auth::{IdentityProvider, TokenIdentity};
use sitestudio::catalog::{Catalog, CatalogFilter, TemplateDescriptor};
use sitestudio::drafts::{DraftStore, FileDraftStore, MemoryDraftStore};
use sitestudio::export::{ExportArtifact, ExportError};
use sitestudio::github::{GitHubClient, GitHubTemplateSource};
use sitestudio::loader::{path_within, LocalTemplateSource, TemplateContent, TemplateLoader, TemplateSource};
use sitestudio::preview::{MemoryTargetHost, PreviewState};
use sitestudio::remote::RemoteExporter;
use sitestudio::scheduler::SystemClock;
use sitestudio::schema::AnswerSet;
use sitestudio::studio::{Studio, StudioError};
use sitestudio::StudioConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the YAML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold a new template directory
    Init {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// List templates of a catalog file
    Catalog {
        #[arg(short, long)]
        file: PathBuf,
        #[arg(long, default_value = "all")]
        category: String,
        #[arg(long = "type", default_value = "all")]
        kind: String,
    },
    /// Check answers against the template form
    Validate(TemplateArgs),
    /// Write the self-contained preview document
    Preview {
        #[command(flatten)]
        template: TemplateArgs,
        #[arg(short, long, default_value = "preview.html")]
        out: PathBuf,
    },
    /// Export the rendered site
    Export {
        #[command(subcommand)]
        sink: ExportSink,
    },
    /// Print the GitHub authorization URL
    Login,
}

#[derive(Subcommand)]
enum ExportSink {
    /// Write a zip archive
    Zip {
        #[command(flatten)]
        template: TemplateArgs,
        /// Archive base name (defaults to the `name` answer)
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },
    /// Create a GitHub repository and upload every file
    Github {
        #[command(flatten)]
        template: TemplateArgs,
        /// Repository name (defaults to the `name` answer)
        #[arg(short, long)]
        repo: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
}

#[derive(Args)]
struct TemplateArgs {
    /// Local template directory
    #[arg(short, long, conflicts_with = "id")]
    template: Option<PathBuf>,

    /// Template id to fetch from its GitHub repository
    #[arg(long, requires = "catalog")]
    id: Option<String>,

    /// Catalog file used with --id
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// JSON file with answers
    #[arg(short, long)]
    answers: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => StudioConfig::load(path).with_context(|| format!("Failed to load settings {:?}", path))?,
        None => StudioConfig::default(),
    };

    match cli.command {
        Commands::Init { path } => init_template(&path),
        Commands::Catalog { file, category, kind } => list_catalog(&file, CatalogFilter { category, kind }),
        Commands::Validate(args) => validate(&config, &args).await,
        Commands::Preview { template, out } => preview(&config, &template, &out).await,
        Commands::Export { sink } => match sink {
            ExportSink::Zip { template, name, out } => export_zip(&config, &template, name.as_deref(), &out).await,
            ExportSink::Github {
                template,
                repo,
                description,
            } => export_github(&config, &template, repo.as_deref(), description.as_deref()).await,
        },
        Commands::Login => {
            let redirect = identity(&config).login()?;
            println!("{}", redirect.url);
            Ok(())
        }
    }
}

fn identity(config: &StudioConfig) -> TokenIdentity {
    TokenIdentity::from_env(&config.github.token_env, config.github.oauth.clone())
}

fn init_template(path: &Path) -> Result<()> {
    info!("Initializing template at {:?}", path);
    std::fs::create_dir_all(path)?;

    let config_content = r##"{
  "name": "starter",
  "description": "A one-page personal site",
  "steps": [
    {
      "id": "about",
      "title": "About you",
      "fields": [
        { "name": "name", "label": "Your name", "default": "World", "required": true },
        { "name": "bio", "type": "textarea", "validation": { "maxLength": 280 } }
      ]
    },
    {
      "id": "style",
      "title": "Style",
      "fields": [
        { "name": "accent", "type": "color", "default": "#3b82f6" },
        { "name": "email", "type": "email" }
      ]
    }
  ]
}
"##;
    std::fs::write(path.join("config.json"), config_content)?;

    let index_content = r#"<!DOCTYPE html>
<html>
<head>
  <title>{name}</title>
</head>
<body>
  <h1>Hello {name}!</h1>
  <p>{bio|Tell the world about yourself.}</p>
  <a href="mailto:{email}">Contact</a>
</body>
</html>
"#;
    std::fs::write(path.join("index.html"), index_content)?;
    std::fs::write(path.join("style.css"), "h1 { color: {accent}; }\n")?;
    std::fs::write(
        path.join("script.js"),
        "const owner = \"{name}\";\nconsole.log(`Site of ${owner}`);\n",
    )?;

    let answers_content = "{\n  \"name\": \"Ada Lovelace\",\n  \"bio\": \"First programmer.\"\n}\n";
    std::fs::write(path.join("answers.json"), answers_content)?;

    info!("✓ Template initialized successfully!");
    info!("  Run: sitestudio preview -t {} -a {}", path.display(), path.join("answers.json").display());

    Ok(())
}

fn list_catalog(file: &Path, filter: CatalogFilter) -> Result<()> {
    let catalog = Catalog::load(file).context("Failed to load catalog")?;
    for template in catalog.filtered(&filter) {
        let marker = if template.featured() { "*" } else { " " };
        println!(
            "{} {:<20} {:<24} {:<12} {}",
            marker,
            template.id(),
            template.name(),
            template.category(),
            template.kind()
        );
    }
    Ok(())
}

async fn load_template(config: &StudioConfig, args: &TemplateArgs) -> Result<(String, TemplateContent)> {
    let (descriptor, source): (TemplateDescriptor, Arc<dyn TemplateSource>) = match (&args.template, &args.id) {
        (Some(dir), _) => {
            let id = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "template".to_string());
            let mut source = LocalTemplateSource::new(dir, &config.template.config_file);
            if let Some(answers) = args.answers.as_deref().and_then(|a| path_within(dir, a)) {
                source = source.with_excluded([answers]);
            }
            (TemplateDescriptor::local(id, ""), Arc::new(source) as Arc<dyn TemplateSource>)
        }
        (None, Some(id)) => {
            let catalog_path = args
                .catalog
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("--catalog is required with --id"))?;
            let catalog = Catalog::load(catalog_path).context("Failed to load catalog")?;
            let descriptor = catalog
                .get(id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Template '{}' is not in the catalog", id))?;
            let client = GitHubClient::new(&config.github, Arc::new(identity(config)))?;
            let source = GitHubTemplateSource::new(client, &config.template.config_file);
            (descriptor, Arc::new(source) as Arc<dyn TemplateSource>)
        }
        (None, None) => bail!("Either --template or --id is required"),
    };

    let content = TemplateLoader::new(source)
        .load(&descriptor)
        .await
        .with_context(|| format!("Failed to load template '{}'", descriptor.id()))?;
    Ok((descriptor.id().to_string(), content))
}

fn read_answers(path: Option<&PathBuf>) -> Result<AnswerSet> {
    let Some(path) = path else {
        return Ok(AnswerSet::new());
    };
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read answers {:?}", path))?;
    serde_json::from_str(&content).context("Failed to parse answers JSON")
}

/// Loads the template and applies the answers file on top of any draft.
async fn open_studio(config: &StudioConfig, args: &TemplateArgs) -> Result<Studio<MemoryTargetHost>> {
    let (id, content) = load_template(config, args).await?;
    let answers = read_answers(args.answers.as_ref())?;

    let drafts: Arc<dyn DraftStore> = match &config.drafts.dir {
        Some(dir) => Arc::new(FileDraftStore::new(dir)),
        None => Arc::new(MemoryDraftStore::new()),
    };
    let mut studio = Studio::new(
        config.clone(),
        drafts,
        Arc::new(SystemClock::new()),
        MemoryTargetHost::new(),
    );
    studio.select_template(&id);
    if !answers.is_empty() {
        studio.update_fields_immediate(&answers)?;
    }
    studio.content_loaded(&id, content);
    Ok(studio)
}

async fn validate(config: &StudioConfig, args: &TemplateArgs) -> Result<()> {
    let mut studio = open_studio(config, args).await?;
    match studio.form_mut().submit() {
        Ok(answers) => {
            info!("✓ All {} answers are valid", answers.len());
            Ok(())
        }
        Err(errors) => {
            for (field, message) in &errors {
                error!("{}: {}", field, message);
            }
            bail!("{} invalid field(s)", errors.len())
        }
    }
}

async fn preview(config: &StudioConfig, args: &TemplateArgs, out: &Path) -> Result<()> {
    let studio = open_studio(config, args).await?;
    let preview = studio.preview();
    if preview.state() == PreviewState::Error {
        if let Some(e) = preview.last_error() {
            bail!("Preview failed: {}", e);
        }
    }
    let document = preview
        .pending_target()
        .and_then(|target| preview.host().document(target.handle()))
        .ok_or_else(|| anyhow::anyhow!("Nothing was rendered"))?;
    std::fs::write(out, document).with_context(|| format!("Failed to write {:?}", out))?;
    info!("✓ Preview written to {:?}", out);
    Ok(())
}

fn report_invalid(err: StudioError) -> anyhow::Error {
    if let StudioError::Invalid(errors) = &err {
        for (field, message) in errors {
            error!("{}: {}", field, message);
        }
    }
    err.into()
}

async fn export_zip(config: &StudioConfig, args: &TemplateArgs, name: Option<&str>, out: &Path) -> Result<()> {
    let mut studio = open_studio(config, args).await?;
    let ExportArtifact::Archive(archive) = studio.export_archive(name).map_err(report_invalid)? else {
        bail!("Archive export produced no archive");
    };
    std::fs::create_dir_all(out)?;
    let path = out.join(&archive.filename);
    std::fs::write(&path, &archive.bytes).with_context(|| format!("Failed to write {:?}", path))?;
    info!("✓ Archive written to {:?}", path);
    Ok(())
}

async fn export_github(
    config: &StudioConfig,
    args: &TemplateArgs,
    repo: Option<&str>,
    description: Option<&str>,
) -> Result<()> {
    let mut studio = open_studio(config, args).await?;
    let identity = Arc::new(identity(config));
    let client = GitHubClient::new(&config.github, identity.clone())?;
    let exporter = RemoteExporter::new(Arc::new(client), identity.clone(), &config.export);

    match studio.export_remote(&exporter, repo, description).await {
        Ok(ExportArtifact::Repository(repository)) => {
            info!("✓ Exported to {}", repository.url);
            Ok(())
        }
        Ok(ExportArtifact::Archive(_)) => bail!("Repository export produced an archive"),
        Err(StudioError::Export(ExportError::AuthRequired)) => {
            match identity.login() {
                Ok(redirect) => warn!(
                    "Set {} to a token, or authorize at {} and retry",
                    config.github.token_env, redirect.url
                ),
                Err(e) => warn!("Set {} to a GitHub token and retry ({})", config.github.token_env, e),
            }
            bail!(ExportError::AuthRequired)
        }
        Err(e) => Err(report_invalid(e)),
    }
}
