use heck::ToKebabCase;
use log::debug;
use serde::Serialize;
use thiserror::Error;

use crate::archive::ArchiveBytes;
use crate::config::ExportSettings;
use crate::engine::TemplateEngine;
use crate::files::{RenderedFileSet, TemplateFile};
use crate::remote::RemoteRepository;
use crate::schema::{AnswerSet, TemplateConfig};

pub const README_PATH: &str = "README.md";

const README_TEMPLATE: &str = r#"# {{ title }}

{{ summary }}
{% if details %}
## Details

{% for item in details -%}
- **{{ item.label }}:** {{ item.value }}
{% endfor -%}
{% endif %}
Built from the {{ template | titlecase }} template with {{ tool }}.
"#;

/// A file that could not be uploaded during a remote export.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadFailure {
    pub path: String,
    pub message: String,
}

fn failed_paths(failures: &[UploadFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.path, f.message))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Sign in to GitHub before exporting to a repository")]
    AuthRequired,
    #[error("A repository named '{0}' already exists")]
    NameConflict(String),
    #[error("Failed to create repository: {0}")]
    CreateRepository(String),
    #[error("Failed to read the authenticated user: {0}")]
    Identity(String),
    #[error(
        "Failed to upload {}. The repository {} was created and left in place; retry or delete it manually",
        failed_paths(.failures),
        .repository.url
    )]
    Upload {
        repository: RemoteRepository,
        failures: Vec<UploadFailure>,
    },
    #[error("Failed to build archive: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to generate {path}: {message}")]
    Document { path: String, message: String },
}

/// Result of one export action.
#[derive(Debug, Clone, PartialEq)]
pub enum ExportArtifact {
    Archive(ArchiveBytes),
    Repository(RemoteRepository),
}

#[derive(Serialize)]
struct ReadmeItem {
    label: String,
    value: String,
}

#[derive(Serialize)]
struct ReadmeContext {
    title: String,
    summary: String,
    details: Vec<ReadmeItem>,
    template: String,
}

/// Rendered files plus the answers they were rendered with, ready for
/// either sink.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportBundle {
    files: RenderedFileSet,
    answers: AnswerSet,
}

impl ExportBundle {
    /// Adds a generated README unless disabled or the template ships one.
    pub fn prepare(
        mut files: RenderedFileSet,
        answers: &AnswerSet,
        config: &TemplateConfig,
        settings: &ExportSettings,
    ) -> Result<Self, ExportError> {
        let ships_readme = files
            .iter()
            .any(|f| f.path.eq_ignore_ascii_case(README_PATH));
        if settings.generate_readme && !ships_readme {
            let readme = generate_readme(answers, config, settings)?;
            files.insert(TemplateFile::new(README_PATH, readme));
        } else if ships_readme {
            debug!("Template ships its own README, not generating one");
        }
        Ok(Self {
            files,
            answers: answers.clone(),
        })
    }

    pub fn files(&self) -> &RenderedFileSet {
        &self.files
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    /// Repository name derived from the `name` answer, if any.
    pub fn suggested_name(&self) -> Option<String> {
        suggest_repository_name(&self.answers)
    }

    pub fn description(&self, settings: &ExportSettings) -> String {
        repository_description(&self.answers, settings)
    }
}

fn non_blank(answers: &AnswerSet, name: &str) -> Option<String> {
    answers
        .display(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `bio`, else `description`, else the configured default.
pub fn repository_description(answers: &AnswerSet, settings: &ExportSettings) -> String {
    non_blank(answers, "bio")
        .or_else(|| non_blank(answers, "description"))
        .unwrap_or_else(|| settings.default_description.clone())
}

pub fn suggest_repository_name(answers: &AnswerSet) -> Option<String> {
    non_blank(answers, "name")
        .map(|name| name.to_kebab_case())
        .filter(|name| !name.is_empty())
}

fn generate_readme(
    answers: &AnswerSet,
    config: &TemplateConfig,
    settings: &ExportSettings,
) -> Result<String, ExportError> {
    let template = config.name.clone().unwrap_or_else(|| "website".to_string());
    let details = config
        .fields()
        .filter_map(|field| {
            non_blank(answers, &field.name).map(|value| ReadmeItem {
                label: field.label().to_string(),
                value,
            })
        })
        .collect();
    let context = ReadmeContext {
        title: non_blank(answers, "name").unwrap_or_else(|| template.clone()),
        summary: repository_description(answers, settings),
        details,
        template,
    };
    let mut engine = TemplateEngine::new();
    engine.add_global("tool".to_string(), env!("CARGO_PKG_NAME"));
    engine
        .render_string(README_TEMPLATE, &context)
        .map_err(|message| ExportError::Document {
            path: README_PATH.to_string(),
            message,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TemplateConfig {
        TemplateConfig::from_json(
            r#"{"name": "portfolio", "steps": [{"title": "About", "fields": [
                {"name": "name", "label": "Your name"},
                {"name": "bio", "type": "textarea"},
                {"name": "accent", "type": "color"}
            ]}]}"#,
        )
        .unwrap()
    }

    fn files() -> RenderedFileSet {
        vec![TemplateFile::new("index.html", "<h1>Ada</h1>")]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_prepare_generates_readme() {
        let answers: AnswerSet = [("name", "Ada Lovelace"), ("bio", "Analyst"), ("accent", "")]
            .into_iter()
            .collect();
        let bundle = ExportBundle::prepare(files(), &answers, &config(), &ExportSettings::default()).unwrap();
        let readme = &bundle.files().get(README_PATH).unwrap().content;
        assert!(readme.starts_with("# Ada Lovelace\n\nAnalyst\n"));
        assert!(readme.contains("- **Your name:** Ada Lovelace\n"));
        assert!(readme.contains("- **bio:** Analyst\n"));
        assert!(!readme.contains("accent"));
        assert!(readme.contains("Built from the Portfolio template with sitestudio."));
        assert_eq!(bundle.files().len(), 2);
    }

    #[test]
    fn test_prepare_keeps_shipped_readme() {
        let mut shipped = files();
        shipped.insert(TemplateFile::new("readme.md", "mine"));
        let bundle =
            ExportBundle::prepare(shipped, &AnswerSet::new(), &config(), &ExportSettings::default()).unwrap();
        assert_eq!(bundle.files().len(), 2);
        assert!(bundle.files().get(README_PATH).is_none());
    }

    #[test]
    fn test_prepare_respects_disabled_readme() {
        let settings = ExportSettings {
            generate_readme: false,
            ..ExportSettings::default()
        };
        let bundle = ExportBundle::prepare(files(), &AnswerSet::new(), &config(), &settings).unwrap();
        assert_eq!(bundle.files(), &files());
    }

    #[test]
    fn test_description_fallbacks() {
        let settings = ExportSettings::default();
        let both: AnswerSet = [("bio", "Bio"), ("description", "Desc")].into_iter().collect();
        assert_eq!(repository_description(&both, &settings), "Bio");
        let desc: AnswerSet = [("bio", " "), ("description", "Desc")].into_iter().collect();
        assert_eq!(repository_description(&desc, &settings), "Desc");
        assert_eq!(
            repository_description(&AnswerSet::new(), &settings),
            settings.default_description
        );
    }

    #[test]
    fn test_suggest_repository_name() {
        let answers: AnswerSet = [("name", "Ada's Cool Site")].into_iter().collect();
        assert_eq!(suggest_repository_name(&answers).as_deref(), Some("ada-s-cool-site"));
        assert_eq!(suggest_repository_name(&AnswerSet::new()), None);
    }
}
