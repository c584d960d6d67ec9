use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::catalog::TemplateDescriptor;
use crate::files::{TemplateFile, TemplateFileSet};
use crate::schema::{SchemaError, TemplateConfig};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Template config not found: {0}")]
    NotFound(String),
    #[error("Malformed template config: {0}")]
    Malformed(String),
    #[error("Template '{id}' has unsupported type '{kind}': only html templates can be rendered")]
    UnsupportedTemplateType { id: String, kind: String },
    #[error("Failed to fetch template content: {0}")]
    Fetch(String),
}

impl From<SchemaError> for LoadError {
    fn from(e: SchemaError) -> Self {
        LoadError::Malformed(e.to_string())
    }
}

/// Form definition and source files of one template, fetched and cached
/// together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub config: TemplateConfig,
    pub files: TemplateFileSet,
}

/// Parses a config document, choosing YAML or JSON by file name.
pub fn parse_config_document(file_name: &str, content: &str) -> Result<TemplateConfig, LoadError> {
    let config = if file_name.ends_with(".yaml") || file_name.ends_with(".yml") {
        TemplateConfig::from_yaml(content)?
    } else {
        TemplateConfig::from_json(content)?
    };
    Ok(config)
}

/// Fetches template content for a descriptor.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch(&self, descriptor: &TemplateDescriptor) -> Result<TemplateContent, LoadError>;
}

/// Cache consulted before a fetch and written after a successful one.
pub trait TemplateCache: Send + Sync {
    fn get_cached(&self, id: &str) -> Option<TemplateContent>;
    fn set_cached(&self, id: &str, content: TemplateContent);
}

#[derive(Default)]
pub struct MemoryTemplateCache {
    entries: Mutex<HashMap<String, TemplateContent>>,
}

impl MemoryTemplateCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateCache for MemoryTemplateCache {
    fn get_cached(&self, id: &str) -> Option<TemplateContent> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(id).cloned()
    }

    fn set_cached(&self, id: &str, content: TemplateContent) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(id.to_string(), content);
    }
}

/// Cache-first template loading.
pub struct TemplateLoader {
    source: Arc<dyn TemplateSource>,
    cache: Option<Arc<dyn TemplateCache>>,
}

impl TemplateLoader {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn TemplateCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub async fn load(&self, descriptor: &TemplateDescriptor) -> Result<TemplateContent, LoadError> {
        descriptor.ensure_supported()?;
        if let Some(cache) = &self.cache {
            if let Some(content) = cache.get_cached(descriptor.id()) {
                debug!("Template '{}' served from cache", descriptor.id());
                return Ok(content);
            }
        }
        let content = self.source.fetch(descriptor).await?;
        info!(
            "Loaded template '{}': {} steps, {} files",
            descriptor.id(),
            content.config.step_count(),
            content.files.len()
        );
        if let Some(cache) = &self.cache {
            cache.set_cached(descriptor.id(), content.clone());
        }
        Ok(content)
    }

    pub async fn load_config(&self, descriptor: &TemplateDescriptor) -> Result<TemplateConfig, LoadError> {
        Ok(self.load(descriptor).await?.config)
    }
}

/// `path` relative to `root` with `/` separators, if it lies inside `root`.
/// Falls back to a lexical comparison when either path cannot be resolved.
pub fn path_within(root: &Path, path: &Path) -> Option<String> {
    let resolved = match (root.canonicalize(), path.canonicalize()) {
        (Ok(root), Ok(path)) => path.strip_prefix(&root).map(Path::to_path_buf).ok(),
        _ => None,
    };
    let relative = resolved.or_else(|| path.strip_prefix(root).map(Path::to_path_buf).ok())?;
    let parts: Vec<_> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Reads templates from `<root>/<descriptor.folder>` on disk.
pub struct LocalTemplateSource {
    root: PathBuf,
    config_file: String,
    excluded: Vec<String>,
}

impl LocalTemplateSource {
    pub fn new(root: impl Into<PathBuf>, config_file: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            config_file: config_file.into(),
            excluded: Vec::new(),
        }
    }

    /// Paths, relative to the template folder, that are never shipped as
    /// template files.
    pub fn with_excluded<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded
            .extend(paths.into_iter().map(|p| p.into().replace('\\', "/")));
        self
    }

    pub fn read(&self, descriptor: &TemplateDescriptor) -> Result<TemplateContent, LoadError> {
        let dir = self.root.join(descriptor.folder());
        if !dir.is_dir() {
            error!("Template folder does not exist: {:?}", dir);
            return Err(LoadError::NotFound(format!("{:?}", dir)));
        }
        let config_path = dir.join(&self.config_file);
        let config_text = fs::read_to_string(&config_path)
            .map_err(|e| LoadError::NotFound(format!("{:?}: {}", config_path, e)))?;
        let config = parse_config_document(&self.config_file, &config_text)?;

        let mut files = TemplateFileSet::new();
        self.collect_files(&dir, "", &mut files)?;
        Ok(TemplateContent { config, files })
    }

    fn collect_files(&self, dir: &Path, prefix: &str, files: &mut TemplateFileSet) -> Result<(), LoadError> {
        for entry in fs::read_dir(dir).map_err(|e| {
            error!("Failed to read directory: {:?}", dir);
            LoadError::Fetch(e.to_string())
        })? {
            let entry = entry.map_err(|e| {
                error!("Failed to read directory entry: {:?}", dir);
                LoadError::Fetch(e.to_string())
            })?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let relative = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if path.is_dir() {
                self.collect_files(&path, &relative, files)?;
            } else if prefix.is_empty() && name == self.config_file {
                continue;
            } else if self.excluded.contains(&relative) {
                debug!("Excluding {} from template files", relative);
                continue;
            } else {
                match fs::read_to_string(&path) {
                    Ok(content) => {
                        files.insert(TemplateFile::new(relative, content));
                    }
                    Err(e) => warn!("Skipping non-text template file {:?}: {}", path, e),
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TemplateSource for LocalTemplateSource {
    async fn fetch(&self, descriptor: &TemplateDescriptor) -> Result<TemplateContent, LoadError> {
        self.read(descriptor)
    }
}
