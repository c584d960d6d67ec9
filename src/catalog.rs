use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::loader::LoadError;

/// The only template type the renderer knows how to preview and export.
pub const SUPPORTED_TEMPLATE_TYPE: &str = "html";

/// Catalog entry describing where a template lives. Read-only once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDescriptor {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    category: String,
    #[serde(rename = "type", default = "default_type")]
    kind: String,
    #[serde(default)]
    repo_url: String,
    #[serde(default = "default_branch")]
    branch: String,
    #[serde(default)]
    folder: String,
    #[serde(default)]
    featured: bool,
    #[serde(default = "default_enabled")]
    enabled: bool,
    #[serde(default)]
    tags: Vec<String>,
}

fn default_type() -> String {
    SUPPORTED_TEMPLATE_TYPE.to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Owner and name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl TemplateDescriptor {
    /// Descriptor for a template that lives in a local folder.
    pub fn local(id: impl Into<String>, folder: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: None,
            category: String::new(),
            kind: default_type(),
            repo_url: String::new(),
            branch: default_branch(),
            folder: folder.into(),
            featured: false,
            enabled: true,
            tags: Vec::new(),
        }
    }

    /// Same descriptor with another template type.
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_repo_url(mut self, repo_url: impl Into<String>) -> Self {
        self.repo_url = repo_url.into();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    /// Template type, `html` unless the catalog says otherwise.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Folder inside the repository or local root.
    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn featured(&self) -> bool {
        self.featured
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn ensure_supported(&self) -> Result<(), LoadError> {
        if self.kind == SUPPORTED_TEMPLATE_TYPE {
            Ok(())
        } else {
            Err(LoadError::UnsupportedTemplateType {
                id: self.id.clone(),
                kind: self.kind.clone(),
            })
        }
    }

    /// Parses `repo_url` of the form `https://github.com/<owner>/<repo>[.git]`.
    pub fn repository(&self) -> Option<RepositoryRef> {
        let url = reqwest::Url::parse(&self.repo_url).ok()?;
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let owner = segments.next()?.to_string();
        let name = segments.next()?;
        let name = name.strip_suffix(".git").unwrap_or(name).to_string();
        Some(RepositoryRef { owner, name })
    }
}

/// Category/type filter where `"all"` matches anything.
#[derive(Debug, Clone)]
pub struct CatalogFilter {
    pub category: String,
    pub kind: String,
}

impl Default for CatalogFilter {
    fn default() -> Self {
        Self {
            category: "all".to_string(),
            kind: "all".to_string(),
        }
    }
}

impl CatalogFilter {
    fn matches(&self, template: &TemplateDescriptor) -> bool {
        let category = self.category == "all" || template.category == self.category;
        let kind = self.kind == "all" || template.kind == self.kind;
        category && kind
    }
}

#[derive(Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    templates: Vec<TemplateDescriptor>,
}

/// Ordered list of enabled templates.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    templates: Vec<TemplateDescriptor>,
}

impl Catalog {
    pub fn new(templates: Vec<TemplateDescriptor>) -> Self {
        Self {
            templates: templates.into_iter().filter(|t| t.enabled).collect(),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, LoadError> {
        let doc: CatalogDocument =
            serde_json::from_str(content).map_err(|e| LoadError::Malformed(e.to_string()))?;
        Ok(Self::new(doc.templates))
    }

    pub fn from_yaml(content: &str) -> Result<Self, LoadError> {
        let doc: CatalogDocument =
            serde_yaml::from_str(content).map_err(|e| LoadError::Malformed(e.to_string()))?;
        Ok(Self::new(doc.templates))
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LoadError::NotFound(format!("{:?}: {}", path, e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn templates(&self) -> &[TemplateDescriptor] {
        &self.templates
    }

    pub fn get(&self, id: &str) -> Option<&TemplateDescriptor> {
        self.templates.iter().find(|t| t.id == id)
    }

    pub fn filtered(&self, filter: &CatalogFilter) -> Vec<&TemplateDescriptor> {
        self.templates.iter().filter(|t| filter.matches(t)).collect()
    }

    pub fn featured(&self) -> Vec<&TemplateDescriptor> {
        self.templates.iter().filter(|t| t.featured).collect()
    }

    pub fn by_category(&self, category: &str) -> Vec<&TemplateDescriptor> {
        self.templates
            .iter()
            .filter(|t| t.category == category)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CATALOG: &str = r#"
{
  "templates": [
    { "id": "portfolio", "name": "Portfolio", "category": "personal", "type": "html",
      "repoUrl": "https://github.com/acme/templates", "branch": "main", "folder": "portfolio",
      "featured": true, "enabled": true },
    { "id": "blog", "name": "Blog", "category": "content", "type": "react",
      "repoUrl": "https://github.com/acme/templates.git", "folder": "blog", "enabled": true },
    { "id": "legacy", "name": "Legacy", "category": "personal", "type": "html", "enabled": false }
  ]
}
"#;

    #[test]
    fn test_disabled_templates_are_dropped() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let ids: Vec<_> = catalog.templates().iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["portfolio", "blog"]);
        assert!(catalog.get("legacy").is_none());
    }

    #[test]
    fn test_filters() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        assert_eq!(catalog.filtered(&CatalogFilter::default()).len(), 2);
        let html_only = CatalogFilter {
            kind: "html".to_string(),
            ..CatalogFilter::default()
        };
        assert_eq!(catalog.filtered(&html_only)[0].id(), "portfolio");
        assert_eq!(catalog.featured().len(), 1);
        assert_eq!(catalog.by_category("content")[0].id(), "blog");
    }

    #[test]
    fn test_unsupported_type() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        assert!(catalog.get("portfolio").unwrap().ensure_supported().is_ok());
        let err = catalog.get("blog").unwrap().ensure_supported().unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedTemplateType { kind, .. } if kind == "react"));
    }

    #[test]
    fn test_repository_ref() {
        let catalog = Catalog::from_json(CATALOG).unwrap();
        let repo = catalog.get("blog").unwrap().repository().unwrap();
        assert_eq!(repo.owner, "acme");
        assert_eq!(repo.name, "templates");
        assert!(TemplateDescriptor::local("x", "x").repository().is_none());
    }

    #[test]
    fn test_builders_return_new_descriptors() {
        let base = TemplateDescriptor::local("site", "site");
        let remote = base
            .clone()
            .with_kind("nextjs")
            .with_repo_url("https://github.com/acme/sites")
            .with_branch("dev");
        assert_eq!(base.kind(), "html");
        assert_eq!(base.branch(), "main");
        assert_eq!(remote.kind(), "nextjs");
        assert_eq!(remote.branch(), "dev");
        assert_eq!(remote.repository().unwrap().name, "sites");
        assert_eq!(remote.id(), "site");
        assert!(remote.enabled());
        assert!(remote.tags().is_empty());
        assert_eq!(remote.description(), None);
    }
}
