use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One template source file. `path` is relative to the template root and
/// uses `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
}

impl TemplateFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    pub fn has_extension(&self, ext: &str) -> bool {
        self.file_name()
            .rsplit_once('.')
            .is_some_and(|(_, e)| e.eq_ignore_ascii_case(ext))
    }
}

/// Files of a template keyed by path. Iteration is ordered by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateFileSet {
    files: BTreeMap<String, TemplateFile>,
}

impl TemplateFileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file, replacing any file with the same path.
    pub fn insert(&mut self, file: TemplateFile) -> Option<TemplateFile> {
        self.files.insert(file.path.clone(), file)
    }

    pub fn get(&self, path: &str) -> Option<&TemplateFile> {
        self.files.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FromIterator<TemplateFile> for TemplateFileSet {
    fn from_iter<I: IntoIterator<Item = TemplateFile>>(iter: I) -> Self {
        let mut set = Self::new();
        for file in iter {
            set.insert(file);
        }
        set
    }
}

/// Output of rendering a [`TemplateFileSet`]: same paths, substituted content.
/// Never persisted.
pub type RenderedFileSet = TemplateFileSet;
