use log::{debug, warn};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

use crate::schema::AnswerSet;

#[derive(Error, Debug)]
pub enum DraftError {
    #[error("Failed to access draft: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode draft: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-template storage of in-progress answers.
pub trait DraftStore: Send + Sync {
    fn save_draft(&self, template_id: &str, answers: &AnswerSet) -> Result<(), DraftError>;
    fn get_draft(&self, template_id: &str) -> Result<Option<AnswerSet>, DraftError>;
    fn clear_draft(&self, template_id: &str) -> Result<(), DraftError>;
}

#[derive(Default)]
pub struct MemoryDraftStore {
    drafts: Mutex<HashMap<String, AnswerSet>>,
    writes: Mutex<usize>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save_draft` calls so far.
    pub fn write_count(&self) -> usize {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DraftStore for MemoryDraftStore {
    fn save_draft(&self, template_id: &str, answers: &AnswerSet) -> Result<(), DraftError> {
        *self.writes.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        let mut drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
        drafts.insert(template_id.to_string(), answers.clone());
        Ok(())
    }

    fn get_draft(&self, template_id: &str) -> Result<Option<AnswerSet>, DraftError> {
        let drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
        Ok(drafts.get(template_id).cloned())
    }

    fn clear_draft(&self, template_id: &str) -> Result<(), DraftError> {
        let mut drafts = self.drafts.lock().unwrap_or_else(|e| e.into_inner());
        drafts.remove(template_id);
        Ok(())
    }
}

/// One `<template id>.json` file per draft.
pub struct FileDraftStore {
    dir: PathBuf,
}

impl FileDraftStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, template_id: &str) -> PathBuf {
        let safe: String = template_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl DraftStore for FileDraftStore {
    fn save_draft(&self, template_id: &str, answers: &AnswerSet) -> Result<(), DraftError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(template_id);
        fs::write(&path, serde_json::to_string_pretty(answers)?)?;
        debug!("Saved draft {:?}", path);
        Ok(())
    }

    fn get_draft(&self, template_id: &str) -> Result<Option<AnswerSet>, DraftError> {
        let path = self.path_for(template_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        match serde_json::from_str(&content) {
            Ok(answers) => Ok(Some(answers)),
            Err(e) => {
                warn!("Ignoring unreadable draft {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    fn clear_draft(&self, template_id: &str) -> Result<(), DraftError> {
        let path = self.path_for(template_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
