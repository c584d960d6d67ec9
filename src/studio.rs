//! Editor session: one form session and one preview for the selected
//! template, with export of the current answers.

use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::archive::export_archive;
use crate::config::StudioConfig;
use crate::drafts::DraftStore;
use crate::export::{ExportArtifact, ExportBundle, ExportError};
use crate::files::{RenderedFileSet, TemplateFileSet};
use crate::loader::TemplateContent;
use crate::preview::{PreviewScheduler, TargetHost};
use crate::remote::RemoteExporter;
use crate::render::render_file_set;
use crate::scheduler::Clock;
use crate::schema::{AnswerSet, AnswerValue, ValidationErrors, ValueError};
use crate::session::FormSession;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("No template selected")]
    NoTemplate,
    #[error("Template content has not been loaded")]
    NotLoaded,
    #[error("The form has {} invalid field(s)", .0.len())]
    Invalid(ValidationErrors),
    #[error(transparent)]
    Export(#[from] ExportError),
}

pub struct Studio<H: TargetHost> {
    form: FormSession,
    preview: PreviewScheduler<H>,
    files: Option<Arc<TemplateFileSet>>,
    config: StudioConfig,
}

impl<H: TargetHost> Studio<H> {
    pub fn new(config: StudioConfig, drafts: Arc<dyn DraftStore>, clock: Arc<dyn Clock>, host: H) -> Self {
        Self {
            form: FormSession::new(drafts, clock.clone(), &config.form),
            preview: PreviewScheduler::new(host, clock, &config.preview),
            files: None,
            config,
        }
    }

    pub fn select_template(&mut self, template_id: &str) {
        info!("Selected template '{}'", template_id);
        self.form.select_template(template_id);
        self.preview.open(template_id);
        self.files = None;
    }

    /// Installs fetched content. Content for a template that is no longer
    /// selected is dropped.
    pub fn content_loaded(&mut self, template_id: &str, content: TemplateContent) -> bool {
        if self.form.template_id() != Some(template_id) {
            debug!("Dropping content for '{}', no longer selected", template_id);
            return false;
        }
        self.form.apply_config(Arc::new(content.config));
        let files = Arc::new(content.files);
        self.files = Some(files.clone());
        self.preview.files_changed(files, &self.form.effective_answers());
        true
    }

    pub fn update_field(&mut self, name: &str, value: impl Into<AnswerValue>) -> Result<(), ValueError> {
        self.form.update_field(name, value)
    }

    pub fn update_fields(&mut self, partial: &AnswerSet) -> Result<(), ValueError> {
        self.form.update_fields(partial)
    }

    pub fn update_field_immediate(&mut self, name: &str, value: impl Into<AnswerValue>) -> Result<(), ValueError> {
        self.form.update_field_immediate(name, value)?;
        self.preview.answers_changed(self.form.answers());
        Ok(())
    }

    pub fn update_fields_immediate(&mut self, partial: &AnswerSet) -> Result<(), ValueError> {
        self.form.update_fields_immediate(partial)?;
        self.preview.answers_changed(self.form.answers());
        Ok(())
    }

    pub fn reset_form(&mut self) {
        self.form.reset_form();
        self.preview.answers_changed(self.form.answers());
    }

    /// Advances both timers. Returns true when a preview render started.
    pub fn tick(&mut self) -> bool {
        if self.form.flush_due() {
            self.preview.answers_changed(self.form.answers());
        }
        self.preview.tick()
    }

    /// Time until the next scheduled flush or render, if any.
    pub fn next_deadline(&self) -> Option<Duration> {
        match (self.form.next_flush_in(), self.preview.next_update_in()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Current files rendered with the latest answers, pending writes
    /// included.
    pub fn rendered_files(&self) -> Option<RenderedFileSet> {
        let files = self.files.as_ref()?;
        Some(render_file_set(files, &self.form.effective_answers()))
    }

    /// Submits the form and prepares the rendered files for export.
    pub fn export_bundle(&mut self) -> Result<ExportBundle, StudioError> {
        if self.form.template_id().is_none() {
            return Err(StudioError::NoTemplate);
        }
        let (Some(files), Some(template)) = (self.files.clone(), self.form.config().cloned()) else {
            return Err(StudioError::NotLoaded);
        };
        let before = self.form.revision();
        let submitted = self.form.submit();
        if self.form.revision() != before {
            self.preview.answers_changed(self.form.answers());
        }
        let answers = submitted.map_err(StudioError::Invalid)?;
        let rendered = render_file_set(&files, &answers);
        Ok(ExportBundle::prepare(rendered, &answers, &template, &self.config.export)?)
    }

    /// Name falls back to the `name` answer, then the configured default.
    pub fn export_archive(&mut self, name: Option<&str>) -> Result<ExportArtifact, StudioError> {
        let bundle = self.export_bundle()?;
        let name = name
            .map(str::to_string)
            .or_else(|| bundle.suggested_name())
            .unwrap_or_else(|| self.config.export.default_archive_name.clone());
        Ok(ExportArtifact::Archive(export_archive(bundle.files(), &name)?))
    }

    pub async fn export_remote(
        &mut self,
        exporter: &RemoteExporter,
        repo_name: Option<&str>,
        description: Option<&str>,
    ) -> Result<ExportArtifact, StudioError> {
        let bundle = self.export_bundle()?;
        let repo_name = repo_name
            .map(str::to_string)
            .or_else(|| bundle.suggested_name())
            .unwrap_or_default();
        let description = description
            .map(str::to_string)
            .unwrap_or_else(|| bundle.description(&self.config.export));
        let repository = exporter
            .export_to_remote(bundle.files(), &repo_name, &description)
            .await?;
        Ok(ExportArtifact::Repository(repository))
    }

    pub fn form(&self) -> &FormSession {
        &self.form
    }

    pub fn form_mut(&mut self) -> &mut FormSession {
        &mut self.form
    }

    pub fn preview(&self) -> &PreviewScheduler<H> {
        &self.preview
    }

    pub fn preview_mut(&mut self) -> &mut PreviewScheduler<H> {
        &mut self.preview
    }
}
