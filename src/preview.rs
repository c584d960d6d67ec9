//! Keeps an isolated preview of the rendered site in step with the form.
//!
//! Structural changes (a new file set) render immediately. Answer edits are
//! debounced: only the latest answer set is rendered once the window passes
//! without another edit. Every render mounts a fresh [`PreviewTarget`]; the
//! previous one is released only after the host confirms the new one loaded,
//! and a failed render leaves the last good target on screen.

use log::{debug, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::PreviewSettings;
use crate::files::TemplateFileSet;
use crate::render::{compose_with_entry, RenderError};
use crate::scheduler::{Clock, DebounceTimer};
use crate::schema::AnswerSet;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PreviewError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Failed to mount preview: {0}")]
    Mount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewState {
    Idle,
    Rendering,
    Ready,
    Error,
}

/// Handle to one mounted preview document. Owned by the scheduler and given
/// back to its host exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct PreviewTarget {
    handle: String,
    template_id: String,
    generation: u64,
}

impl PreviewTarget {
    pub fn new(handle: impl Into<String>, template_id: impl Into<String>, generation: u64) -> Self {
        Self {
            handle: handle.into(),
            template_id: template_id.into(),
            generation,
        }
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn template_id(&self) -> &str {
        &self.template_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn dispose<H: TargetHost + ?Sized>(self, host: &mut H) {
        host.release(self);
    }
}

/// Creates and releases isolated render targets.
pub trait TargetHost {
    fn mount(&mut self, template_id: &str, generation: u64, document: &str) -> Result<PreviewTarget, String>;
    fn release(&mut self, target: PreviewTarget);
}

/// Keeps mounted documents in memory under `blob:preview/<uuid>` handles.
#[derive(Debug, Default)]
pub struct MemoryTargetHost {
    documents: HashMap<String, String>,
    mounted: usize,
    released: usize,
}

impl MemoryTargetHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, handle: &str) -> Option<&str> {
        self.documents.get(handle).map(String::as_str)
    }

    pub fn live_count(&self) -> usize {
        self.documents.len()
    }

    pub fn mounted_count(&self) -> usize {
        self.mounted
    }

    pub fn released_count(&self) -> usize {
        self.released
    }
}

impl TargetHost for MemoryTargetHost {
    fn mount(&mut self, template_id: &str, generation: u64, document: &str) -> Result<PreviewTarget, String> {
        let handle = format!("blob:preview/{}", uuid::Uuid::new_v4());
        self.documents.insert(handle.clone(), document.to_string());
        self.mounted += 1;
        Ok(PreviewTarget::new(handle, template_id, generation))
    }

    fn release(&mut self, target: PreviewTarget) {
        if self.documents.remove(target.handle()).is_none() {
            warn!("Released unknown preview target {}", target.handle());
        }
        self.released += 1;
    }
}

pub struct PreviewScheduler<H: TargetHost> {
    host: H,
    template_id: Option<String>,
    files: Option<Arc<TemplateFileSet>>,
    answers: AnswerSet,
    debounce: DebounceTimer<AnswerSet>,
    delay: Duration,
    entry_file: String,
    active: Option<PreviewTarget>,
    pending: Option<PreviewTarget>,
    generation: u64,
    renders: u64,
    state: PreviewState,
    last_error: Option<PreviewError>,
}

impl<H: TargetHost> PreviewScheduler<H> {
    pub fn new(host: H, clock: Arc<dyn Clock>, settings: &PreviewSettings) -> Self {
        Self {
            host,
            template_id: None,
            files: None,
            answers: AnswerSet::new(),
            debounce: DebounceTimer::new(clock),
            delay: settings.debounce(),
            entry_file: settings.entry_file.clone(),
            active: None,
            pending: None,
            generation: 0,
            renders: 0,
            state: PreviewState::Idle,
            last_error: None,
        }
    }

    /// Starts previewing another template, releasing every target of the
    /// previous one.
    pub fn open(&mut self, template_id: &str) {
        self.close();
        self.template_id = Some(template_id.to_string());
    }

    pub fn close(&mut self) {
        self.debounce.cancel_pending();
        if let Some(target) = self.pending.take() {
            target.dispose(&mut self.host);
        }
        if let Some(target) = self.active.take() {
            target.dispose(&mut self.host);
        }
        self.template_id = None;
        self.files = None;
        self.answers = AnswerSet::new();
        self.state = PreviewState::Idle;
        self.last_error = None;
    }

    /// A new or updated file set renders right away with `answers`. An
    /// identical file set is not a change.
    pub fn files_changed(&mut self, files: Arc<TemplateFileSet>, answers: &AnswerSet) -> bool {
        if self.files.as_deref() == Some(files.as_ref()) {
            return false;
        }
        self.files = Some(files);
        self.answers = answers.clone();
        self.debounce.cancel_pending();
        self.recompute(answers.clone());
        true
    }

    /// Schedules a render of `answers` after the debounce window, replacing
    /// any render still waiting.
    pub fn answers_changed(&mut self, answers: &AnswerSet) {
        self.answers = answers.clone();
        if self.files.is_none() {
            return;
        }
        if self.debounce.schedule(self.delay, answers.clone()).is_some() {
            debug!("Superseded pending preview update");
        }
    }

    /// Runs the debounced render once its window has passed.
    pub fn tick(&mut self) -> bool {
        match self.debounce.poll() {
            Some(answers) => {
                self.recompute(answers);
                true
            }
            None => false,
        }
    }

    /// Re-renders the latest answers after a failure.
    pub fn retry(&mut self) -> bool {
        if self.state != PreviewState::Error {
            return false;
        }
        self.debounce.cancel_pending();
        self.recompute(self.answers.clone());
        true
    }

    fn recompute(&mut self, answers: AnswerSet) {
        let (Some(template_id), Some(files)) = (self.template_id.clone(), self.files.clone()) else {
            return;
        };
        self.generation += 1;
        self.renders += 1;
        self.state = PreviewState::Rendering;
        if let Some(stale) = self.pending.take() {
            debug!("Releasing superseded preview {}", stale.handle());
            stale.dispose(&mut self.host);
        }

        let document = match compose_with_entry(&files, &answers, &self.entry_file) {
            Ok(document) => document,
            Err(e) => return self.fail(e.into()),
        };
        match self.host.mount(&template_id, self.generation, &document) {
            Ok(target) => self.pending = Some(target),
            Err(e) => self.fail(PreviewError::Mount(e)),
        }
    }

    fn fail(&mut self, error: PreviewError) {
        warn!("Preview render failed: {}", error);
        self.state = PreviewState::Error;
        self.last_error = Some(error);
    }

    /// Called by the host once the target of `generation` finished loading.
    /// Confirmations for superseded renders or another template are ignored.
    pub fn target_loaded(&mut self, generation: u64) -> bool {
        let current = match &self.pending {
            Some(target) => {
                target.generation() == generation
                    && self.template_id.as_deref() == Some(target.template_id())
            }
            None => false,
        };
        if !current {
            debug!("Ignoring stale preview confirmation for generation {}", generation);
            return false;
        }
        let Some(target) = self.pending.take() else {
            return false;
        };
        if let Some(previous) = self.active.replace(target) {
            previous.dispose(&mut self.host);
        }
        self.state = PreviewState::Ready;
        self.last_error = None;
        true
    }

    pub fn state(&self) -> PreviewState {
        self.state
    }

    pub fn last_error(&self) -> Option<&PreviewError> {
        self.last_error.as_ref()
    }

    pub fn active_target(&self) -> Option<&PreviewTarget> {
        self.active.as_ref()
    }

    pub fn pending_target(&self) -> Option<&PreviewTarget> {
        self.pending.as_ref()
    }

    pub fn has_pending_update(&self) -> bool {
        self.debounce.has_pending()
    }

    pub fn next_update_in(&self) -> Option<Duration> {
        self.debounce.remaining()
    }

    /// Number of renders started so far.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::TemplateFile;
    use crate::scheduler::VirtualClock;

    fn files(entry: &str) -> Arc<TemplateFileSet> {
        Arc::new(
            vec![
                TemplateFile::new("index.html", entry),
                TemplateFile::new("style.css", "h1 { color: {accent|black}; }"),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn named(name: &str) -> AnswerSet {
        [("name", name)].into_iter().collect()
    }

    fn scheduler() -> (VirtualClock, PreviewScheduler<MemoryTargetHost>) {
        let clock = VirtualClock::new();
        let mut preview = PreviewScheduler::new(
            MemoryTargetHost::new(),
            Arc::new(clock.clone()),
            &PreviewSettings::default(),
        );
        preview.open("portfolio");
        (clock, preview)
    }

    fn active_document(preview: &PreviewScheduler<MemoryTargetHost>) -> String {
        let handle = preview.active_target().unwrap().handle();
        preview.host().document(handle).unwrap().to_string()
    }

    fn load_pending(preview: &mut PreviewScheduler<MemoryTargetHost>) {
        let generation = preview.pending_target().unwrap().generation();
        assert!(preview.target_loaded(generation));
    }

    #[test]
    fn test_file_set_renders_immediately() {
        let (_clock, mut preview) = scheduler();
        assert_eq!(preview.state(), PreviewState::Idle);
        assert!(preview.files_changed(files("<body>Hello {name}!</body>"), &named("World")));
        assert_eq!(preview.state(), PreviewState::Rendering);
        assert_eq!(preview.render_count(), 1);

        load_pending(&mut preview);
        assert_eq!(preview.state(), PreviewState::Ready);
        let doc = active_document(&preview);
        assert!(doc.contains("Hello World!"));
        assert!(doc.contains("color: black"));
    }

    #[test]
    fn test_identical_file_set_is_not_a_change() {
        let (_clock, mut preview) = scheduler();
        preview.files_changed(files("x"), &named("a"));
        assert!(!preview.files_changed(files("x"), &named("a")));
        assert_eq!(preview.render_count(), 1);
    }

    #[test]
    fn test_rapid_answer_changes_render_once_with_latest() {
        let (clock, mut preview) = scheduler();
        preview.files_changed(files("Hello {name}!"), &named("World"));
        load_pending(&mut preview);

        preview.answers_changed(&named("Ad"));
        clock.advance_ms(300);
        preview.answers_changed(&named("Ada"));
        clock.advance_ms(799);
        assert!(!preview.tick());
        assert_eq!(preview.render_count(), 1);

        clock.advance_ms(1);
        assert!(preview.tick());
        assert!(!preview.tick());
        assert_eq!(preview.render_count(), 2);
        load_pending(&mut preview);
        let doc = active_document(&preview);
        assert!(doc.contains("Hello Ada!"));
        assert!(!doc.contains("Hello Ad!"));
    }

    #[test]
    fn test_previous_target_released_only_after_new_one_loads() {
        let (clock, mut preview) = scheduler();
        preview.files_changed(files("{name}"), &named("one"));
        load_pending(&mut preview);
        let first = preview.active_target().unwrap().handle().to_string();

        preview.answers_changed(&named("two"));
        clock.advance_ms(800);
        preview.tick();
        assert_eq!(preview.host().live_count(), 2);
        assert_eq!(preview.active_target().unwrap().handle(), first);

        load_pending(&mut preview);
        assert_eq!(preview.host().live_count(), 1);
        assert!(preview.host().document(&first).is_none());
        assert_eq!(preview.host().released_count(), 1);
    }

    #[test]
    fn test_superseded_render_is_released_and_its_confirmation_ignored() {
        let (_clock, mut preview) = scheduler();
        preview.files_changed(files("{name}"), &named("one"));
        let stale = preview.pending_target().unwrap().generation();

        preview.files_changed(files("<p>{name}</p>"), &named("one"));
        assert_eq!(preview.host().released_count(), 1);
        assert_eq!(preview.host().live_count(), 1);
        assert!(!preview.target_loaded(stale));
        assert_eq!(preview.state(), PreviewState::Rendering);

        load_pending(&mut preview);
        assert_eq!(active_document(&preview), "<style data-source=\"style.css\">\nh1 { color: black; }\n</style>\n<p>one</p>");
    }

    #[test]
    fn test_failed_render_keeps_last_good_preview() {
        let (_clock, mut preview) = scheduler();
        preview.files_changed(files("Hello {name}!"), &named("Ada"));
        load_pending(&mut preview);
        let good = preview.active_target().unwrap().handle().to_string();

        let broken: Arc<TemplateFileSet> =
            Arc::new(vec![TemplateFile::new("about.html", "x")].into_iter().collect());
        preview.files_changed(broken, &named("Ada"));
        assert_eq!(preview.state(), PreviewState::Error);
        assert!(matches!(
            preview.last_error(),
            Some(PreviewError::Render(RenderError::EntryFileMissing { .. }))
        ));
        assert_eq!(preview.active_target().unwrap().handle(), good);
        assert_eq!(preview.host().live_count(), 1);

        assert!(preview.retry());
        assert_eq!(preview.state(), PreviewState::Error);

        preview.files_changed(files("Fixed {name}"), &named("Ada"));
        load_pending(&mut preview);
        assert_eq!(preview.state(), PreviewState::Ready);
        assert!(preview.last_error().is_none());
        assert!(active_document(&preview).contains("Fixed Ada"));
    }

    #[test]
    fn test_answers_before_files_are_used_by_first_render() {
        let (_clock, mut preview) = scheduler();
        preview.answers_changed(&named("early"));
        assert!(!preview.has_pending_update());
        preview.files_changed(files("{name}"), &named("late"));
        load_pending(&mut preview);
        assert!(active_document(&preview).ends_with("late"));
    }

    #[test]
    fn test_switching_template_releases_everything() {
        let (clock, mut preview) = scheduler();
        preview.files_changed(files("{name}"), &named("one"));
        load_pending(&mut preview);
        preview.answers_changed(&named("two"));
        clock.advance_ms(800);
        preview.tick();
        let stale = preview.pending_target().unwrap().generation();

        preview.open("blog");
        assert_eq!(preview.host().live_count(), 0);
        assert_eq!(preview.host().mounted_count(), preview.host().released_count());
        assert!(!preview.target_loaded(stale));
        assert_eq!(preview.state(), PreviewState::Idle);
    }
}
