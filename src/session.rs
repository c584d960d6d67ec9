//! Form session: the single owner of the answer set of the selected template.
//!
//! Field writes are not applied one by one. They accumulate in a pending
//! batch that is committed once the coalescing window passes without a new
//! write, so a burst of keystrokes costs one answer-set transition and one
//! draft write. Callers drive commits through [`FormSession::flush_due`].

use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::FormSettings;
use crate::drafts::DraftStore;
use crate::scheduler::{Clock, DebounceTimer};
use crate::schema::{
    extract_defaults, merge_with_defaults, validate_all, validate_step, AnswerSet, AnswerValue,
    Predicates, Step, TemplateConfig, ValidationErrors, ValueError,
};

/// Outcome of a step navigation request.
#[derive(Debug, Clone, PartialEq)]
pub enum StepMove {
    Moved(usize),
    /// Already at the first or last step, or no config loaded.
    AtBoundary,
    /// The current step has invalid fields.
    Blocked(ValidationErrors),
}

pub struct FormSession {
    template_id: Option<String>,
    config: Option<Arc<TemplateConfig>>,
    answers: AnswerSet,
    current_step: usize,
    touched: HashSet<String>,
    errors: ValidationErrors,
    submitted: bool,
    pending: DebounceTimer<AnswerSet>,
    window: Duration,
    drafts: Arc<dyn DraftStore>,
    predicates: Predicates,
    revision: u64,
}

/// Keeps the values that fit their field kind. Names outside the config
/// pass through.
fn retype(config: &TemplateConfig, answers: &AnswerSet, what: &str) -> AnswerSet {
    let mut typed = AnswerSet::new();
    for (name, value) in answers.iter() {
        match config.coerce(name, value.clone()) {
            Ok(value) => typed.insert(name.clone(), value),
            Err(e) => warn!("Dropping {}: {}", what, e),
        }
    }
    typed
}

impl FormSession {
    pub fn new(drafts: Arc<dyn DraftStore>, clock: Arc<dyn Clock>, settings: &FormSettings) -> Self {
        Self {
            template_id: None,
            config: None,
            answers: AnswerSet::new(),
            current_step: 1,
            touched: HashSet::new(),
            errors: ValidationErrors::new(),
            submitted: false,
            pending: DebounceTimer::new(clock),
            window: settings.coalesce_window(),
            drafts,
            predicates: Predicates::default(),
            revision: 0,
        }
    }

    pub fn register_predicate(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&AnswerValue) -> bool + Send + Sync + 'static,
    ) {
        self.predicates.register(name, predicate);
    }

    /// Starts a session for a template, seeding answers from its draft.
    /// Pending writes of the previous template are committed first.
    pub fn select_template(&mut self, template_id: &str) {
        self.flush_now();
        let draft = match self.drafts.get_draft(template_id) {
            Ok(draft) => draft,
            Err(e) => {
                warn!("Failed to read draft for '{}': {}", template_id, e);
                None
            }
        };
        self.template_id = Some(template_id.to_string());
        self.config = None;
        self.answers = draft.unwrap_or_default();
        self.current_step = 1;
        self.touched.clear();
        self.errors.clear();
        self.submitted = false;
        self.revision += 1;
    }

    /// Fills every field the answers lack with its default and retypes
    /// draft values and queued writes to their field kinds.
    pub fn apply_config(&mut self, config: Arc<TemplateConfig>) {
        let existing = retype(&config, &self.answers, "stale answer");
        self.answers = merge_with_defaults(&extract_defaults(&config), &existing);
        self.current_step = self.current_step.clamp(1, config.step_count().max(1));

        let remaining = self.pending.remaining();
        if let Some(batch) = self.pending.cancel_pending() {
            let typed = retype(&config, &batch, "queued write");
            if !typed.is_empty() {
                self.pending.schedule(remaining.unwrap_or(self.window), typed);
            }
        }
        self.config = Some(config);
        self.revision += 1;
    }

    /// Queues a write. It becomes visible after the coalescing window.
    pub fn update_field(&mut self, name: &str, value: impl Into<AnswerValue>) -> Result<(), ValueError> {
        let value = self.coerce(name, value.into())?;
        let mut partial = AnswerSet::new();
        partial.insert(name, value);
        self.enqueue(partial);
        Ok(())
    }

    /// Queues several writes. Nothing is queued if any value has the wrong
    /// type.
    pub fn update_fields(&mut self, partial: &AnswerSet) -> Result<(), ValueError> {
        let typed = self.coerce_all(partial)?;
        self.enqueue(typed);
        Ok(())
    }

    /// Commits pending writes plus this one right away.
    pub fn update_field_immediate(&mut self, name: &str, value: impl Into<AnswerValue>) -> Result<(), ValueError> {
        let mut partial = AnswerSet::new();
        partial.insert(name, value.into());
        self.update_fields_immediate(&partial)
    }

    pub fn update_fields_immediate(&mut self, partial: &AnswerSet) -> Result<(), ValueError> {
        let typed = self.coerce_all(partial)?;
        let mut batch = self.pending.cancel_pending().unwrap_or_default();
        batch.overlay(&typed);
        self.clear_errors_for(&typed);
        self.commit(batch);
        Ok(())
    }

    /// Commits the pending batch if its window has elapsed.
    pub fn flush_due(&mut self) -> bool {
        match self.pending.poll() {
            Some(batch) => {
                self.commit(batch);
                true
            }
            None => false,
        }
    }

    /// Commits the pending batch regardless of the window.
    pub fn flush_now(&mut self) -> bool {
        match self.pending.cancel_pending() {
            Some(batch) => {
                self.commit(batch);
                true
            }
            None => false,
        }
    }

    fn coerce(&self, name: &str, value: AnswerValue) -> Result<AnswerValue, ValueError> {
        match &self.config {
            Some(config) => config.coerce(name, value),
            None => Ok(value),
        }
    }

    fn coerce_all(&self, partial: &AnswerSet) -> Result<AnswerSet, ValueError> {
        let mut typed = AnswerSet::new();
        for (name, value) in partial.iter() {
            typed.insert(name.clone(), self.coerce(name, value.clone())?);
        }
        Ok(typed)
    }

    fn enqueue(&mut self, partial: AnswerSet) {
        self.clear_errors_for(&partial);
        let mut batch = self.pending.cancel_pending().unwrap_or_default();
        batch.overlay(&partial);
        self.pending.schedule(self.window, batch);
    }

    fn clear_errors_for(&mut self, partial: &AnswerSet) {
        for (name, _) in partial.iter() {
            self.errors.remove(name);
        }
    }

    fn commit(&mut self, batch: AnswerSet) {
        if batch.is_empty() {
            return;
        }
        self.answers.overlay(&batch);
        self.revision += 1;
        debug!("Committed {} field(s), revision {}", batch.len(), self.revision);
        if let Some(id) = &self.template_id {
            if let Err(e) = self.drafts.save_draft(id, &self.answers) {
                warn!("Failed to save draft for '{}': {}", id, e);
            }
        }
    }

    /// Committed answers overlaid with writes still waiting in the batch.
    pub fn effective_answers(&self) -> AnswerSet {
        let mut answers = self.answers.clone();
        if let Some(batch) = self.pending.pending() {
            answers.overlay(batch);
        }
        answers
    }

    pub fn touch(&mut self, name: &str) {
        self.touched.insert(name.to_string());
    }

    pub fn is_touched(&self, name: &str) -> bool {
        self.touched.contains(name)
    }

    /// Error to show for a field: only once it was touched or the form was
    /// submitted.
    pub fn visible_error(&self, name: &str) -> Option<&str> {
        if self.submitted || self.touched.contains(name) {
            self.errors.get(name).map(String::as_str)
        } else {
            None
        }
    }

    pub fn is_field_valid(&self, name: &str) -> bool {
        !self.errors.contains_key(name)
    }

    pub fn errors(&self) -> &ValidationErrors {
        &self.errors
    }

    /// Validates one step against the latest answers and records the result
    /// for its fields.
    pub fn validate_step(&mut self, step_id: &str) -> ValidationErrors {
        let Some(config) = self.config.clone() else {
            return ValidationErrors::new();
        };
        let Some(step) = config.step(step_id) else {
            return ValidationErrors::new();
        };
        let found = validate_step(step, &self.effective_answers(), &self.predicates);
        for field in &step.fields {
            match found.get(&field.name) {
                Some(message) => self.errors.insert(field.name.clone(), message.clone()),
                None => self.errors.remove(&field.name),
            };
        }
        found
    }

    pub fn validate_all(&mut self) -> ValidationErrors {
        let found = match &self.config {
            Some(config) => validate_all(config, &self.effective_answers(), &self.predicates),
            None => ValidationErrors::new(),
        };
        self.errors = found.clone();
        found
    }

    pub fn advance_step(&mut self) -> StepMove {
        let count = self.step_count();
        if count == 0 || self.current_step >= count {
            return StepMove::AtBoundary;
        }
        let step_id = match self.current_step_def() {
            Some(step) => step.id.clone(),
            None => return StepMove::AtBoundary,
        };
        let errors = self.validate_step(&step_id);
        if !errors.is_empty() {
            return StepMove::Blocked(errors);
        }
        self.current_step += 1;
        StepMove::Moved(self.current_step)
    }

    pub fn retreat_step(&mut self) -> StepMove {
        if self.current_step <= 1 {
            return StepMove::AtBoundary;
        }
        self.current_step -= 1;
        StepMove::Moved(self.current_step)
    }

    /// Jumps to a 1-based step. Out-of-range targets are ignored.
    pub fn go_to_step(&mut self, step: usize) -> bool {
        if step >= 1 && step <= self.step_count() {
            self.current_step = step;
            true
        } else {
            false
        }
    }

    /// Commits pending writes, reveals every error and validates the whole
    /// form. Returns the answers to export when nothing is invalid.
    pub fn submit(&mut self) -> Result<AnswerSet, ValidationErrors> {
        self.flush_now();
        self.submitted = true;
        let errors = self.validate_all();
        if errors.is_empty() {
            Ok(self.answers.clone())
        } else {
            Err(errors)
        }
    }

    /// Drops pending writes and the draft, returning to defaults.
    pub fn reset_form(&mut self) {
        self.pending.cancel_pending();
        self.answers = match &self.config {
            Some(config) => extract_defaults(config),
            None => AnswerSet::new(),
        };
        self.touched.clear();
        self.errors.clear();
        self.submitted = false;
        self.revision += 1;
        if let Some(id) = &self.template_id {
            if let Err(e) = self.drafts.clear_draft(id) {
                warn!("Failed to clear draft for '{}': {}", id, e);
            }
        }
    }

    pub fn clear_template(&mut self) {
        self.pending.cancel_pending();
        self.template_id = None;
        self.config = None;
        self.answers = AnswerSet::new();
        self.current_step = 1;
        self.touched.clear();
        self.errors.clear();
        self.submitted = false;
        self.revision += 1;
    }

    pub fn template_id(&self) -> Option<&str> {
        self.template_id.as_deref()
    }

    pub fn config(&self) -> Option<&Arc<TemplateConfig>> {
        self.config.as_ref()
    }

    pub fn answers(&self) -> &AnswerSet {
        &self.answers
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn current_step_def(&self) -> Option<&Step> {
        self.config.as_ref()?.step_at(self.current_step)
    }

    pub fn step_count(&self) -> usize {
        self.config.as_ref().map_or(0, |c| c.step_count())
    }

    /// Number of answer-set transitions committed so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn has_pending_writes(&self) -> bool {
        self.pending.has_pending()
    }

    pub fn next_flush_in(&self) -> Option<Duration> {
        self.pending.remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drafts::MemoryDraftStore;
    use crate::scheduler::VirtualClock;

    const CONFIG: &str = r#"
{
  "steps": [
    { "id": "about", "title": "About", "fields": [
      { "name": "name", "label": "Name", "default": "World", "required": true },
      { "name": "age", "type": "number" }
    ]},
    { "id": "contact", "title": "Contact", "fields": [
      { "name": "email", "type": "email", "required": true }
    ]},
    { "id": "extras", "title": "Extras", "fields": [
      { "name": "hire_me", "type": "boolean" }
    ]}
  ]
}
"#;

    struct Fixture {
        clock: VirtualClock,
        drafts: Arc<MemoryDraftStore>,
        session: FormSession,
    }

    fn fixture() -> Fixture {
        let clock = VirtualClock::new();
        let drafts = Arc::new(MemoryDraftStore::new());
        let session = FormSession::new(
            drafts.clone(),
            Arc::new(clock.clone()),
            &FormSettings::default(),
        );
        Fixture {
            clock,
            drafts,
            session,
        }
    }

    fn loaded() -> Fixture {
        let mut f = fixture();
        f.session.select_template("portfolio");
        f.session
            .apply_config(Arc::new(TemplateConfig::from_json(CONFIG).unwrap()));
        f
    }

    #[test]
    fn test_rapid_updates_coalesce_into_one_transition_and_one_draft_write() {
        let mut f = loaded();
        let before = f.session.revision();
        for (i, name) in ["A", "Ad", "Ada", "Ada L", "Ada Lovelace"].iter().enumerate() {
            f.session.update_field("name", *name).unwrap();
            f.session.update_field("age", (30 + i) as f64).unwrap();
            f.clock.advance_ms(5);
            assert!(!f.session.flush_due());
        }
        assert_eq!(f.session.answers().display("name").unwrap(), "World");
        f.clock.advance_ms(11);
        assert!(f.session.flush_due());
        assert!(!f.session.flush_due());

        assert_eq!(f.session.revision(), before + 1);
        assert_eq!(f.drafts.write_count(), 1);
        assert_eq!(f.session.answers().display("name").unwrap(), "Ada Lovelace");
        assert_eq!(f.session.answers().get("age"), Some(&AnswerValue::Number(34.0)));
        assert_eq!(
            f.drafts.get_draft("portfolio").unwrap().unwrap(),
            f.session.answers().clone()
        );
    }

    #[test]
    fn test_writes_queued_before_config_are_retyped() {
        let mut f = fixture();
        f.session.select_template("portfolio");
        f.session.update_field("age", "42").unwrap();
        f.session.update_field("name", "Ada").unwrap();
        f.clock.advance_ms(10);

        f.session
            .apply_config(Arc::new(TemplateConfig::from_json(CONFIG).unwrap()));
        assert_eq!(f.session.next_flush_in(), Some(Duration::from_millis(6)));
        f.clock.advance_ms(6);
        assert!(f.session.flush_due());
        assert_eq!(f.session.answers().get("age"), Some(&AnswerValue::Number(42.0)));
        assert_eq!(f.session.answers().display("name").unwrap(), "Ada");
    }

    #[test]
    fn test_queued_write_of_wrong_kind_is_dropped_on_config() {
        let mut f = fixture();
        f.session.select_template("portfolio");
        f.session.update_field("age", "forty").unwrap();

        let config = Arc::new(TemplateConfig::from_json(CONFIG).unwrap());
        f.session.apply_config(config.clone());
        assert!(!f.session.has_pending_writes());
        assert!(!f.session.flush_now());
        assert_eq!(
            f.session.answers().get("age"),
            extract_defaults(&config).get("age")
        );
        assert_ne!(
            f.session.answers().get("age"),
            Some(&AnswerValue::Text("forty".to_string()))
        );
    }

    #[test]
    fn test_immediate_write_bypasses_window_and_keeps_pending_edits() {
        let mut f = loaded();
        let before = f.session.revision();
        f.session.update_field("age", 41.0).unwrap();
        f.session.update_field_immediate("name", "Grace").unwrap();
        assert!(!f.session.has_pending_writes());
        assert_eq!(f.session.revision(), before + 1);
        assert_eq!(f.drafts.write_count(), 1);
        assert_eq!(f.session.answers().display("name").unwrap(), "Grace");
        assert_eq!(f.session.answers().display("age").unwrap(), "41");
    }

    #[test]
    fn test_write_time_typing() {
        let mut f = loaded();
        let err = f.session.update_field("age", "forty").unwrap_err();
        assert_eq!(err.field, "age");
        assert!(!f.session.has_pending_writes());

        f.session.update_field("age", "42").unwrap();
        f.session.flush_now();
        assert_eq!(f.session.answers().get("age"), Some(&AnswerValue::Number(42.0)));

        let mut partial = AnswerSet::new();
        partial.insert("name", "Ok");
        partial.insert("hire_me", "maybe");
        assert!(f.session.update_fields(&partial).is_err());
        assert!(!f.session.has_pending_writes());
    }

    #[test]
    fn test_draft_seeds_answers_and_wins_over_defaults() {
        let mut f = fixture();
        let draft: AnswerSet = [("name", AnswerValue::text("Ada")), ("age", AnswerValue::text("36"))]
            .into_iter()
            .collect();
        f.drafts.save_draft("portfolio", &draft).unwrap();

        f.session.select_template("portfolio");
        assert_eq!(f.session.answers(), &draft);
        f.session
            .apply_config(Arc::new(TemplateConfig::from_json(CONFIG).unwrap()));
        let answers = f.session.answers();
        assert_eq!(answers.display("name").unwrap(), "Ada");
        assert_eq!(answers.get("age"), Some(&AnswerValue::Number(36.0)));
        assert_eq!(answers.display("email").unwrap(), "");
        assert_eq!(answers.get("hire_me"), Some(&AnswerValue::Bool(false)));
    }

    #[test]
    fn test_without_draft_defaults_fill_every_field() {
        let f = loaded();
        let answers = f.session.answers();
        assert_eq!(answers.len(), 4);
        assert_eq!(answers.display("name").unwrap(), "World");
        assert_eq!(f.session.current_step(), 1);
    }

    #[test]
    fn test_step_clamping() {
        let mut f = loaded();
        assert_eq!(f.session.retreat_step(), StepMove::AtBoundary);
        assert_eq!(f.session.current_step(), 1);

        f.session.update_field_immediate("email", "ada@example.com").unwrap();
        assert_eq!(f.session.advance_step(), StepMove::Moved(2));
        assert_eq!(f.session.advance_step(), StepMove::Moved(3));
        assert_eq!(f.session.advance_step(), StepMove::AtBoundary);
        assert_eq!(f.session.current_step(), 3);
        assert_eq!(f.session.retreat_step(), StepMove::Moved(2));

        assert!(!f.session.go_to_step(0));
        assert!(!f.session.go_to_step(4));
        assert!(f.session.go_to_step(1));
    }

    #[test]
    fn test_invalid_step_blocks_advance_until_fixed() {
        let mut f = loaded();
        f.session.update_field("name", "").unwrap();
        match f.session.advance_step() {
            StepMove::Blocked(errors) => assert_eq!(errors["name"], "Name is required"),
            other => panic!("expected blocked advance, got {:?}", other),
        }
        assert_eq!(f.session.current_step(), 1);

        f.session.update_field("name", "Ada").unwrap();
        assert!(f.session.is_field_valid("name"));
        assert_eq!(f.session.advance_step(), StepMove::Moved(2));
    }

    #[test]
    fn test_error_display_is_gated_on_touch_or_submit() {
        let mut f = loaded();
        let errors = f.session.validate_step("contact");
        assert!(errors.contains_key("email"));
        assert!(!f.session.is_field_valid("email"));
        assert_eq!(f.session.visible_error("email"), None);

        f.session.touch("email");
        assert!(f.session.visible_error("email").is_some());

        let mut g = loaded();
        let result = g.session.submit();
        assert!(result.unwrap_err().contains_key("email"));
        assert!(g.session.visible_error("email").is_some());

        g.session.update_field("email", "grace@example.com").unwrap();
        let answers = g.session.submit().unwrap();
        assert_eq!(answers.display("email").unwrap(), "grace@example.com");
    }

    #[test]
    fn test_reset_form_restores_defaults_and_clears_draft() {
        let mut f = loaded();
        f.session.update_field_immediate("name", "Ada").unwrap();
        assert!(f.drafts.get_draft("portfolio").unwrap().is_some());
        f.session.update_field("age", 9.0).unwrap();

        f.session.reset_form();
        assert!(!f.session.has_pending_writes());
        assert_eq!(f.session.answers().display("name").unwrap(), "World");
        assert!(f.drafts.get_draft("portfolio").unwrap().is_none());
    }

    #[test]
    fn test_switching_templates_commits_pending_writes_to_previous_draft() {
        let mut f = loaded();
        f.session.update_field("name", "Ada").unwrap();
        f.session.select_template("blog");
        let saved = f.drafts.get_draft("portfolio").unwrap().unwrap();
        assert_eq!(saved.display("name").unwrap(), "Ada");
        assert!(f.session.answers().is_empty());
        assert_eq!(f.session.template_id(), Some("blog"));
        assert_eq!(f.session.step_count(), 0);
    }

    #[test]
    fn test_clear_template_discards_everything() {
        let mut f = loaded();
        f.session.update_field("name", "Ada").unwrap();
        f.session.clear_template();
        assert!(f.session.template_id().is_none());
        assert!(f.session.answers().is_empty());
        f.clock.advance_ms(100);
        assert!(!f.session.flush_due());
        assert_eq!(f.drafts.write_count(), 0);
    }
}
