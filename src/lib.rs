//! Schema-driven site builder.
//!
//! A template is a set of source files plus a multi-step form definition.
//! Answers collected by a [`FormSession`] are substituted into every file by
//! the [`render`] module, shown through a debounced [`PreviewScheduler`], and
//! finally exported as a zip archive or pushed to a new GitHub repository.

pub mod archive;
pub mod auth;
pub mod catalog;
pub mod config;
pub mod drafts;
pub mod engine;
pub mod export;
pub mod files;
pub mod filters;
pub mod github;
pub mod loader;
pub mod preview;
pub mod remote;
pub mod render;
pub mod scheduler;
pub mod schema;
pub mod session;
pub mod studio;

pub use catalog::{Catalog, CatalogFilter, TemplateDescriptor};
pub use config::StudioConfig;
pub use engine::TemplateEngine;
pub use export::{ExportArtifact, ExportBundle, ExportError};
pub use files::{RenderedFileSet, TemplateFile, TemplateFileSet};
pub use loader::{LoadError, TemplateContent, TemplateLoader};
pub use preview::{PreviewScheduler, PreviewState};
pub use render::{render, render_file_set, RenderError};
pub use schema::{AnswerSet, AnswerValue, TemplateConfig};
pub use session::FormSession;
pub use studio::Studio;
