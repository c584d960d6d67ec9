use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;

/// Jinja environment for documents the studio generates itself (the project
/// README). Template sources written by users go through [`crate::render`].
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Creates a new TemplateEngine with the casing filters registered.
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        env.add_filter("camelcase", crate::filters::camelcase);
        env.add_filter("pascalcase", crate::filters::pascalcase);
        env.add_filter("snakecase", crate::filters::snakecase);
        env.add_filter("kebabcase", crate::filters::kebabcase);
        env.add_filter("titlecase", crate::filters::titlecase);

        Self { env }
    }

    /// Registers a global variable in the template environment.
    pub fn add_global<T: Serialize>(&mut self, name: String, value: T) {
        self.env
            .add_global(name, minijinja::value::Value::from_serialize(&value));
    }

    /// Renders a template string with the given context.
    pub fn render_string<T: Serialize>(&self, template_str: &str, context: &T) -> Result<String, String> {
        let template = self
            .env
            .template_from_str(template_str)
            .map_err(|e| e.to_string())?;

        let rendered = template.render(context).map_err(|e| {
            if let Some(line) = e.line() {
                let error_line = template_str.lines().nth(line - 1).unwrap_or("");
                format!("{}\n{}", e, error_line)
            } else {
                format!("{}", e)
            }
        })?;

        Ok(rendered)
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}
