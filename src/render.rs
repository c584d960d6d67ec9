//! Placeholder substitution and preview document composition.
//!
//! A placeholder is a braced identifier, `{name}` or `{{ name }}`, with an
//! optional fallback after a pipe: `{name|Anonymous}`. Unknown names render
//! as the fallback or as an empty string. `${name}` is left untouched so
//! JavaScript template literals in scripts survive rendering.
//!
//! Any `{identifier}` without inner spaces is a placeholder, declared or
//! not. Template scripts must space their object braces (`const { data } =
//! res;`, `return { name };`) or `{data}` renders as an empty string.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use thiserror::Error;

use crate::files::{RenderedFileSet, TemplateFile, TemplateFileSet};
use crate::schema::AnswerSet;

pub const DEFAULT_ENTRY_FILE: &str = "index.html";

const HEAD_CLOSE: &str = "</head>";
const BODY_CLOSE: &str = "</body>";

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"\{\{\s*(?P<dkey>[A-Za-z_][A-Za-z0-9_-]*)\s*(?:\|\s*(?P<dfallback>[^{}]*?)\s*)?\}\}",
        r"|(?P<dollar>\$)?\{(?P<key>[A-Za-z_][A-Za-z0-9_-]*)(?:\|(?P<fallback>[^{}]*))?\}",
    ))
    .expect("valid placeholder pattern")
});

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("No {entry} found in template")]
    EntryFileMissing { entry: String },
}

/// Substitutes every placeholder in `source`. Total and deterministic.
pub fn render(source: &str, answers: &AnswerSet) -> String {
    PLACEHOLDER_RE
        .replace_all(source, |caps: &Captures| {
            if caps.name("dollar").is_some() {
                return caps[0].to_string();
            }
            let (key, fallback) = match caps.name("dkey") {
                Some(key) => (key.as_str(), caps.name("dfallback")),
                None => (&caps["key"], caps.name("fallback")),
            };
            let fallback = fallback.map(|m| m.as_str()).unwrap_or("");
            match answers.get(key) {
                Some(value) if !value.display().is_empty() => value.display(),
                _ => fallback.to_string(),
            }
        })
        .into_owned()
}

/// Renders every file of the set with the same answers.
pub fn render_file_set(files: &TemplateFileSet, answers: &AnswerSet) -> RenderedFileSet {
    files
        .iter()
        .map(|file| TemplateFile::new(file.path.clone(), render(&file.content, answers)))
        .collect()
}

/// Finds the entry markup file: an exact path match first, otherwise the
/// first file (in path order) with that file name.
pub fn find_entry_file<'a>(files: &'a TemplateFileSet, entry: &str) -> Option<&'a TemplateFile> {
    files
        .get(entry)
        .or_else(|| files.iter().find(|f| f.file_name() == entry))
}

pub fn compose_preview_document(
    files: &TemplateFileSet,
    answers: &AnswerSet,
) -> Result<String, RenderError> {
    compose_with_entry(files, answers, DEFAULT_ENTRY_FILE)
}

/// Renders the entry file and inlines every rendered stylesheet and script
/// so the result is a single self-contained document.
pub fn compose_with_entry(
    files: &TemplateFileSet,
    answers: &AnswerSet,
    entry: &str,
) -> Result<String, RenderError> {
    let main = find_entry_file(files, entry).ok_or_else(|| RenderError::EntryFileMissing {
        entry: entry.to_string(),
    })?;

    let mut styles = String::new();
    let mut scripts = String::new();
    for file in files.iter() {
        if file.has_extension("css") {
            styles.push_str(&format!(
                "<style data-source=\"{}\">\n{}\n</style>\n",
                file.path,
                render(&file.content, answers)
            ));
        } else if file.has_extension("js") {
            scripts.push_str(&format!(
                "<script data-source=\"{}\">\n{}\n</script>\n",
                file.path,
                render(&file.content, answers)
            ));
        }
    }

    let mut document = render(&main.content, answers);
    document = if document.contains(HEAD_CLOSE) {
        insert_before(&document, HEAD_CLOSE, &styles)
    } else if document.contains(BODY_CLOSE) {
        insert_before(&document, BODY_CLOSE, &styles)
    } else {
        format!("{}{}", styles, document)
    };
    document = if document.contains(BODY_CLOSE) {
        insert_before(&document, BODY_CLOSE, &scripts)
    } else {
        format!("{}{}", document, scripts)
    };
    Ok(document)
}

fn insert_before(document: &str, marker: &str, injected: &str) -> String {
    document.replacen(marker, &format!("{}{}", injected, marker), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AnswerValue;

    fn answers(pairs: &[(&str, &str)]) -> AnswerSet {
        pairs.iter().map(|(k, v)| (*k, *v)).collect()
    }

    #[test]
    fn test_render_single_and_double_brace() {
        let a = answers(&[("name", "Ada")]);
        assert_eq!(render("Hello {name}!", &a), "Hello Ada!");
        assert_eq!(render("Hello {{ name }}!", &a), "Hello Ada!");
        assert_eq!(render("Hello {{name}}!", &a), "Hello Ada!");
    }

    #[test]
    fn test_missing_token_renders_empty() {
        let a = answers(&[("name", "Ada")]);
        assert_eq!(render("[{missing}]", &a), "[]");
        assert_eq!(render("[{{ missing }}]", &a), "[]");
    }

    #[test]
    fn test_fallback() {
        let mut a = answers(&[("empty", "")]);
        a.insert("count", AnswerValue::Number(3.0));
        assert_eq!(render("{missing|Anonymous}", &a), "Anonymous");
        assert_eq!(render("{{ empty | n/a }}", &a), "n/a");
        assert_eq!(render("{count|0} items", &a), "3 items");
    }

    #[test]
    fn test_non_placeholders_untouched() {
        let a = answers(&[("name", "Ada"), ("color", "red")]);
        let css = "body { color: red; }\n.x{}";
        assert_eq!(render(css, &a), css);
        let js = "const greeting = `Hi ${name}`;";
        assert_eq!(render(js, &a), js);
        assert_eq!(render("a { color: {color}; }", &a), "a { color: red; }");
    }

    #[test]
    fn test_spaced_script_braces_survive_and_tight_ones_do_not() {
        let a = answers(&[("name", "Ada")]);
        let spaced = "const { data } = res;\nreturn { name };";
        assert_eq!(render(spaced, &a), spaced);
        assert_eq!(render("const {data} = res;", &a), "const  = res;");
        assert_eq!(render("return {name};", &a), "return Ada;");
    }

    #[test]
    fn test_render_is_deterministic() {
        let files: TemplateFileSet = vec![
            TemplateFile::new("index.html", "<h1>{title}</h1>"),
            TemplateFile::new("style.css", "h1 { color: {accent}; }"),
        ]
        .into_iter()
        .collect();
        let a = answers(&[("title", "Hi"), ("accent", "#fff")]);
        assert_eq!(render_file_set(&files, &a), render_file_set(&files, &a));
        assert_eq!(
            compose_preview_document(&files, &a).unwrap(),
            compose_preview_document(&files, &a).unwrap()
        );
    }

    #[test]
    fn test_compose_injects_styles_in_head_and_scripts_in_body() {
        let files: TemplateFileSet = vec![
            TemplateFile::new(
                "index.html",
                "<html><head><title>{name}</title></head><body>Hello {name}!</body></html>",
            ),
            TemplateFile::new("css/site.css", "h1 { color: {accent}; }"),
            TemplateFile::new("js/app.js", "console.log('{name}');"),
        ]
        .into_iter()
        .collect();
        let a = answers(&[("name", "Ada"), ("accent", "blue")]);
        let doc = compose_preview_document(&files, &a).unwrap();
        assert_eq!(
            doc,
            "<html><head><title>Ada</title>\
             <style data-source=\"css/site.css\">\nh1 { color: blue; }\n</style>\n</head>\
             <body>Hello Ada!<script data-source=\"js/app.js\">\nconsole.log('Ada');\n</script>\n</body></html>"
        );
    }

    #[test]
    fn test_compose_fallbacks_without_markers() {
        let files: TemplateFileSet = vec![
            TemplateFile::new("index.html", "<p>plain</p>"),
            TemplateFile::new("a.css", "p{}"),
            TemplateFile::new("b.js", "x()"),
        ]
        .into_iter()
        .collect();
        let doc = compose_preview_document(&files, &AnswerSet::new()).unwrap();
        assert!(doc.starts_with("<style data-source=\"a.css\">"));
        assert!(doc.ends_with("<script data-source=\"b.js\">\nx()\n</script>\n"));

        let body_only: TemplateFileSet = vec![
            TemplateFile::new("index.html", "<body>x</body>"),
            TemplateFile::new("a.css", "p{}"),
        ]
        .into_iter()
        .collect();
        let doc = compose_preview_document(&body_only, &AnswerSet::new()).unwrap();
        assert!(doc.starts_with("<body>x<style data-source=\"a.css\">"));
    }

    #[test]
    fn test_entry_file_lookup() {
        let nested: TemplateFileSet = vec![TemplateFile::new("site/index.html", "{name}")]
            .into_iter()
            .collect();
        let a = answers(&[("name", "Ada")]);
        assert_eq!(compose_preview_document(&nested, &a).unwrap(), "Ada");

        let missing: TemplateFileSet = vec![TemplateFile::new("about.html", "")].into_iter().collect();
        assert_eq!(
            compose_preview_document(&missing, &a),
            Err(RenderError::EntryFileMissing {
                entry: "index.html".to_string()
            })
        );
    }
}
