use log::info;
use regex::Regex;
use std::io::{Cursor, Write};
use std::sync::LazyLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::export::ExportError;
use crate::files::RenderedFileSet;

pub const DEFAULT_ARCHIVE_NAME: &str = "website";

static SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s/\\]+").expect("valid separator pattern"));

/// A finished zip archive and the file name to offer it under.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveBytes {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Collapses whitespace and path separators into `-`. Blank names fall back
/// to [`DEFAULT_ARCHIVE_NAME`].
pub fn sanitize_archive_name(suggested: &str) -> String {
    let name = SEPARATOR_RE.replace_all(suggested.trim(), "-");
    let name = name.trim_matches('-');
    if name.is_empty() {
        DEFAULT_ARCHIVE_NAME.to_string()
    } else {
        name.to_string()
    }
}

/// Packs every file into a deflated zip. Entries are written in path order
/// with a fixed timestamp so identical inputs give identical bytes.
pub fn export_archive(files: &RenderedFileSet, suggested_name: &str) -> Result<ArchiveBytes, ExportError> {
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for file in files.iter() {
        writer.start_file(file.path.as_str(), options)?;
        writer.write_all(file.content.as_bytes())?;
    }
    let bytes = writer.finish()?.into_inner();

    let filename = format!("{}.zip", sanitize_archive_name(suggested_name));
    info!("Built archive {} ({} files, {} bytes)", filename, files.len(), bytes.len());
    Ok(ArchiveBytes { filename, bytes })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::TemplateFile;
    use std::io::Read;
    use zip::ZipArchive;

    fn site() -> RenderedFileSet {
        vec![
            TemplateFile::new("index.html", "<h1>Hello Ada!</h1>"),
            TemplateFile::new("css/style.css", "h1 { color: red; }"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_sanitize_archive_name() {
        assert_eq!(sanitize_archive_name("My Cool   Site"), "My-Cool-Site");
        assert_eq!(sanitize_archive_name("  a/b\\c "), "a-b-c");
        assert_eq!(sanitize_archive_name("   "), "website");
        assert_eq!(sanitize_archive_name(""), "website");
    }

    #[test]
    fn test_archive_is_deterministic() {
        let first = export_archive(&site(), "Ada Site").unwrap();
        let second = export_archive(&site(), "Ada Site").unwrap();
        assert_eq!(first.filename, "Ada-Site.zip");
        assert_eq!(first.bytes, second.bytes);
    }

    #[test]
    fn test_archive_contains_every_file() {
        let archive = export_archive(&site(), "").unwrap();
        assert_eq!(archive.filename, "website.zip");

        let mut zip = ZipArchive::new(Cursor::new(archive.bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        assert_eq!(zip.by_index(0).unwrap().name(), "css/style.css");

        let mut content = String::new();
        zip.by_name("index.html")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "<h1>Hello Ada!</h1>");
    }
}
