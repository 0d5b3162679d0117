//! Fixtures shared by unit tests.

use std::io::{Cursor, Write};
use std::path::Path;

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::config::Config;

/// A one-paragraph template referencing the ID and Name columns.
pub fn template_docx() -> Vec<u8> {
    let document = concat!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
        "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\">",
        "<w:body><w:p><w:r><w:t>Report {{ BugReportID }} from {{ Name }}</w:t></w:r></w:p></w:body>",
        "</w:document>"
    );
    let mut buf = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buf));
        let opts = SimpleFileOptions::default();
        zip.start_file("[Content_Types].xml", opts).unwrap();
        zip.write_all(b"<Types/>").unwrap();
        zip.start_file("word/document.xml", opts).unwrap();
        zip.write_all(document.as_bytes()).unwrap();
        zip.finish().unwrap();
    }
    buf
}

/// Config rooted in `tmp` with a template and a data file named `data_name`.
pub fn sandbox(tmp: &TempDir, data_name: &str, data: &str) -> Config {
    let root = tmp.path();
    std::fs::create_dir_all(root.join("data")).unwrap();
    std::fs::create_dir_all(root.join("templates")).unwrap();

    let mut config = Config::default();
    config.paths.data_file = root.join("data").join(data_name);
    config.paths.template_file = root.join("templates").join("template.docx");
    config.paths.output_dir = root.join("output");
    config.paths.state_file = root.join("data").join("state.json");

    std::fs::write(&config.paths.data_file, data).unwrap();
    std::fs::write(&config.paths.template_file, template_docx()).unwrap();
    config
}

pub fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|rd| rd.count()).unwrap_or(0)
}
