use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

const DOCUMENT_XML: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
    "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>",
    "<w:p><w:r><w:t>Bug #{{ BugReportID }}</w:t></w:r></w:p>",
    "<w:p><w:r><w:t>Reported by {{ </w:t></w:r><w:r><w:t>Name }}: {{Summary}}</w:t></w:r></w:p>",
    "</w:body></w:document>"
);

fn bugreport_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("bugreport");
    path
}

fn zip_bytes(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buf));
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }
    buf
}

fn setup_test_env(data_name: &str, data: &[u8], debounce_ms: u64) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("templates")).unwrap();

    fs::write(root.join("data").join(data_name), data).unwrap();
    fs::write(
        root.join("templates").join("questionnaire_template.docx"),
        zip_bytes(&[
            ("[Content_Types].xml", "<Types/>"),
            ("word/document.xml", DOCUMENT_XML),
        ]),
    )
    .unwrap();

    let config_content = format!(
        r#"[paths]
data_file = "{root}/data/{data_name}"
template_file = "{root}/templates/questionnaire_template.docx"
output_dir = "{root}/output"
state_file = "{root}/data/state.json"

[watch]
debounce_ms = {debounce_ms}
"#,
        root = root.display(),
        data_name = data_name,
        debounce_ms = debounce_ms,
    );

    let config_path = config_dir.join("bugreport.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn setup_csv_env(csv: &str) -> (TempDir, PathBuf) {
    setup_test_env("responses.csv", csv.as_bytes(), 3000)
}

fn run_bugreport(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = bugreport_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run bugreport binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn output_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(root.join("output"))
        .map(|rd| {
            rd.map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

fn document_text(path: &Path) -> String {
    let bytes = fs::read(path).unwrap();
    let mut archive = ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut xml = String::new();
    std::io::Read::read_to_string(&mut archive.by_name("word/document.xml").unwrap(), &mut xml)
        .unwrap();
    xml
}

fn checkpoint(root: &Path) -> serde_json::Value {
    let raw = fs::read_to_string(root.join("data").join("state.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_run_renders_every_row() {
    let (tmp, config_path) = setup_csv_env(
        "BugReportID,Name,Summary\n1,Ada Lovelace,Crash on save\n2, Jane Doe ,Button <missing>\n",
    );

    let (stdout, stderr, success) = run_bugreport(&config_path, &["run"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("reports written: 2"), "{}", stdout);

    assert_eq!(
        output_files(tmp.path()),
        vec!["BugReport_1_ada_lovelace.docx", "BugReport_2_jane_doe.docx"]
    );

    let xml = document_text(&tmp.path().join("output").join("BugReport_2_jane_doe.docx"));
    assert!(xml.contains("Bug #2"), "{}", xml);
    assert!(xml.contains("Reported by  Jane Doe </w:t>"), "{}", xml);
    assert!(xml.contains(": Button &lt;missing&gt;</w:t>"), "{}", xml);
    assert!(!xml.contains("{{"), "{}", xml);

    assert_eq!(checkpoint(tmp.path())["last_processed_id"], 2);
}

#[test]
fn test_run_idempotent() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n2,b\n");

    let (_, _, success1) = run_bugreport(&config_path, &["run"]);
    assert!(success1, "First run failed");
    let (stdout, _, success2) = run_bugreport(&config_path, &["run"]);
    assert!(success2, "Second run failed");
    assert!(stdout.contains("new rows: 0"), "{}", stdout);
    assert!(stdout.contains("reports written: 0"), "{}", stdout);

    let (stdout, _, success3) = run_bugreport(&config_path, &["run", "--full"]);
    assert!(success3, "Full run failed");
    assert!(stdout.contains("already present: 2"), "{}", stdout);
    assert_eq!(output_files(tmp.path()).len(), 2);
}

#[test]
fn test_run_incremental() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n2,b\n");
    run_bugreport(&config_path, &["run"]);

    fs::write(
        tmp.path().join("data").join("responses.csv"),
        "BugReportID,Name\n1,a\n2,b\n3,c\n",
    )
    .unwrap();
    let (stdout, stderr, success) = run_bugreport(&config_path, &["run"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("new rows: 1"), "{}", stdout);
    assert!(stdout.contains("checkpoint: 2 -> 3"), "{}", stdout);
    assert_eq!(output_files(tmp.path()).len(), 3);
}

#[test]
fn test_run_dry_run() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n2,b\n");

    let (stdout, _, success) = run_bugreport(&config_path, &["run", "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("dry-run"));
    assert!(stdout.contains("new rows: 2"));
    assert!(output_files(tmp.path()).is_empty());
    assert!(!tmp.path().join("data").join("state.json").exists());
}

#[test]
fn test_run_human_progress() {
    let (_tmp, config_path) = setup_csv_env("BugReportID,Name\n7,a\n");

    let (stdout, _, success) = run_bugreport(&config_path, &["--progress", "human", "run"]);
    assert!(success);
    assert!(stdout.contains("working on id 7.."), "{}", stdout);
    assert!(stdout.contains("ID:7 report created successfully"), "{}", stdout);
}

#[test]
fn test_run_json_progress() {
    let (_tmp, config_path) = setup_csv_env("BugReportID,Name\n7,a\n");

    let (stdout, _, success) = run_bugreport(&config_path, &["--progress", "json", "run"]);
    assert!(success);
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .filter(|l| l.starts_with('{'))
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert!(events
        .iter()
        .any(|e| e["event"] == "rendered" && e["id"] == 7));
}

#[test]
fn test_run_missing_name_keeps_checkpoint() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n2,\n");

    let (stdout, stderr, success) = run_bugreport(&config_path, &["run"]);
    assert!(!success, "run should fail: stdout={}", stdout);
    assert!(stderr.contains("Name"), "{}", stderr);
    assert_eq!(output_files(tmp.path()), vec!["BugReport_1_a.docx"]);
    assert!(!tmp.path().join("data").join("state.json").exists());
}

#[test]
fn test_run_missing_template() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n");
    fs::remove_file(tmp.path().join("templates").join("questionnaire_template.docx")).unwrap();

    let (_, stderr, success) = run_bugreport(&config_path, &["run"]);
    assert!(!success);
    assert!(stderr.contains("Failed to load template"), "{}", stderr);
}

#[test]
fn test_run_xlsx_source() {
    let sheet = concat!(
        "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\"><sheetData>",
        "<row r=\"1\"><c r=\"A1\" t=\"s\"><v>0</v></c><c r=\"B1\" t=\"s\"><v>1</v></c></row>",
        "<row r=\"2\"><c r=\"A2\"><v>41</v></c><c r=\"B2\" t=\"s\"><v>2</v></c></row>",
        "<row r=\"3\"><c r=\"A3\"><v>42</v></c><c r=\"B3\" t=\"inlineStr\"><is><t>Grace Hopper</t></is></c></row>",
        "</sheetData></worksheet>"
    );
    let shared = concat!(
        "<sst xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">",
        "<si><t>BugReportID</t></si><si><t>Name</t></si><si><t>Alan Turing</t></si></sst>"
    );
    let xlsx = zip_bytes(&[
        ("[Content_Types].xml", "<Types/>"),
        ("xl/workbook.xml", "<workbook/>"),
        ("xl/sharedStrings.xml", shared),
        ("xl/worksheets/sheet1.xml", sheet),
    ]);
    let (tmp, config_path) = setup_test_env("responses.xlsx", &xlsx, 3000);

    let (stdout, stderr, success) = run_bugreport(&config_path, &["run"]);
    assert!(success, "run failed: stdout={}, stderr={}", stdout, stderr);
    assert_eq!(
        output_files(tmp.path()),
        vec!["BugReport_41_alan_turing.docx", "BugReport_42_grace_hopper.docx"]
    );
    assert_eq!(checkpoint(tmp.path())["last_processed_id"], 42);
}

#[test]
fn test_status() {
    let (_tmp, config_path) = setup_csv_env("BugReportID,Name\n1,a\n5,e\n");

    let (stdout, _, success) = run_bugreport(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Last processed ID: 0"), "{}", stdout);
    assert!(stdout.contains("never"), "{}", stdout);

    run_bugreport(&config_path, &["run"]);
    let (stdout, _, success) = run_bugreport(&config_path, &["status"]);
    assert!(success);
    assert!(stdout.contains("Last processed ID: 5"), "{}", stdout);
    assert!(stdout.contains("Documents (docx):    2"), "{}", stdout);
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_csv_env("BugReportID,Name\n");
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[dataset]\nchunk_size = 0\n").unwrap();

    let (_, stderr, success) = run_bugreport(&bad, &["status"]);
    assert!(!success);
    assert!(stderr.contains("chunk_size"), "{}", stderr);
}

#[test]
fn test_watch_missing_data_file() {
    let (tmp, config_path) = setup_csv_env("BugReportID,Name\n");
    fs::remove_file(tmp.path().join("data").join("responses.csv")).unwrap();

    let (_, stderr, success) = run_bugreport(&config_path, &["watch"]);
    assert!(!success);
    assert!(stderr.contains("Data file not found"), "{}", stderr);
}

#[test]
fn test_watch_processes_after_change() {
    let (tmp, config_path) = setup_test_env("responses.csv", b"BugReportID,Name\n", 200);

    let mut child = Command::new(bugreport_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("watch")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(500));
    let data = tmp.path().join("data").join("responses.csv");
    for n in 1..=3 {
        let mut body = String::from("BugReportID,Name\n");
        for id in 1..=n {
            body.push_str(&format!("{},user{}\n", id, id));
        }
        fs::write(&data, body).unwrap();
        std::thread::sleep(Duration::from_millis(30));
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while output_files(tmp.path()).len() < 3 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(100));
    }
    let _ = child.kill();
    let _ = child.wait();

    assert_eq!(
        output_files(tmp.path()),
        vec![
            "BugReport_1_user1.docx",
            "BugReport_2_user2.docx",
            "BugReport_3_user3.docx"
        ]
    );
}
