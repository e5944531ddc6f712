use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn course_rag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("course-rag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let docs_dir = root.join("docs");
    fs::create_dir_all(&docs_dir).unwrap();
    fs::write(
        docs_dir.join("course1_script.txt"),
        "Course Title: Building Systems with the ChatGPT API\n\
         Course Link: https://example.com/chatgpt\n\
         Course Instructor: Isa Fulford\n\
         \n\
         Lesson 0: Introduction\n\
         Lesson Link: https://example.com/chatgpt/0\n\
         This course covers chaining prompts and evaluating outputs.\n\
         \n\
         Lesson 1: Moderation\n\
         Moderation checks inputs for harmful content before processing.\n",
    )
    .unwrap();
    fs::write(
        docs_dir.join("course2_script.txt"),
        "Course Title: Vector Databases\n\
         Course Instructor: Sebastian Witalec\n\
         \n\
         Lesson 1: Embeddings\n\
         Embeddings turn text into vectors. Similar meaning gives nearby vectors.\n",
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/course-rag.sqlite"

[documents]
path = "{root}/docs"

[embedding]
provider = "hashed"
dims = 128
"#,
        root = root.display()
    );

    let config_path = config_dir.join("course-rag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_course_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = course_rag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run course-rag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_course_rag(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/course-rag.sqlite").exists());

    let (_, _, again) = run_course_rag(&config_path, &["init"]);
    assert!(again, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_course_rag(&config_path, &["ingest"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("courses added: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_course_rag(&config_path, &["ingest"]);
    assert!(success);
    assert!(stdout.contains("courses added: 0"));
    assert!(stdout.contains("skipped: 2"));
    assert!(stdout.contains("total courses: 2"));
}

#[test]
fn test_courses_lists_catalog() {
    let (_tmp, config_path) = setup_test_env();
    run_course_rag(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_course_rag(&config_path, &["courses"]);
    assert!(success, "courses failed: {}", stderr);
    assert!(stdout.contains("Building Systems with the ChatGPT API"));
    assert!(stdout.contains("instructor: Isa Fulford"));
    assert!(stdout.contains("Vector Databases"));
    assert!(stdout.contains("2 course(s)"));
}

#[test]
fn test_search_with_course_filter() {
    let (_tmp, config_path) = setup_test_env();
    run_course_rag(&config_path, &["ingest"]);

    let (stdout, stderr, success) = run_course_rag(
        &config_path,
        &["search", "moderation harmful content", "--course", "ChatGPT"],
    );
    assert!(success, "search failed: {}", stderr);
    assert!(stdout.contains("Building Systems with the ChatGPT API - Lesson 1"));
    assert!(!stdout.contains("Vector Databases"));

    let (stdout, _, success) = run_course_rag(&config_path, &["search", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_ask_requires_api_key() {
    let (tmp, config_path) = setup_test_env();

    let output = Command::new(course_rag_binary())
        .current_dir(tmp.path())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(["ask", "What is moderation?"])
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ANTHROPIC_API_KEY"), "stderr: {}", stderr);
}
