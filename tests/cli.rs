use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::write(
        root.join("notes.txt"),
        "Photosynthesis turns light into chemical energy.",
    )
    .unwrap();

    let config_path = root.join("config/tutor.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/data/tutor.sqlite"

[embedding]
provider = "disabled"

[generation]
provider = "disabled"
"#,
            root.display()
        ),
    )
    .unwrap();

    (tmp, config_path)
}

fn run_tutor(config: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tutor"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

#[test]
fn test_init_is_idempotent() {
    let (tmp, config) = setup_test_env();

    let out = run_tutor(&config, &["init"]);
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(tmp.path().join("data/tutor.sqlite").exists());

    let out = run_tutor(&config, &["init"]);
    assert!(out.status.success());
}

#[test]
fn test_docs_for_unknown_owner() {
    let (_tmp, config) = setup_test_env();
    run_tutor(&config, &["init"]);

    let out = run_tutor(&config, &["docs", "--owner", "nobody"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("No documents for nobody."));
}

#[test]
fn test_ingest_fails_cleanly_without_embeddings() {
    let (tmp, config) = setup_test_env();
    run_tutor(&config, &["init"]);

    let notes = tmp.path().join("notes.txt");
    let out = run_tutor(
        &config,
        &["ingest", notes.to_str().unwrap(), "--owner", "u1"],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("disabled"));

    let out = run_tutor(&config, &["docs", "--owner", "u1"]);
    assert!(String::from_utf8_lossy(&out.stdout).contains("No documents for u1."));
}

#[test]
fn test_remove_with_nothing_stored() {
    let (_tmp, config) = setup_test_env();
    run_tutor(&config, &["init"]);

    let out = run_tutor(&config, &["remove", "--owner", "u1"]);
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("Removed 0 documents"));
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let out = run_tutor(&tmp.path().join("absent.toml"), &["init"]);
    assert!(!out.status.success());
}
