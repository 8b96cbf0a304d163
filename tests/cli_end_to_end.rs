use assert_cmd::Command;
use predicates::str::contains;

fn gateway() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("mermaid-gateway"));
    cmd.env_remove("CHROME_PATH")
        .env_remove("MERMAID_GATEWAY_CONFIG_FILE");
    cmd
}

#[test]
fn detect_browser_reports_chrome_path() {
    let browser = tempfile::NamedTempFile::new().expect("fake browser");
    let path = browser.path().display().to_string();

    gateway()
        .env("CHROME_PATH", browser.path())
        .arg("detect-browser")
        .assert()
        .success()
        .stdout(contains(format!("configured: {path}")))
        .stdout(contains("platform: "))
        .stdout(contains("detected: "));
}

#[test]
fn detect_browser_flags_missing_configured_executable() {
    gateway()
        .env("CHROME_PATH", "/definitely/not/a/browser")
        .arg("detect-browser")
        .assert()
        .success()
        .stdout(contains("(not found, ignored)"));
}

#[test]
fn invalid_configuration_exits_with_failure() {
    gateway()
        .env("MERMAID_GATEWAY__SERVER__PORT", "0")
        .arg("detect-browser")
        .assert()
        .failure()
        .stdout(contains("server.port"));
}

#[test]
fn missing_script_fails_serve_before_binding() {
    gateway()
        .args([
            "serve",
            "--render-script-path",
            "/definitely/not/mermaid.min.js",
            "--server-port",
            "1",
        ])
        .assert()
        .failure();
}
