use assert_cmd::Command;
use tempfile::TempDir;

fn swx(tmp: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("swx").expect("swx binary");
    cmd.env("SWX_DATA_DIR", tmp.path().join("swx"))
        .env("SWX_HOST_DATA_DIR", tmp.path().join("host-data"))
        .env("SWX_HOST_INSTALL_DIR", tmp.path().join("host-install"))
        .env_remove("SWX_LICENSE_SERVER_URL");
    cmd
}

#[test]
fn help_lists_the_command_groups() {
    let tmp = TempDir::new().unwrap();
    let assert = swx(&tmp).arg("--help").assert().success();
    let output = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    for group in ["profile", "switch", "reset", "backup", "license", "host"] {
        assert!(output.contains(group), "missing {group} in help");
    }
}

#[test]
fn profile_add_list_remove_round_trip() {
    let tmp = TempDir::new().unwrap();
    swx(&tmp)
        .args([
            "--json",
            "profile",
            "add",
            "dev@example.com",
            "--token",
            "tok-123",
            "--name",
            "dev",
        ])
        .assert()
        .success();

    let assert = swx(&tmp)
        .args(["--json", "profile", "list"])
        .assert()
        .success();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let envelope: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let profiles = envelope["details"]["profiles"].as_array().unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0]["email"], "dev@example.com");
    // Tokens are never echoed whole.
    assert!(!stdout.contains("tok-123"));

    swx(&tmp)
        .args(["profile", "remove", "dev@example.com"])
        .assert()
        .success();
}

#[test]
fn duplicate_profile_add_exits_with_user_error() {
    let tmp = TempDir::new().unwrap();
    let add = |tmp: &TempDir| {
        swx(tmp)
            .args(["profile", "add", "dup@example.com", "--token", "tok"])
            .assert()
    };
    add(&tmp).success();
    add(&tmp).code(1);
}

#[test]
fn factory_reset_requires_confirmation() {
    let tmp = TempDir::new().unwrap();
    swx(&tmp).args(["reset", "factory"]).assert().code(1);
}

#[test]
fn license_status_reports_unactivated() {
    let tmp = TempDir::new().unwrap();
    let assert = swx(&tmp)
        .args(["--json", "license", "status"])
        .assert()
        .code(1);
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    let envelope: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(envelope["details"]["state"], "unactivated");
}
