use assert_cmd::Command;
use chrono::Utc;
use tempfile::TempDir;

#[test]
fn import_ingests_a_synthetic_session_and_list_shows_it() {
    let workspace = TempDir::new().unwrap();
    let log_root = TempDir::new().unwrap();

    let fixture = agtrace_testing::SessionFixture::new("/Users/alice/code/agtrace").user_turn(
        "u1",
        "hello",
        Utc::now(),
    );
    fixture.write_under(log_root.path()).unwrap();

    Command::cargo_bin("agtrace")
        .unwrap()
        .args(["--workspace", workspace.path().to_str().unwrap(), "import", "--log-root", log_root.path().to_str().unwrap()])
        .assert()
        .success();

    let list = Command::cargo_bin("agtrace")
        .unwrap()
        .args(["--workspace", workspace.path().to_str().unwrap(), "list"])
        .assert()
        .success();
    let output = String::from_utf8(list.get_output().stdout.clone()).unwrap();
    assert!(output.contains("agtrace"));
}
