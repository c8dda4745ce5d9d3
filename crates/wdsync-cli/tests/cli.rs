use assert_cmd::Command;
use predicates::prelude::*;

fn wdsync() -> Command {
    Command::cargo_bin("wdsync").expect("wdsync binary")
}

#[test]
fn help_lists_both_record_kinds() {
    wdsync()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("users"))
        .stdout(predicate::str::contains("cost-centers"));
}

#[test]
fn rebuild_with_quick_is_a_usage_error() {
    wdsync()
        .args(["users", "--rebuild", "--quick"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn subcommand_is_required() {
    wdsync().assert().failure();
}

#[test]
fn unreachable_config_service_is_fatal() {
    wdsync()
        .args(["cost-centers", "--rebuild"])
        .env("WDSYNC_CONFIG_URL", "http://127.0.0.1:9/")
        .env("WDSYNC_HTTP_TIMEOUT_SECS", "5")
        .assert()
        .failure()
        .stdout(predicate::str::contains("Documents inserted").not())
        .stderr(predicate::str::contains("reading service registry"));
}
