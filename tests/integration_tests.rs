//! Integration tests for the `civic` CLI.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a civic Command isolated from the caller's env.
fn civic(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("civic");
    cmd.current_dir(dir.path())
        .env_remove("CIVIC_HOST")
        .env_remove("CIVIC_PORT")
        .env_remove("CIVIC_DB_PATH")
        .env_remove("CIVIC_LOG_JSON")
        .env_remove("CIVIC_ADMIN_PASSWORD")
        .env_remove("RUST_LOG");
    cmd
}

fn init_db(dir: &TempDir) {
    civic(dir)
        .args(["init", "--db-path", "data/civic.db"])
        .assert()
        .success();
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_civic_help() {
        let dir = TempDir::new().unwrap();
        civic(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("admin"));
    }

    #[test]
    fn test_civic_version() {
        let dir = TempDir::new().unwrap();
        civic(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_database() {
        let dir = TempDir::new().unwrap();
        civic(&dir)
            .args(["init", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Database initialized"))
            .stdout(predicate::str::contains("5 departments"));
        assert!(dir.path().join("data/civic.db").exists());
    }

    #[test]
    fn test_unknown_command_fails() {
        let dir = TempDir::new().unwrap();
        civic(&dir).arg("frobnicate").assert().failure();
    }
}

mod config_commands {
    use super::*;

    #[test]
    fn test_config_init_then_show() {
        let dir = TempDir::new().unwrap();
        civic(&dir)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created"));
        let content = fs::read_to_string(dir.path().join("civic.toml")).unwrap();
        assert!(content.contains("port = 3140"));

        civic(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Config file:"))
            .stdout(predicate::str::contains("session_ttl_hours = 12"));
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        civic(&dir).args(["config", "init"]).assert().success();
        civic(&dir)
            .args(["config", "init"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }

    #[test]
    fn test_config_validate_reports_warnings() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("civic.toml"),
            "[auth]\nsession_ttl_hours = 0\n",
        )
        .unwrap();
        civic(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("session_ttl_hours"));
    }

    #[test]
    fn test_env_override_visible_in_show() {
        let dir = TempDir::new().unwrap();
        civic(&dir)
            .env("CIVIC_PORT", "4500")
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("port = 4500"));
    }

    #[test]
    fn test_invalid_config_file_fails() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("civic.toml"), "[server\nport =").unwrap();
        civic(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("civic.toml"));
    }
}

mod admin_commands {
    use super::*;

    fn create_dana(dir: &TempDir) {
        civic(dir)
            .args([
                "admin",
                "create",
                "--db-path",
                "data/civic.db",
                "--email",
                "dana@city.gov",
                "--password",
                "correct-horse",
                "--name",
                "Dana Reyes",
                "--department",
                "Public Works",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Created admin Dana Reyes"));
    }

    #[test]
    fn test_create_and_list() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        create_dana(&dir);

        civic(&dir)
            .args(["admin", "list", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("dana@city.gov"))
            .stdout(predicate::str::contains("Public Works"));
    }

    #[test]
    fn test_short_password_rejected() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        civic(&dir)
            .args([
                "admin",
                "create",
                "--db-path",
                "data/civic.db",
                "--email",
                "x@city.gov",
                "--password",
                "short",
                "--name",
                "X",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("at least 8"));
    }

    #[test]
    fn test_unknown_department_rejected() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        civic(&dir)
            .args([
                "admin",
                "create",
                "--db-path",
                "data/civic.db",
                "--email",
                "x@city.gov",
                "--password",
                "long-enough",
                "--name",
                "X",
                "--department",
                "Ministry of Silly Walks",
            ])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown department"));
    }

    #[test]
    fn test_deactivate_hides_from_default_list() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        create_dana(&dir);

        civic(&dir)
            .args(["admin", "deactivate", "dana@city.gov", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Deactivated Dana Reyes"));

        civic(&dir)
            .args(["admin", "list", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No admins found"));

        civic(&dir)
            .args(["admin", "list", "--all", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[inactive]"));
    }

    #[test]
    fn test_deactivate_unknown_email_fails() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        civic(&dir)
            .args(["admin", "deactivate", "nobody@city.gov", "--db-path", "data/civic.db"])
            .assert()
            .failure();
    }
}

mod department_commands {
    use super::*;

    #[test]
    fn test_list_shows_seeded_departments() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        civic(&dir)
            .args(["department", "list", "--db-path", "data/civic.db"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Public Works"))
            .stdout(predicate::str::contains("Code Enforcement"));
    }

    #[test]
    fn test_add_and_duplicate() {
        let dir = TempDir::new().unwrap();
        init_db(&dir);
        civic(&dir)
            .args([
                "department",
                "add",
                "Animal Control",
                "--contact-email",
                "animals@city.gov",
                "--db-path",
                "data/civic.db",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("Added department Animal Control"));

        civic(&dir)
            .args(["department", "add", "Animal Control", "--db-path", "data/civic.db"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("already exists"));
    }
}
