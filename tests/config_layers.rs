use std::io::Write;

use clap::Parser;
use crunevo::config::{CliArgs, LoadError, load};
use serial_test::serial;
use tempfile::NamedTempFile;
use time::Duration;

/// Config files are recognised by extension, so the temp file keeps `.toml`.
fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .prefix("crunevo-")
        .suffix(".toml")
        .tempfile()
        .expect("create temp config");
    file.write_all(contents.as_bytes()).expect("write temp config");
    file
}

fn path_arg(file: &NamedTempFile) -> String {
    file.path().display().to_string()
}

const FILE: &str = r#"
[scoring]
like_weight = 6.0
half_life_hours = 12.0

[login]
block_limit = 3
block_window_seconds = 600

[scheduler]
sweep_cron = "0 */10 * * * *"
"#;

#[test]
#[serial]
fn file_values_apply_and_cli_flags_win() {
    let file = write_config(FILE);
    let args = CliArgs::parse_from([
        "crunevo",
        "--config-file",
        &path_arg(&file),
        "serve",
        "--login-block-limit",
        "7",
    ]);

    let settings = load(&args).expect("settings");
    assert!((settings.scoring.weights.like() - 6.0).abs() < f64::EPSILON);
    assert!((settings.scoring.weights.half_life_hours() - 12.0).abs() < f64::EPSILON);
    assert_eq!(settings.login.block_limit.get(), 7);
    assert_eq!(settings.login.block_window, Duration::seconds(600));

    assert!(!settings.defaulted.contains(&"scoring.like_weight"));
    assert!(settings.defaulted.contains(&"scoring.download_weight"));
}

#[test]
#[serial]
fn environment_overrides_file() {
    let file = write_config(FILE);
    // SAFETY: serialized with every other test that touches the environment.
    unsafe { std::env::set_var("CRUNEVO__LOGIN__BLOCK_WINDOW_SECONDS", "120") };

    let args = CliArgs::parse_from(["crunevo", "--config-file", &path_arg(&file), "serve"]);
    let result = load(&args);

    unsafe { std::env::remove_var("CRUNEVO__LOGIN__BLOCK_WINDOW_SECONDS") };

    let settings = result.expect("settings");
    assert_eq!(settings.login.block_window, Duration::seconds(120));
    assert_eq!(settings.login.block_limit.get(), 3);
}

#[test]
#[serial]
fn invalid_weights_fail_at_load() {
    let file = write_config("[scoring]\ncomment_weight = -2.0\n");
    let args = CliArgs::parse_from(["crunevo", "--config-file", &path_arg(&file)]);

    let err = load(&args).expect_err("negative weight");
    assert!(matches!(err, LoadError::Invalid { key: "scoring", .. }));
}

#[test]
#[serial]
fn missing_config_file_is_an_error() {
    let args = CliArgs::parse_from([
        "crunevo",
        "--config-file",
        "/nonexistent/crunevo-config.toml",
    ]);
    assert!(matches!(load(&args), Err(LoadError::Build(_))));
}
