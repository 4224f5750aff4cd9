//! Configuration loading and data folder resolution
//!
//! Tests that touch NUTRI_DATA_FOLDER / NUTRI_CONFIG are marked #[serial]
//! so environment mutations do not race.

use nutri_common::config::{
    load_or_create_toml_config, load_toml_config, resolve_config_path, write_toml_config, CompiledDefaults,
    DataFolderResolver, TomlConfig, CONFIG_FILE_ENV, DATA_FOLDER_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.server.port, 5810);
    assert_eq!(config.bpm.message_name, "registrar_nutricion");
    assert_eq!(config.intake.preferred_sheet, "SEVEROS");
}

#[test]
fn partial_file_keeps_defaults_for_other_fields() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nutri-intake.toml");
    std::fs::write(
        &path,
        r#"
        [bpm]
        base_url = "https://bpm.example.test/api"
        timeout_secs = 10

        [intake]
        max_sweep_limit = 20
        "#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.bpm.base_url, "https://bpm.example.test/api");
    assert_eq!(config.bpm.timeout_secs, 10);
    assert!(config.bpm.verify_tls);
    assert_eq!(config.intake.max_sweep_limit, 20);
    assert_eq!(config.intake.default_sweep_limit, 50);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn malformed_file_is_an_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("broken.toml");
    std::fs::write(&path, "[bpm\nbase_url = ").unwrap();

    assert!(load_toml_config(&path).is_err());
}

#[test]
fn write_then_load_preserves_values() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("nutri-intake.toml");

    let mut config = TomlConfig::default();
    config.data_folder = Some(PathBuf::from("/srv/nutri"));
    config.bpm.token = Some("secret".to_string());
    write_toml_config(&config, &path).unwrap();

    assert!(path.exists());
    assert!(!path.with_extension("toml.tmp").exists());
    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
fn first_run_writes_default_config() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("etc").join("nutri-intake.toml");

    let config = load_or_create_toml_config(&path).unwrap();
    assert_eq!(config, TomlConfig::default());
    assert!(path.exists());
    assert_eq!(load_toml_config(&path).unwrap(), TomlConfig::default());
}

#[test]
fn existing_config_is_not_overwritten() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nutri-intake.toml");
    std::fs::write(&path, "[server]\nport = 6001\n").unwrap();

    let config = load_or_create_toml_config(&path).unwrap();
    assert_eq!(config.server.port, 6001);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[server]\nport = 6001\n");
}

#[test]
#[serial]
fn data_folder_cli_beats_env_and_toml() {
    env::set_var(DATA_FOLDER_ENV, "/tmp/nutri-env");
    let mut toml = TomlConfig::default();
    toml.data_folder = Some(PathBuf::from("/tmp/nutri-toml"));

    let resolved = DataFolderResolver::new()
        .with_cli(Some(Path::new("/tmp/nutri-cli")))
        .with_toml(&toml)
        .resolve();

    env::remove_var(DATA_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/tmp/nutri-cli"));
}

#[test]
#[serial]
fn data_folder_env_beats_toml() {
    env::set_var(DATA_FOLDER_ENV, "/tmp/nutri-env");
    let mut toml = TomlConfig::default();
    toml.data_folder = Some(PathBuf::from("/tmp/nutri-toml"));

    let resolved = DataFolderResolver::new().with_toml(&toml).resolve();

    env::remove_var(DATA_FOLDER_ENV);
    assert_eq!(resolved, PathBuf::from("/tmp/nutri-env"));
}

#[test]
#[serial]
fn data_folder_falls_back_to_compiled_default() {
    env::remove_var(DATA_FOLDER_ENV);

    let resolved = DataFolderResolver::new().resolve();
    assert_eq!(resolved, CompiledDefaults::for_current_platform().data_folder);
}

#[test]
#[serial]
fn config_path_from_env() {
    env::set_var(CONFIG_FILE_ENV, "/tmp/custom-nutri.toml");
    let resolved = resolve_config_path(None);
    env::remove_var(CONFIG_FILE_ENV);

    assert_eq!(resolved, PathBuf::from("/tmp/custom-nutri.toml"));
    assert_eq!(
        resolve_config_path(Some(Path::new("/tmp/cli.toml"))),
        PathBuf::from("/tmp/cli.toml")
    );
}
