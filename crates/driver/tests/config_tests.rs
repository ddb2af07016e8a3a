//! Integration tests for configuration parsing
//!
//! Covers full and minimal driver configs, save/load round trips through
//! the filesystem, and rejection of invalid values.

use driver::config::{DriverConfig, load_config};
use std::time::Duration;
use tempfile::TempDir;

const FULL_CONFIG: &str = r#"
[driver]
log_level = "debug"
node_prefix = "leds"

[usb]
id_table = ["0x0477:0x5620", "0x0483:*"]
interface = 1
detach_kernel_driver = false
max_pending_writes = 4

[transfer]
read_timeout_per_interval_ms = 50
min_read_timeout_ms = 20
write_timeout_ms = 500
"#;

#[test]
fn test_full_config() {
    let config: DriverConfig = toml::from_str(FULL_CONFIG).unwrap();
    config.validate().unwrap();

    assert_eq!(config.driver.log_level, "debug");
    assert_eq!(config.driver.node_prefix, "leds");
    assert_eq!(config.usb.id_table.len(), 2);
    assert_eq!(config.usb.interface, 1);
    assert!(!config.usb.detach_kernel_driver);

    let settings = config.usb_settings();
    assert_eq!(settings.open.interface, 1);
    assert_eq!(settings.open.max_pending_writes, 4);
    assert_eq!(settings.open.write_timeout, Duration::from_millis(500));

    let timeouts = config.transfer_timeouts();
    assert_eq!(timeouts.read_timeout(4), Duration::from_millis(200));
    assert_eq!(timeouts.read_timeout(0), Duration::from_millis(20));
}

#[test]
fn test_empty_file_is_default() {
    let config: DriverConfig = toml::from_str("").unwrap();
    assert_eq!(config, DriverConfig::default());
}

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("driver.toml");

    let mut config = DriverConfig::default();
    config.driver.node_prefix = "board".to_string();
    config.transfer.min_read_timeout_ms = 300;
    config.save(&path).unwrap();

    let loaded = DriverConfig::load(Some(path.clone())).unwrap();
    assert_eq!(loaded, config);

    let via_cli = load_config(path.to_str().unwrap()).unwrap();
    assert_eq!(via_cli, config);
}

#[test]
fn test_missing_file_is_error() {
    let dir = TempDir::new().unwrap();
    let result = DriverConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let dir = TempDir::new().unwrap();

    let cases = [
        "[driver]\nlog_level = \"loud\"\n",
        "[usb]\nid_table = [\"0477:5620\"]\n",
        "[usb]\nid_table = []\n",
        "[usb]\nmax_pending_writes = 0\n",
        "[transfer]\nwrite_timeout_ms = 0\n",
        "[driver\n",
    ];

    for (i, content) in cases.iter().enumerate() {
        let path = dir.path().join(format!("bad{}.toml", i));
        std::fs::write(&path, content).unwrap();
        assert!(
            DriverConfig::load(Some(path)).is_err(),
            "accepted: {:?}",
            content
        );
    }
}

#[test]
fn test_default_path_location() {
    let path = DriverConfig::default_path();
    assert!(path.ends_with("stm32leds/driver.toml"));
}
