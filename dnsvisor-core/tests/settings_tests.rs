//! Settings loading, validation, and relocation tests.

use std::fs;
use std::path::PathBuf;

use dnsvisor_core::{CoreError, Settings};
use rstest::rstest;

// ---------------------------------------------------------------------------
// 1. Load
// ---------------------------------------------------------------------------

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings::load_at(&dir.path().join("absent.yaml")).expect("load");
    assert_eq!(settings, Settings::default());
    assert_eq!(settings.run_root, PathBuf::from("/run/dns/vrf"));
    assert_eq!(settings.snapshot_timeout().as_millis(), 1000);
}

#[test]
fn partial_file_overrides_only_named_keys() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dnsvisor.yaml");
    fs::write(
        &path,
        "run-root: /tmp/vrf\nsnapshot-timeout-ms: 250\nddclient:\n  cache-dir: /tmp/cache\n",
    )
    .expect("write");

    let settings = Settings::load_at(&path).expect("load");
    assert_eq!(settings.run_root, PathBuf::from("/tmp/vrf"));
    assert_eq!(settings.snapshot_timeout_ms, 250);
    assert_eq!(settings.ddclient.cache_dir, PathBuf::from("/tmp/cache"));
    assert_eq!(settings.ddclient.config_dir, PathBuf::from("/etc/ddclient"));
    assert_eq!(settings.system_resolv, PathBuf::from("/etc/resolv.conf"));
}

#[test]
fn empty_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dnsvisor.yaml");
    fs::write(&path, "\n").expect("write");
    assert_eq!(Settings::load_at(&path).expect("load"), Settings::default());
}

#[test]
fn corrupt_file_returns_parse_error_with_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dnsvisor.yaml");
    fs::write(&path, ": : corrupt : yaml : !!!\n  - broken: [unclosed").expect("write");

    let err = Settings::load_at(&path).unwrap_err();
    assert!(matches!(err, CoreError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("dnsvisor.yaml"));
}

#[rstest]
#[case("snapshot-timeout-ms: 0\n", "snapshot-timeout-ms")]
#[case("run-root: ''\n", "run-root")]
fn invalid_values_are_rejected(#[case] yaml: &str, #[case] key: &str) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("dnsvisor.yaml");
    fs::write(&path, yaml).expect("write");

    let err = Settings::load_at(&path).unwrap_err();
    assert!(matches!(err, CoreError::InvalidSettings(_)), "got: {err}");
    assert!(err.to_string().contains(key));
}

// ---------------------------------------------------------------------------
// 2. Relocation
// ---------------------------------------------------------------------------

#[test]
fn rooted_places_every_path_under_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = Settings::rooted(dir.path());
    for path in [
        &settings.run_root,
        &settings.system_resolv,
        &settings.system_hosts,
        &settings.dhcp_dir,
        &settings.ppp_dir,
        &settings.ddclient.config_dir,
        &settings.ddclient.cache_dir,
        &settings.ddclient.run_dir,
        &settings.config_cache,
        &settings.socket_path,
    ] {
        assert!(path.starts_with(dir.path()), "{} escapes root", path.display());
    }
    settings.validate().expect("rooted settings are valid");
}
