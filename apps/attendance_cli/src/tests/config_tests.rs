use std::{
    collections::HashMap,
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

use super::{apply_env, apply_file, load_settings, validate, Settings};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_poll_every_fifteen_seconds() {
    let settings = Settings::default();
    assert_eq!(settings.refresh_interval_secs, 15);
    assert_eq!(settings.token, None);
    assert!(validate(&settings).is_ok());
}

#[test]
fn file_overrides_defaults() {
    let mut settings = Settings::default();
    apply_file(
        &mut settings,
        r#"
api_base_url = "https://sekolah.example/api"
refresh_interval_secs = 30
default_latitude = -6.2
default_longitude = 106.8
"#,
    )
    .expect("apply file");

    assert_eq!(settings.api_base_url, "https://sekolah.example/api");
    assert_eq!(settings.refresh_interval_secs, 30);
    assert_eq!(settings.geolocation_timeout_secs, 10);
    assert_eq!(settings.default_latitude, Some(-6.2));
    assert_eq!(settings.default_longitude, Some(106.8));
}

#[test]
fn file_cannot_carry_tokens_or_unknown_keys() {
    let mut settings = Settings::default();
    assert!(apply_file(&mut settings, "token = \"abc\"").is_err());
    assert!(apply_file(&mut settings, "refresh_interval = 5").is_err());
}

#[test]
fn env_overrides_file() {
    let mut settings = Settings::default();
    apply_file(&mut settings, "api_base_url = \"https://file.example/api\"").expect("file");
    apply_env(
        &mut settings,
        lookup_from(&[
            ("ATTENDANCE_API_URL", "https://env.example/api"),
            ("APP__REFRESH_INTERVAL_SECS", "5"),
            ("APP__DEFAULT_LATITUDE", "-7.25"),
            ("ATTENDANCE_TOKEN", "token-from-env"),
        ]),
    )
    .expect("env");

    assert_eq!(settings.api_base_url, "https://env.example/api");
    assert_eq!(settings.refresh_interval_secs, 5);
    assert_eq!(settings.default_latitude, Some(-7.25));
    assert_eq!(settings.token.as_deref(), Some("token-from-env"));
}

#[test]
fn app_prefixed_env_wins_over_short_name() {
    let mut settings = Settings::default();
    apply_env(
        &mut settings,
        lookup_from(&[
            ("APP__API_BASE_URL", "https://app.example/api"),
            ("ATTENDANCE_API_URL", "https://short.example/api"),
        ]),
    )
    .expect("env");
    assert_eq!(settings.api_base_url, "https://app.example/api");
}

#[test]
fn invalid_env_number_is_reported() {
    let mut settings = Settings::default();
    let err = apply_env(
        &mut settings,
        lookup_from(&[("APP__HTTP_TIMEOUT_SECS", "soon")]),
    )
    .expect_err("invalid number");
    assert!(err.to_string().contains("APP__HTTP_TIMEOUT_SECS"));
}

#[test]
fn zero_refresh_interval_is_rejected() {
    let settings = Settings {
        refresh_interval_secs: 0,
        ..Settings::default()
    };
    assert!(validate(&settings).is_err());
}

#[test]
fn explicit_config_path_must_exist_and_is_loaded() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("attendance_cli_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");

    let missing = temp_root.join("missing.toml");
    assert!(load_settings(Some(&missing)).is_err());

    let path = temp_root.join("attendance.toml");
    fs::write(&path, "geolocation_timeout_secs = 3\n").expect("write config");
    let settings = load_settings(Some(&path)).expect("load");
    assert_eq!(settings.geolocation_timeout_secs, 3);

    fs::remove_dir_all(temp_root).expect("cleanup");
}
