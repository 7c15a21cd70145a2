use super::*;

use std::{
    env, fs,
    time::{SystemTime, UNIX_EPOCH},
};

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn workflow_placeholder_and_blank_ids_are_not_configured() {
    let mut settings = Settings::default();
    assert!(!settings.is_workflow_configured());

    settings.workflow_id = Some("   ".into());
    assert!(!settings.is_workflow_configured());

    settings.workflow_id = Some("wf_replace_with_your_workflow".into());
    assert!(!settings.is_workflow_configured());

    settings.workflow_id = Some(" wf_68df4b13 ".into());
    assert_eq!(settings.configured_workflow_id(), Some("wf_68df4b13"));
}

#[test]
fn prefixed_env_override_wins_over_plain_name() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[
            ("CHATKIT_WORKFLOW_ID", "wf_plain"),
            ("APP__WORKFLOW_ID", "wf_prefixed"),
            ("CHATKIT_SESSION_ENDPOINT", "https://example.test/api/session"),
        ]),
    );

    assert_eq!(settings.workflow_id.as_deref(), Some("wf_prefixed"));
    assert_eq!(settings.session_endpoint, "https://example.test/api/session");
}

#[test]
fn unparseable_numeric_overrides_keep_defaults() {
    let mut settings = Settings::default();
    apply_env_overrides(
        &mut settings,
        lookup_from(&[
            ("APP__SCRIPT_TIMEOUT_MS", "soon"),
            ("APP__INITIALIZING_TIMEOUT_MS", "20000"),
            ("APP__ATTACHMENTS_ENABLED", "nope"),
            ("APP__COLOR_SCHEME", "dark"),
        ]),
    );

    assert_eq!(settings.script_timeout(), Duration::from_secs(5));
    assert_eq!(settings.initializing_timeout(), Duration::from_secs(20));
    assert!(settings.attachments_enabled);
    assert_eq!(settings.color_scheme, ColorScheme::Dark);
}

#[test]
fn settings_file_overrides_defaults() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let temp_root = env::temp_dir().join(format!("widget_bootstrap_config_test_{suffix}"));
    fs::create_dir_all(&temp_root).expect("temp root");
    let path = temp_root.join("widget.toml");
    fs::write(
        &path,
        r#"
greeting = "Hello there"
script_timeout_ms = 2500
color_scheme = "dark"

[[starter_prompts]]
label = "Plan"
prompt = "Help me plan my week"
"#,
    )
    .expect("write settings");

    let settings = load_settings_from(&path);

    assert_eq!(settings.greeting, "Hello there");
    assert_eq!(settings.script_timeout_ms, 2500);
    assert_eq!(settings.color_scheme, ColorScheme::Dark);
    assert_eq!(settings.starter_prompts.len(), 1);
    assert_eq!(settings.starter_prompts[0].icon, None);
    assert_eq!(settings.composer_placeholder, Settings::default().composer_placeholder);

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn missing_settings_file_falls_back_to_defaults() {
    let settings = load_settings_from(Path::new("/definitely/not/here/widget.toml"));
    assert_eq!(settings.greeting, Settings::default().greeting);
}

#[test]
fn session_endpoint_must_be_absolute_http() {
    assert!(prepare_session_endpoint("https://example.test/api/create-session").is_ok());
    assert!(prepare_session_endpoint("  http://127.0.0.1:3000/api  ").is_ok());
    assert!(prepare_session_endpoint("").is_err());
    assert!(prepare_session_endpoint("/api/create-session").is_err());
    assert!(prepare_session_endpoint("ftp://example.test/session").is_err());
}
