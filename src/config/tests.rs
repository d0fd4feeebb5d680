use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
    assert_eq!(settings.render.font_size, DEFAULT_FONT_SIZE);
    assert_eq!(settings.render.text_color, Color::BLACK);
    assert_eq!(settings.render.remote_concurrency.get(), 12);
    assert_eq!(settings.render.math_concurrency, 0);
    assert_eq!(settings.render.fetch_timeout, Duration::from_secs(30));
    assert!(settings.render.user_agent.starts_with("mathmark/"));
    assert!(settings.render.katex_validation);
    assert!(!settings.render.png_round_trip);
    assert_eq!(settings.cache.max_items.get(), 200);
    assert_eq!(settings.cache.max_bytes.get(), 100 * 1024 * 1024);
    assert!(settings.resources.directory.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("info".to_string());
    raw.render.math_concurrency = Some(2);

    raw.apply_logging_overrides(&LoggingOverrides {
        log_level: Some("debug".to_string()),
        log_json: Some(true),
    });
    raw.apply_render_overrides(&RenderOverrides {
        math_concurrency: Some(8),
        text_color: Some("#ff000080".to_string()),
        resources_dir: Some(PathBuf::from("assets")),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert!(matches!(settings.logging.format, LogFormat::Json));
    assert_eq!(settings.render.math_concurrency, 8);
    assert_eq!(settings.render.text_color, Color::rgba(255, 0, 0, 128));
    assert_eq!(settings.resources.directory, Some(PathBuf::from("assets")));
}

#[test]
fn rejects_zero_bounds() {
    let mut raw = RawSettings::default();
    raw.cache.max_items = Some(0);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "cache.max_items"),
        other => panic!("unexpected result: {other:?}"),
    }

    let mut raw = RawSettings::default();
    raw.render.remote_concurrency = Some(0);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "render.remote_concurrency"),
        other => panic!("unexpected result: {other:?}"),
    }
}

#[test]
fn rejects_bad_colour_and_font_size() {
    let mut raw = RawSettings::default();
    raw.render.text_color = Some("red".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "render.text_color",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.render.font_size = Some(-1.0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "render.font_size",
            ..
        })
    ));
}

#[test]
fn rejects_unparseable_log_level() {
    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));
}

#[test]
fn blank_user_agent_falls_back_to_default() {
    let mut raw = RawSettings::default();
    raw.render.user_agent = Some("   ".to_string());
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.render.user_agent, DEFAULT_USER_AGENT);
}

#[test]
fn config_file_is_layered_under_cli() {
    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("settings.toml");
    std::fs::write(
        &path,
        "[render]\nfont_size = 22.5\nmath_concurrency = 3\n\n[cache]\nmax_items = 7\n",
    )
    .expect("write config");

    let cli = CliArgs::parse_from([
        "mathmark",
        "--config-file",
        path.to_str().expect("utf-8 path"),
        "render",
        "doc.md",
        "--math-concurrency",
        "5",
    ]);
    let settings = load(&cli).expect("settings load");

    assert_eq!(settings.render.font_size, 22.5);
    assert_eq!(settings.render.math_concurrency, 5);
    assert_eq!(settings.cache.max_items.get(), 7);
}
