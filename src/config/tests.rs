use clap::Parser;

use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.storage.cache_dir = Some(PathBuf::from("/var/cache/from-file"));
    raw.logging.level = Some("info".to_string());

    let overrides = GlobalOverrides {
        cache_dir: Some(PathBuf::from("/tmp/from-cli")),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_global_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.storage.cache_dir, Path::new("/tmp/from-cli"));
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.storage.cache_dir, Path::new(DEFAULT_CACHE_DIR));
    assert_eq!(settings.storage.state_dir, Path::new(DEFAULT_STATE_DIR));
    assert!(settings.content.manifest.is_none());
    assert_eq!(settings.scheduler.preload_tick, Duration::from_secs(60));
    assert_eq!(settings.scheduler.gc_batch_size.get(), 100);
    assert!(settings.scheduler.stats_every_gc_pass);
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_global_overrides(&GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn invalid_values_name_their_key() {
    let mut raw = RawSettings::default();
    raw.scheduler.preload_tick_seconds = Some(0);
    match Settings::from_raw(raw) {
        Err(LoadError::Invalid { key, .. }) => assert_eq!(key, "scheduler.preload_tick_seconds"),
        other => panic!("expected invalid tick, got {other:?}"),
    }

    let mut raw = RawSettings::default();
    raw.logging.level = Some("loud".to_string());
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "logging.level",
            ..
        })
    ));

    let mut raw = RawSettings::default();
    raw.storage.cache_dir = Some(PathBuf::from("same"));
    raw.storage.state_dir = Some(PathBuf::from("same"));
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid {
            key: "storage.state_dir",
            ..
        })
    ));
}

#[test]
fn run_overrides_apply_to_the_scheduler() {
    let args = CliArgs::parse_from([
        "supercache",
        "run",
        "--preload-tick-seconds",
        "5",
        "--gc-batch-size",
        "25",
    ]);
    let mut raw = RawSettings::default();
    match &args.command {
        Command::Run(run) => raw.apply_run_overrides(run),
        other => panic!("wrong command parsed: {other:?}"),
    }
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.scheduler.preload_tick, Duration::from_secs(5));
    assert_eq!(settings.scheduler.gc_batch_size.get(), 25);
}

#[test]
fn parse_flush_arguments() {
    let args = CliArgs::parse_from(["supercache", "flush", "--post-id", "42"]);
    match args.command {
        Command::Flush(flush) => {
            assert_eq!(flush.post_id.as_deref(), Some("42"));
            assert!(flush.permalink.is_none());
        }
        other => panic!("wrong command parsed: {other:?}"),
    }

    let args = CliArgs::parse_from(["supercache", "flush"]);
    assert!(matches!(
        args.command,
        Command::Flush(FlushArgs {
            post_id: None,
            permalink: None
        })
    ));
}

#[test]
fn flush_selectors_are_mutually_exclusive() {
    let result = CliArgs::try_parse_from([
        "supercache",
        "flush",
        "--post-id",
        "1",
        "--permalink",
        "/hello/",
    ]);
    assert!(result.is_err());
}

#[test]
fn parse_preload_arguments() {
    let args = CliArgs::parse_from(["supercache", "preload", "--cancel"]);
    match args.command {
        Command::Preload(preload) => {
            assert!(preload.cancel);
            assert!(!preload.status);
        }
        other => panic!("wrong command parsed: {other:?}"),
    }

    assert!(CliArgs::try_parse_from(["supercache", "preload", "--status", "--cancel"]).is_err());
}

#[test]
fn global_flags_follow_the_subcommand() {
    let args = CliArgs::parse_from([
        "supercache",
        "status",
        "--state-dir",
        "/srv/state",
        "--log-json",
        "true",
    ]);
    assert!(matches!(args.command, Command::Status));
    assert_eq!(args.overrides.state_dir.as_deref(), Some(Path::new("/srv/state")));
    assert_eq!(args.overrides.log_json, Some(true));
}
