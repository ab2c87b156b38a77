use ocr_dispatch::config::{Config, DEFAULT_MAX_QUEUE_SIZE};

#[test]
fn parse_example_config() {
    let raw = include_str!("../ocr-dispatch.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.engine.kind, "tesseract");
    assert_eq!(cfg.pool.max_queue_size, 100);
    assert!(cfg.dispatch.extended_timeout_ms > cfg.dispatch.default_timeout_ms);
    assert!(cfg.postprocess.control_chars_to_sanitize.contains(&12));
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[pool]\nnum_workers = 3\nmax_queue_size = 7\n").expect("parse TOML");
    assert_eq!(cfg.resolved_workers(), 3);
    assert_eq!(cfg.resolved_queue_size(), 7);
    assert_eq!(cfg.dispatch.default_timeout_ms, 30_000);
    assert_eq!(cfg.engine.language, "eng");
}

#[test]
fn zero_values_are_resolved() {
    let mut cfg = Config::default();
    cfg.pool.num_workers = 0;
    cfg.pool.max_queue_size = 0;
    assert!(cfg.resolved_workers() >= 4);
    assert_eq!(cfg.resolved_queue_size(), DEFAULT_MAX_QUEUE_SIZE);
}
