//! # Configuration & Payload Tests
//!
//! Validates TOML loading, value validation, size-spec parsing, random payload
//! generation and the commit-or-vanish output sink.

use gcmx_core::{
    check_cancelled, generate_random_payload, parse_size, read_payload, BenchConfig,
    ErrorCategory, ExecutionMode, GcmXError, OutputSink,
};
use std::sync::atomic::AtomicBool;
use gcmx_crypto::KeyType;
use std::time::{Duration, Instant};

#[test]
fn test_defaults_are_valid() {
    let config = BenchConfig::default();
    config.validate().unwrap();

    assert_eq!(config.device, "03:00.0");
    assert_eq!(config.tag_size, 16);
    assert_eq!(config.duration(), Duration::from_secs(5));
    assert_eq!(config.poll_interval(), Duration::from_micros(10));
    assert_eq!(config.key_material().unwrap().key_type(), KeyType::Aes256);
    assert_eq!(config.iv().unwrap(), vec![0u8; 12]);
    assert_eq!(config.engine.mode, ExecutionMode::Offload);
}

/// Unspecified keys keep their defaults.
#[test]
fn test_partial_toml() {
    let t = Instant::now();

    let config = BenchConfig::from_toml_str(
        r#"
        device = "0000:81:00.1"
        key_hex = "000102030405060708090a0b0c0d0e0f"
        tag_size = 12
        payload_size = "10MB"
        output_path = "/tmp/gcmx-out.bin"

        [engine]
        mode = "inline"
        max_buffer_size = 16777216
        "#,
    )
    .unwrap();
    config.validate().unwrap();

    assert_eq!(config.key_material().unwrap().key_type(), KeyType::Aes128);
    assert_eq!(config.payload_bytes().unwrap(), 10 * 1024 * 1024);
    assert_eq!(config.engine.mode, ExecutionMode::Inline);
    assert_eq!(config.engine.queue_depth, 64);
    assert_eq!(config.aad_size, 0);
    assert_eq!(config.duration_ms, 5000);

    println!("test_partial_toml: Testing Overhead = {:?}", t.elapsed());
}

#[test]
fn test_malformed_toml() {
    let err = BenchConfig::from_toml_str("tag_size = \"sixteen\"").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Config);
}

#[test]
fn test_load_missing_file() {
    let err = BenchConfig::load("/nonexistent/gcmx.toml").unwrap_err();
    assert_eq!(err.category(), ErrorCategory::FileIo);
}

/// Each malformed value is rejected with a configuration error.
#[test]
fn test_validation_rejections() {
    let cases: [(&str, fn(&mut BenchConfig)); 12] = [
        ("device", |c: &mut BenchConfig| c.device = "03-00-0".into()),
        ("device function", |c: &mut BenchConfig| c.device = "03:00.8".into()),
        ("key hex", |c: &mut BenchConfig| c.key_hex = "zz".into()),
        ("key length", |c: &mut BenchConfig| c.key_hex = "00".repeat(24)),
        ("iv length", |c: &mut BenchConfig| c.iv_hex = "00".repeat(16)),
        ("tag size", |c: &mut BenchConfig| c.tag_size = 8),
        ("aad size", |c: &mut BenchConfig| c.aad_size = c.engine.max_aad_size + 1),
        ("payload", |c: &mut BenchConfig| c.payload_size = "0B".into()),
        ("payload unit", |c: &mut BenchConfig| c.payload_size = "10XB".into()),
        ("duration", |c: &mut BenchConfig| c.duration_ms = 0),
        ("queue depth", |c: &mut BenchConfig| c.engine.queue_depth = 48),
        ("max buffer", |c: &mut BenchConfig| c.engine.max_buffer_size = 0),
    ];

    for (name, mutate) in cases {
        let mut config = BenchConfig::default();
        mutate(&mut config);
        let err = config.validate().expect_err(name);
        assert_eq!(err.category(), ErrorCategory::Config, "{name}: {err}");
    }
}

#[test]
fn test_parse_size() {
    assert_eq!(parse_size("1B").unwrap(), 1);
    assert_eq!(parse_size("4K").unwrap(), 4096);
    assert_eq!(parse_size("4KB").unwrap(), 4096);
    assert_eq!(parse_size("10MB").unwrap(), 10 << 20);
    assert_eq!(parse_size("3M").unwrap(), 3 << 20);
    assert_eq!(parse_size("1G").unwrap(), 1 << 30);
    assert_eq!(parse_size("2GB").unwrap(), 2 << 30);

    for bad in ["10", "MB", "10kb", "1.5MB", "-1MB", "10 MB", "", "99999999999999999999G"] {
        let err = parse_size(bad).unwrap_err();
        assert!(matches!(err, GcmXError::Config(_)), "{bad:?} -> {err}");
    }
}

#[test]
fn test_execution_mode_parsing() {
    assert_eq!("inline".parse::<ExecutionMode>().unwrap(), ExecutionMode::Inline);
    assert_eq!("Offload".parse::<ExecutionMode>().unwrap(), ExecutionMode::Offload);
    assert!("dpu".parse::<ExecutionMode>().is_err());
}

/// The generated payload has the requested size and is not a constant pattern.
#[test]
fn test_random_payload_roundtrip() {
    let t = Instant::now();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("payload.bin");

    generate_random_payload(&path, 200_000).unwrap();
    let first = read_payload(&path).unwrap();
    assert_eq!(first.len(), 200_000);

    generate_random_payload(&path, 1024).unwrap();
    let second = read_payload(&path).unwrap();
    assert_eq!(second.len(), 1024, "regeneration truncates the previous payload");
    assert_ne!(first[..1024], second[..]);

    let err = read_payload(dir.path().join("missing.bin")).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::FileIo);

    println!("test_random_payload_roundtrip: Testing Overhead = {:?}", t.elapsed());
}

/// Nothing appears at the target until commit; commit overwrites.
#[test]
fn test_output_sink_commit_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    std::fs::write(&target, b"stale output from a previous run").unwrap();

    {
        let mut sink = OutputSink::create(&target).unwrap();
        sink.write_all(b"never committed").unwrap();
    }
    assert_eq!(std::fs::read(&target).unwrap(), b"stale output from a previous run");
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1, "temp file removed");

    let mut sink = OutputSink::create(&target).unwrap();
    sink.write_all(b"ciphertext").unwrap();
    sink.write_all(b"||tag").unwrap();
    assert_eq!(sink.commit().unwrap(), target);
    assert_eq!(std::fs::read(&target).unwrap(), b"ciphertext||tag");
}

#[test]
fn test_output_sink_unwritable() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("missing-dir").join("out.bin");

    let err = OutputSink::create(&target).map(|_| ()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::FileIo);
    assert!(!target.exists());
}

/// An existing directory at the output path is refused up front, not at commit.
#[test]
fn test_output_sink_target_is_directory() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    std::fs::create_dir(&target).unwrap();

    let err = OutputSink::create(&target).map(|_| ()).unwrap_err();
    assert_eq!(err.category(), ErrorCategory::FileIo);
    assert!(target.is_dir());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1, "no temp file left");
}

/// An existing writable target is checked without being truncated.
#[test]
fn test_output_sink_existing_target_untouched_until_commit() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.bin");
    std::fs::write(&target, b"previous").unwrap();

    let sink = OutputSink::create(&target).unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"previous");
    drop(sink);
    assert_eq!(std::fs::read(&target).unwrap(), b"previous");
}

#[test]
fn test_cancel_check() {
    let flag = AtomicBool::new(false);
    check_cancelled(&flag, "payload generation").unwrap();

    flag.store(true, std::sync::atomic::Ordering::SeqCst);
    let err = check_cancelled(&flag, "payload generation").unwrap_err();
    assert!(matches!(err, GcmXError::Cancelled { stage: "payload generation" }));
    assert_eq!(err.category(), ErrorCategory::Cancelled);
}
