//! # Pipeline Tests: Submission, Completion and Output Layout
//!
//! Validates that one submit/wait cycle produces `aad || ciphertext || tag` in
//! the destination descriptor, that precondition violations never reach the
//! engine, and that a failed task is surfaced exactly once.

mod common;

use common::{inline_config, key_256, patterned, BufferRig, ScriptedEngine, IV, KEY_256};
use gcmx_core::{EngineConfig, ErrorCategory, ExecutionMode, GcmXError};
use gcmx_crypto::{open_frame, GcmCipher, KeyMaterial};
use gcmx_pipeline::{
    CompletionPump, EncryptParams, EncryptionEngine, ExecutionContext, OperationSubmitter,
    SoftwareEngine,
};
use std::time::{Duration, Instant};

/// Runs `rounds` submit/wait cycles over one descriptor pair and returns each output.
fn encrypt_rounds(
    config: &EngineConfig,
    plaintext: &[u8],
    params: EncryptParams,
    rounds: usize,
) -> Vec<Vec<u8>> {
    let mut rig = BufferRig::new(plaintext, plaintext.len() + params.tag_size);
    let mut ctx = ExecutionContext::new("03:00.0", SoftwareEngine::new(config));
    let key = ctx.create_key(&key_256()).unwrap();
    ctx.start().unwrap();

    let mut submitter = OperationSubmitter::new(params);
    let mut pump = CompletionPump::with_poll_interval(Duration::from_micros(1));
    let mut outputs = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        rig.pool.set_data(rig.src, 0, plaintext.len()).unwrap();
        rig.pool.reset_data_len(rig.dst).unwrap();
        let op = submitter
            .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
            .unwrap();
        submitter.wait(op, &mut ctx, &mut pump, &mut rig.pool).unwrap();
        outputs.push(rig.dst_bytes());
    }
    assert_eq!(submitter.submitted(), rounds as u64);

    ctx.stop().unwrap();
    assert!(pump.drain(&mut ctx).unwrap().is_empty());
    ctx.destroy_key(key).unwrap();
    ctx.destroy().unwrap();
    rig.release();
    outputs
}

fn decrypt(frame: &[u8], aad: usize, tag: usize) -> Vec<u8> {
    let gcm = GcmCipher::new(&KeyMaterial::from_raw(&KEY_256).unwrap()).unwrap();
    let mut plaintext = vec![0u8; frame.len() - tag];
    open_frame(&gcm, &IV, aad, tag, frame, &mut plaintext).unwrap();
    plaintext
}

/// The destination holds ciphertext followed by the tag and decrypts back.
#[test]
fn test_encrypt_roundtrip() {
    let t = Instant::now();

    let plaintext = patterned(1024);
    let outputs = encrypt_rounds(&inline_config(), &plaintext, EncryptParams::new(&IV, 16, 0), 1);
    let frame = &outputs[0];
    assert_eq!(frame.len(), 1024 + 16);
    assert_ne!(&frame[..1024], &plaintext[..]);
    assert_eq!(decrypt(frame, 0, 16), plaintext);

    println!("test_encrypt_roundtrip: Testing Overhead = {:?}", t.elapsed());
}

/// Reusing the descriptors with a fixed key and IV yields identical output.
#[test]
fn test_iterations_are_deterministic() {
    let plaintext = patterned(4096);
    let outputs = encrypt_rounds(&inline_config(), &plaintext, EncryptParams::new(&IV, 16, 0), 3);
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
}

/// Inline and offload execution produce byte-identical frames.
#[test]
fn test_offload_matches_inline() {
    let t = Instant::now();

    let plaintext = patterned(64 * 1024);
    let offload = EngineConfig {
        mode: ExecutionMode::Offload,
        ..EngineConfig::default()
    };
    let params = EncryptParams::new(&IV, 12, 32);
    let inline_out = encrypt_rounds(&inline_config(), &plaintext, params.clone(), 2);
    let offload_out = encrypt_rounds(&offload, &plaintext, params, 2);
    assert_eq!(inline_out, offload_out);
    assert_eq!(offload_out[0].len(), 64 * 1024 + 12);

    println!("test_offload_matches_inline: Testing Overhead = {:?}", t.elapsed());
}

/// The AAD prefix is copied in the clear; a 96-bit tag shortens the frame.
#[test]
fn test_aad_prefix_and_short_tag() {
    let plaintext = patterned(512);
    let outputs = encrypt_rounds(&inline_config(), &plaintext, EncryptParams::new(&IV, 12, 16), 1);
    let frame = &outputs[0];
    assert_eq!(frame.len(), 512 + 12);
    assert_eq!(&frame[..16], &plaintext[..16]);
    assert_ne!(&frame[16..512], &plaintext[16..]);
    assert_eq!(decrypt(frame, 16, 12), plaintext);
}

/// Invalid parameters are rejected before anything is pinned or submitted.
#[test]
fn test_precondition_violations() {
    let t = Instant::now();

    let cases = [
        ("tag size", 256, 256 + 16, EncryptParams::new(&IV, 8, 0)),
        ("iv length", 256, 256 + 16, EncryptParams::new(&[0u8; 16], 16, 0)),
        ("aad beyond input", 64, 64 + 16, EncryptParams::new(&IV, 16, 65)),
        ("aad beyond engine", 2048, 2048 + 16, EncryptParams::new(&IV, 16, 1025)),
        ("dst tail room", 256, 256 + 15, EncryptParams::new(&IV, 16, 0)),
    ];

    for (name, len, dst_capacity, params) in cases {
        let mut rig = BufferRig::new(&patterned(len), dst_capacity);
        let mut ctx = ExecutionContext::new("03:00.0", ScriptedEngine::new(&inline_config()));
        let key = ctx.create_key(&key_256()).unwrap();
        ctx.start().unwrap();

        let mut submitter = OperationSubmitter::new(params);
        let err = submitter
            .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::InvalidArgument, "{name}: {err}");
        assert_eq!(ctx.engine().submissions(), 0, "{name}");
        assert_eq!(submitter.submitted(), 0, "{name}");
        assert_eq!(rig.pool.ref_count(rig.src).unwrap(), 1, "{name}");
        assert_eq!(rig.pool.ref_count(rig.dst).unwrap(), 1, "{name}");

        ctx.stop().unwrap();
        ctx.destroy_key(key).unwrap();
        ctx.destroy().unwrap();
        rig.release();
    }

    println!("test_precondition_violations: Testing Overhead = {:?}", t.elapsed());
}

/// An empty source window is never submitted.
#[test]
fn test_empty_source_rejected() {
    let mut rig = BufferRig::new(&patterned(64), 64 + 16);
    rig.pool.set_data(rig.src, 0, 0).unwrap();
    let mut ctx = ExecutionContext::new("03:00.0", ScriptedEngine::new(&inline_config()));
    let key = ctx.create_key(&key_256()).unwrap();
    ctx.start().unwrap();

    let mut submitter = OperationSubmitter::new(EncryptParams::new(&IV, 16, 0));
    let err = submitter
        .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
        .unwrap_err();
    assert!(matches!(err, GcmXError::InvalidArgument(_)));
    assert_eq!(ctx.engine().submissions(), 0);

    ctx.stop().unwrap();
    ctx.destroy().unwrap();
    rig.release();
}

/// A payload above the engine limit fails with BufferTooLarge.
#[test]
fn test_payload_above_engine_limit() {
    let config = EngineConfig {
        max_buffer_size: 512,
        ..inline_config()
    };
    let mut rig = BufferRig::new(&patterned(1024), 1024 + 16);
    let mut ctx = ExecutionContext::new("03:00.0", ScriptedEngine::new(&config));
    let key = ctx.create_key(&key_256()).unwrap();
    ctx.start().unwrap();

    let mut submitter = OperationSubmitter::new(EncryptParams::new(&IV, 16, 0));
    let err = submitter
        .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
        .unwrap_err();
    assert!(matches!(err, GcmXError::BufferTooLarge { len: 1024, max: 512 }));
    assert_eq!(ctx.engine().submissions(), 0);

    ctx.stop().unwrap();
    ctx.destroy().unwrap();
    rig.release();
}

/// A failed completion is reported once, unpins both descriptors and is not retried.
#[test]
fn test_task_failure_is_not_retried() {
    let t = Instant::now();

    let mut rig = BufferRig::new(&patterned(256), 256 + 16);
    let engine = ScriptedEngine::new(&inline_config()).failing(1);
    let mut ctx = ExecutionContext::new("03:00.0", engine);
    let key = ctx.create_key(&key_256()).unwrap();
    ctx.start().unwrap();

    let mut submitter = OperationSubmitter::new(EncryptParams::new(&IV, 16, 0));
    let mut pump = CompletionPump::with_poll_interval(Duration::ZERO);
    let op = submitter
        .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
        .unwrap();
    let err = submitter.wait(op, &mut ctx, &mut pump, &mut rig.pool).unwrap_err();

    match &err {
        GcmXError::EncryptionTaskFailed {
            task_id,
            status,
            description,
        } => {
            assert_eq!(*task_id, 1);
            assert_eq!(*status, -5);
            assert_eq!(description, "injected engine fault");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(ctx.engine().submissions(), 1);
    assert_eq!(rig.pool.ref_count(rig.src).unwrap(), 1);
    assert_eq!(rig.pool.ref_count(rig.dst).unwrap(), 1);
    assert_eq!(rig.pool.data_len(rig.dst).unwrap(), 0, "no output recorded");
    assert_eq!(ctx.in_flight(), 0);

    ctx.stop().unwrap();
    ctx.destroy_key(key).unwrap();
    ctx.destroy().unwrap();
    rig.release();

    println!("test_task_failure_is_not_retried: Testing Overhead = {:?}", t.elapsed());
}

/// Every empty poll is counted and followed by one idle step.
#[test]
fn test_pump_counts_idle_polls() {
    let mut rig = BufferRig::new(&patterned(128), 128 + 16);
    let mut ctx = ExecutionContext::new(
        "03:00.0",
        ScriptedEngine::new(&inline_config()).delayed(4),
    );
    let key = ctx.create_key(&key_256()).unwrap();
    ctx.start().unwrap();

    let mut submitter = OperationSubmitter::new(EncryptParams::new(&IV, 16, 0));
    let mut pump = CompletionPump::with_poll_interval(Duration::ZERO);
    let op = submitter
        .submit_encrypt(&mut ctx, &mut rig.pool, rig.src, rig.dst, key)
        .unwrap();
    assert_eq!(submitter.wait(op, &mut ctx, &mut pump, &mut rig.pool).unwrap(), 144);

    let stats = pump.stats();
    assert_eq!(stats.completions, 1);
    assert_eq!(stats.idle_polls, 4);
    assert_eq!(stats.polls, 5);
    assert_eq!(pump.parked(), 0);
    assert_eq!(ctx.engine().name(), "scripted");

    ctx.stop().unwrap();
    ctx.destroy().unwrap();
    rig.release();
}
