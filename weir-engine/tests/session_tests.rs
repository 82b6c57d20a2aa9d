//! Session lifecycle integration tests
//!
//! Drive the session manager end to end with a scripted pipeline and an
//! in-memory sink: identity invariants, pause drain, terminal events,
//! concurrent session isolation.

mod helpers;

use bytes::Bytes;
use helpers::{build_manager, MockOutcome, MockPipelineFactory};
use std::time::Duration;
use weir_common::{EngineEvent, OutputProfile};
use weir_engine::error::Error;

fn chunk(tag: u8) -> Bytes {
    Bytes::from(vec![tag; 16])
}

#[tokio::test]
async fn test_stop_silences_identity() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, sink, _events) = build_manager(factory);

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();

    handle.chunk_tx.send(chunk(1)).await.unwrap();
    handle.chunk_tx.send(chunk(2)).await.unwrap();
    sink.wait_for_frames(2).await;

    manager.stop("g1").await.unwrap();
    let frames_at_stop = sink.frame_count();

    // The pipeline task is gone; injecting more audio must not surface.
    let _ = handle.chunk_tx.send(chunk(3)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sink.frame_count(), frames_at_stop);
    assert!(handle.calls().contains(&"stop".to_string()));
    assert!(matches!(
        manager.status("g1").await.unwrap_err(),
        Error::SessionNotFound(_)
    ));
}

#[tokio::test]
async fn test_restart_same_identity_replaces_pipeline() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, sink, _events) = build_manager(factory);

    manager
        .start("g1", "mock://first", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let first = handles.recv().await.unwrap();

    first.chunk_tx.send(chunk(1)).await.unwrap();
    sink.wait_for_frames(1).await;

    // Restart under the same identity.
    manager
        .start("g1", "mock://second", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let second = handles.recv().await.unwrap();

    // The old pipeline was stopped before the new one started.
    assert!(first.calls().contains(&"stop".to_string()));
    assert_eq!(manager.session_count().await, 1);

    // Audio injected into the dead pipeline never surfaces again.
    let frames_before = sink.frame_count();
    let _ = first.chunk_tx.send(chunk(9)).await;
    second.chunk_tx.send(chunk(2)).await.unwrap();
    sink.wait_for_frames(frames_before + 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames = sink.frames();
    let new_frames = &frames[frames_before..];
    assert!(new_frames.iter().all(|(id, c)| id == "g1" && c[0] == 2));
}

#[tokio::test]
async fn test_pause_drains_queued_audio() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, sink, _events) = build_manager(factory);

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();

    handle.chunk_tx.send(chunk(1)).await.unwrap();
    sink.wait_for_frames(1).await;

    // The marker goes in right before the pause; wherever it is queued when
    // the pause lands, it must never surface after the resume.
    handle.chunk_tx.send(chunk(0xAA)).await.unwrap();
    manager.pause("g1").await.unwrap();
    assert_eq!(
        manager.status("g1").await.unwrap().state.as_str(),
        "paused"
    );

    // Give anything already past the pipeline (in the pacing queue) time to
    // flush out before measuring the post-resume stream.
    tokio::time::sleep(Duration::from_millis(50)).await;

    manager.resume("g1").await.unwrap();
    let frames_at_resume = sink.frame_count();

    handle.chunk_tx.send(chunk(2)).await.unwrap();
    sink.wait_for_frames(frames_at_resume + 1).await;

    let frames = sink.frames();
    let post_resume = &frames[frames_at_resume..];
    assert!(
        post_resume.iter().all(|(_, c)| c[0] != 0xAA),
        "stale pre-pause chunk delivered after resume"
    );
    assert!(post_resume.iter().any(|(_, c)| c[0] == 2));
    assert_eq!(
        handle.calls().iter().filter(|c| *c == "pause").count(),
        1
    );
}

#[tokio::test]
async fn test_pause_requires_streaming_state() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, _sink, _events) = build_manager(factory);

    assert!(matches!(
        manager.pause("nope").await.unwrap_err(),
        Error::SessionNotFound(_)
    ));

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let _handle = handles.recv().await.unwrap();

    manager.pause("g1").await.unwrap();
    // Pausing a paused session is a state error, not a silent no-op.
    assert!(matches!(
        manager.pause("g1").await.unwrap_err(),
        Error::InvalidState(_)
    ));
    // And resume only applies to a paused session.
    manager.resume("g1").await.unwrap();
    assert!(matches!(
        manager.resume("g1").await.unwrap_err(),
        Error::InvalidState(_)
    ));
}

#[tokio::test]
async fn test_natural_completion_emits_one_finished_event() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, sink, events) = build_manager(factory);
    let mut rx = events.subscribe();

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();

    handle.chunk_tx.send(chunk(1)).await.unwrap();
    handle.chunk_tx.send(chunk(2)).await.unwrap();
    sink.wait_for_frames(2).await;
    drop(handle.chunk_tx); // end of stream

    // ready first, then exactly one terminal event, which is `finished`.
    let mut saw_ready = false;
    let terminal = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no terminal event")
            .unwrap();
        match event {
            EngineEvent::Ready { .. } => saw_ready = true,
            EngineEvent::Progress { .. } => {}
            other => break other,
        }
    };
    assert!(saw_ready, "ready must precede the terminal event");
    match terminal {
        EngineEvent::Finished { session_id, bytes, .. } => {
            assert_eq!(session_id, "g1");
            assert_eq!(bytes, 32); // two 16-byte chunks
        }
        other => panic!("expected finished, got {:?}", other),
    }

    // Terminal sessions leave the active set.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(manager.session_count().await, 0);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err(),
        "no second terminal event"
    );
}

#[tokio::test]
async fn test_pipeline_failure_emits_error_event() {
    let (factory, mut handles) =
        MockPipelineFactory::with_behavior(false, MockOutcome::ExitNonZero);
    let (manager, sink, events) = build_manager(factory);
    let mut rx = events.subscribe();

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();

    handle.chunk_tx.send(chunk(1)).await.unwrap();
    sink.wait_for_frames(1).await;
    drop(handle.chunk_tx); // process "dies"

    let terminal = loop {
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no terminal event")
            .unwrap();
        if event.is_terminal() {
            break event;
        }
    };
    match terminal {
        EngineEvent::Error { session_id, message, .. } => {
            assert_eq!(session_id, "g1");
            assert!(message.contains("non-zero"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_pipeline_death_is_an_error() {
    // Process starts, then dies before producing a single byte.
    let (factory, mut handles) = MockPipelineFactory::with_behavior(false, MockOutcome::NoOutput);
    let (manager, _sink, events) = build_manager(factory);
    let mut rx = events.subscribe();

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();
    drop(handle.chunk_tx);

    let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no terminal event")
        .unwrap();
    match event {
        EngineEvent::Error { message, .. } => assert!(message.contains("no output")),
        other => panic!("expected error event, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_failures_surface_on_control_plane() {
    // Extraction failure: no pipeline is ever created.
    let (factory, _handles) = MockPipelineFactory::new();
    let (manager, _sink, _events) = build_manager(factory);
    assert!(matches!(
        manager
            .start("g1", "mock://fail", OutputProfile::Pcm, 0.0)
            .await
            .unwrap_err(),
        Error::ExtractionFailed(_)
    ));
    assert_eq!(manager.session_count().await, 0);

    // Unsupported scheme: no adapter claims it.
    assert!(matches!(
        manager
            .start("g1", "gopher://nope", OutputProfile::Pcm, 0.0)
            .await
            .unwrap_err(),
        Error::UnsupportedSource(_)
    ));

    // Pipeline spawn failure.
    let (factory, _handles) = MockPipelineFactory::with_behavior(true, MockOutcome::Clean);
    let (manager, _sink, _events) = build_manager(factory);
    assert!(matches!(
        manager
            .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
            .await
            .unwrap_err(),
        Error::ProcessStartFailed(_)
    ));
    assert_eq!(manager.session_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_sessions_never_cross_identities() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, sink, _events) = build_manager(factory);

    manager
        .start("g1", "mock://one", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let h1 = handles.recv().await.unwrap();
    manager
        .start("g2", "mock://two", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let h2 = handles.recv().await.unwrap();

    for i in 0..5 {
        h1.chunk_tx.send(chunk(10 + i)).await.unwrap();
        h2.chunk_tx.send(chunk(20 + i)).await.unwrap();
    }
    sink.wait_for_frames(10).await;

    for (id, c) in sink.frames() {
        match id.as_str() {
            "g1" => assert!((10..15).contains(&c[0]), "g2 payload under g1 identity"),
            "g2" => assert!((20..25).contains(&c[0]), "g1 payload under g2 identity"),
            other => panic!("unexpected identity {}", other),
        }
    }

    // Order is preserved within each session.
    let g1_tags: Vec<u8> = sink
        .frames()
        .iter()
        .filter(|(id, _)| id == "g1")
        .map(|(_, c)| c[0])
        .collect();
    assert_eq!(g1_tags, vec![10, 11, 12, 13, 14]);

    assert_eq!(manager.session_count().await, 2);
}

#[tokio::test]
async fn test_progress_events_carry_increasing_bytes() {
    let (factory, mut handles) = MockPipelineFactory::new();
    let (manager, _sink, events) = build_manager(factory);
    let mut rx = events.subscribe();

    manager
        .start("g1", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .unwrap();
    let handle = handles.recv().await.unwrap();

    // Keep audio flowing across two progress intervals (1s in test config).
    let feeder = tokio::spawn(async move {
        for i in 0..22u8 {
            if handle.chunk_tx.send(chunk(i)).await.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        drop(handle.chunk_tx);
    });

    let mut progress_bytes = Vec::new();
    let terminal = loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event stream stalled")
            .unwrap();
        match event {
            EngineEvent::Progress { bytes, .. } => progress_bytes.push(bytes),
            event if event.is_terminal() => break event,
            _ => {}
        }
    };
    feeder.await.unwrap();

    assert!(
        progress_bytes.len() >= 2,
        "expected periodic progress, got {:?}",
        progress_bytes
    );
    assert!(
        progress_bytes.windows(2).all(|w| w[0] < w[1]),
        "bytes_sent must increase while streaming: {:?}",
        progress_bytes
    );
    assert!(matches!(terminal, EngineEvent::Finished { .. }));
}

#[tokio::test]
async fn test_identity_length_is_bounded() {
    let (factory, _handles) = MockPipelineFactory::new();
    let (manager, _sink, _events) = build_manager(factory);

    let long_id: String = std::iter::repeat('x')
        .take(weir_common::SESSION_ID_WIDTH + 1)
        .collect();
    assert!(matches!(
        manager
            .start(&long_id, "mock://song", OutputProfile::Pcm, 0.0)
            .await
            .unwrap_err(),
        Error::InvalidState(_)
    ));
    assert!(manager
        .start("", "mock://song", OutputProfile::Pcm, 0.0)
        .await
        .is_err());
}
