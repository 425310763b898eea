//! Callback routing tests
//!
//! Engine events go in through the scripted engine; the recording sink shows
//! what the caller is told, and in what order.

mod common;

use common::{Harness, Script};
use serde_json::{json, Value};
use ttsbridge::engine::EngineEvent;

fn methods(notifications: &[(String, Value)]) -> Vec<&str> {
    notifications
        .iter()
        .map(|(method, _)| method.as_str())
        .collect()
}

#[test]
fn test_plain_utterance_starts_and_completes() {
    let h = Harness::start(Script {
        auto_events: true,
        ..Script::default()
    })
    .ready();

    h.bridge.dispatcher().speak("hello").unwrap();

    let seen = h.shutdown();
    assert_eq!(methods(&seen), vec!["speak.onStart", "speak.onComplete"]);
    assert!(seen.iter().all(|(_, arguments)| *arguments == Value::Bool(true)));
}

#[test]
fn test_silence_lead_in_hides_its_completion() {
    let h = Harness::start(Script {
        auto_events: true,
        ..Script::default()
    })
    .ready();
    let dispatcher = h.bridge.dispatcher();

    assert!(dispatcher.set_silence(500).unwrap());
    dispatcher.speak("hello").unwrap();

    let seen = h.shutdown();
    assert_eq!(
        methods(&seen),
        vec!["speak.onStart", "speak.onStart", "speak.onComplete"]
    );
}

#[test]
fn test_silence_start_can_be_hidden() {
    let h = Harness::start_with(
        Script {
            auto_events: true,
            ..Script::default()
        },
        &[("events", "report_silence_start", "false")],
    )
    .ready();
    let dispatcher = h.bridge.dispatcher();

    assert!(dispatcher.set_silence(500).unwrap());
    dispatcher.speak("hello").unwrap();

    let seen = h.shutdown();
    assert_eq!(methods(&seen), vec!["speak.onStart", "speak.onComplete"]);
}

#[test]
fn test_events_follow_engine_order() {
    let h = Harness::start(Script::default()).ready();
    let dispatcher = h.bridge.dispatcher();

    assert!(dispatcher.set_silence(100).unwrap());
    let id = dispatcher.speak("hello").unwrap();
    let marker = ttsbridge::bridge::CorrelationId::silence_for(&id);

    h.probe.emit(EngineEvent::Started(marker.clone()));
    assert_eq!(h.next_notification(), Some(("speak.onStart".to_string(), json!(true))));

    h.probe.emit(EngineEvent::Done(marker));
    h.probe.emit(EngineEvent::Started(id.clone()));
    assert_eq!(h.next_notification(), Some(("speak.onStart".to_string(), json!(true))));

    h.probe.emit(EngineEvent::Done(id));
    assert_eq!(
        h.next_notification(),
        Some(("speak.onComplete".to_string(), json!(true)))
    );
    assert_eq!(h.next_notification(), None);
}

#[test]
fn test_error_payloads() {
    let h = Harness::start(Script::default()).ready();
    let id = h.bridge.dispatcher().speak("hello").unwrap();

    h.probe.emit(EngineEvent::Error(id.clone(), Some(-8)));
    h.probe
        .emit(EngineEvent::Error(ttsbridge::bridge::CorrelationId::silence_for(&id), None));

    let seen = h.shutdown();
    assert_eq!(
        seen,
        vec![
            (
                "speak.onError".to_string(),
                json!("Error from TextToSpeech - -8")
            ),
            ("speak.onError".to_string(), json!("Error from TextToSpeech")),
        ]
    );
}

#[test]
fn test_no_events_without_engine_activity() {
    let h = Harness::start(Script::default()).ready();
    let dispatcher = h.bridge.dispatcher();

    dispatcher.speak("queued").unwrap();
    dispatcher.stop().unwrap();

    assert!(h.shutdown().is_empty());
}

#[test]
fn test_many_utterances_keep_order() {
    let h = Harness::start(Script {
        auto_events: true,
        ..Script::default()
    })
    .ready();
    let dispatcher = h.bridge.dispatcher();

    for i in 0..20 {
        dispatcher.speak(&format!("utterance {}", i)).unwrap();
    }

    let seen = h.shutdown();
    assert_eq!(seen.len(), 40);
    for pair in seen.chunks(2) {
        assert_eq!(methods(pair), vec!["speak.onStart", "speak.onComplete"]);
    }
}
