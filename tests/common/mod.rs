//! Shared test fixtures: a scripted engine that records what the bridge
//! asks of it, and a sink that records what the caller would see.

#![allow(dead_code)]

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use ttsbridge::bridge::CorrelationId;
use ttsbridge::config::BridgeConfig;
use ttsbridge::engine::{
    EngineEvent, EngineVoice, EventSender, LanguageAvailability, QueueMode, SpeechEngine,
    UtteranceParams,
};
use ttsbridge::language::LanguageTag;
use ttsbridge::{BridgeError, Result, TtsBridge};

/// Something the bridge asked the engine to do
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Speak {
        text: String,
        mode: QueueMode,
        volume: f32,
        id: CorrelationId,
    },
    Silence {
        duration: Duration,
        mode: QueueMode,
        id: CorrelationId,
    },
    Stop,
    Rate(f32),
    Pitch(f32),
    Language(String),
    Voice(String),
    Synthesize {
        text: String,
        id: CorrelationId,
        path: PathBuf,
    },
}

/// How the scripted engine behaves
#[derive(Clone)]
pub struct Script {
    /// Voice names with their language; `None` makes enumeration fail
    pub voices: Option<Vec<(&'static str, &'static str)>>,
    /// Delay before the engine reports ready
    pub init_delay: Duration,
    /// Make initialization fail with this reason
    pub init_error: Option<String>,
    /// Emit start/done for every utterance as soon as it is queued
    pub auto_events: bool,
    /// Whether file synthesis writes the file
    pub writes_file: bool,
    /// Whether file synthesis reports success
    pub synthesis_succeeds: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            voices: Some(vec![
                ("en-us-x-sfg-local", "en-US"),
                ("en-gb-x-rjs-local", "en-GB"),
                ("fr-fr-x-vlf-local", "fr-FR"),
            ]),
            init_delay: Duration::ZERO,
            init_error: None,
            auto_events: false,
            writes_file: true,
            synthesis_succeeds: true,
        }
    }
}

/// Test-side view of the scripted engine
#[derive(Clone)]
pub struct Probe {
    calls: Arc<Mutex<Vec<Call>>>,
    events: Arc<Mutex<Option<EventSender>>>,
}

impl Probe {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Emit an engine event as if it came from the engine's own thread
    pub fn emit(&self, event: EngineEvent) {
        let sender = self.events.lock().unwrap().clone();
        sender
            .expect("engine not initialized yet")
            .send(event)
            .unwrap();
    }

    /// Correlation ids of spoken utterances, in issue order
    pub fn spoken_ids(&self) -> Vec<CorrelationId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Speak { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }
}

pub struct ScriptedEngine {
    script: Script,
    calls: Arc<Mutex<Vec<Call>>>,
    events: EventSender,
}

impl ScriptedEngine {
    /// Factory for `TtsBridge::start` plus the probe to observe the engine
    pub fn factory(
        script: Script,
    ) -> (
        impl FnOnce(EventSender) -> Result<Box<dyn SpeechEngine>> + Send + 'static,
        Probe,
    ) {
        let probe = Probe {
            calls: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(None)),
        };

        let calls = Arc::clone(&probe.calls);
        let slot = Arc::clone(&probe.events);
        let factory = move |events: EventSender| -> Result<Box<dyn SpeechEngine>> {
            thread::sleep(script.init_delay);
            if let Some(reason) = &script.init_error {
                return Err(BridgeError::EngineInit(reason.clone()));
            }
            *slot.lock().unwrap() = Some(events.clone());
            Ok(Box::new(ScriptedEngine {
                script,
                calls,
                events,
            }))
        };

        (factory, probe)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn tags(&self) -> Result<Vec<LanguageTag>> {
        let voices = self
            .script
            .voices
            .as_ref()
            .ok_or_else(|| BridgeError::Engine("voices unavailable".into()))?;
        Ok(voices
            .iter()
            .filter_map(|(_, language)| LanguageTag::parse(language))
            .collect())
    }

    fn auto(&self, id: &CorrelationId) {
        if self.script.auto_events {
            let _ = self.events.send(EngineEvent::Started(id.clone()));
            let _ = self.events.send(EngineEvent::Done(id.clone()));
        }
    }
}

impl SpeechEngine for ScriptedEngine {
    fn speak(
        &mut self,
        text: &str,
        mode: QueueMode,
        params: &UtteranceParams,
        id: &CorrelationId,
    ) -> Result<()> {
        self.record(Call::Speak {
            text: text.to_string(),
            mode,
            volume: params.volume,
            id: id.clone(),
        });
        self.auto(id);
        Ok(())
    }

    fn play_silence(
        &mut self,
        duration: Duration,
        mode: QueueMode,
        id: &CorrelationId,
    ) -> Result<()> {
        self.record(Call::Silence {
            duration,
            mode,
            id: id.clone(),
        });
        self.auto(id);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.record(Call::Stop);
        Ok(())
    }

    fn set_speech_rate(&mut self, rate: f32) -> Result<()> {
        self.record(Call::Rate(rate));
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        self.record(Call::Pitch(pitch));
        Ok(())
    }

    fn language_availability(&self, tag: &LanguageTag) -> LanguageAvailability {
        match self.tags() {
            Ok(tags) => LanguageAvailability::among(tag, &tags),
            Err(_) => LanguageAvailability::NotSupported,
        }
    }

    fn set_language(&mut self, tag: &LanguageTag) -> Result<()> {
        self.record(Call::Language(tag.to_string()));
        Ok(())
    }

    fn languages(&self) -> Result<Vec<LanguageTag>> {
        self.tags()
    }

    fn voices(&self) -> Result<Vec<EngineVoice>> {
        let voices = self
            .script
            .voices
            .as_ref()
            .ok_or_else(|| BridgeError::Engine("voices unavailable".into()))?;
        Ok(voices
            .iter()
            .map(|(name, language)| EngineVoice {
                name: name.to_string(),
                language: LanguageTag::parse(language),
            })
            .collect())
    }

    fn set_voice(&mut self, voice: &EngineVoice) -> Result<()> {
        self.record(Call::Voice(voice.name.clone()));
        Ok(())
    }

    fn synthesize_to_file(
        &mut self,
        text: &str,
        _params: &UtteranceParams,
        id: &CorrelationId,
        path: &Path,
    ) -> Result<()> {
        self.record(Call::Synthesize {
            text: text.to_string(),
            id: id.clone(),
            path: path.to_path_buf(),
        });
        if self.script.writes_file {
            std::fs::write(path, b"RIFF")?;
        }
        if self.script.synthesis_succeeds {
            Ok(())
        } else {
            Err(BridgeError::Engine("synthesis error -1".into()))
        }
    }
}

/// Sink that forwards every notification to a channel
pub fn recording_sink() -> (
    impl FnMut(&str, Value) + Send + 'static,
    Receiver<(String, Value)>,
) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = move |method: &str, arguments: Value| {
        let _ = tx.send((method.to_string(), arguments));
    };
    (sink, rx)
}

/// Configuration writing its cache into `dir`
pub fn test_config(dir: &TempDir, extra: &[(&str, &str, &str)]) -> BridgeConfig {
    let mut config = BridgeConfig::load_from(dir.path().join("ttsbridge.cfg")).unwrap();
    config.set("output", "cache_dir", dir.path().join("cache").to_str().unwrap());
    config.set("engine", "init_timeout_ms", "2000");
    for (section, key, value) in extra {
        config.set(section, key, value);
    }
    config
}

/// A started bridge with its observation points
pub struct Harness {
    pub bridge: TtsBridge,
    pub probe: Probe,
    pub notifications: Receiver<(String, Value)>,
    pub dir: TempDir,
}

impl Harness {
    pub fn start(script: Script) -> Self {
        Self::start_with(script, &[])
    }

    pub fn start_with(script: Script, extra: &[(&str, &str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir, extra);
        let (factory, probe) = ScriptedEngine::factory(script);
        let (sink, notifications) = recording_sink();
        let bridge = TtsBridge::start(&config, factory, sink).unwrap();
        Self {
            bridge,
            probe,
            notifications,
            dir,
        }
    }

    /// Block until the engine is ready, then forget startup calls
    pub fn ready(self) -> Self {
        self.bridge.dispatcher().languages().unwrap();
        self.probe.clear();
        self
    }

    /// Shut the bridge down and collect every notification it delivered
    pub fn shutdown(self) -> Vec<(String, Value)> {
        self.probe.events.lock().unwrap().take();
        self.bridge.shutdown().unwrap();
        self.notifications.try_iter().collect()
    }

    /// Next notification, or None after a short wait
    pub fn next_notification(&self) -> Option<(String, Value)> {
        match self.notifications.recv_timeout(Duration::from_millis(500)) {
            Ok(notification) => Some(notification),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Notifications that arrive within a short window
    pub fn drain_notifications(&self) -> Vec<(String, Value)> {
        let mut seen = Vec::new();
        while let Some(notification) = self.next_notification() {
            seen.push(notification);
        }
        seen
    }
}
