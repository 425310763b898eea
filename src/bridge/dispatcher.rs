//! Request dispatcher
//!
//! Caller-facing speech operations. Each one waits for the engine to be
//! ready, validates its input, updates [`SpeechSettings`] and drives the
//! engine. Results come back synchronously; speech progress arrives later
//! through the callback router.

use crate::bridge::gate::{EngineReadiness, ReadinessGate};
use crate::bridge::settings::{SpeechSettings, PITCH_RANGE};
use crate::bridge::utterance::{plan_speech, CorrelationId, UtteranceKind, UtteranceRequest};
use crate::engine::{SpeechEngine, UtteranceParams};
use crate::language::LanguageTag;
use crate::{BridgeError, Result};
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// The ready engine as carried by the readiness gate
pub type EngineSlot = Mutex<Box<dyn SpeechEngine>>;

/// Dispatcher settings that do not change at runtime
#[derive(Debug, Clone)]
pub struct DispatcherOptions {
    /// Longest wait for engine initialization; `None` waits forever
    pub init_timeout: Option<Duration>,
    /// Single-slot output file for `synthesize_to_file`
    pub output_file: PathBuf,
}

/// Outcome of a file synthesis request
///
/// The path is reported no matter what the engine said. `engine_status`
/// and `file_exists` let callers tell a real file from a stale slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisReport {
    pub path: PathBuf,
    pub engine_status: std::result::Result<(), String>,
    pub file_exists: bool,
}

impl SynthesisReport {
    pub fn succeeded(&self) -> bool {
        self.engine_status.is_ok() && self.file_exists
    }
}

/// Public operation table for speech requests
pub struct Dispatcher {
    gate: Arc<ReadinessGate<EngineSlot>>,
    settings: Mutex<SpeechSettings>,
    options: DispatcherOptions,
}

impl Dispatcher {
    pub fn new(
        gate: Arc<ReadinessGate<EngineSlot>>,
        settings: SpeechSettings,
        options: DispatcherOptions,
    ) -> Self {
        Self {
            gate,
            settings: Mutex::new(settings),
            options,
        }
    }

    pub fn readiness(&self) -> EngineReadiness {
        self.gate.state()
    }

    /// Snapshot of the current speech settings
    pub fn settings(&self) -> SpeechSettings {
        self.settings_guard().clone()
    }

    /// Wait for the engine and lock it
    fn engine(&self) -> Result<MutexGuard<'_, Box<dyn SpeechEngine>>> {
        let slot = self.gate.wait_for(self.options.init_timeout)?;
        slot.lock()
            .map_err(|_| BridgeError::Engine("speech engine lock poisoned".to_string()))
    }

    fn settings_guard(&self) -> MutexGuard<'_, SpeechSettings> {
        self.settings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Speak text, preempting anything already playing
    ///
    /// Returns the correlation id of the spoken utterance.
    pub fn speak(&self, text: &str) -> Result<CorrelationId> {
        let mut engine = self.engine()?;
        let (params, plan) = {
            let settings = self.settings_guard();
            (
                settings.utterance_params(),
                plan_speech(text, settings.silence_ms()),
            )
        };

        for request in &plan {
            issue(&mut **engine, request, &params)?;
        }

        plan.into_iter()
            .find(|request| !request.is_silence_marker())
            .map(|request| request.id)
            .ok_or_else(|| BridgeError::Other("speech plan without an utterance".to_string()))
    }

    /// Cancel current and queued speech; completion is not acknowledged
    pub fn stop(&self) -> Result<()> {
        debug!("Stopping speech");
        self.engine()?.stop()
    }

    /// Set the caller-facing rate; the engine gets twice the value
    pub fn set_speech_rate(&self, rate: f32) -> Result<()> {
        let mut engine = self.engine()?;
        engine.set_speech_rate(SpeechSettings::engine_rate(rate))?;
        self.settings_guard().set_speech_rate(rate);
        Ok(())
    }

    /// Stage a volume for the next utterance
    pub fn set_volume(&self, volume: f32) -> Result<bool> {
        let _engine = self.engine()?;
        Ok(self.settings_guard().set_volume(volume))
    }

    /// Apply a pitch to the engine right away
    pub fn set_pitch(&self, pitch: f32) -> Result<bool> {
        let mut engine = self.engine()?;
        if !PITCH_RANGE.contains(&pitch) {
            debug!("Invalid pitch {} value - Range is from 0.5 to 2.0", pitch);
            return Ok(false);
        }
        engine.set_pitch(pitch)?;
        Ok(self.settings_guard().set_pitch(pitch))
    }

    /// Switch language if the engine supports it
    pub fn set_language(&self, tag: &str) -> Result<bool> {
        let mut engine = self.engine()?;
        let Some(tag) = LanguageTag::parse(tag) else {
            debug!("Malformed language tag: {:?}", tag);
            return Ok(false);
        };

        if !engine.language_availability(&tag).is_available() {
            debug!("Language not available: {}", tag);
            return Ok(false);
        }

        engine.set_language(&tag)?;
        self.settings_guard().set_language(tag);
        Ok(true)
    }

    pub fn is_language_available(&self, tag: &str) -> Result<bool> {
        let engine = self.engine()?;
        Ok(LanguageTag::parse(tag)
            .map(|tag| engine.language_availability(&tag).is_available())
            .unwrap_or(false))
    }

    /// Language tags the engine can speak; empty if enumeration fails
    pub fn languages(&self) -> Result<Vec<String>> {
        let engine = self.engine()?;
        match engine.languages() {
            Ok(tags) => Ok(tags.iter().map(|tag| tag.to_string()).collect()),
            Err(e) => {
                debug!("getLanguages: {}", e);
                Ok(Vec::new())
            }
        }
    }

    /// Voice names; `None` if enumeration fails
    pub fn voices(&self) -> Result<Option<Vec<String>>> {
        let engine = self.engine()?;
        match engine.voices() {
            Ok(voices) => Ok(Some(voices.into_iter().map(|voice| voice.name).collect())),
            Err(e) => {
                debug!("getVoices: {}", e);
                Ok(None)
            }
        }
    }

    /// Select the first voice with exactly this name
    pub fn set_voice(&self, name: &str) -> Result<bool> {
        let mut engine = self.engine()?;
        let voices = match engine.voices() {
            Ok(voices) => voices,
            Err(e) => {
                debug!("setVoice: {}", e);
                return Ok(false);
            }
        };

        match voices.iter().find(|voice| voice.name == name) {
            Some(voice) => {
                engine.set_voice(voice)?;
                self.settings_guard().set_voice(name);
                Ok(true)
            }
            None => {
                debug!("Voice name not found: {}", name);
                Ok(false)
            }
        }
    }

    /// Lead-in silence for subsequent `speak` calls
    pub fn set_silence(&self, ms: i64) -> Result<bool> {
        let _engine = self.engine()?;
        Ok(self.settings_guard().set_silence(ms))
    }

    /// Render text into the single-slot cache file
    ///
    /// Always reports the path, even when the engine refused the request or
    /// no file was produced.
    pub fn synthesize_to_file(&self, text: &str) -> Result<SynthesisReport> {
        let mut engine = self.engine()?;
        let path = self.options.output_file.clone();

        if path.exists() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("Failed to remove previous synthesis file {:?}: {}", path, e);
            }
        } else if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Failed to create synthesis directory {:?}: {}", parent, e);
            }
        }

        let params = self.settings_guard().utterance_params();
        let engine_status = engine
            .synthesize_to_file(text, &params, &CorrelationId::file_synthesis(), &path)
            .map_err(|e| e.to_string());

        if let Err(e) = &engine_status {
            warn!("synthesizeToFile failed: {}", e);
        }
        let file_exists = path.exists();
        if !file_exists {
            warn!("synthesizeToFile didn't produce a file at {:?}", path);
        }

        Ok(SynthesisReport {
            path,
            engine_status,
            file_exists,
        })
    }
}

/// Hand one planned utterance to the engine
fn issue(
    engine: &mut dyn SpeechEngine,
    request: &UtteranceRequest,
    params: &UtteranceParams,
) -> Result<()> {
    match &request.kind {
        UtteranceKind::Speech(text) => {
            debug!("Speaking {:?} as {} ({:?})", text, request.id, request.mode);
            engine.speak(text, request.mode, params, &request.id)
        }
        UtteranceKind::Silence(duration) => {
            debug!("Silence {:?} as {} ({:?})", duration, request.id, request.mode);
            engine.play_silence(*duration, request.mode, &request.id)
        }
    }
}

/// Apply startup settings to a freshly initialized engine
///
/// Failures are logged and skipped: a bad configured voice should not keep
/// the engine from becoming ready.
pub fn prepare_engine(engine: &mut dyn SpeechEngine, settings: &SpeechSettings) {
    if let Err(e) = engine.set_speech_rate(SpeechSettings::engine_rate(settings.speech_rate())) {
        warn!("Failed to apply startup rate: {}", e);
    }
    if let Err(e) = engine.set_pitch(settings.pitch()) {
        warn!("Failed to apply startup pitch: {}", e);
    }

    let language = settings.language().cloned().or_else(|| engine.default_language());
    if let Some(tag) = language {
        if engine.language_availability(&tag).is_available() {
            match engine.set_language(&tag) {
                Ok(()) => info!("Speech language set to {}", tag),
                Err(e) => warn!("Failed to set language {}: {}", tag, e),
            }
        } else {
            warn!("Configured language {} is not available", tag);
        }
    }

    if let Some(name) = settings.voice() {
        let voice = engine
            .voices()
            .ok()
            .and_then(|voices| voices.into_iter().find(|voice| voice.name == name));
        match voice {
            Some(voice) => match engine.set_voice(&voice) {
                Ok(()) => info!("Speech voice set to {}", name),
                Err(e) => warn!("Failed to set voice {}: {}", name, e),
            },
            None => warn!("Configured voice {} not found", name),
        }
    }
}
