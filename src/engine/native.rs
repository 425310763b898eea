//! Native platform TTS backend using the tts crate
//!
//! The `tts` crate provides a unified interface to:
//! - Speech Dispatcher on Linux (via native bindings)
//! - AVFoundation on macOS/iOS (via native bindings)
//! - WinRT / SAPI on Windows
//!
//! Platform utterance ids are translated back to correlation ids on a pump
//! thread. The crate has no silent utterances, so a lead-in silence is a
//! timer during which appended speech is held back.

use crate::bridge::utterance::CorrelationId;
use crate::engine::{
    EngineEvent, EngineVoice, EventSender, LanguageAvailability, QueueMode, SpeechEngine,
    UtteranceParams,
};
use crate::language::{LanguageMatch, LanguageTag};
use crate::{BridgeError, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tts::{Tts as TtsCrate, UtteranceId, Voice};

/// Callback signals that arrived before their utterance was registered
const MAX_EARLY_SIGNALS: usize = 64;

/// Raw progress from tts crate callbacks
#[derive(Debug)]
enum Signal {
    Issued(UtteranceId, CorrelationId),
    Began(UtteranceId),
    Ended(UtteranceId),
    Stopped(UtteranceId),
}

/// State shared between the engine and its silence timers
struct Core {
    tts: TtsCrate,
    signals: Sender<Signal>,
    /// Bumped by every flush so stale silence timers know to stand down
    generation: u64,
    /// Speech appended while a lead-in silence is running
    held: VecDeque<(String, UtteranceParams, CorrelationId)>,
    silence_active: bool,
}

impl Core {
    fn speak_now(
        &mut self,
        text: &str,
        interrupt: bool,
        params: &UtteranceParams,
        id: &CorrelationId,
    ) -> Result<()> {
        self.apply_volume(params.volume);
        let utterance = self.tts.speak(text, interrupt).map_err(|e| {
            error!("Failed to speak: {}", e);
            BridgeError::Engine(format!("Speak failed: {}", e))
        })?;

        match utterance {
            Some(utterance) => {
                let _ = self.signals.send(Signal::Issued(utterance, id.clone()));
            }
            None => debug!("Backend returned no utterance id for {}", id),
        }
        Ok(())
    }

    fn apply_volume(&mut self, volume: f32) {
        if !self.tts.supported_features().volume {
            return;
        }
        let min = self.tts.min_volume();
        let max = self.tts.max_volume();
        if let Err(e) = self.tts.set_volume(min + volume * (max - min)) {
            warn!("Failed to set volume: {}", e);
        }
    }

    /// Forget pending silence and held speech
    fn flush(&mut self) {
        self.generation += 1;
        self.held.clear();
        self.silence_active = false;
    }
}

/// Native TTS backend using the tts crate
pub struct NativeEngine {
    core: Arc<Mutex<Core>>,
    events: EventSender,
}

impl NativeEngine {
    /// Initialize the platform TTS backend
    pub fn new(events: EventSender) -> Result<Self> {
        debug!("Creating native TTS backend");

        let mut tts = TtsCrate::default()
            .map_err(|e| BridgeError::EngineInit(format!("Failed to initialize TTS: {}", e)))?;

        let (signals_tx, signals_rx) = crossbeam_channel::unbounded();
        if tts.supported_features().utterance_callbacks {
            Self::register_callbacks(&mut tts, &signals_tx)?;
        } else {
            warn!("Utterance callbacks not supported on this platform");
        }

        let pump_events = events.clone();
        thread::Builder::new()
            .name("tts-native-pump".to_string())
            .spawn(move || pump(signals_rx, pump_events))?;

        debug!("Native TTS backend created successfully");

        Ok(Self {
            core: Arc::new(Mutex::new(Core {
                tts,
                signals: signals_tx,
                generation: 0,
                held: VecDeque::new(),
                silence_active: false,
            })),
            events,
        })
    }

    fn register_callbacks(tts: &mut TtsCrate, signals: &Sender<Signal>) -> Result<()> {
        let callback_error = |e: tts::Error| {
            BridgeError::EngineInit(format!("Failed to register utterance callbacks: {}", e))
        };

        let begin = signals.clone();
        tts.on_utterance_begin(Some(Box::new(move |utterance: UtteranceId| {
            let _ = begin.send(Signal::Began(utterance));
        })))
        .map_err(callback_error)?;

        let end = signals.clone();
        tts.on_utterance_end(Some(Box::new(move |utterance: UtteranceId| {
            let _ = end.send(Signal::Ended(utterance));
        })))
        .map_err(callback_error)?;

        let stop = signals.clone();
        tts.on_utterance_stop(Some(Box::new(move |utterance: UtteranceId| {
            let _ = stop.send(Signal::Stopped(utterance));
        })))
        .map_err(callback_error)?;

        Ok(())
    }

    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn platform_voices(&self) -> Result<Vec<Voice>> {
        let core = self.core();
        if !core.tts.supported_features().voice {
            return Err(BridgeError::Engine(
                "Voice selection not supported on this platform".to_string(),
            ));
        }
        core.tts
            .voices()
            .map_err(|e| BridgeError::Engine(format!("Failed to get voices: {}", e)))
    }

    fn to_engine_voice(voice: &Voice) -> EngineVoice {
        EngineVoice {
            name: voice.name(),
            language: LanguageTag::parse(&voice.language().to_string()),
        }
    }

    /// Map a multiplier around the platform's normal value into its range
    fn scaled(multiplier: f32, min: f32, normal: f32, max: f32) -> f32 {
        (normal * multiplier).clamp(min, max)
    }
}

impl SpeechEngine for NativeEngine {
    fn speak(
        &mut self,
        text: &str,
        mode: QueueMode,
        params: &UtteranceParams,
        id: &CorrelationId,
    ) -> Result<()> {
        let mut core = self.core();
        match mode {
            QueueMode::Flush => {
                core.flush();
                core.speak_now(text, true, params, id)
            }
            QueueMode::Append if core.silence_active => {
                debug!("Holding {} until lead-in silence ends", id);
                core.held.push_back((text.to_string(), *params, id.clone()));
                Ok(())
            }
            QueueMode::Append => core.speak_now(text, false, params, id),
        }
    }

    fn play_silence(
        &mut self,
        duration: Duration,
        mode: QueueMode,
        id: &CorrelationId,
    ) -> Result<()> {
        let generation = {
            let mut core = self.core();
            if mode == QueueMode::Flush {
                core.flush();
                core.tts
                    .stop()
                    .map_err(|e| BridgeError::Engine(format!("Cancel failed: {}", e)))?;
            }
            core.silence_active = true;
            core.generation
        };

        let _ = self.events.send(EngineEvent::Started(id.clone()));

        let core = Arc::clone(&self.core);
        let events = self.events.clone();
        let id = id.clone();
        thread::Builder::new()
            .name("tts-native-silence".to_string())
            .spawn(move || {
                thread::sleep(duration);
                let mut core = core.lock().unwrap_or_else(PoisonError::into_inner);
                if core.generation != generation {
                    debug!("Silence {} was flushed", id);
                    return;
                }
                core.silence_active = false;
                let _ = events.send(EngineEvent::Done(id));

                while let Some((text, params, held_id)) = core.held.pop_front() {
                    if let Err(e) = core.speak_now(&text, false, &params, &held_id) {
                        error!("Failed to release held utterance {}: {}", held_id, e);
                        let _ = events.send(EngineEvent::Error(held_id, None));
                    }
                }
            })?;

        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Canceling speech");
        let mut core = self.core();
        core.flush();
        core.tts.stop().map_err(|e| {
            error!("Failed to cancel speech: {}", e);
            BridgeError::Engine(format!("Cancel failed: {}", e))
        })?;
        Ok(())
    }

    fn set_speech_rate(&mut self, rate: f32) -> Result<()> {
        debug!("Setting rate multiplier to {}", rate);
        let mut core = self.core();
        if !core.tts.supported_features().rate {
            warn!("Rate control not supported on this platform");
            return Ok(());
        }

        let native = Self::scaled(
            rate,
            core.tts.min_rate(),
            core.tts.normal_rate(),
            core.tts.max_rate(),
        );
        core.tts
            .set_rate(native)
            .map_err(|e| BridgeError::Engine(format!("Failed to set rate: {}", e)))?;
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        debug!("Setting pitch multiplier to {}", pitch);
        let mut core = self.core();
        if !core.tts.supported_features().pitch {
            warn!("Pitch control not supported on this platform");
            return Ok(());
        }

        let native = Self::scaled(
            pitch,
            core.tts.min_pitch(),
            core.tts.normal_pitch(),
            core.tts.max_pitch(),
        );
        core.tts
            .set_pitch(native)
            .map_err(|e| BridgeError::Engine(format!("Failed to set pitch: {}", e)))?;
        Ok(())
    }

    fn language_availability(&self, tag: &LanguageTag) -> LanguageAvailability {
        match self.languages() {
            Ok(languages) => LanguageAvailability::among(tag, &languages),
            Err(e) => {
                debug!("Language lookup failed: {}", e);
                LanguageAvailability::NotSupported
            }
        }
    }

    fn set_language(&mut self, tag: &LanguageTag) -> Result<()> {
        let voices = self.platform_voices()?;
        let voice = voices
            .iter()
            .filter_map(|voice| {
                let offered = LanguageTag::parse(&voice.language().to_string())?;
                Some((tag.match_against(&offered), voice))
            })
            .filter(|(matched, _)| *matched > LanguageMatch::None)
            .max_by_key(|(matched, _)| *matched)
            .map(|(_, voice)| voice)
            .ok_or_else(|| BridgeError::Engine(format!("No voice for language {}", tag)))?;

        debug!("Selecting voice {} for language {}", voice.name(), tag);
        self.core()
            .tts
            .set_voice(voice)
            .map_err(|e| BridgeError::Engine(format!("Failed to set voice: {}", e)))
    }

    fn languages(&self) -> Result<Vec<LanguageTag>> {
        let mut languages: Vec<LanguageTag> = Vec::new();
        for voice in self.platform_voices()? {
            if let Some(tag) = Self::to_engine_voice(&voice).language {
                if !languages.contains(&tag) {
                    languages.push(tag);
                }
            }
        }
        Ok(languages)
    }

    fn voices(&self) -> Result<Vec<EngineVoice>> {
        Ok(self
            .platform_voices()?
            .iter()
            .map(Self::to_engine_voice)
            .collect())
    }

    fn set_voice(&mut self, voice: &EngineVoice) -> Result<()> {
        let platform = self
            .platform_voices()?
            .into_iter()
            .find(|candidate| candidate.name() == voice.name)
            .ok_or_else(|| BridgeError::Engine(format!("Voice {} disappeared", voice.name)))?;

        debug!("Selecting voice: {}", voice.name);
        self.core()
            .tts
            .set_voice(&platform)
            .map_err(|e| BridgeError::Engine(format!("Failed to set voice: {}", e)))
    }

    fn default_language(&self) -> Option<LanguageTag> {
        let core = self.core();
        if !core.tts.supported_features().get_voice {
            return None;
        }
        match core.tts.voice() {
            Ok(Some(voice)) => LanguageTag::parse(&voice.language().to_string()),
            Ok(None) => None,
            Err(e) => {
                error!("getDefaultLocale: {}", e);
                None
            }
        }
    }

    fn synthesize_to_file(
        &mut self,
        _text: &str,
        _params: &UtteranceParams,
        _id: &CorrelationId,
        path: &Path,
    ) -> Result<()> {
        Err(BridgeError::Engine(format!(
            "File synthesis not supported by the native backend ({:?})",
            path
        )))
    }
}

/// Translate platform utterance ids into engine events
///
/// A callback can race ahead of the `Issued` registration for its
/// utterance; such signals wait in `early` and are replayed on registration.
fn pump(signals: Receiver<Signal>, events: EventSender) {
    let mut issued: HashMap<UtteranceId, CorrelationId> = HashMap::new();
    let mut early: VecDeque<Signal> = VecDeque::new();

    for signal in signals.iter() {
        match signal {
            Signal::Issued(utterance, id) => {
                issued.insert(utterance, id);
                let pending: Vec<Signal> = early.drain(..).collect();
                for signal in pending {
                    if let Some(unresolved) = resolve(signal, &mut issued, &events) {
                        early.push_back(unresolved);
                    }
                }
            }
            signal => {
                if let Some(unresolved) = resolve(signal, &mut issued, &events) {
                    if early.len() == MAX_EARLY_SIGNALS {
                        early.pop_front();
                    }
                    early.push_back(unresolved);
                }
            }
        }
    }
    debug!("Native callback pump exiting");
}

/// Emit the event for a signal, or hand it back if its utterance is unknown
fn resolve(
    signal: Signal,
    issued: &mut HashMap<UtteranceId, CorrelationId>,
    events: &EventSender,
) -> Option<Signal> {
    let event = match signal {
        Signal::Began(utterance) => match issued.get(&utterance) {
            Some(id) => EngineEvent::Started(id.clone()),
            None => return Some(Signal::Began(utterance)),
        },
        Signal::Ended(utterance) => match issued.remove(&utterance) {
            Some(id) => EngineEvent::Done(id),
            None => return Some(Signal::Ended(utterance)),
        },
        // Cancelled utterances get no caller-visible event
        Signal::Stopped(utterance) => {
            return match issued.remove(&utterance) {
                Some(_) => None,
                None => Some(Signal::Stopped(utterance)),
            };
        }
        Signal::Issued(..) => return None,
    };

    let _ = events.send(event);
    None
}
