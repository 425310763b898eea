//! Speech engine abstraction
//!
//! The bridge talks to a platform TTS engine through [`SpeechEngine`]. An
//! engine is built on a background thread, accepts utterances tagged with a
//! correlation id, and reports progress by sending [`EngineEvent`]s on the
//! channel it was given at construction.

pub mod espeak;
pub mod native;

use crate::bridge::utterance::CorrelationId;
use crate::language::{LanguageMatch, LanguageTag};
use crate::{BridgeError, Result};
use log::info;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Where a new utterance goes relative to what the engine is already doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    /// Drop everything pending or playing, then start this utterance
    Flush,
    /// Play after everything already queued
    Append,
}

/// Per-utterance parameters staged by the dispatcher
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtteranceParams {
    /// Output volume (0.0-1.0)
    pub volume: f32,
}

impl Default for UtteranceParams {
    fn default() -> Self {
        Self { volume: 1.0 }
    }
}

/// Progress notifications emitted by an engine from its own threads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine started rendering the utterance
    Started(CorrelationId),
    /// The utterance finished normally
    Done(CorrelationId),
    /// Rendering failed; some engines supply a numeric code
    Error(CorrelationId, Option<i32>),
}

impl EngineEvent {
    /// Correlation id the event belongs to
    pub fn id(&self) -> &CorrelationId {
        match self {
            EngineEvent::Started(id) | EngineEvent::Done(id) | EngineEvent::Error(id, _) => id,
        }
    }
}

/// Sending half of the engine event channel
pub type EventSender = crossbeam_channel::Sender<EngineEvent>;

/// Receiving half of the engine event channel
pub type EventReceiver = crossbeam_channel::Receiver<EngineEvent>;

/// A voice offered by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct EngineVoice {
    pub name: String,
    pub language: Option<LanguageTag>,
}

/// Engine support level for a language, ordered from worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageAvailability {
    NotSupported,
    /// The language is available, but not the requested region
    Available,
    /// Language and region are both available
    CountryAvailable,
}

impl LanguageAvailability {
    /// Whether the engine can speak the language at all
    pub fn is_available(self) -> bool {
        self >= LanguageAvailability::Available
    }

    /// Best availability of `requested` among the tags an engine offers
    pub fn among<'a, I>(requested: &LanguageTag, offered: I) -> Self
    where
        I: IntoIterator<Item = &'a LanguageTag>,
    {
        let best = offered
            .into_iter()
            .map(|tag| requested.match_against(tag))
            .max()
            .unwrap_or(LanguageMatch::None);

        match best {
            LanguageMatch::Exact => LanguageAvailability::CountryAvailable,
            LanguageMatch::Language => LanguageAvailability::Available,
            LanguageMatch::None => LanguageAvailability::NotSupported,
        }
    }
}

/// Platform text-to-speech engine
///
/// Calls return once the request is accepted; progress arrives later as
/// [`EngineEvent`]s. Rates and pitches use the engine-native scale where
/// 1.0 is normal.
pub trait SpeechEngine: Send {
    /// Queue text for speaking
    fn speak(
        &mut self,
        text: &str,
        mode: QueueMode,
        params: &UtteranceParams,
        id: &CorrelationId,
    ) -> Result<()>;

    /// Queue a stretch of silence
    fn play_silence(&mut self, duration: Duration, mode: QueueMode, id: &CorrelationId)
        -> Result<()>;

    /// Cancel the current utterance and everything queued behind it
    fn stop(&mut self) -> Result<()>;

    /// Set speech rate multiplier (1.0 is normal)
    fn set_speech_rate(&mut self, rate: f32) -> Result<()>;

    /// Set pitch multiplier (1.0 is normal)
    fn set_pitch(&mut self, pitch: f32) -> Result<()>;

    /// How well the engine supports a language
    fn language_availability(&self, tag: &LanguageTag) -> LanguageAvailability;

    /// Switch to a language
    fn set_language(&mut self, tag: &LanguageTag) -> Result<()>;

    /// Languages the engine can speak
    fn languages(&self) -> Result<Vec<LanguageTag>>;

    /// Voices the engine offers
    fn voices(&self) -> Result<Vec<EngineVoice>>;

    /// Switch to a voice previously returned by [`SpeechEngine::voices`]
    fn set_voice(&mut self, voice: &EngineVoice) -> Result<()>;

    /// Language of the engine's default voice, if it has one
    fn default_language(&self) -> Option<LanguageTag> {
        None
    }

    /// Render text into an audio file at `path`
    ///
    /// An `Err` is the engine's non-success status; the file may or may not exist.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        params: &UtteranceParams,
        id: &CorrelationId,
        path: &Path,
    ) -> Result<()>;
}

/// Which engine backend to start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Native platform TTS, falling back to espeak-ng
    Auto,
    /// Platform TTS through the tts crate
    Native,
    /// espeak-ng subprocesses
    Espeak,
}

impl FromStr for BackendKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(BackendKind::Auto),
            "native" => Ok(BackendKind::Native),
            "espeak" | "espeak-ng" => Ok(BackendKind::Espeak),
            other => Err(BridgeError::Config(format!("Unknown engine backend: {}", other))),
        }
    }
}

/// Create a speech engine for the requested backend
///
/// **Auto** tries the native platform engine first (Speech Dispatcher,
/// AVFoundation, WinRT via the tts crate) and then espeak-ng. The choice is
/// made once at startup.
pub fn create_engine(kind: BackendKind, events: EventSender) -> Result<Box<dyn SpeechEngine>> {
    use espeak::EspeakEngine;
    use native::NativeEngine;

    match kind {
        BackendKind::Native => Ok(Box::new(NativeEngine::new(events)?)),
        BackendKind::Espeak => Ok(Box::new(EspeakEngine::new(events)?)),
        BackendKind::Auto => {
            info!("Trying native TTS backend...");
            match NativeEngine::new(events.clone()) {
                Ok(engine) => {
                    info!("Using native TTS backend");
                    return Ok(Box::new(engine));
                }
                Err(e) => info!("Native TTS backend unavailable: {}", e),
            }

            info!("Trying espeak-ng backend...");
            match EspeakEngine::new(events) {
                Ok(engine) => {
                    info!("Using espeak-ng backend");
                    Ok(Box::new(engine))
                }
                Err(e) => Err(BridgeError::EngineInit(format!(
                    "No speech backend available. Tried:\n\
                     1. Native platform TTS\n\
                     2. espeak-ng (install: sudo apt install espeak-ng)\n\
                     Error: {}",
                    e
                ))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("auto".parse::<BackendKind>().unwrap(), BackendKind::Auto);
        assert_eq!("Native".parse::<BackendKind>().unwrap(), BackendKind::Native);
        assert_eq!("espeak-ng".parse::<BackendKind>().unwrap(), BackendKind::Espeak);
        assert!("festival".parse::<BackendKind>().is_err());
    }

    #[test]
    fn test_language_availability() {
        let offered: Vec<LanguageTag> = ["en-GB", "fr-FR"]
            .iter()
            .filter_map(|t| LanguageTag::parse(t))
            .collect();

        let en_gb = LanguageTag::parse("en-gb").unwrap();
        let en_us = LanguageTag::parse("en-US").unwrap();
        let de = LanguageTag::parse("de").unwrap();

        assert_eq!(
            LanguageAvailability::among(&en_gb, &offered),
            LanguageAvailability::CountryAvailable
        );
        assert_eq!(
            LanguageAvailability::among(&en_us, &offered),
            LanguageAvailability::Available
        );
        assert_eq!(
            LanguageAvailability::among(&de, &offered),
            LanguageAvailability::NotSupported
        );
        assert!(LanguageAvailability::Available.is_available());
        assert!(!LanguageAvailability::NotSupported.is_available());
    }
}
