//! Speech parameters applied to subsequent utterances

use crate::engine::UtteranceParams;
use crate::language::LanguageTag;
use log::debug;

/// Valid pitch multipliers
pub const PITCH_RANGE: std::ops::RangeInclusive<f32> = 0.5..=2.0;

/// Valid volumes
pub const VOLUME_RANGE: std::ops::RangeInclusive<f32> = 0.0..=1.0;

/// Speech parameters owned by the dispatcher
///
/// Setters validate their input and leave the state untouched when it is
/// out of range, so every field always holds a valid value.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    /// Rate in caller units (the engine receives twice this)
    speech_rate: f32,
    pitch: f32,
    volume: f32,
    language: Option<LanguageTag>,
    voice: Option<String>,
    silence_ms: u32,
}

impl SpeechSettings {
    pub fn new() -> Self {
        Self {
            speech_rate: 0.5,
            pitch: 1.0,
            volume: 1.0,
            language: None,
            voice: None,
            silence_ms: 0,
        }
    }

    pub fn speech_rate(&self) -> f32 {
        self.speech_rate
    }

    /// Engine-native rate for a caller-facing rate
    pub fn engine_rate(rate: f32) -> f32 {
        rate * 2.0
    }

    /// Store a caller-facing rate; any value is accepted
    pub fn set_speech_rate(&mut self, rate: f32) {
        self.speech_rate = rate;
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f32) -> bool {
        if !PITCH_RANGE.contains(&pitch) {
            debug!("Invalid pitch {} value - Range is from 0.5 to 2.0", pitch);
            return false;
        }
        self.pitch = pitch;
        true
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> bool {
        if !VOLUME_RANGE.contains(&volume) {
            debug!("Invalid volume {} value - Range is from 0.0 to 1.0", volume);
            return false;
        }
        self.volume = volume;
        true
    }

    pub fn language(&self) -> Option<&LanguageTag> {
        self.language.as_ref()
    }

    pub fn set_language(&mut self, tag: LanguageTag) {
        self.language = Some(tag);
    }

    pub fn voice(&self) -> Option<&str> {
        self.voice.as_deref()
    }

    pub fn set_voice(&mut self, name: impl Into<String>) {
        self.voice = Some(name.into());
    }

    pub fn silence_ms(&self) -> u32 {
        self.silence_ms
    }

    /// Lead-in silence for the next `speak`; negative durations are rejected
    pub fn set_silence(&mut self, ms: i64) -> bool {
        match u32::try_from(ms) {
            Ok(ms) => {
                self.silence_ms = ms;
                true
            }
            Err(_) => {
                debug!("Invalid silence {} ms", ms);
                false
            }
        }
    }

    /// Parameters passed along with every spoken utterance
    pub fn utterance_params(&self) -> UtteranceParams {
        UtteranceParams {
            volume: self.volume,
        }
    }
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self::new()
    }
}
