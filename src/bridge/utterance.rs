//! Utterance correlation ids and speech planning
//!
//! Every utterance sent to the engine carries a [`CorrelationId`] so that
//! asynchronous callbacks can be tied back to it. Silence lead-ins carry the
//! `SIL_` prefix; classification is a pure check on the id text, so nothing
//! is stored per utterance and nothing leaks when the engine drops a callback.

use crate::engine::QueueMode;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Prefix marking silence lead-in utterances
pub const SILENCE_PREFIX: &str = "SIL_";

/// Fixed id used for file synthesis requests
pub const FILE_UTTERANCE_ID: &str = "ttsid";

/// Opaque token linking an utterance to its engine callbacks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh id for a spoken utterance
    pub fn new_utterance() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Silence marker paired with a spoken utterance
    pub fn silence_for(utterance: &CorrelationId) -> Self {
        Self(format!("{}{}", SILENCE_PREFIX, utterance.0))
    }

    /// The id file synthesis always uses
    pub fn file_synthesis() -> Self {
        Self(FILE_UTTERANCE_ID.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_silence_marker(&self) -> bool {
        is_silence_marker(&self.0)
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classify a raw callback id
pub fn is_silence_marker(id: &str) -> bool {
    id.starts_with(SILENCE_PREFIX)
}

/// What an utterance renders
#[derive(Debug, Clone, PartialEq)]
pub enum UtteranceKind {
    Speech(String),
    Silence(Duration),
}

/// One request handed to the engine
#[derive(Debug, Clone, PartialEq)]
pub struct UtteranceRequest {
    pub id: CorrelationId,
    pub mode: QueueMode,
    pub kind: UtteranceKind,
}

impl UtteranceRequest {
    pub fn is_silence_marker(&self) -> bool {
        self.id.is_silence_marker()
    }
}

/// Engine requests for one `speak` call
///
/// With a lead-in, the silence flushes whatever is playing and the speech is
/// appended right behind it, so the pause always sits immediately before the
/// text. Without one, the speech itself flushes.
pub fn plan_speech(text: &str, silence_ms: u32) -> Vec<UtteranceRequest> {
    let id = CorrelationId::new_utterance();
    let speech = |mode| UtteranceRequest {
        id: id.clone(),
        mode,
        kind: UtteranceKind::Speech(text.to_string()),
    };

    if silence_ms > 0 {
        vec![
            UtteranceRequest {
                id: CorrelationId::silence_for(&id),
                mode: QueueMode::Flush,
                kind: UtteranceKind::Silence(Duration::from_millis(u64::from(silence_ms))),
            },
            speech(QueueMode::Append),
        ]
    } else {
        vec![speech(QueueMode::Flush)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = CorrelationId::new_utterance();
        let b = CorrelationId::new_utterance();
        assert_ne!(a, b);
        assert!(!a.is_silence_marker());
    }

    #[test]
    fn test_silence_marker_classification() {
        let id = CorrelationId::new_utterance();
        let marker = CorrelationId::silence_for(&id);
        assert!(marker.is_silence_marker());
        assert!(marker.as_str().ends_with(id.as_str()));
        assert!(is_silence_marker("SIL_abc"));
        assert!(!is_silence_marker("abc_SIL_"));
        assert!(!CorrelationId::file_synthesis().is_silence_marker());
    }

    #[test]
    fn test_plan_without_silence() {
        let plan = plan_speech("hello", 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].mode, QueueMode::Flush);
        assert_eq!(plan[0].kind, UtteranceKind::Speech("hello".to_string()));
        assert!(!plan[0].is_silence_marker());
    }

    #[test]
    fn test_plan_with_silence() {
        let plan = plan_speech("hello", 500);
        assert_eq!(plan.len(), 2);

        assert_eq!(plan[0].mode, QueueMode::Flush);
        assert_eq!(plan[0].kind, UtteranceKind::Silence(Duration::from_millis(500)));
        assert!(plan[0].is_silence_marker());

        assert_eq!(plan[1].mode, QueueMode::Append);
        assert_eq!(plan[1].kind, UtteranceKind::Speech("hello".to_string()));
        assert_eq!(plan[0].id, CorrelationId::silence_for(&plan[1].id));
    }
}
