//! Callback routing from the engine to the caller
//!
//! Engine progress events arrive on a channel from whatever thread the
//! engine uses. A single router thread drains that channel, drops the events
//! the caller must not see, and invokes the caller's [`EventSink`] in arrival
//! order. The router thread is the caller's execution context: the sink is
//! never called from anywhere else.

use crate::bridge::utterance::CorrelationId;
use crate::channel::EventSink;
use crate::engine::{EngineEvent, EventReceiver};
use crate::{BridgeError, Result};
use log::{debug, trace};
use serde_json::Value;
use std::thread::{self, JoinHandle};

/// Event channel names seen by the caller
pub const ON_START: &str = "speak.onStart";
pub const ON_COMPLETE: &str = "speak.onComplete";
pub const ON_ERROR: &str = "speak.onError";

/// Caller-visible notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Start,
    Complete,
    Error(String),
}

impl Notification {
    /// Channel method the notification is delivered on
    pub fn method(&self) -> &'static str {
        match self {
            Notification::Start => ON_START,
            Notification::Complete => ON_COMPLETE,
            Notification::Error(_) => ON_ERROR,
        }
    }

    /// Payload delivered with the notification
    pub fn arguments(&self) -> Value {
        match self {
            Notification::Start | Notification::Complete => Value::Bool(true),
            Notification::Error(message) => Value::String(message.clone()),
        }
    }
}

/// Knobs for event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingPolicy {
    /// Forward start events of silence lead-ins (completion is always hidden)
    pub report_silence_start: bool,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            report_silence_start: true,
        }
    }
}

/// Human readable text for an engine error
pub fn error_message(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("Error from TextToSpeech - {}", code),
        None => "Error from TextToSpeech".to_string(),
    }
}

/// Decide what, if anything, the caller sees for an engine event
pub fn route(event: &EngineEvent, policy: RoutingPolicy) -> Option<Notification> {
    match event {
        EngineEvent::Started(id) => {
            if id.is_silence_marker() && !policy.report_silence_start {
                None
            } else {
                Some(Notification::Start)
            }
        }
        EngineEvent::Done(id) => {
            if id.is_silence_marker() {
                None
            } else {
                Some(Notification::Complete)
            }
        }
        EngineEvent::Error(_, code) => Some(Notification::Error(error_message(*code))),
    }
}

/// Owns the thread that delivers notifications to the caller
pub struct CallbackRouter {
    worker: Option<JoinHandle<()>>,
}

impl CallbackRouter {
    /// Start routing events from `events` into `sink`
    ///
    /// The router runs until every sender of the event channel is dropped.
    pub fn spawn<S>(events: EventReceiver, mut sink: S, policy: RoutingPolicy) -> Result<Self>
    where
        S: EventSink + 'static,
    {
        let worker = thread::Builder::new()
            .name("tts-callbacks".to_string())
            .spawn(move || {
                for event in events.iter() {
                    deliver(&event, policy, &mut sink);
                }
                debug!("Engine event channel closed, callback router exiting");
            })?;

        Ok(Self {
            worker: Some(worker),
        })
    }

    /// Wait for the router thread to drain the channel and exit
    pub fn join(mut self) -> Result<()> {
        match self.worker.take() {
            Some(worker) => worker
                .join()
                .map_err(|_| BridgeError::Channel("callback router panicked".to_string())),
            None => Ok(()),
        }
    }
}

fn deliver<S: EventSink>(event: &EngineEvent, policy: RoutingPolicy, sink: &mut S) {
    let id: &CorrelationId = event.id();
    match route(event, policy) {
        Some(notification) => {
            trace!("{} for utterance {}", notification.method(), id);
            sink.invoke_method(notification.method(), notification.arguments());
        }
        None => trace!("Suppressed {:?}", event),
    }
}
