//! Method channel between the host application and the bridge
//!
//! The host invokes named methods with a single argument and gets back a
//! result, an error or "not implemented". The bridge calls back into the
//! host through an [`EventSink`] with named events. Both directions use
//! JSON values so any transport that can frame JSON can carry them.

use crate::bridge::dispatcher::Dispatcher;
use crate::{BridgeError, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

/// Incoming method invocation
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MethodCall {
    /// Method name ("speak", "setPitch", ...)
    pub method: String,
    /// Single argument; numbers may also arrive as strings
    #[serde(default)]
    pub arguments: Value,
    /// Request id echoed back in the reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl MethodCall {
    pub fn new(method: impl Into<String>, arguments: Value) -> Self {
        Self {
            method: method.into(),
            arguments,
            id: None,
        }
    }

    /// Argument as text: strings verbatim, anything else in JSON notation
    pub fn string_arg(&self) -> String {
        match &self.arguments {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Argument as a float, from a number or a numeric string
    pub fn f32_arg(&self) -> Result<f32> {
        match &self.arguments {
            Value::Number(n) => n
                .as_f64()
                .map(|v| v as f32)
                .ok_or_else(|| self.bad_argument()),
            Value::String(s) => s.trim().parse().map_err(|_| self.bad_argument()),
            _ => Err(self.bad_argument()),
        }
    }

    /// Argument as an integer, from a number or a numeric string
    pub fn i64_arg(&self) -> Result<i64> {
        match &self.arguments {
            Value::Number(n) => n.as_i64().ok_or_else(|| self.bad_argument()),
            Value::String(s) => s.trim().parse().map_err(|_| self.bad_argument()),
            _ => Err(self.bad_argument()),
        }
    }

    fn bad_argument(&self) -> BridgeError {
        BridgeError::InvalidArgument(format!("{}: {}", self.method, self.arguments))
    }
}

/// Result of a method invocation
#[derive(Debug, Clone, PartialEq)]
pub enum MethodResult {
    Success(Value),
    Error { code: String, message: String },
    NotImplemented,
}

impl MethodResult {
    fn from_error(e: BridgeError) -> Self {
        let code = match &e {
            BridgeError::InvalidArgument(_) => "invalid_argument",
            e if e.is_unavailable() => "engine_unavailable",
            _ => "engine_error",
        };
        MethodResult::Error {
            code: code.to_string(),
            message: e.to_string(),
        }
    }

    /// JSON reply for the line transport
    pub fn to_reply(&self, id: Option<&Value>) -> Value {
        let id = id.cloned().unwrap_or(Value::Null);
        match self {
            MethodResult::Success(value) => json!({ "id": id, "result": value }),
            MethodResult::Error { code, message } => {
                json!({ "id": id, "error": { "code": code, "message": message } })
            }
            MethodResult::NotImplemented => json!({ "id": id, "notImplemented": true }),
        }
    }
}

/// Receiver of bridge notifications
///
/// Always invoked from the callback router thread, one event at a time.
pub trait EventSink: Send {
    fn invoke_method(&mut self, method: &str, arguments: Value);
}

impl<F> EventSink for F
where
    F: FnMut(&str, Value) + Send,
{
    fn invoke_method(&mut self, method: &str, arguments: Value) {
        self(method, arguments)
    }
}

/// Writes each event as one JSON object per line
///
/// The writer is shared so replies and events can go to the same stream
/// without interleaving inside a line.
pub struct JsonLineSink<W: Write + Send> {
    writer: Arc<Mutex<W>>,
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: Arc<Mutex<W>>) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> EventSink for JsonLineSink<W> {
    fn invoke_method(&mut self, method: &str, arguments: Value) {
        let line = json!({ "method": method, "arguments": arguments });
        if let Err(e) = write_line(&self.writer, &line) {
            error!("Failed to deliver {}: {}", method, e);
        }
    }
}

/// Write one JSON value followed by a newline and flush
pub fn write_line<W: Write>(writer: &Mutex<W>, value: &Value) -> Result<()> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Route a method call to the dispatcher
pub fn handle_call(dispatcher: &Dispatcher, call: &MethodCall) -> MethodResult {
    debug!("Method call: {}", call.method);
    match dispatch(dispatcher, call) {
        Ok(Some(value)) => MethodResult::Success(value),
        Ok(None) => MethodResult::NotImplemented,
        Err(e) => {
            debug!("{} failed: {}", call.method, e);
            MethodResult::from_error(e)
        }
    }
}

fn flag(ok: bool) -> Value {
    Value::from(u8::from(ok))
}

fn dispatch(dispatcher: &Dispatcher, call: &MethodCall) -> Result<Option<Value>> {
    let value = match call.method.as_str() {
        "speak" => {
            dispatcher.speak(&call.string_arg())?;
            flag(true)
        }
        "synthesizeToFile" => {
            let report = dispatcher.synthesize_to_file(&call.string_arg())?;
            Value::String(report.path.to_string_lossy().into_owned())
        }
        "stop" => {
            dispatcher.stop()?;
            flag(true)
        }
        "setSpeechRate" => {
            dispatcher.set_speech_rate(call.f32_arg()?)?;
            flag(true)
        }
        "setVolume" => flag(dispatcher.set_volume(call.f32_arg()?)?),
        "setPitch" => flag(dispatcher.set_pitch(call.f32_arg()?)?),
        "setLanguage" => flag(dispatcher.set_language(&call.string_arg())?),
        "getLanguages" => Value::from(dispatcher.languages()?),
        "getVoices" => match dispatcher.voices()? {
            Some(voices) => Value::from(voices),
            None => Value::Null,
        },
        "setVoice" => flag(dispatcher.set_voice(&call.string_arg())?),
        "isLanguageAvailable" => Value::Bool(dispatcher.is_language_available(&call.string_arg())?),
        "setSilence" => {
            dispatcher.set_silence(call.i64_arg()?)?;
            Value::Null
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_call() {
        let call: MethodCall =
            serde_json::from_str(r#"{"method":"setPitch","arguments":"1.5","id":3}"#).unwrap();
        assert_eq!(call.method, "setPitch");
        assert_eq!(call.f32_arg().unwrap(), 1.5);
        assert_eq!(call.id, Some(json!(3)));

        let bare: MethodCall = serde_json::from_str(r#"{"method":"stop"}"#).unwrap();
        assert_eq!(bare.arguments, Value::Null);
    }

    #[test]
    fn test_argument_coercion() {
        assert_eq!(MethodCall::new("setSilence", json!(500)).i64_arg().unwrap(), 500);
        assert_eq!(MethodCall::new("setSilence", json!(" 20 ")).i64_arg().unwrap(), 20);
        assert_eq!(MethodCall::new("speak", json!(42)).string_arg(), "42");
        assert!(MethodCall::new("setVolume", json!("loud")).f32_arg().is_err());
        assert!(MethodCall::new("setVolume", Value::Null).f32_arg().is_err());
    }

    #[test]
    fn test_reply_shapes() {
        let id = json!(7);
        assert_eq!(
            MethodResult::Success(json!(1)).to_reply(Some(&id)),
            json!({ "id": 7, "result": 1 })
        );
        assert_eq!(
            MethodResult::NotImplemented.to_reply(None),
            json!({ "id": null, "notImplemented": true })
        );
        let reply = MethodResult::from_error(BridgeError::EngineInit("gone".into())).to_reply(None);
        assert_eq!(reply["error"]["code"], "engine_unavailable");
    }

    #[test]
    fn test_json_line_sink() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut sink = JsonLineSink::new(Arc::clone(&buffer));
        sink.invoke_method("speak.onStart", Value::Bool(true));
        sink.invoke_method("speak.onError", json!("Error from TextToSpeech - 3"));

        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let lines: Vec<Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines[0], json!({ "method": "speak.onStart", "arguments": true }));
        assert_eq!(lines[1]["arguments"], "Error from TextToSpeech - 3");
    }
}
