//! Coordination core between the method channel and the speech engine
//!
//! [`TtsBridge`] wires the pieces together: the engine is built on an init
//! thread and handed to the readiness gate, the dispatcher serves method
//! calls once the gate opens, and the callback router relays engine events
//! to the caller.

pub mod dispatcher;
pub mod gate;
pub mod router;
pub mod settings;
pub mod utterance;

pub use dispatcher::{Dispatcher, DispatcherOptions, SynthesisReport};
pub use gate::{EngineReadiness, ReadinessGate};
pub use router::{CallbackRouter, Notification, RoutingPolicy};
pub use settings::SpeechSettings;
pub use utterance::{CorrelationId, UtteranceKind, UtteranceRequest};

use crate::channel::{handle_call, EventSink, MethodCall, MethodResult};
use crate::config::BridgeConfig;
use crate::engine::{create_engine, EventSender, SpeechEngine};
use crate::Result;
use dispatcher::prepare_engine;
use log::{info, warn};
use std::sync::{Arc, Mutex};
use std::thread;

/// A running bridge
pub struct TtsBridge {
    dispatcher: Dispatcher,
    router: CallbackRouter,
}

impl TtsBridge {
    /// Start a bridge around an engine built by `factory`
    ///
    /// Returns immediately. The factory runs on its own thread; calls made
    /// before it finishes block in the readiness gate.
    pub fn start<F, S>(config: &BridgeConfig, factory: F, sink: S) -> Result<Self>
    where
        F: FnOnce(EventSender) -> Result<Box<dyn SpeechEngine>> + Send + 'static,
        S: EventSink + 'static,
    {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let router = CallbackRouter::spawn(events_rx, sink, config.routing_policy())?;

        let settings = config.speech_settings();
        let gate = Arc::new(ReadinessGate::new());

        let init_gate = Arc::clone(&gate);
        let init_settings = settings.clone();
        thread::Builder::new()
            .name("tts-init".to_string())
            .spawn(move || {
                let settled = match factory(events_tx) {
                    Ok(mut engine) => {
                        prepare_engine(&mut *engine, &init_settings);
                        init_gate.open(Mutex::new(engine))
                    }
                    Err(e) => init_gate.fail(e.to_string()),
                };
                if let Err(e) = settled {
                    warn!("Engine readiness not recorded: {}", e);
                }
            })?;

        let options = DispatcherOptions {
            init_timeout: config.init_timeout(),
            output_file: config.output_file(),
        };
        info!("Bridge started, synthesis file at {:?}", options.output_file);

        Ok(Self {
            dispatcher: Dispatcher::new(gate, settings, options),
            router,
        })
    }

    /// Start a bridge around the backend named in the configuration
    pub fn with_configured_backend<S>(config: &BridgeConfig, sink: S) -> Result<Self>
    where
        S: EventSink + 'static,
    {
        let kind = config.backend()?;
        info!("Starting {:?} speech backend", kind);
        Self::start(config, move |events| create_engine(kind, events), sink)
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Serve one method call
    pub fn handle(&self, call: &MethodCall) -> MethodResult {
        handle_call(&self.dispatcher, call)
    }

    /// Drop the engine and wait until every pending event has been delivered
    ///
    /// Blocks until the engine has released its event channel. The espeak-ng
    /// backend plays out its queue first.
    pub fn shutdown(self) -> Result<()> {
        let Self { dispatcher, router } = self;
        drop(dispatcher);
        router.join()
    }
}
