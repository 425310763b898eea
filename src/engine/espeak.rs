//! espeak-ng subprocess backend
//!
//! Every utterance is one espeak-ng process. A worker thread plays queued
//! utterances in order; a flush bumps the queue generation and kills the
//! running process, so stale jobs are skipped when they come up. Dropping
//! the engine closes the queue; the worker finishes what was already queued
//! and then releases the event channel.
//!
//! Dependencies:
//! - espeak-ng (install with: sudo apt install espeak-ng)

use crate::bridge::utterance::CorrelationId;
use crate::engine::{
    EngineEvent, EngineVoice, EventSender, LanguageAvailability, QueueMode, SpeechEngine,
    UtteranceParams,
};
use crate::language::{LanguageMatch, LanguageTag};
use crate::{BridgeError, Result};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, warn};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// How often the worker checks on a running process or silence
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// espeak-ng speed at rate multiplier 1.0, in words per minute
const NORMAL_WPM: f32 = 175.0;

/// A queued utterance, tagged with the queue generation it was issued in
enum Job {
    Speak {
        args: Vec<String>,
        text: String,
        id: CorrelationId,
        generation: u64,
    },
    Silence {
        duration: Duration,
        id: CorrelationId,
        generation: u64,
    },
}

impl Job {
    fn generation(&self) -> u64 {
        match self {
            Job::Speak { generation, .. } | Job::Silence { generation, .. } => *generation,
        }
    }

    fn id(&self) -> &CorrelationId {
        match self {
            Job::Speak { id, .. } | Job::Silence { id, .. } => id,
        }
    }
}

/// State shared between the engine handle and its worker
struct Shared {
    generation: AtomicU64,
    current: Mutex<Option<Child>>,
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<Child>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Invalidate queued jobs and kill the running process
    fn flush(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(mut child) = self.current().take() {
            debug!("Killing espeak-ng process");
            match child.kill() {
                Ok(_) => {
                    let _ = child.wait(); // Clean up zombie
                }
                Err(e) => debug!("Failed to kill espeak-ng process: {}", e),
            }
        }
        generation
    }
}

/// A voice as listed by `espeak-ng --voices`
#[derive(Debug, Clone, PartialEq)]
struct EspeakVoice {
    name: String,
    /// Language identifier, also what `-v` accepts
    language: String,
}

/// espeak-ng backend
pub struct EspeakEngine {
    /// Path to espeak-ng
    espeak_path: String,

    /// Rate multiplier (1.0 is normal)
    rate: f32,

    /// Pitch multiplier (1.0 is normal)
    pitch: f32,

    /// Value passed to `-v`
    voice: String,

    voices: OnceCell<Vec<EspeakVoice>>,
    jobs: Sender<Job>,
    shared: Arc<Shared>,
    events: EventSender,
}

impl EspeakEngine {
    /// Create a new espeak-ng engine
    ///
    /// Verifies espeak-ng is installed and starts the playback worker.
    pub fn new(events: EventSender) -> Result<Self> {
        debug!("Creating espeak-ng backend");

        let espeak_path = Self::find_espeak()?;
        debug!("Found espeak-ng at: {}", espeak_path);
        Self::with_path(espeak_path, events)
    }

    /// Start the playback worker around a known espeak-ng binary
    fn with_path(espeak_path: String, events: EventSender) -> Result<Self> {
        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        });

        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();
        let worker_path = espeak_path.clone();
        let worker_shared = Arc::clone(&shared);
        let worker_events = events.clone();
        thread::Builder::new()
            .name("tts-espeak".to_string())
            .spawn(move || run_worker(&worker_path, jobs_rx, &worker_shared, &worker_events))?;

        Ok(Self {
            espeak_path,
            rate: 1.0,
            pitch: 1.0,
            voice: "en".to_string(),
            voices: OnceCell::new(),
            jobs: jobs_tx,
            shared,
            events,
        })
    }

    /// Find espeak-ng executable
    fn find_espeak() -> Result<String> {
        let paths = ["espeak-ng", "/usr/bin/espeak-ng", "/usr/local/bin/espeak-ng"];

        for path in paths {
            if let Ok(output) = Command::new(path)
                .arg("--version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                if output.success() {
                    return Ok(path.to_string());
                }
            }
        }

        Err(BridgeError::EngineInit(
            "espeak-ng not found. Install with: sudo apt install espeak-ng".to_string(),
        ))
    }

    /// Convert a rate multiplier to espeak speed (80-450 wpm)
    fn rate_to_wpm(rate: f32) -> u16 {
        (NORMAL_WPM * rate).round().clamp(80.0, 450.0) as u16
    }

    /// Convert a pitch multiplier to espeak pitch (0-99, 50 is normal)
    fn pitch_to_espeak(pitch: f32) -> u8 {
        (50.0 * pitch).round().clamp(0.0, 99.0) as u8
    }

    /// Convert volume (0.0-1.0) to espeak amplitude (0-100 of a possible 200)
    fn volume_to_amplitude(volume: f32) -> u8 {
        (100.0 * volume).round().clamp(0.0, 200.0) as u8
    }

    /// Arguments for the current voice settings, without the text
    fn voice_args(&self, params: &UtteranceParams) -> Vec<String> {
        vec![
            "-v".to_string(),
            self.voice.clone(),
            "-s".to_string(),
            Self::rate_to_wpm(self.rate).to_string(),
            "-p".to_string(),
            Self::pitch_to_espeak(self.pitch).to_string(),
            "-a".to_string(),
            Self::volume_to_amplitude(params.volume).to_string(),
        ]
    }

    fn enqueue(&self, mode: QueueMode, job: impl FnOnce(u64) -> Job) -> Result<()> {
        let generation = match mode {
            QueueMode::Flush => self.shared.flush(),
            QueueMode::Append => self.shared.generation.load(Ordering::SeqCst),
        };
        self.jobs
            .send(job(generation))
            .map_err(|_| BridgeError::Engine("espeak-ng worker has stopped".to_string()))
    }

    fn espeak_voices(&self) -> Result<&[EspeakVoice]> {
        self.voices
            .get_or_try_init(|| {
                let output = Command::new(&self.espeak_path)
                    .arg("--voices")
                    .stderr(Stdio::null())
                    .output()?;
                if !output.status.success() {
                    return Err(BridgeError::Engine(format!(
                        "espeak-ng --voices exited with {}",
                        output.status
                    )));
                }
                Ok(parse_voices(&String::from_utf8_lossy(&output.stdout)))
            })
            .map(Vec::as_slice)
    }
}

impl SpeechEngine for EspeakEngine {
    fn speak(
        &mut self,
        text: &str,
        mode: QueueMode,
        params: &UtteranceParams,
        id: &CorrelationId,
    ) -> Result<()> {
        debug!("Queueing speech {} ({:?})", id, mode);
        let args = self.voice_args(params);
        self.enqueue(mode, |generation| Job::Speak {
            args,
            text: text.to_string(),
            id: id.clone(),
            generation,
        })
    }

    fn play_silence(
        &mut self,
        duration: Duration,
        mode: QueueMode,
        id: &CorrelationId,
    ) -> Result<()> {
        debug!("Queueing {:?} of silence {} ({:?})", duration, id, mode);
        self.enqueue(mode, |generation| Job::Silence {
            duration,
            id: id.clone(),
            generation,
        })
    }

    fn stop(&mut self) -> Result<()> {
        debug!("Canceling speech");
        self.shared.flush();
        Ok(())
    }

    fn set_speech_rate(&mut self, rate: f32) -> Result<()> {
        debug!("Setting rate multiplier to {}", rate);
        self.rate = rate;
        Ok(())
    }

    fn set_pitch(&mut self, pitch: f32) -> Result<()> {
        debug!("Setting pitch multiplier to {}", pitch);
        self.pitch = pitch;
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
        let voice = self
            .espeak_voices()?
            .iter()
            .filter_map(|voice| {
                let offered = LanguageTag::parse(&voice.language)?;
                Some((tag.match_against(&offered), voice))
            })
            .max_by_key(|(matched, _)| *matched)
            .filter(|(matched, _)| *matched > LanguageMatch::None)
            .map(|(_, voice)| voice.language.clone())
            .ok_or_else(|| BridgeError::Engine(format!("No voice for language {}", tag)))?;

        debug!("Setting voice to {} for language {}", voice, tag);
        self.voice = voice;
        Ok(())
    }

    fn languages(&self) -> Result<Vec<LanguageTag>> {
        let mut languages: Vec<LanguageTag> = Vec::new();
        for voice in self.espeak_voices()? {
            if let Some(tag) = LanguageTag::parse(&voice.language) {
                if !languages.contains(&tag) {
                    languages.push(tag);
                }
            }
        }
        Ok(languages)
    }

    fn voices(&self) -> Result<Vec<EngineVoice>> {
        Ok(self
            .espeak_voices()?
            .iter()
            .map(|voice| EngineVoice {
                name: voice.name.clone(),
                language: LanguageTag::parse(&voice.language),
            })
            .collect())
    }

    fn set_voice(&mut self, voice: &EngineVoice) -> Result<()> {
        let language = self
            .espeak_voices()?
            .iter()
            .find(|candidate| candidate.name == voice.name)
            .map(|candidate| candidate.language.clone())
            .ok_or_else(|| BridgeError::Engine(format!("Unknown voice {}", voice.name)))?;

        debug!("Setting voice to {} ({})", voice.name, language);
        self.voice = language;
        Ok(())
    }

    fn default_language(&self) -> Option<LanguageTag> {
        LanguageTag::parse(&self.voice)
    }

    fn synthesize_to_file(
        &mut self,
        text: &str,
        params: &UtteranceParams,
        id: &CorrelationId,
        path: &Path,
    ) -> Result<()> {
        debug!("Synthesizing {} to {:?}", id, path);
        let _ = self.events.send(EngineEvent::Started(id.clone()));

        let mut args = self.voice_args(params);
        args.push("-w".to_string());
        args.push(path.to_string_lossy().into_owned());
        let status = espeak_command(&self.espeak_path, &args, text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => {
                let _ = self.events.send(EngineEvent::Done(id.clone()));
                Ok(())
            }
            Ok(status) => {
                let _ = self.events.send(EngineEvent::Error(id.clone(), status.code()));
                Err(BridgeError::Engine(format!("espeak-ng exited with {}", status)))
            }
            Err(e) => {
                let _ = self.events.send(EngineEvent::Error(id.clone(), None));
                Err(BridgeError::Engine(format!("Failed to start espeak-ng: {}", e)))
            }
        }
    }
}

/// Play queued jobs until the engine is dropped and the queue is drained
fn run_worker(espeak_path: &str, jobs: Receiver<Job>, shared: &Shared, events: &EventSender) {
    for job in jobs.iter() {
        if !shared.is_current(job.generation()) {
            debug!("Skipping flushed utterance {}", job.id());
            continue;
        }

        match job {
            Job::Speak {
                args,
                text,
                id,
                generation,
            } => play_speech(espeak_path, &args, &text, id, generation, shared, events),
            Job::Silence {
                duration,
                id,
                generation,
            } => play_silence(duration, id, generation, shared, events),
        }
    }
    debug!("espeak-ng worker exiting");
}

fn play_speech(
    espeak_path: &str,
    args: &[String],
    text: &str,
    id: CorrelationId,
    generation: u64,
    shared: &Shared,
    events: &EventSender,
) {
    let child = espeak_command(espeak_path, args, text)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match child {
        Ok(child) => {
            let mut current = shared.current();
            if !shared.is_current(generation) {
                // Flushed between the generation check and the spawn
                drop(current);
                reap(child);
                return;
            }
            *current = Some(child);
        }
        Err(e) => {
            error!("Failed to spawn espeak-ng: {}", e);
            let _ = events.send(EngineEvent::Error(id, None));
            return;
        }
    }

    let _ = events.send(EngineEvent::Started(id.clone()));
    let status = wait_current(shared);

    if !shared.is_current(generation) {
        debug!("Utterance {} was flushed", id);
        return;
    }

    let event = match status {
        Some(status) if status.success() => EngineEvent::Done(id),
        Some(status) => EngineEvent::Error(id, status.code()),
        None => EngineEvent::Error(id, None),
    };
    let _ = events.send(event);
}

fn play_silence(
    duration: Duration,
    id: CorrelationId,
    generation: u64,
    shared: &Shared,
    events: &EventSender,
) {
    let _ = events.send(EngineEvent::Started(id.clone()));

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        if !shared.is_current(generation) {
            debug!("Silence {} was flushed", id);
            return;
        }
        thread::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())));
    }

    if shared.is_current(generation) {
        let _ = events.send(EngineEvent::Done(id));
    }
}

/// Wait for the running process; `None` if it was taken away by a flush
fn wait_current(shared: &Shared) -> Option<ExitStatus> {
    loop {
        {
            let mut current = shared.current();
            let child = current.as_mut()?;
            match child.try_wait() {
                Ok(Some(status)) => {
                    *current = None;
                    return Some(status);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Lost track of espeak-ng process: {}", e);
                    *current = None;
                    return None;
                }
            }
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// espeak-ng invocation speaking `text` with the given options
///
/// `--` ends option parsing so text starting with `-` is spoken, not parsed.
fn espeak_command(espeak_path: &str, args: &[String], text: &str) -> Command {
    let mut command = Command::new(espeak_path);
    command.args(args).arg("--").arg(text);
    command
}

fn reap(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Parse `espeak-ng --voices` output
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
/// ```
fn parse_voices(listing: &str) -> Vec<EspeakVoice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            match fields.as_slice() {
                [_, language, _, name, ..] => Some(EspeakVoice {
                    name: name.to_string(),
                    language: language.to_string(),
                }),
                _ => None,
            }
        })
        .collect()
}
