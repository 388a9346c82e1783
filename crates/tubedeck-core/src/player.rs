//! Local playback controller.
//!
//! [`MusicPlayer`] owns the playlist, the cursor and the
//! stopped/playing/paused state. Audio is driven by a single background
//! worker thread which opens an [`AudioSession`] for the current song, polls
//! it at a fixed interval, publishes progress and moves on to the next song
//! when the current one ends.
//!
//! Starting playback always stops and joins the previous worker first, so
//! there is never more than one worker alive. Each worker carries a
//! generation number; a worker whose generation is stale never writes shared
//! state.
//!
//! The audio output is abstracted behind [`AudioBackend`] so the controller
//! can be tested without a sound device. [`RodioBackend`] is the real one.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::config::PlayerSettings;
use crate::error::{Error, PlaybackError, Result};
use crate::library::{MusicLibrary, Song, format_time};
use crate::metadata::probe_duration;

const OUTPUT_STREAM_OPEN_RETRIES: u32 = 3;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 200;
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Playback state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Nothing is playing.
    #[default]
    Stopped,
    /// A song is playing.
    Playing,
    /// Playback is paused.
    Paused,
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// Notifications published by the player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The cursor moved to another song.
    SongChanged {
        /// New cursor.
        index: usize,
        /// The song at the cursor.
        song: Song,
    },
    /// Playback state changed.
    StateChanged {
        /// New state.
        state: PlaybackState,
    },
    /// Periodic progress report.
    Progress {
        /// Fraction played (0.0 - 1.0).
        progress: f64,
        /// Seconds played.
        elapsed_secs: f64,
        /// Song length in seconds.
        duration_secs: f64,
    },
    /// Playback failed.
    Error {
        /// Description of the failure.
        message: String,
    },
}

/// Snapshot of the player for polling clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatus {
    /// Current state.
    pub state: PlaybackState,
    /// Cursor into the playlist.
    pub current_index: Option<usize>,
    /// Song at the cursor.
    pub current_song: Option<Song>,
    /// Fraction played (0.0 - 1.0).
    pub progress: f64,
    /// Seconds played.
    pub elapsed_secs: f64,
    /// Song length in seconds.
    pub duration_secs: f64,
    /// Seconds played as `MM:SS`.
    pub elapsed: String,
    /// Song length as `MM:SS`.
    pub duration: String,
    /// Output volume (0.0 - 1.0).
    pub volume: f32,
    /// Shuffle mode.
    pub shuffle: bool,
    /// Repeat mode.
    pub repeat: bool,
    /// Number of songs in the playlist.
    pub playlist_len: usize,
}

/// An open audio output playing one file.
///
/// Sessions live on the worker thread that opened them and are never moved.
pub trait AudioSession {
    /// Start output.
    fn play(&mut self);
    /// Pause output, keeping the position.
    fn pause(&mut self);
    /// Continue after [`Self::pause`].
    fn resume(&mut self);
    /// Stop output and release the file.
    fn stop(&mut self);
    /// Set the output volume (0.0 - 1.0).
    fn set_volume(&mut self, volume: f32);
    /// Whether there is still audio left to play.
    fn is_busy(&self) -> bool;
    /// Playback position, if the output can report it.
    fn position(&self) -> Option<Duration>;
    /// Jump to a position.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying decoder cannot seek.
    fn seek(&mut self, position: Duration) -> Result<()>;
}

/// Opens audio sessions.
pub trait AudioBackend: Send + Sync {
    /// Open `path` for playback. Called on the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the output device or the file cannot be opened.
    fn open(&self, path: &Path) -> Result<Box<dyn AudioSession>>;
}

/// System audio output through `rodio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RodioBackend;

impl RodioBackend {
    /// Create the backend. The device is opened per session.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

struct RodioSession {
    // Output stops when the stream is dropped, so it lives as long as the sink.
    _stream: OutputStream,
    sink: Sink,
    path: std::path::PathBuf,
}

fn open_output_stream_with_retry() -> Result<OutputStream> {
    let mut last_error = String::new();
    for attempt in 1..=OUTPUT_STREAM_OPEN_RETRIES {
        match OutputStreamBuilder::open_default_stream() {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                warn!(
                    "open_default_stream attempt {}/{} failed: {}",
                    attempt, OUTPUT_STREAM_OPEN_RETRIES, e
                );
                last_error = e.to_string();
                if attempt < OUTPUT_STREAM_OPEN_RETRIES {
                    thread::sleep(Duration::from_millis(OUTPUT_STREAM_OPEN_RETRY_MS));
                }
            }
        }
    }
    Err(Error::Playback(PlaybackError::OutputUnavailable(last_error)))
}

impl AudioBackend for RodioBackend {
    fn open(&self, path: &Path) -> Result<Box<dyn AudioSession>> {
        let decode_failed = |reason: String| {
            Error::Playback(PlaybackError::DecodeFailed {
                path: path.to_path_buf(),
                reason,
            })
        };

        let file = File::open(path).map_err(|e| decode_failed(e.to_string()))?;
        let source =
            rodio::Decoder::new(BufReader::new(file)).map_err(|e| decode_failed(e.to_string()))?;

        let stream = open_output_stream_with_retry()?;
        let sink = Sink::connect_new(stream.mixer());
        sink.pause();
        sink.append(source);

        Ok(Box::new(RodioSession {
            _stream: stream,
            sink,
            path: path.to_path_buf(),
        }))
    }
}

impl AudioSession for RodioSession {
    fn play(&mut self) {
        self.sink.play();
    }

    fn pause(&mut self) {
        self.sink.pause();
    }

    fn resume(&mut self) {
        self.sink.play();
    }

    fn stop(&mut self) {
        self.sink.stop();
    }

    fn set_volume(&mut self, volume: f32) {
        self.sink.set_volume(volume);
    }

    fn is_busy(&self) -> bool {
        !self.sink.empty()
    }

    fn position(&self) -> Option<Duration> {
        Some(self.sink.get_pos())
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.sink.try_seek(position).map_err(|e| {
            Error::Playback(PlaybackError::DecodeFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            })
        })
    }
}

/// Messages from the controller to the worker.
#[derive(Debug, Clone, Copy)]
enum Command {
    Pause,
    Resume,
    Volume(f32),
    Seek(f64),
}

#[derive(Debug)]
struct Shared {
    playlist: Vec<Song>,
    cursor: Option<usize>,
    state: PlaybackState,
    volume: f32,
    shuffle: bool,
    repeat: bool,
    progress: f64,
    elapsed_secs: f64,
    duration_secs: f64,
    generation: u64,
}

impl Shared {
    fn reset_progress(&mut self) {
        self.progress = 0.0;
        self.elapsed_secs = 0.0;
        self.duration_secs = 0.0;
    }

    /// Index after (or before) the cursor: random with shuffle, wrapping otherwise.
    fn step(&self, forward: bool) -> Option<usize> {
        let len = self.playlist.len();
        if len == 0 {
            return None;
        }
        if self.shuffle {
            return Some(rand::rng().random_range(0..len));
        }
        Some(match (self.cursor, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        })
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Worker {
    handle: JoinHandle<()>,
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
}

/// Playlist-based music player.
pub struct MusicPlayer {
    shared: Arc<Mutex<Shared>>,
    backend: Arc<dyn AudioBackend>,
    events: broadcast::Sender<PlayerEvent>,
    poll_interval: Duration,
    worker: Option<Worker>,
}

impl std::fmt::Debug for MusicPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MusicPlayer")
            .field("shared", &self.shared)
            .field("poll_interval", &self.poll_interval)
            .field("worker_running", &self.worker.is_some())
            .finish_non_exhaustive()
    }
}

impl MusicPlayer {
    /// Create a stopped player with an empty playlist.
    #[must_use]
    pub fn new(backend: Arc<dyn AudioBackend>, settings: &PlayerSettings) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Mutex::new(Shared {
                playlist: Vec::new(),
                cursor: None,
                state: PlaybackState::Stopped,
                volume: settings.volume.clamp(0.0, 1.0),
                shuffle: settings.shuffle,
                repeat: settings.repeat,
                progress: 0.0,
                elapsed_secs: 0.0,
                duration_secs: 0.0,
                generation: 0,
            })),
            backend,
            events,
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            worker: None,
        }
    }

    /// Player using the system audio output.
    #[must_use]
    pub fn with_system_output(settings: &PlayerSettings) -> Self {
        Self::new(Arc::new(RodioBackend::new()), settings)
    }

    /// Receive player events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    /// Replace the playlist. Playback stops; the cursor survives only if it
    /// is still in range.
    pub fn load_playlist(&mut self, songs: Vec<Song>) {
        self.stop();
        let mut shared = lock(&self.shared);
        if shared.cursor.is_some_and(|i| i >= songs.len()) {
            shared.cursor = None;
        }
        info!("Loaded playlist with {} songs", songs.len());
        shared.playlist = songs;
    }

    /// Scan the library and load the result as the playlist.
    ///
    /// # Errors
    ///
    /// Returns an error if the library cannot be scanned.
    pub fn scan_and_load(&mut self, library: &MusicLibrary) -> Result<usize> {
        let songs = library.scan()?;
        let count = songs.len();
        self.load_playlist(songs);
        Ok(count)
    }

    /// Copy of the playlist.
    #[must_use]
    pub fn playlist(&self) -> Vec<Song> {
        lock(&self.shared).playlist.clone()
    }

    /// Play the song at `index`, or at the cursor (first song if unset).
    ///
    /// # Errors
    ///
    /// - [`PlaybackError::EmptyPlaylist`] if there is nothing to play
    /// - [`PlaybackError::InvalidIndex`] if `index` is out of range; the
    ///   current state is left untouched
    pub fn play(&mut self, index: Option<usize>) -> Result<()> {
        let target = {
            let shared = lock(&self.shared);
            let len = shared.playlist.len();
            if len == 0 {
                return Err(Error::Playback(PlaybackError::EmptyPlaylist));
            }
            match index {
                Some(i) if i >= len => {
                    return Err(Error::Playback(PlaybackError::InvalidIndex { index: i, len }));
                }
                Some(i) => i,
                None => shared.cursor.filter(|&i| i < len).unwrap_or(0),
            }
        };

        self.stop_worker();

        let (generation, song) = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            shared.cursor = Some(target);
            shared.state = PlaybackState::Playing;
            shared.reset_progress();
            (shared.generation, shared.playlist[target].clone())
        };

        info!("Playing [{}] {}", target, song.title);
        self.emit(PlayerEvent::SongChanged {
            index: target,
            song,
        });
        self.emit(PlayerEvent::StateChanged {
            state: PlaybackState::Playing,
        });
        self.spawn_worker(generation)
    }

    /// Pause. Only has an effect while playing.
    pub fn pause(&mut self) {
        if self.transition(PlaybackState::Playing, PlaybackState::Paused) {
            self.send(Command::Pause);
        }
    }

    /// Resume. Only has an effect while paused.
    pub fn resume(&mut self) {
        if self.transition(PlaybackState::Paused, PlaybackState::Playing) {
            self.send(Command::Resume);
        }
    }

    /// Stop playback and join the worker.
    pub fn stop(&mut self) {
        self.stop_worker();
        let changed = {
            let mut shared = lock(&self.shared);
            // Invalidate anything a late worker might still try to write.
            shared.generation += 1;
            shared.reset_progress();
            std::mem::replace(&mut shared.state, PlaybackState::Stopped) != PlaybackState::Stopped
        };
        if changed {
            info!("Playback stopped");
            self.emit(PlayerEvent::StateChanged {
                state: PlaybackState::Stopped,
            });
        }
    }

    /// Play the next song. Does nothing on an empty playlist.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::play`].
    pub fn next(&mut self) -> Result<()> {
        let target = lock(&self.shared).step(true);
        match target {
            Some(i) => self.play(Some(i)),
            None => Ok(()),
        }
    }

    /// Play the previous song. Does nothing on an empty playlist.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`Self::play`].
    pub fn previous(&mut self) -> Result<()> {
        let target = lock(&self.shared).step(false);
        match target {
            Some(i) => self.play(Some(i)),
            None => Ok(()),
        }
    }

    /// Set the volume, clamped to 0.0 - 1.0. Applies immediately.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        lock(&self.shared).volume = volume;
        self.send(Command::Volume(volume));
        volume
    }

    /// Flip shuffle mode, returning the new value.
    pub fn toggle_shuffle(&mut self) -> bool {
        let mut shared = lock(&self.shared);
        shared.shuffle = !shared.shuffle;
        info!("Shuffle {}", if shared.shuffle { "on" } else { "off" });
        shared.shuffle
    }

    /// Flip repeat mode, returning the new value.
    pub fn toggle_repeat(&mut self) -> bool {
        let mut shared = lock(&self.shared);
        shared.repeat = !shared.repeat;
        info!("Repeat {}", if shared.repeat { "on" } else { "off" });
        shared.repeat
    }

    /// Seek to a fraction (0.0 - 1.0) of the current song.
    pub fn seek(&mut self, fraction: f64) {
        if fraction.is_finite() {
            self.send(Command::Seek(fraction.clamp(0.0, 1.0)));
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> PlaybackState {
        lock(&self.shared).state
    }

    /// Snapshot for polling clients.
    #[must_use]
    pub fn status(&self) -> PlayerStatus {
        let shared = lock(&self.shared);
        PlayerStatus {
            state: shared.state,
            current_index: shared.cursor,
            current_song: shared.cursor.and_then(|i| shared.playlist.get(i).cloned()),
            progress: shared.progress,
            elapsed_secs: shared.elapsed_secs,
            duration_secs: shared.duration_secs,
            elapsed: format_time(shared.elapsed_secs),
            duration: format_time(shared.duration_secs),
            volume: shared.volume,
            shuffle: shared.shuffle,
            repeat: shared.repeat,
            playlist_len: shared.playlist.len(),
        }
    }

    fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        {
            let mut shared = lock(&self.shared);
            if shared.state != from {
                return false;
            }
            shared.state = to;
        }
        debug!("Playback {} -> {}", from, to);
        self.emit(PlayerEvent::StateChanged { state: to });
        true
    }

    fn send(&self, command: Command) {
        if let Some(worker) = &self.worker
            && worker.commands.send(command).is_err()
        {
            debug!("Playback worker already exited, dropping {:?}", command);
        }
    }

    fn emit(&self, event: PlayerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn spawn_worker(&mut self, generation: u64) -> Result<()> {
        let (commands, receiver) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            shared: Arc::clone(&self.shared),
            backend: Arc::clone(&self.backend),
            events: self.events.clone(),
            commands: receiver,
            stop: Arc::clone(&stop),
            poll_interval: self.poll_interval,
            generation,
        };

        let handle = thread::Builder::new()
            .name(format!("tubedeck-playback-{generation}"))
            .spawn(move || ctx.run())
            .map_err(|e| Error::Playback(PlaybackError::OutputUnavailable(e.to_string())))?;

        self.worker = Some(Worker {
            handle,
            commands,
            stop,
        });
        Ok(())
    }

    fn stop_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop.store(true, Ordering::SeqCst);
            if worker.handle.join().is_err() {
                error!("Playback worker panicked");
            }
        }
    }
}

impl Drop for MusicPlayer {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// How a song ended.
enum SongEnd {
    Finished,
    Stopped,
}

struct WorkerContext {
    shared: Arc<Mutex<Shared>>,
    backend: Arc<dyn AudioBackend>,
    events: broadcast::Sender<PlayerEvent>,
    commands: Receiver<Command>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
    generation: u64,
}

impl WorkerContext {
    fn run(self) {
        debug!("Playback worker {} started", self.generation);
        loop {
            let Some((index, song)) = self.current_song() else {
                break;
            };

            let mut session = match self.backend.open(&song.path) {
                Ok(session) => session,
                Err(e) => {
                    error!("Failed to play {}: {}", song.path.display(), e);
                    self.fail(&e.to_string());
                    break;
                }
            };

            match self.play_song(session.as_mut(), &song) {
                SongEnd::Stopped => {
                    session.stop();
                    break;
                }
                SongEnd::Finished => {
                    debug!("Song finished: {}", song.title);
                    if !self.advance(index) {
                        break;
                    }
                }
            }
        }
        debug!("Playback worker {} exited", self.generation);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Lock shared state only if this worker is still current.
    fn current(&self) -> Option<MutexGuard<'_, Shared>> {
        let shared = lock(&self.shared);
        (shared.generation == self.generation && !self.stopped()).then_some(shared)
    }

    fn current_song(&self) -> Option<(usize, Song)> {
        let shared = self.current()?;
        let index = shared.cursor?;
        shared.playlist.get(index).cloned().map(|song| (index, song))
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn fail(&self, message: &str) {
        if let Some(mut shared) = self.current() {
            shared.state = PlaybackState::Stopped;
            shared.reset_progress();
        } else {
            return;
        }
        self.emit(PlayerEvent::Error {
            message: message.to_string(),
        });
        self.emit(PlayerEvent::StateChanged {
            state: PlaybackState::Stopped,
        });
    }

    fn play_song(&self, session: &mut dyn AudioSession, song: &Song) -> SongEnd {
        let duration_secs = if song.duration_secs > 0.0 {
            song.duration_secs
        } else {
            probe_duration(&song.path).unwrap_or(0.0)
        };

        let paused = {
            let Some(mut shared) = self.current() else {
                return SongEnd::Stopped;
            };
            shared.duration_secs = duration_secs;
            session.set_volume(shared.volume);
            shared.state == PlaybackState::Paused
        };

        let mut clock = PlayClock::default();
        session.play();
        clock.start();
        if paused {
            session.pause();
            clock.pause();
        }

        loop {
            if self.stopped() {
                return SongEnd::Stopped;
            }

            while let Ok(command) = self.commands.try_recv() {
                match command {
                    Command::Pause => {
                        session.pause();
                        clock.pause();
                    }
                    Command::Resume => {
                        session.resume();
                        clock.start();
                    }
                    Command::Volume(volume) => session.set_volume(volume),
                    Command::Seek(fraction) if duration_secs > 0.0 => {
                        let target = Duration::from_secs_f64(duration_secs * fraction);
                        match session.seek(target) {
                            Ok(()) => clock.set(target),
                            Err(e) => warn!("Seek failed: {}", e),
                        }
                    }
                    Command::Seek(_) => debug!("Ignoring seek, song length unknown"),
                }
            }

            let elapsed = session
                .position()
                .unwrap_or_else(|| clock.elapsed())
                .as_secs_f64();
            let progress = if duration_secs > 0.0 {
                (elapsed / duration_secs).min(1.0)
            } else {
                0.0
            };

            let playing = {
                let Some(mut shared) = self.current() else {
                    return SongEnd::Stopped;
                };
                shared.elapsed_secs = elapsed;
                shared.progress = progress;
                shared.state == PlaybackState::Playing
            };
            self.emit(PlayerEvent::Progress {
                progress,
                elapsed_secs: elapsed,
                duration_secs,
            });

            if playing && !session.is_busy() {
                return SongEnd::Finished;
            }

            thread::sleep(self.poll_interval);
        }
    }

    /// Move the cursor after a song ends. Returns false if the worker should exit.
    fn advance(&self, finished: usize) -> bool {
        let (index, song) = {
            let Some(mut shared) = self.current() else {
                return false;
            };
            let next = if shared.repeat {
                Some(finished)
            } else {
                shared.step(true)
            };
            let Some(index) = next.filter(|&i| i < shared.playlist.len()) else {
                shared.state = PlaybackState::Stopped;
                shared.reset_progress();
                drop(shared);
                self.emit(PlayerEvent::StateChanged {
                    state: PlaybackState::Stopped,
                });
                return false;
            };
            shared.cursor = Some(index);
            shared.reset_progress();
            (index, shared.playlist[index].clone())
        };

        info!("Advancing to [{}] {}", index, song.title);
        self.emit(PlayerEvent::SongChanged { index, song });
        true
    }
}

/// Wall-clock play time that excludes pauses.
#[derive(Debug, Default)]
struct PlayClock {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl PlayClock {
    fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn set(&mut self, position: Duration) {
        self.accumulated = position;
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Backend that "plays" each file for a fixed wall-clock time.
    #[derive(Default)]
    struct FakeBackend {
        length: Duration,
        fail: bool,
        opened: Mutex<Vec<PathBuf>>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        volume: Arc<Mutex<f32>>,
    }

    impl FakeBackend {
        fn new(length: Duration) -> Self {
            Self {
                length,
                ..Default::default()
            }
        }

        fn opened(&self) -> Vec<PathBuf> {
            self.opened.lock().unwrap().clone()
        }
    }

    struct FakeSession {
        length: Duration,
        clock: PlayClock,
        active: Arc<AtomicUsize>,
        volume: Arc<Mutex<f32>>,
    }

    impl AudioBackend for FakeBackend {
        fn open(&self, path: &Path) -> Result<Box<dyn AudioSession>> {
            if self.fail {
                return Err(Error::Playback(PlaybackError::OutputUnavailable(
                    "no device".to_string(),
                )));
            }
            self.opened.lock().unwrap().push(path.to_path_buf());
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                length: self.length,
                clock: PlayClock::default(),
                active: Arc::clone(&self.active),
                volume: Arc::clone(&self.volume),
            }))
        }
    }

    impl AudioSession for FakeSession {
        fn play(&mut self) {
            self.clock.start();
        }
        fn pause(&mut self) {
            self.clock.pause();
        }
        fn resume(&mut self) {
            self.clock.start();
        }
        fn stop(&mut self) {
            self.clock.pause();
        }
        fn set_volume(&mut self, volume: f32) {
            *self.volume.lock().unwrap() = volume;
        }
        fn is_busy(&self) -> bool {
            self.clock.elapsed() < self.length
        }
        fn position(&self) -> Option<Duration> {
            None
        }
        fn seek(&mut self, position: Duration) -> Result<()> {
            self.clock.set(position);
            Ok(())
        }
    }

    impl Drop for FakeSession {
        fn drop(&mut self) {
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn song(name: &str, duration_secs: f64) -> Song {
        Song {
            path: PathBuf::from(format!("/music/{name}.mp3")),
            relative_path: format!("{name}.mp3"),
            file_name: format!("{name}.mp3"),
            title: name.to_string(),
            artist: "Unknown Artist".to_string(),
            album: "Unknown Album".to_string(),
            duration_secs,
            file_size: 0,
        }
    }

    fn settings() -> PlayerSettings {
        PlayerSettings {
            poll_interval_ms: 5,
            ..PlayerSettings::default()
        }
    }

    fn player_with(backend: FakeBackend, count: usize) -> (MusicPlayer, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        let mut player = MusicPlayer::new(backend.clone(), &settings());
        player.load_playlist(
            (0..count)
                .map(|i| song(&format!("song{i}"), 100.0))
                .collect(),
        );
        (player, backend)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    const LONG: Duration = Duration::from_secs(60);

    mod state_tests {
        use super::*;

        #[test]
        fn test_new_player_defaults() {
            let player = MusicPlayer::new(Arc::new(FakeBackend::new(LONG)), &settings());
            let status = player.status();
            assert_eq!(status.state, PlaybackState::Stopped);
            assert_eq!(status.current_index, None);
            assert!((status.volume - 0.7).abs() < f32::EPSILON);
            assert_eq!(status.elapsed, "00:00");
            assert_eq!(status.playlist_len, 0);
        }

        #[test]
        fn test_play_empty_playlist() {
            let mut player = MusicPlayer::new(Arc::new(FakeBackend::new(LONG)), &settings());
            let err = player.play(None).unwrap_err();
            assert!(matches!(err, Error::Playback(PlaybackError::EmptyPlaylist)));
        }

        #[test]
        fn test_play_invalid_index_keeps_state() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 3);
            player.play(Some(1)).unwrap();

            let err = player.play(Some(3)).unwrap_err();
            assert!(matches!(
                err,
                Error::Playback(PlaybackError::InvalidIndex { index: 3, len: 3 })
            ));
            let status = player.status();
            assert_eq!(status.state, PlaybackState::Playing);
            assert_eq!(status.current_index, Some(1));
        }

        #[test]
        fn test_play_defaults_to_first_song() {
            let (mut player, backend) = player_with(FakeBackend::new(LONG), 3);
            player.play(None).unwrap();
            assert_eq!(player.status().current_index, Some(0));
            assert!(wait_until(|| backend.opened().len() == 1));
            assert_eq!(backend.opened()[0], PathBuf::from("/music/song0.mp3"));
        }

        #[test]
        fn test_pause_and_resume_transitions() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 2);

            player.pause();
            assert_eq!(player.state(), PlaybackState::Stopped);
            player.resume();
            assert_eq!(player.state(), PlaybackState::Stopped);

            player.play(None).unwrap();
            player.resume();
            assert_eq!(player.state(), PlaybackState::Playing);
            player.pause();
            assert_eq!(player.state(), PlaybackState::Paused);
            player.pause();
            assert_eq!(player.state(), PlaybackState::Paused);
            player.resume();
            assert_eq!(player.state(), PlaybackState::Playing);
        }

        #[test]
        fn test_stop_resets_progress() {
            let (mut player, backend) = player_with(FakeBackend::new(LONG), 1);
            player.play(None).unwrap();
            assert!(wait_until(|| player.status().elapsed_secs > 0.0));

            player.stop();
            let status = player.status();
            assert_eq!(status.state, PlaybackState::Stopped);
            assert!(status.progress.abs() < f64::EPSILON);
            assert_eq!(backend.active.load(Ordering::SeqCst), 0);
        }

        #[test]
        fn test_volume_is_clamped_and_applied() {
            let (mut player, backend) = player_with(FakeBackend::new(LONG), 1);
            assert!((player.set_volume(1.5) - 1.0).abs() < f32::EPSILON);
            assert!(player.set_volume(-0.5).abs() < f32::EPSILON);

            player.play(None).unwrap();
            player.set_volume(0.25);
            assert!(wait_until(|| (*backend.volume.lock().unwrap() - 0.25).abs()
                < f32::EPSILON));
        }

        #[test]
        fn test_toggles() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 1);
            assert!(player.toggle_shuffle());
            assert!(!player.toggle_shuffle());
            assert!(player.toggle_repeat());
            assert!(player.status().repeat);
        }

        #[test]
        fn test_load_playlist_keeps_cursor_in_range() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 3);
            player.play(Some(2)).unwrap();

            player.load_playlist(vec![song("a", 1.0), song("b", 1.0), song("c", 1.0)]);
            assert_eq!(player.status().current_index, Some(2));
            assert_eq!(player.state(), PlaybackState::Stopped);

            player.load_playlist(vec![song("a", 1.0)]);
            assert_eq!(player.status().current_index, None);
        }
    }

    mod navigation_tests {
        use super::*;

        #[test]
        fn test_next_and_previous_wrap() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 3);
            player.play(Some(2)).unwrap();
            player.next().unwrap();
            assert_eq!(player.status().current_index, Some(0));
            player.previous().unwrap();
            assert_eq!(player.status().current_index, Some(2));
            player.previous().unwrap();
            assert_eq!(player.status().current_index, Some(1));
        }

        #[test]
        fn test_next_on_empty_playlist_is_noop() {
            let mut player = MusicPlayer::new(Arc::new(FakeBackend::new(LONG)), &settings());
            assert!(player.next().is_ok());
            assert!(player.previous().is_ok());
            assert_eq!(player.state(), PlaybackState::Stopped);
        }

        #[test]
        fn test_shuffle_stays_in_range() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 4);
            player.toggle_shuffle();
            for _ in 0..20 {
                player.next().unwrap();
                assert!(player.status().current_index.is_some_and(|i| i < 4));
            }
        }

        #[test]
        fn test_single_worker_at_a_time() {
            let (mut player, backend) = player_with(FakeBackend::new(LONG), 3);
            for i in 0..10 {
                player.play(Some(i % 3)).unwrap();
            }
            assert!(wait_until(|| backend.active.load(Ordering::SeqCst) == 1));
            assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
        }
    }

    mod worker_tests {
        use super::*;

        #[test]
        fn test_song_end_advances() {
            let (mut player, backend) =
                player_with(FakeBackend::new(Duration::from_millis(150)), 3);
            player.play(Some(0)).unwrap();

            assert!(wait_until(|| player.status().current_index == Some(1)));
            assert!(wait_until(|| backend.opened().len() >= 2));
            assert_eq!(backend.opened()[1], PathBuf::from("/music/song1.mp3"));
        }

        #[test]
        fn test_last_song_wraps_to_first() {
            let (mut player, _backend) =
                player_with(FakeBackend::new(Duration::from_millis(150)), 2);
            player.play(Some(1)).unwrap();
            assert!(wait_until(|| player.status().current_index == Some(0)));
        }

        #[test]
        fn test_repeat_replays_same_song() {
            let (mut player, backend) =
                player_with(FakeBackend::new(Duration::from_millis(30)), 3);
            player.toggle_repeat();
            player.play(Some(1)).unwrap();

            assert!(wait_until(|| backend.opened().len() >= 3));
            assert!(
                backend
                    .opened()
                    .iter()
                    .all(|p| p == &PathBuf::from("/music/song1.mp3"))
            );
            assert_eq!(player.status().current_index, Some(1));
        }

        #[test]
        fn test_paused_song_does_not_advance() {
            let (mut player, _backend) =
                player_with(FakeBackend::new(Duration::from_millis(200)), 2);
            player.play(Some(0)).unwrap();
            player.pause();
            thread::sleep(Duration::from_millis(400));
            assert_eq!(player.status().current_index, Some(0));
            assert_eq!(player.state(), PlaybackState::Paused);
        }

        #[test]
        fn test_progress_is_reported() {
            let backend = Arc::new(FakeBackend::new(LONG));
            let mut player = MusicPlayer::new(backend, &settings());
            player.load_playlist(vec![song("short", 0.2)]);
            let mut events = player.subscribe();
            player.play(None).unwrap();

            assert!(wait_until(|| player.status().progress > 0.0));
            assert!(wait_until(|| player.status().progress >= 1.0));
            assert!(player.status().progress <= 1.0);

            let mut saw_progress = false;
            while let Ok(event) = events.try_recv() {
                if matches!(event, PlayerEvent::Progress { .. }) {
                    saw_progress = true;
                }
            }
            assert!(saw_progress);
        }

        #[test]
        fn test_seek_moves_clock() {
            let (mut player, _backend) = player_with(FakeBackend::new(LONG), 1);
            player.play(None).unwrap();
            player.seek(0.5);
            assert!(wait_until(|| player.status().elapsed_secs >= 50.0));
        }

        #[test]
        fn test_open_failure_stops_with_error_event() {
            let backend = FakeBackend {
                fail: true,
                ..FakeBackend::new(LONG)
            };
            let (mut player, _backend) = player_with(backend, 2);
            let mut events = player.subscribe();
            player.play(Some(0)).unwrap();

            assert!(wait_until(|| player.state() == PlaybackState::Stopped));
            let mut saw_error = false;
            assert!(wait_until(|| {
                while let Ok(event) = events.try_recv() {
                    if matches!(event, PlayerEvent::Error { .. }) {
                        saw_error = true;
                    }
                }
                saw_error
            }));
        }

        #[test]
        fn test_drop_joins_worker() {
            let (mut player, backend) = player_with(FakeBackend::new(LONG), 1);
            player.play(None).unwrap();
            assert!(wait_until(|| backend.active.load(Ordering::SeqCst) == 1));
            drop(player);
            assert_eq!(backend.active.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_play_clock_excludes_pauses() {
        let mut clock = PlayClock::default();
        assert_eq!(clock.elapsed(), Duration::ZERO);
        clock.set(Duration::from_secs(5));
        clock.start();
        clock.pause();
        let paused = clock.elapsed();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.elapsed(), paused);
        assert!(paused >= Duration::from_secs(5));
    }
}
