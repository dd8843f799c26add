//! Playback engine implementation

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{AudioOutput, ContentId, OutputFormat};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::config::EngineConfig;
use super::state::{PlaybackPosition, PlaybackSession, PlaybackState};
use crate::cache::DecryptionCache;
use crate::error::{PlaybackError, Result};
use crate::traits::{AudioDecoder, AudioSource, DecoderFactory, ProbeResult};

type SharedDecoder = Arc<AsyncMutex<Box<dyn AudioDecoder>>>;

/// Mutable engine state. Every field is guarded by one lock.
struct Session {
    snapshot: PlaybackSession,
    /// Bumped whenever in-flight work must be discarded: load, stop, and any
    /// render start or cancel.
    epoch: u64,
    decoder: Option<SharedDecoder>,
    output_format: Option<OutputFormat>,
    /// The decoder has been read from since it was opened.
    decoder_dirty: bool,
    render: Option<CancellationToken>,
}

impl Session {
    fn new() -> Self {
        Self {
            snapshot: PlaybackSession::default(),
            epoch: 0,
            decoder: None,
            output_format: None,
            decoder_dirty: false,
            render: None,
        }
    }

    fn advance_epoch(&mut self) -> u64 {
        if let Some(token) = self.render.take() {
            token.cancel();
        }
        self.epoch += 1;
        self.epoch
    }

    fn unload(&mut self) {
        self.decoder = None;
        self.output_format = None;
        self.decoder_dirty = false;
    }

    fn content_label(&self) -> String {
        self.snapshot
            .content_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn duration_ms(&self) -> u64 {
        self.snapshot
            .duration_seconds()
            .map(|secs| (secs * 1000.0).round() as u64)
            .unwrap_or(0)
    }

    /// Cancel any render task and prepare a new one from the current position.
    fn start_render(&mut self) -> Result<RenderJob> {
        let decoder = self.decoder.clone().ok_or(PlaybackError::NoContentLoaded)?;
        let format = self.output_format.ok_or(PlaybackError::NoContentLoaded)?;
        let content_id = self
            .snapshot
            .content_id
            .clone()
            .ok_or(PlaybackError::NoContentLoaded)?;

        let epoch = self.advance_epoch();
        let token = CancellationToken::new();
        self.render = Some(token.clone());

        let position = self.snapshot.position_frames;
        let seek_to = (self.decoder_dirty || position > 0).then_some(position);
        self.decoder_dirty = true;

        Ok(RenderJob {
            epoch,
            token,
            decoder,
            format,
            content_id,
            seek_to,
            sample_rate: self.snapshot.sample_rate,
        })
    }
}

/// Everything a render task needs, captured under the session lock.
struct RenderJob {
    epoch: u64,
    token: CancellationToken,
    decoder: SharedDecoder,
    format: OutputFormat,
    content_id: ContentId,
    seek_to: Option<u64>,
    sample_rate: f64,
}

enum RenderOutcome {
    Cancelled,
    Finished,
    Failed(PlaybackError),
}

struct EngineInner {
    cache: Arc<DecryptionCache>,
    decoders: Arc<dyn DecoderFactory>,
    output: Arc<dyn AudioOutput>,
    event_bus: Option<EventBus>,
    config: EngineConfig,
    session: Mutex<Session>,
    cleanup: Mutex<Vec<(ContentId, JoinHandle<()>)>>,
}

/// Single-session playback state machine over the decryption cache.
///
/// Cloning is cheap and every clone drives the same session. `load`, `play`,
/// `pause`, `seek` and `stop` may be called from any task; they are
/// linearized by one internal lock and never hold it across an await.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<EngineInner>,
}

impl PlaybackEngine {
    pub fn new(
        cache: Arc<DecryptionCache>,
        decoders: Arc<dyn DecoderFactory>,
        output: Arc<dyn AudioOutput>,
        config: EngineConfig,
        event_bus: Option<EventBus>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                cache,
                decoders,
                output,
                event_bus,
                config,
                session: Mutex::new(Session::new()),
                cleanup: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.session.lock().snapshot.state
    }

    pub fn session(&self) -> PlaybackSession {
        self.inner.session.lock().snapshot.clone()
    }

    pub fn position(&self) -> PlaybackPosition {
        self.inner.session.lock().snapshot.position()
    }

    pub fn current_content(&self) -> Option<ContentId> {
        self.inner.session.lock().snapshot.content_id.clone()
    }

    /// Load `id`, replacing whatever was loaded.
    ///
    /// The previous content's plaintext is invalidated concurrently with the
    /// new materialization and is gone by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns the materialize or decoder error unchanged after moving to
    /// `Error(kind)`, or [`PlaybackError::LoadSuperseded`] if a newer `load`
    /// or a `stop` happened meanwhile.
    #[instrument(skip(self), fields(content_id = %id))]
    pub async fn load(&self, id: ContentId) -> Result<()> {
        let inner = &self.inner;

        let (epoch, previous) = {
            let mut session = inner.session.lock();
            let epoch = session.advance_epoch();
            session.unload();
            let previous = session.snapshot.content_id.take();
            session.snapshot = PlaybackSession::loading(id.clone());
            (epoch, previous)
        };
        info!("Loading content");

        let previous = previous.filter(|prev| *prev != id);
        if let Some(prev) = &previous {
            inner.spawn_invalidation(prev.clone());
        }
        inner.await_cleanup_for(&id).await;

        let materialized = inner.cache.materialize(&id).await;

        if let Some(prev) = &previous {
            inner.await_cleanup_for(prev).await;
        }

        let path = match materialized {
            Ok(path) => path,
            Err(e) => return inner.fail_load(epoch, &id, e),
        };

        if !inner.is_current(epoch) {
            return Err(inner.supersede(&id));
        }

        match inner.open_decoder(path).await {
            Ok((decoder, probe)) => inner.finish_load(epoch, &id, decoder, probe),
            Err(e) => {
                if inner.is_current(epoch) {
                    if let Err(cleanup) = inner.cache.invalidate(&id).await {
                        warn!(error = %cleanup, "Failed to invalidate after decoder error");
                    }
                }
                inner.fail_load(epoch, &id, e)
            }
        }
    }

    /// Start or resume playback. A no-op while already playing.
    pub fn play(&self) -> Result<()> {
        let runtime = Handle::try_current().map_err(|_| {
            PlaybackError::EngineFailure("play requires a tokio runtime".to_string())
        })?;

        let (job, position_ms) = {
            let mut session = self.inner.session.lock();
            match session.snapshot.state {
                PlaybackState::Playing => return Ok(()),
                PlaybackState::Ready | PlaybackState::Paused => {}
                other => {
                    return Err(PlaybackError::InvalidState {
                        operation: "play",
                        state: other.to_string(),
                    })
                }
            }

            let job = session.start_render()?;
            session.snapshot.state = PlaybackState::Playing;
            (job, session.snapshot.position().millis())
        };

        debug!(content_id = %job.content_id, position_ms, "Playback started");
        self.inner.emit(PlaybackEvent::Playing {
            content_id: job.content_id.to_string(),
            position_ms,
        });
        runtime.spawn(render(self.inner.clone(), job));

        Ok(())
    }

    /// Pause playback, keeping the position reached.
    pub fn pause(&self) -> Result<()> {
        let (content_id, position_ms) = {
            let mut session = self.inner.session.lock();
            if session.snapshot.state != PlaybackState::Playing {
                return Err(PlaybackError::InvalidState {
                    operation: "pause",
                    state: session.snapshot.state.to_string(),
                });
            }

            session.advance_epoch();
            session.snapshot.state = PlaybackState::Paused;
            (session.content_label(), session.snapshot.position().millis())
        };

        debug!(position_ms, "Playback paused");
        self.inner.emit(PlaybackEvent::Paused {
            content_id,
            position_ms,
        });
        Ok(())
    }

    /// Move to `seconds`, clamped to `[0, duration]`. Non-finite input is
    /// treated as 0. Playback continues from the new position if playing.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        let runtime = Handle::try_current().ok();

        let (job, content_id, position_ms, duration_ms) = {
            let mut session = self.inner.session.lock();
            let state = session.snapshot.state;
            if !state.is_seekable() {
                return Err(PlaybackError::InvalidState {
                    operation: "seek",
                    state: state.to_string(),
                });
            }
            if state == PlaybackState::Playing && runtime.is_none() {
                return Err(PlaybackError::EngineFailure(
                    "seek while playing requires a tokio runtime".to_string(),
                ));
            }

            let seconds = if seconds.is_finite() {
                seconds.max(0.0)
            } else {
                0.0
            };
            let mut frames = (seconds * session.snapshot.sample_rate).round() as u64;
            if let Some(duration) = session.snapshot.duration_frames {
                frames = frames.min(duration);
            }
            session.snapshot.position_frames = frames;

            let job = if state == PlaybackState::Playing {
                Some(session.start_render()?)
            } else {
                None
            };

            (
                job,
                session.content_label(),
                session.snapshot.position().millis(),
                session.duration_ms(),
            )
        };

        debug!(position_ms, "Seek");
        if let (Some(job), Some(runtime)) = (job, runtime) {
            runtime.spawn(render(self.inner.clone(), job));
        }
        self.inner.emit(PlaybackEvent::PositionChanged {
            content_id,
            position_ms,
            duration_ms,
        });
        Ok(())
    }

    /// Stop playback and unload. Never suspends; the plaintext is invalidated
    /// on a background task. A no-op when nothing is loaded.
    pub fn stop(&self) {
        let stopped = {
            let mut session = self.inner.session.lock();
            if !session.snapshot.state.is_active() {
                return;
            }

            session.advance_epoch();
            session.unload();
            let content_id = session.snapshot.content_id.take();
            session.snapshot = PlaybackSession {
                state: PlaybackState::Stopped,
                ..PlaybackSession::default()
            };
            content_id
        };

        info!("Playback stopped");
        if let Some(id) = stopped {
            self.inner.emit(PlaybackEvent::Stopped {
                content_id: id.to_string(),
            });
            self.inner.spawn_invalidation(id);
        }
    }

    /// Wait until every invalidation spawned so far has finished.
    pub async fn wait_for_cleanup(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.inner.cleanup.lock());
            if handles.is_empty() {
                return;
            }
            join_cleanup(handles).await;
        }
    }
}

impl std::fmt::Debug for PlaybackEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackEngine")
            .field("session", &self.session())
            .finish()
    }
}

impl EngineInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.session.lock().epoch == epoch
    }

    async fn open_decoder(
        &self,
        path: std::path::PathBuf,
    ) -> Result<(Box<dyn AudioDecoder>, ProbeResult)> {
        let mut decoder = self.decoders.open(AudioSource::local_file(path)).await?;
        let probe = decoder.probe().await?;

        if probe.format.sample_rate == 0 || probe.format.channels == 0 {
            return Err(PlaybackError::EngineFailure(format!(
                "Decoder reported an unusable format: {}Hz, {} channels",
                probe.format.sample_rate, probe.format.channels
            )));
        }

        Ok((decoder, probe))
    }

    fn finish_load(
        &self,
        epoch: u64,
        id: &ContentId,
        decoder: Box<dyn AudioDecoder>,
        probe: ProbeResult,
    ) -> Result<()> {
        let installed = {
            let mut session = self.session.lock();
            if session.epoch == epoch {
                session.decoder = Some(Arc::new(AsyncMutex::new(decoder)));
                session.output_format = Some(OutputFormat::new(
                    probe.format.sample_rate,
                    probe.format.channels,
                ));
                session.decoder_dirty = false;
                session.snapshot.state = PlaybackState::Ready;
                session.snapshot.position_frames = 0;
                session.snapshot.sample_rate = f64::from(probe.format.sample_rate);
                session.snapshot.duration_frames = probe.total_frames;
                Some(session.duration_ms())
            } else {
                None
            }
        };

        let Some(duration_ms) = installed else {
            return Err(self.supersede(id));
        };

        info!(duration_ms, codec = ?probe.format.codec, "Content loaded");
        self.emit(PlaybackEvent::Loaded {
            content_id: id.to_string(),
            duration_ms,
        });
        Ok(())
    }

    fn fail_load(&self, epoch: u64, id: &ContentId, err: PlaybackError) -> Result<()> {
        let current = {
            let mut session = self.session.lock();
            if session.epoch == epoch {
                session.unload();
                session.snapshot = PlaybackSession {
                    state: PlaybackState::Error(err.kind()),
                    ..PlaybackSession::default()
                };
                true
            } else {
                false
            }
        };

        if !current {
            return Err(self.supersede(id));
        }

        if err.is_user_recoverable() {
            info!(error = %err, "Load needs user action");
        } else {
            warn!(error = %err, "Load failed");
        }
        self.emit_error(Some(id), &err);
        Err(err)
    }

    /// Discard a load overtaken by a newer load or a stop.
    fn supersede(&self, id: &ContentId) -> PlaybackError {
        let same_content = self.session.lock().snapshot.content_id.as_ref() == Some(id);
        if !same_content {
            self.spawn_invalidation(id.clone());
        }

        debug!(content_id = %id, "Load superseded");
        PlaybackError::LoadSuperseded(id.to_string())
    }

    /// Advance the position after a written chunk. `None` if the render task
    /// that wrote it is stale.
    fn advance(&self, epoch: u64, frames: u64) -> Option<(PlaybackPosition, u64)> {
        let mut session = self.session.lock();
        if session.epoch != epoch || session.snapshot.state != PlaybackState::Playing {
            return None;
        }

        session.snapshot.position_frames += frames;
        Some((session.snapshot.position(), session.duration_ms()))
    }

    /// Move a finished or failed render to its end state and clean up.
    fn end_render(self: &Arc<Self>, epoch: u64, id: ContentId, outcome: RenderOutcome) {
        let (end_state, failure) = match outcome {
            RenderOutcome::Cancelled => return,
            RenderOutcome::Finished => (PlaybackState::Stopped, None),
            RenderOutcome::Failed(e) => (PlaybackState::Error(e.kind()), Some(e)),
        };

        let ended_epoch = {
            let mut session = self.session.lock();
            if session.epoch != epoch {
                return;
            }
            let ended = session.advance_epoch();
            session.unload();
            session.snapshot.state = end_state;
            session.snapshot.position_frames = 0;
            ended
        };

        match &failure {
            None => info!(content_id = %id, "Playback finished"),
            Some(e) => error!(content_id = %id, error = %e, "Playback failed"),
        }

        let inner = Arc::clone(self);
        self.spawn_cleanup(id.clone(), async move {
            if let Err(e) = inner.cache.invalidate(&id).await {
                warn!(content_id = %id, error = %e, "Failed to invalidate after playback");
            }

            {
                let mut session = inner.session.lock();
                if session.epoch == ended_epoch {
                    session.snapshot.content_id = None;
                }
            }

            match failure {
                None => inner.emit(PlaybackEvent::Finished {
                    content_id: id.to_string(),
                }),
                Some(e) => inner.emit_error(Some(&id), &e),
            }
        });
    }

    fn spawn_invalidation(&self, id: ContentId) {
        let cache = Arc::clone(&self.cache);
        let target = id.clone();
        self.spawn_cleanup(id, async move {
            if let Err(e) = cache.invalidate(&target).await {
                warn!(content_id = %target, error = %e, "Background invalidation failed");
            }
        });
    }

    fn spawn_cleanup<F>(&self, id: ContentId, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match Handle::try_current() {
            Ok(runtime) => {
                let handle = runtime.spawn(task);
                let mut cleanup = self.cleanup.lock();
                cleanup.retain(|(_, handle)| !handle.is_finished());
                cleanup.push((id, handle));
            }
            Err(_) => {
                warn!(content_id = %id, "No async runtime; plaintext left for garbage collection");
            }
        }
    }

    async fn await_cleanup_for(&self, id: &ContentId) {
        let pending: Vec<_> = {
            let mut cleanup = self.cleanup.lock();
            let (pending, rest): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *cleanup).into_iter().partition(|(cid, _)| cid == id);
            *cleanup = rest;
            pending
        };

        if !pending.is_empty() {
            join_cleanup(pending).await;
        }
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            bus.emit(CoreEvent::Playback(event)).ok();
        }
    }

    fn emit_error(&self, id: Option<&ContentId>, err: &PlaybackError) {
        self.emit(PlaybackEvent::Error {
            content_id: id.map(ToString::to_string),
            kind: err.kind().as_str().to_string(),
            message: err.to_string(),
            recoverable: err.is_user_recoverable(),
        });
    }
}

async fn join_cleanup(handles: Vec<(ContentId, JoinHandle<()>)>) {
    let (ids, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
    for (id, result) in ids.iter().zip(join_all(handles).await) {
        if let Err(e) = result {
            error!(content_id = %id, error = %e, "Cleanup task panicked");
        }
    }
}

/// Body of a render task: pull chunks from the decoder and push them to the
/// output until the stream ends, an error occurs, or the job is cancelled.
async fn render(inner: Arc<EngineInner>, job: RenderJob) {
    let mut decoder = tokio::select! {
        _ = job.token.cancelled() => return,
        guard = Arc::clone(&job.decoder).lock_owned() => guard,
    };

    let outcome = render_chunks(&inner, &job, decoder.as_mut()).await;

    if let Err(e) = inner.output.stop().await {
        debug!(error = %e, "Audio output stop failed");
    }
    drop(decoder);

    inner.end_render(job.epoch, job.content_id, outcome);
}

async fn render_chunks(
    inner: &EngineInner,
    job: &RenderJob,
    decoder: &mut dyn AudioDecoder,
) -> RenderOutcome {
    if let Some(frame) = job.seek_to {
        let position = Duration::from_secs_f64(frame as f64 / job.sample_rate.max(1.0));
        let sought = tokio::select! {
            _ = job.token.cancelled() => return RenderOutcome::Cancelled,
            result = decoder.seek(position) => result,
        };
        if let Err(e) = sought {
            return RenderOutcome::Failed(e);
        }
    }

    let started = tokio::select! {
        _ = job.token.cancelled() => return RenderOutcome::Cancelled,
        result = inner.output.start(job.format) => result,
    };
    if let Err(e) = started {
        return RenderOutcome::Failed(PlaybackError::EngineFailure(format!(
            "Audio output failed to start: {}",
            e
        )));
    }

    let mut last_position_event = Instant::now();

    loop {
        let next = tokio::select! {
            _ = job.token.cancelled() => return RenderOutcome::Cancelled,
            result = decoder.decode_frames(inner.config.chunk_frames) => result,
        };

        let chunk = match next {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return RenderOutcome::Finished,
            Err(e) => return RenderOutcome::Failed(e),
        };
        if chunk.is_empty() {
            continue;
        }

        let written = tokio::select! {
            _ = job.token.cancelled() => return RenderOutcome::Cancelled,
            result = inner.output.write(&chunk.samples) => result,
        };
        if let Err(e) = written {
            return RenderOutcome::Failed(PlaybackError::EngineFailure(format!(
                "Audio output write failed: {}",
                e
            )));
        }

        let Some((position, duration_ms)) = inner.advance(job.epoch, chunk.frames as u64) else {
            return RenderOutcome::Cancelled;
        };

        if last_position_event.elapsed() >= inner.config.position_event_interval {
            last_position_event = Instant::now();
            inner.emit(PlaybackEvent::PositionChanged {
                content_id: job.content_id.to_string(),
                position_ms: position.millis(),
                duration_ms,
            });
        }
    }
}
