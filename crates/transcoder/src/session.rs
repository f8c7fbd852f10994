//! Transcode session registry and lifecycle.
//!
//! A session is one transcoder process writing an HLS playlist and segments into a
//! private directory. Sessions are keyed by a fingerprint of what is being streamed,
//! so identical concurrent requests share one process.
//!
//! ```text
//! Starting --spawned--> Ready --pause--> Paused
//!                         ^                |
//!                         +----resume------+
//! any --stop / reaper / failure--> Stopped (evicted)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::command::build_ffmpeg_args;
use crate::hls::{PLAYLIST_FILE, is_playlist_ready, is_valid_segment_name};
use crate::preset::{EncoderFallback, TranscodeParams};
use crate::process::{LaunchSpec, Launcher, ProcessExit, TranscodeProcess, log_tail};
use crate::{TranscodeError, TranscoderConfig};

/// A hardware session dying this soon after launch is treated as an encoder problem.
const FAST_FAILURE: Duration = Duration::from_secs(5);
/// How long a remembered encoder downgrade stays valid.
const FALLBACK_TTL: Duration = Duration::from_secs(30 * 60);
const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Starting,
    Ready,
    Paused,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        })
    }
}

/// The immutable parameters a session is created from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionKey {
    /// Media-root-relative path, exactly as the client addresses it.
    pub media_path: String,
    pub quality: String,
    pub codec: String,
    pub audio_track: u32,
    pub start_offset_secs: f64,
}

impl SessionKey {
    pub fn start_offset_millis(&self) -> u64 {
        (self.start_offset_secs.max(0.0) * 1000.0).round() as u64
    }

    /// Lowercase hex of the first 16 bytes of SHA-256 over
    /// `path|quality|codec|audioTrack|startOffsetMillis`.
    pub fn fingerprint(&self) -> String {
        let input = format!(
            "{}|{}|{}|{}|{}",
            self.media_path,
            self.quality,
            self.codec,
            self.audio_track,
            self.start_offset_millis()
        );
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(&digest[..16])
    }

    /// Same file, quality, codec and audio track; the start offset may differ.
    pub fn same_stream(&self, other: &SessionKey) -> bool {
        self.media_path == other.media_path
            && self.quality == other.quality
            && self.codec == other.codec
            && self.audio_track == other.audio_track
    }
}

/// Everything needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub key: SessionKey,
    /// Absolute path of the source file.
    pub input_path: PathBuf,
    pub params: TranscodeParams,
}

/// What `get_or_create` hands back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: String,
    pub output_dir: PathBuf,
    pub state: SessionState,
    /// True when this call created the session.
    pub created: bool,
}

/// Read-only snapshot for the admin view.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub source_path: String,
    pub quality: String,
    pub codec: String,
    pub encoder: String,
    pub audio_track: u32,
    pub start_offset_secs: f64,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub finished: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub starting: usize,
    pub ready: usize,
    pub paused: usize,
    pub total: usize,
    /// Starting + Ready: sessions currently holding an encoder.
    pub active: usize,
    /// Zero means unlimited.
    pub max_concurrent: usize,
}

struct TranscodeSession {
    id: String,
    key: SessionKey,
    input_path: PathBuf,
    params: TranscodeParams,
    state: SessionState,
    process: Option<Box<dyn TranscodeProcess>>,
    /// Distinguishes this incarnation from earlier ones under the same id.
    epoch: u64,
    output_dir: PathBuf,
    created_at: Instant,
    created_wall: DateTime<Utc>,
    last_heartbeat: Instant,
    paused_at: Option<Instant>,
    launched_at: Option<Instant>,
    /// The transcoder has exited and every segment it will ever write is on disk.
    finished: bool,
    /// The process was killed on pause because it cannot be suspended.
    respawn_on_resume: bool,
}

impl TranscodeSession {
    fn handle(&self, created: bool) -> SessionHandle {
        SessionHandle {
            id: self.id.clone(),
            output_dir: self.output_dir.clone(),
            state: self.state,
            created,
        }
    }

    fn holds_encoder(&self) -> bool {
        matches!(self.state, SessionState::Starting | SessionState::Ready)
    }

    fn info(&self, now: Instant) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            source_path: self.key.media_path.clone(),
            quality: self.key.quality.clone(),
            codec: self.key.codec.clone(),
            encoder: self.params.encoder_name().to_string(),
            audio_track: self.key.audio_track,
            start_offset_secs: self.key.start_offset_secs,
            state: self.state,
            created_at: self.created_wall,
            age_secs: now.saturating_duration_since(self.created_at).as_secs(),
            idle_secs: now.saturating_duration_since(self.last_heartbeat).as_secs(),
            finished: self.finished,
        }
    }

    /// Why the reaper should stop this session at `now`, if it should.
    fn expiry_reason(&self, now: Instant, config: &TranscoderConfig) -> Option<String> {
        if let Some(max_age) = config.max_session_age {
            if now.saturating_duration_since(self.created_at) > max_age {
                return Some(format!("max age {}s", max_age.as_secs()));
            }
        }
        match self.state {
            SessionState::Paused => {
                // A heartbeat while paused counts as intent to come back.
                let since = self
                    .paused_at
                    .map_or(self.last_heartbeat, |p| p.max(self.last_heartbeat));
                (now.saturating_duration_since(since) > config.paused_timeout)
                    .then(|| format!("paused timeout {}s", config.paused_timeout.as_secs()))
            }
            SessionState::Starting | SessionState::Ready => {
                let timeout = if self.finished {
                    config.finished_timeout
                } else {
                    config.heartbeat_timeout
                };
                (now.saturating_duration_since(self.last_heartbeat) > timeout)
                    .then(|| format!("heartbeat timeout {}s", timeout.as_secs()))
            }
            SessionState::Stopped => Some("stopped".into()),
        }
    }
}

impl Drop for TranscodeSession {
    fn drop(&mut self) {
        if let Some(process) = self.process.take() {
            process.kill();
        }
    }
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<String, TranscodeSession>,
    /// Fingerprint -> downgrade to apply on the next creation, and when it was recorded.
    fallbacks: HashMap<String, (EncoderFallback, Instant)>,
    next_epoch: u64,
}

impl Registry {
    fn active_count(&self) -> usize {
        self.sessions.values().filter(|s| s.holds_encoder()).count()
    }
}

/// Owns every transcode session. Shared between handlers behind an `Arc`.
pub struct SessionManager {
    config: TranscoderConfig,
    launcher: Arc<dyn Launcher>,
    registry: Arc<Mutex<Registry>>,
}

impl SessionManager {
    pub fn new(config: TranscoderConfig, launcher: Arc<dyn Launcher>) -> Self {
        Self {
            config,
            launcher,
            registry: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Return the live session for this request's fingerprint, or create one.
    ///
    /// Lookup and insertion happen under one lock acquisition, so concurrent identical
    /// requests spawn exactly one process. The process is launched in the background;
    /// callers discover readiness through [`wait_for_playlist`](Self::wait_for_playlist).
    pub async fn get_or_create(
        self: &Arc<Self>,
        req: SessionRequest,
    ) -> Result<SessionHandle, TranscodeError> {
        let id = req.key.fingerprint();
        let mut reg = self.registry.lock().await;

        if let Some(existing) = reg.sessions.get(&id) {
            return Ok(existing.handle(false));
        }

        let max = self.config.max_concurrent;
        if max > 0 && reg.active_count() >= max {
            warn!(session_id = %id, max, "admission refused, transcoder limit reached");
            return Err(TranscodeError::MaxTranscodesReached(max));
        }

        let mut params = req.params;
        if let Some((fallback, _)) = reg.fallbacks.get(&id) {
            if params.is_hardware() {
                info!(session_id = %id, ?fallback, "applying remembered encoder fallback");
                params = params.with_fallback(*fallback);
            }
        }

        let epoch = reg.next_epoch;
        reg.next_epoch += 1;
        let now = Instant::now();
        let session = TranscodeSession {
            id: id.clone(),
            output_dir: self.config.transcode_dir.join(format!("{id}-{epoch}")),
            key: req.key,
            input_path: req.input_path,
            params,
            state: SessionState::Starting,
            process: None,
            epoch,
            created_at: now,
            created_wall: Utc::now(),
            last_heartbeat: now,
            paused_at: None,
            launched_at: None,
            finished: false,
            respawn_on_resume: false,
        };
        info!(
            session_id = %id,
            source = %session.key.media_path,
            quality = %session.key.quality,
            codec = %session.key.codec,
            encoder = %session.params.encoder_name(),
            start = session.key.start_offset_secs,
            "creating transcode session"
        );
        let handle = session.handle(true);
        let launch = self.launch_spec(&session);
        reg.sessions.insert(id, session);
        drop(reg);

        let mgr = Arc::clone(self);
        tokio::spawn(async move { mgr.launch(launch, epoch).await });

        Ok(handle)
    }

    fn launch_spec(&self, session: &TranscodeSession) -> LaunchSpec {
        LaunchSpec {
            session_id: session.id.clone(),
            program: self.config.ffmpeg_path.clone(),
            args: build_ffmpeg_args(
                &session.input_path,
                &session.output_dir,
                session.key.start_offset_secs,
                &session.params,
                self.config.segment_secs,
            ),
            output_dir: session.output_dir.clone(),
        }
    }

    async fn launch(self: Arc<Self>, spec: LaunchSpec, epoch: u64) {
        let id = spec.session_id.clone();

        if let Err(e) = tokio::fs::create_dir_all(&spec.output_dir).await {
            error!(session_id = %id, error = %e, "failed to create session directory");
            self.evict(&id, epoch).await;
            return;
        }

        let launched = match self.launcher.launch(&spec) {
            Ok(l) => l,
            Err(e) => {
                error!(session_id = %id, error = %e, "failed to start transcoder");
                self.evict(&id, epoch).await;
                return;
            }
        };

        let mut reg = self.registry.lock().await;
        match reg.sessions.get_mut(&id) {
            Some(s) if s.epoch == epoch && s.process.is_none() && s.state != SessionState::Paused => {
                s.process = Some(launched.process);
                s.state = SessionState::Ready;
                s.launched_at = Some(Instant::now());
                debug!(session_id = %id, "session ready");
            }
            // Paused (or already running again) while this process was starting. The
            // directory still belongs to the live session.
            Some(s) if s.epoch == epoch => {
                drop(reg);
                launched.process.kill();
                return;
            }
            // Stopped while the process was starting.
            _ => {
                drop(reg);
                launched.process.kill();
                remove_dir(&spec.output_dir, &id).await;
                return;
            }
        }
        drop(reg);

        self.watch_exit(id, epoch, spec.output_dir, launched.exited).await;
    }

    async fn watch_exit(
        &self,
        id: String,
        epoch: u64,
        output_dir: PathBuf,
        exited: oneshot::Receiver<ProcessExit>,
    ) {
        let reason = match exited.await.unwrap_or(ProcessExit::Killed) {
            ProcessExit::Killed => return,
            ProcessExit::Success => {
                let mut reg = self.registry.lock().await;
                if let Some(s) = reg.sessions.get_mut(&id).filter(|s| s.epoch == epoch) {
                    s.finished = true;
                    s.process = None;
                    info!(session_id = %id, "transcode completed");
                }
                return;
            }
            ProcessExit::Failed(reason) => reason,
        };

        let tail = log_tail(&output_dir, LOG_TAIL_LINES).await.unwrap_or_default();
        let has_playlist = tokio::fs::try_exists(output_dir.join(PLAYLIST_FILE))
            .await
            .unwrap_or(false);

        let mut reg = self.registry.lock().await;
        let Some(s) = reg.sessions.get_mut(&id).filter(|s| s.epoch == epoch) else {
            return;
        };
        warn!(
            session_id = %id,
            source = %s.key.media_path,
            quality = %s.key.quality,
            encoder = %s.params.encoder_name(),
            reason = %reason,
            log_tail = %tail,
            "transcoder exited with error"
        );

        let fast = s.launched_at.is_some_and(|t| t.elapsed() < FAST_FAILURE);
        let fallback = if fast { s.params.next_fallback() } else { None };

        if has_playlist {
            // Keep what was produced; the player can still use it.
            s.finished = true;
            s.process = None;
        }

        // Recorded before eviction so a retry racing the teardown already sees it.
        if let Some(fallback) = fallback {
            info!(session_id = %id, ?fallback, "hardware encode failed fast, next attempt will downgrade");
            reg.fallbacks.insert(id.clone(), (fallback, Instant::now()));
        }

        if !has_playlist {
            if let Some(session) = reg.sessions.remove(&id) {
                drop(reg);
                teardown(session, "transcoder failed").await;
            }
        }
    }

    /// Remove a session if it is still the given incarnation.
    async fn evict(&self, id: &str, epoch: u64) {
        let session = {
            let mut reg = self.registry.lock().await;
            match reg.sessions.get(id) {
                Some(s) if s.epoch == epoch => reg.sessions.remove(id),
                _ => None,
            }
        };
        if let Some(session) = session {
            teardown(session, "launch failed").await;
        }
    }

    /// Record client liveness. Returns whether the session exists; unknown ids are a no-op.
    pub async fn heartbeat(&self, id: &str) -> bool {
        self.heartbeat_at(id, Instant::now()).await
    }

    pub(crate) async fn heartbeat_at(&self, id: &str, at: Instant) -> bool {
        let mut reg = self.registry.lock().await;
        match reg.sessions.get_mut(id) {
            Some(s) => {
                s.last_heartbeat = s.last_heartbeat.max(at);
                true
            }
            None => false,
        }
    }

    /// Suspend the transcoder of a `Ready` session.
    ///
    /// `Ok(false)` for unknown ids. Where the process cannot be frozen it is killed
    /// and re-spawned on resume.
    pub async fn pause(&self, id: &str) -> Result<bool, TranscodeError> {
        let mut reg = self.registry.lock().await;
        let Some(s) = reg.sessions.get_mut(id) else {
            return Ok(false);
        };
        if s.state != SessionState::Ready {
            return Err(TranscodeError::InvalidTransition {
                id: id.to_string(),
                op: "pause",
                state: s.state,
            });
        }

        if !s.finished {
            match s.process.as_ref() {
                Some(p) if p.can_suspend() => p.suspend()?,
                Some(_) => {
                    if let Some(p) = s.process.take() {
                        p.kill();
                    }
                    s.respawn_on_resume = true;
                }
                // A re-spawn is still starting; it will see the pause and bail out.
                None => s.respawn_on_resume = true,
            }
        }

        s.state = SessionState::Paused;
        s.paused_at = Some(Instant::now());
        info!(session_id = %id, respawn = s.respawn_on_resume, "session paused");
        Ok(true)
    }

    /// Continue a `Paused` session. `Ok(false)` for unknown ids.
    pub async fn resume(self: &Arc<Self>, id: &str) -> Result<bool, TranscodeError> {
        let mut reg = self.registry.lock().await;
        let Some(s) = reg.sessions.get_mut(id) else {
            return Ok(false);
        };
        if s.state != SessionState::Paused {
            return Err(TranscodeError::InvalidTransition {
                id: id.to_string(),
                op: "resume",
                state: s.state,
            });
        }

        let respawn = if s.respawn_on_resume {
            s.respawn_on_resume = false;
            Some((self.launch_spec(s), s.epoch))
        } else {
            if let Some(p) = s.process.as_ref() {
                p.resume()?;
            }
            None
        };

        s.state = SessionState::Ready;
        s.paused_at = None;
        s.last_heartbeat = s.last_heartbeat.max(Instant::now());
        info!(session_id = %id, "session resumed");
        drop(reg);

        if let Some((spec, epoch)) = respawn {
            let mgr = Arc::clone(self);
            tokio::spawn(async move { mgr.launch(spec, epoch).await });
        }
        Ok(true)
    }

    /// Kill the process, delete the output and forget the session. Idempotent:
    /// returns whether anything was stopped.
    pub async fn stop(&self, id: &str) -> bool {
        let session = {
            let mut reg = self.registry.lock().await;
            reg.fallbacks.remove(id);
            reg.sessions.remove(id)
        };
        match session {
            Some(s) => {
                teardown(s, "stopped").await;
                true
            }
            None => false,
        }
    }

    /// Stop every other session of the same stream (a seek replaced them).
    pub async fn stop_superseded(&self, key: &SessionKey, keep_id: &str) -> usize {
        let removed: Vec<TranscodeSession> = {
            let mut reg = self.registry.lock().await;
            let ids: Vec<String> = reg
                .sessions
                .values()
                .filter(|s| s.id != keep_id && s.key.same_stream(key))
                .map(|s| s.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| {
                    reg.fallbacks.remove(id);
                    reg.sessions.remove(id)
                })
                .collect()
        };
        let count = removed.len();
        for s in removed {
            teardown(s, "replaced by seek").await;
        }
        count
    }

    /// One reaper sweep at the current time.
    pub async fn reap_idle(&self) -> Vec<String> {
        self.reap_idle_at(Instant::now()).await
    }

    /// Stop every session whose liveness expired as of `now`. Returns the reaped ids.
    pub async fn reap_idle_at(&self, now: Instant) -> Vec<String> {
        let expired: Vec<(TranscodeSession, String)> = {
            let mut reg = self.registry.lock().await;
            let ids: Vec<(String, String)> = reg
                .sessions
                .values()
                .filter_map(|s| s.expiry_reason(now, &self.config).map(|r| (s.id.clone(), r)))
                .collect();
            reg.fallbacks
                .retain(|_, (_, at)| now.saturating_duration_since(*at) <= FALLBACK_TTL);
            ids.into_iter()
                .filter_map(|(id, reason)| reg.sessions.remove(&id).map(|s| (s, reason)))
                .collect()
        };

        let mut reaped = Vec::with_capacity(expired.len());
        for (s, reason) in expired {
            reaped.push(s.id.clone());
            teardown(s, &reason).await;
        }
        reaped
    }

    /// Run [`reap_idle`](Self::reap_idle) every `reap_interval` until `shutdown` fires.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let mgr = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(mgr.config.reap_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let reaped = mgr.reap_idle().await;
                        if !reaped.is_empty() {
                            info!(count = reaped.len(), "reaped idle sessions");
                        }
                    }
                    _ = shutdown.cancelled() => break,
                }
            }
        })
    }

    /// Stop every session. Called on server shutdown.
    pub async fn shutdown(&self) {
        let all: Vec<TranscodeSession> = {
            let mut reg = self.registry.lock().await;
            reg.fallbacks.clear();
            reg.sessions.drain().map(|(_, s)| s).collect()
        };
        let count = all.len();
        for s in all {
            teardown(s, "shutdown").await;
        }
        info!(count, "all transcode sessions stopped");
    }

    /// Delete leftover session directories from a previous run.
    pub async fn purge_stale_output(&self) -> Result<usize, TranscodeError> {
        let dir = &self.config.transcode_dir;
        tokio::fs::create_dir_all(dir).await?;

        let live: Vec<PathBuf> = {
            let reg = self.registry.lock().await;
            reg.sessions.values().map(|s| s.output_dir.clone()).collect()
        };

        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if live.contains(&path) {
                continue;
            }
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "failed to purge stale output"),
            }
        }
        if removed > 0 {
            info!(removed, dir = %dir.display(), "purged stale transcode output");
        }
        Ok(removed)
    }

    /// Wait, bounded, until the session's playlist is ready and return its contents.
    ///
    /// Fails fast with `TranscodeFailed` once the session is gone (its transcoder
    /// died before writing anything, or it was stopped), and with `NotReady` when the
    /// poll budget runs out. The registry lock is never held while sleeping.
    pub async fn wait_for_playlist(&self, id: &str) -> Result<String, TranscodeError> {
        for _ in 0..self.config.playlist_poll_attempts {
            let Some(dir) = self.output_dir(id).await else {
                return Err(TranscodeError::TranscodeFailed(id.to_string()));
            };
            if let Ok(content) = tokio::fs::read_to_string(dir.join(PLAYLIST_FILE)).await {
                if is_playlist_ready(&content, self.config.min_playlist_segments) {
                    return Ok(content);
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(TranscodeError::NotReady(format!("playlist for session {id}")))
    }

    /// Wait, bounded, until a segment exists with non-zero size; return its path.
    pub async fn wait_for_segment(&self, id: &str, name: &str) -> Result<PathBuf, TranscodeError> {
        if !is_valid_segment_name(name) {
            return Err(TranscodeError::NotReady(format!("invalid segment name {name:?}")));
        }
        for _ in 0..self.config.segment_poll_attempts {
            let Some(dir) = self.output_dir(id).await else {
                return Err(TranscodeError::SessionNotFound(id.to_string()));
            };
            let path = dir.join(name);
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                if meta.len() > 0 {
                    return Ok(path);
                }
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
        Err(TranscodeError::NotReady(format!("segment {name} of session {id}")))
    }

    pub async fn output_dir(&self, id: &str) -> Option<PathBuf> {
        self.registry
            .lock()
            .await
            .sessions
            .get(id)
            .map(|s| s.output_dir.clone())
    }

    pub async fn state(&self, id: &str) -> Option<SessionState> {
        self.registry.lock().await.sessions.get(id).map(|s| s.state)
    }

    /// Snapshot of every session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let now = Instant::now();
        let reg = self.registry.lock().await;
        let mut list: Vec<SessionInfo> = reg.sessions.values().map(|s| s.info(now)).collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        list
    }

    pub async fn stats(&self) -> SessionStats {
        let reg = self.registry.lock().await;
        let mut stats = SessionStats {
            max_concurrent: self.config.max_concurrent,
            total: reg.sessions.len(),
            ..SessionStats::default()
        };
        for s in reg.sessions.values() {
            match s.state {
                SessionState::Starting => stats.starting += 1,
                SessionState::Ready => stats.ready += 1,
                SessionState::Paused => stats.paused += 1,
                SessionState::Stopped => {}
            }
        }
        stats.active = stats.starting + stats.ready;
        stats
    }

    #[cfg(test)]
    async fn last_heartbeat(&self, id: &str) -> Option<Instant> {
        self.registry
            .lock()
            .await
            .sessions
            .get(id)
            .map(|s| s.last_heartbeat)
    }
}

/// Kill and clean up a session already removed from the registry.
async fn teardown(mut session: TranscodeSession, reason: &str) {
    session.state = SessionState::Stopped;
    if let Some(process) = session.process.take() {
        process.kill();
    }
    remove_dir(&session.output_dir, &session.id).await;
    info!(
        session_id = %session.id,
        source = %session.key.media_path,
        quality = %session.key.quality,
        reason,
        "session stopped"
    );
}

async fn remove_dir(dir: &Path, session_id: &str) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(session_id, error = %e, "failed to clean up transcode dir"),
    }
}
