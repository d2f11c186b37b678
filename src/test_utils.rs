//! Test doubles and fixtures shared by unit tests and benches
//!
//! - [`ScriptedBackend`] replays a fixed sequence of capture outcomes
//! - [`CountingSource`] counts frame store reads
//! - [`MockTransport`], [`MockPeerConnection`] and [`MockTrack`] record every transport call
//!   and can be told to fail at a chosen negotiation step

use async_trait::async_trait;
use bytes::Bytes;
use image::ExtendedColorType;
use image::codecs::jpeg::JpegEncoder;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::backend::{CaptureBackend, CaptureFormat, WaitResult};
use crate::store::{FrameSource, FrameStore};
use crate::transport::{
    ConnectionState, IceCandidateInit, IceServer, MediaTrack, PeerConnection, SessionDescription, StateCallback,
    TransferStats, Transport, TransportError,
};
use crate::types::{Frame, FrameSize, PixelFormat};
use crate::{DriverError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Encode an 8x8 solid-colour JPEG whose colour depends on `tag`.
pub fn tiny_jpeg(tag: u8) -> Vec<u8> {
    let pixels: Vec<u8> = std::iter::repeat_n([tag, 255 - tag, tag / 2], 64).flatten().collect();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode(&pixels, 8, 8, ExtendedColorType::Rgb8)
        .expect("in-memory JPEG encoding");
    out
}

/// One scripted capture outcome
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Frame(Bytes),
    Empty,
    Timeout,
    Error,
}

/// Call counters shared between a [`ScriptedBackend`] and the test
#[derive(Debug, Default)]
pub struct ScriptStats {
    starts: AtomicUsize,
    stops: AtomicUsize,
    reads: AtomicUsize,
}

impl ScriptStats {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Backend that plays a fixed script, then reports timeouts forever.
pub struct ScriptedBackend {
    script: VecDeque<ScriptStep>,
    pending: Option<Bytes>,
    format: PixelFormat,
    fail_start: bool,
    block_when_exhausted: bool,
    stats: Arc<ScriptStats>,
}

impl ScriptedBackend {
    pub fn new(script: Vec<ScriptStep>) -> Self {
        Self {
            script: script.into(),
            pending: None,
            format: PixelFormat::Mjpeg,
            fail_start: false,
            block_when_exhausted: false,
            stats: Arc::default(),
        }
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Make every `start` fail as if the device were unusable
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Once the script is used up, block for the whole wait window like a starved device
    pub fn blocking_when_exhausted(mut self) -> Self {
        self.block_when_exhausted = true;
        self
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        Arc::clone(&self.stats)
    }
}

impl CaptureBackend for ScriptedBackend {
    fn configure(&mut self, format: &CaptureFormat) -> Result<FrameSize> {
        Ok(FrameSize { width: format.width, height: format.height })
    }

    fn start(&mut self) -> Result<()> {
        if self.fail_start {
            return Err(DriverError::device_error("start"));
        }
        self.stats.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.stats.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn wait_for_frame(&mut self, timeout: Duration) -> Result<WaitResult> {
        match self.script.pop_front() {
            Some(ScriptStep::Frame(data)) => {
                self.pending = Some(data);
                Ok(WaitResult::Ready)
            }
            Some(ScriptStep::Empty) => {
                self.pending = Some(Bytes::new());
                Ok(WaitResult::Ready)
            }
            Some(ScriptStep::Timeout) => Ok(WaitResult::Timeout),
            Some(ScriptStep::Error) => Err(DriverError::device_error("scripted read failure")),
            None => {
                let idle = if self.block_when_exhausted { timeout } else { timeout.min(Duration::from_millis(5)) };
                std::thread::sleep(idle);
                Ok(WaitResult::Timeout)
            }
        }
    }

    fn read_frame(&mut self) -> Result<Bytes> {
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        self.pending.take().ok_or_else(|| DriverError::device_error("no pending frame"))
    }

    fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

/// Frame source that counts how often it is read.
#[derive(Debug, Clone)]
pub struct CountingSource {
    store: FrameStore,
    reads: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new(store: FrameStore) -> Self {
        Self { store, reads: Arc::default() }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl FrameSource for CountingSource {
    fn latest(&self) -> Option<Frame> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.store.latest()
    }
}

/// Track that records samples and can fail on demand.
#[derive(Default)]
pub struct MockTrack {
    attempts: AtomicUsize,
    samples: AtomicUsize,
    last_duration: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<TransportError>>,
}

impl MockTrack {
    /// Fail the next write with `error`. Failures queue up in order.
    pub fn fail_next(&self, error: TransportError) {
        lock(&self.failures).push_back(error);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful writes
    pub fn samples(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }

    pub fn last_duration(&self) -> Option<Duration> {
        *lock(&self.last_duration)
    }
}

#[async_trait]
impl MediaTrack for MockTrack {
    async fn write_sample(&self, _data: Bytes, duration: Duration) -> std::result::Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.failures).pop_front() {
            return Err(error);
        }
        self.samples.fetch_add(1, Ordering::SeqCst);
        *lock(&self.last_duration) = Some(duration);
        Ok(())
    }
}

/// Negotiation step a mock can be told to fail at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationStep {
    NewConnection,
    AddTrack,
    SetRemote,
    CreateAnswer,
    SetLocal,
    AddCandidate,
}

/// Peer connection that records calls.
pub struct MockPeerConnection {
    fail_at: Option<NegotiationStep>,
    stall: Option<(NegotiationStep, Duration)>,
    transfer: Mutex<Option<TransferStats>>,
    state: Mutex<ConnectionState>,
    callback: Mutex<Option<StateCallback>>,
    tracks: AtomicUsize,
    closes: AtomicUsize,
    remote: Mutex<Option<SessionDescription>>,
    local: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidateInit>>,
}

impl MockPeerConnection {
    fn new(fail_at: Option<NegotiationStep>, stall: Option<(NegotiationStep, Duration)>) -> Self {
        Self {
            fail_at,
            stall,
            transfer: Mutex::new(None),
            state: Mutex::new(ConnectionState::New),
            callback: Mutex::new(None),
            tracks: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            remote: Mutex::new(None),
            local: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
        }
    }

    async fn check(&self, step: NegotiationStep) -> std::result::Result<(), TransportError> {
        if let Some((_, delay)) = self.stall.filter(|(stalled, _)| *stalled == step) {
            tokio::time::sleep(delay).await;
        }
        if self.fail_at == Some(step) {
            return Err(TransportError::failed(format!("{step:?}"), "scripted failure"));
        }
        Ok(())
    }

    /// Report a state change as the transport would
    pub fn emit(&self, state: ConnectionState) {
        *lock(&self.state) = state;
        if let Some(callback) = lock(&self.callback).as_ref() {
            callback(state);
        }
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn tracks(&self) -> usize {
        self.tracks.load(Ordering::SeqCst)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        lock(&self.remote).clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        lock(&self.local).clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidateInit> {
        lock(&self.candidates).clone()
    }

    /// Start reporting transfer counters
    pub fn set_transfer(&self, stats: TransferStats) {
        *lock(&self.transfer) = Some(stats);
    }
}

#[async_trait]
impl PeerConnection for MockPeerConnection {
    async fn add_outbound_track(&self) -> std::result::Result<(), TransportError> {
        self.check(NegotiationStep::AddTrack).await?;
        self.tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn set_remote_description(&self, offer: SessionDescription) -> std::result::Result<(), TransportError> {
        self.check(NegotiationStep::SetRemote).await?;
        *lock(&self.remote) = Some(offer);
        Ok(())
    }

    async fn create_answer(&self) -> std::result::Result<SessionDescription, TransportError> {
        self.check(NegotiationStep::CreateAnswer).await?;
        Ok(SessionDescription::answer("v=0\r\ns=mock-answer\r\n"))
    }

    async fn set_local_description(&self, answer: SessionDescription) -> std::result::Result<(), TransportError> {
        self.check(NegotiationStep::SetLocal).await?;
        *lock(&self.local) = Some(answer);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidateInit) -> std::result::Result<(), TransportError> {
        self.check(NegotiationStep::AddCandidate).await?;
        lock(&self.candidates).push(candidate);
        Ok(())
    }

    fn on_connection_state_change(&self, callback: StateCallback) {
        *lock(&self.callback) = Some(callback);
    }

    fn connection_state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    async fn transfer_stats(&self) -> Option<TransferStats> {
        *lock(&self.transfer)
    }

    async fn close(&self) -> std::result::Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.emit(ConnectionState::Closed);
        Ok(())
    }
}

/// Transport that hands out [`MockPeerConnection`]s and keeps every one it created.
#[derive(Default)]
pub struct MockTransport {
    fail_at: Mutex<Option<NegotiationStep>>,
    stall: Mutex<Option<(NegotiationStep, Duration)>>,
    connections: Mutex<Vec<Arc<MockPeerConnection>>>,
    track: Arc<MockTrack>,
}

impl MockTransport {
    /// Make connections created from now on fail at `step`
    pub fn fail_at(&self, step: Option<NegotiationStep>) {
        *lock(&self.fail_at) = step;
    }

    /// Make connections created from now on pause for `delay` before `step`
    pub fn stall_at(&self, step: NegotiationStep, delay: Duration) {
        *lock(&self.stall) = Some((step, delay));
    }

    pub fn connections(&self) -> Vec<Arc<MockPeerConnection>> {
        lock(&self.connections).clone()
    }

    pub fn last_connection(&self) -> Option<Arc<MockPeerConnection>> {
        lock(&self.connections).last().cloned()
    }

    pub fn track(&self) -> Arc<MockTrack> {
        Arc::clone(&self.track)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn new_connection(
        &self,
        _ice_servers: &[IceServer],
    ) -> std::result::Result<Arc<dyn PeerConnection>, TransportError> {
        let fail_at = *lock(&self.fail_at);
        if fail_at == Some(NegotiationStep::NewConnection) {
            return Err(TransportError::failed("new_connection", "scripted failure"));
        }
        let connection = Arc::new(MockPeerConnection::new(fail_at, *lock(&self.stall)));
        lock(&self.connections).push(Arc::clone(&connection));
        Ok(connection)
    }

    fn outbound_track(&self) -> Arc<dyn MediaTrack> {
        self.track.clone()
    }
}
