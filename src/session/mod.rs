//! Real-time transport session manager.
//!
//! The peer map is owned by a single registry task. Signaling tasks, transport state
//! callbacks and stats queries talk to it over a command channel, so every map mutation
//! happens on one logical owner. Negotiation calls (creating the connection, setting
//! descriptions, creating the answer) run in the calling signaling task and never while the
//! registry is busy with the map.
//!
//! Whoever takes a connection out of the map closes it. That makes cleanup idempotent: a
//! peer removed by a `Failed` state change is already gone when its signaling channel closes.
//! Until the registry has a connection, a [`PendingConnection`] guard owns the close, so an
//! offer that fails or is dropped mid-negotiation never leaves an unclosed connection behind.

use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::transport::{
    ConnectionState, IceCandidateInit, IceServer, MediaTrack, PeerConnection, SdpType, SessionDescription,
    Transport,
};
use crate::{DriverError, Result};

mod peer;
pub mod signaling;

pub use peer::{PeerId, PeerInfo, PeerState, SessionStats};
pub use signaling::{SignalKind, SignalMessage};

use peer::PeerSession;

enum Command {
    Insert { session: PeerSession, reply: oneshot::Sender<Option<Arc<dyn PeerConnection>>> },
    Lookup { peer_id: PeerId, reply: oneshot::Sender<Option<Arc<dyn PeerConnection>>> },
    StateChanged { peer_id: PeerId, generation: u64, state: ConnectionState },
    Remove { peer_id: PeerId, reply: oneshot::Sender<Option<Arc<dyn PeerConnection>>> },
    Snapshot { reply: oneshot::Sender<Vec<(PeerInfo, Arc<dyn PeerConnection>)>> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to the session registry. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn Transport>,
    ice_servers: Arc<[IceServer]>,
    peer_count: watch::Receiver<usize>,
    generation: Arc<AtomicU64>,
}

impl SessionManager {
    /// Spawn the registry task
    pub fn spawn(transport: Arc<dyn Transport>, ice_servers: Vec<IceServer>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let (count_tx, peer_count) = watch::channel(0);
        tokio::spawn(Registry::new(count_tx).run(rx));

        Self { commands, transport, ice_servers: ice_servers.into(), peer_count, generation: Arc::default() }
    }

    /// Number of active peers, updated after every map mutation
    pub fn peer_count(&self) -> watch::Receiver<usize> {
        self.peer_count.clone()
    }

    /// Track the sample feeder writes into
    pub fn outbound_track(&self) -> Arc<dyn MediaTrack> {
        self.transport.outbound_track()
    }

    /// Negotiate a connection for `peer_id` from an SDP offer and return the answer.
    ///
    /// On any failure the half-built connection is closed and nothing is retained.
    pub async fn handle_offer(&self, peer_id: &PeerId, offer: SessionDescription) -> Result<SessionDescription> {
        if offer.sdp_type != SdpType::Offer {
            return Err(DriverError::signaling(format!("expected an offer, got {:?}", offer.sdp_type)));
        }

        let connection = self.transport.new_connection(&self.ice_servers).await?;
        let pending = PendingConnection::new(peer_id, connection);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);

        let answer = match self.negotiate(&pending.connection, peer_id, generation, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                pending.close().await;
                return Err(e);
            }
        };

        let session = PeerSession {
            id: peer_id.clone(),
            state: PeerState::AnswerSent,
            generation,
            connection: Arc::clone(&pending.connection),
            created_at: Utc::now(),
        };
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Insert { session, reply }).is_err() {
            pending.close().await;
            return Err(registry_stopped());
        }
        // From here the registry owns the close, even if this future is dropped
        pending.disarm();

        let replaced = rx.await.map_err(|_| registry_stopped())?;
        if let Some(previous) = replaced {
            debug!(%peer_id, "Replacing previous connection after renegotiation");
            close_connection(peer_id, previous).await;
        }

        info!(%peer_id, "Peer negotiated");
        Ok(answer)
    }

    async fn negotiate(
        &self,
        connection: &Arc<dyn PeerConnection>,
        peer_id: &PeerId,
        generation: u64,
        offer: SessionDescription,
    ) -> Result<SessionDescription> {
        let commands = self.commands.clone();
        let callback_peer = peer_id.clone();
        connection.on_connection_state_change(Box::new(move |state| {
            let _ = commands.send(Command::StateChanged { peer_id: callback_peer.clone(), generation, state });
        }));

        connection
            .add_outbound_track()
            .await
            .map_err(|e| DriverError::signaling(format!("failed to add video track: {e}")))?;
        connection
            .set_remote_description(offer)
            .await
            .map_err(|e| DriverError::signaling(format!("failed to set remote description: {e}")))?;
        let answer = connection
            .create_answer()
            .await
            .map_err(|e| DriverError::signaling(format!("failed to create answer: {e}")))?;
        connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| DriverError::signaling(format!("failed to set local description: {e}")))?;
        Ok(answer)
    }

    /// Forward an ICE candidate to an existing peer.
    ///
    /// Unknown peers fail with [`DriverError::PeerNotFound`]; a null candidate is accepted and
    /// ignored.
    pub async fn handle_candidate(&self, peer_id: &PeerId, candidate: Option<IceCandidateInit>) -> Result<()> {
        let connection = self
            .request(|reply| Command::Lookup { peer_id: peer_id.clone(), reply })
            .await?
            .ok_or_else(|| DriverError::peer_not_found(peer_id.as_str()))?;

        let Some(candidate) = candidate else {
            return Ok(());
        };
        connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    /// Remove a peer and close its connection. Safe to call for unknown peers.
    pub async fn remove_peer(&self, peer_id: &PeerId) {
        match self.request(|reply| Command::Remove { peer_id: peer_id.clone(), reply }).await {
            Ok(Some(connection)) => close_connection(peer_id, connection).await,
            Ok(None) => {}
            Err(e) => debug!(%peer_id, "Peer removal skipped: {}", e),
        }
    }

    /// Read-only snapshot of the active peers, with transfer counters where the transport
    /// reports them
    pub async fn stats(&self) -> SessionStats {
        let peers = self.request(|reply| Command::Snapshot { reply }).await.unwrap_or_default();
        let peers: Vec<PeerInfo> = join_all(peers.into_iter().map(|(mut info, connection)| async move {
            if let Some(transfer) = connection.transfer_stats().await {
                info.bytes_sent = Some(transfer.bytes_sent);
                info.bytes_received = Some(transfer.bytes_received);
            }
            info
        }))
        .await;
        SessionStats { peer_count: peers.len(), peers }
    }

    /// Close every peer connection and stop the registry.
    pub async fn shutdown(&self) {
        if self.request(|reply| Command::Shutdown { reply }).await.is_err() {
            debug!("Session registry already stopped");
        }
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(command(reply)).map_err(|_| registry_stopped())?;
        rx.await.map_err(|_| registry_stopped())
    }
}

fn registry_stopped() -> DriverError {
    DriverError::signaling("session manager is shut down")
}

async fn close_connection(peer_id: &PeerId, connection: Arc<dyn PeerConnection>) {
    if let Err(e) = connection.close().await {
        warn!(%peer_id, "Failed to close peer connection: {}", e);
    }
}

fn spawn_close(peer_id: PeerId, connection: Arc<dyn PeerConnection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(async move { close_connection(&peer_id, connection).await });
        }
        Err(_) => warn!(%peer_id, "No runtime left to close peer connection"),
    }
}

/// A connection created for an offer that the registry does not own yet.
///
/// Dropped while armed, it closes the connection in the background.
struct PendingConnection {
    peer_id: PeerId,
    connection: Arc<dyn PeerConnection>,
    armed: bool,
}

impl PendingConnection {
    fn new(peer_id: &PeerId, connection: Arc<dyn PeerConnection>) -> Self {
        Self { peer_id: peer_id.clone(), connection, armed: true }
    }

    /// Hand the close over to whoever holds the other references
    fn disarm(mut self) {
        self.armed = false;
    }

    async fn close(mut self) {
        self.armed = false;
        close_connection(&self.peer_id, Arc::clone(&self.connection)).await;
    }
}

impl Drop for PendingConnection {
    fn drop(&mut self) {
        if self.armed {
            debug!(peer_id = %self.peer_id, "Closing connection of an abandoned offer");
            spawn_close(self.peer_id.clone(), Arc::clone(&self.connection));
        }
    }
}

/// Exclusive owner of the peer map
struct Registry {
    peers: HashMap<PeerId, PeerSession>,
    peer_count: watch::Sender<usize>,
}

impl Registry {
    fn new(peer_count: watch::Sender<usize>) -> Self {
        Self { peers: HashMap::new(), peer_count }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Insert { session, reply } => {
                    let peer_id = session.id.clone();
                    let replaced = self.insert(session);
                    self.publish_count();
                    // The offer was abandoned, so nobody else will close the replaced connection
                    if let Err(Some(previous)) = reply.send(replaced) {
                        spawn_close(peer_id, previous);
                    }
                }
                Command::Lookup { peer_id, reply } => {
                    let connection = self.peers.get(&peer_id).map(|s| Arc::clone(&s.connection));
                    let _ = reply.send(connection);
                }
                Command::StateChanged { peer_id, generation, state } => {
                    self.state_changed(peer_id, generation, state);
                    self.publish_count();
                }
                Command::Remove { peer_id, reply } => {
                    let removed = self.peers.remove(&peer_id).map(|s| s.connection);
                    if removed.is_some() {
                        info!(%peer_id, "Removed WebRTC peer");
                    }
                    self.publish_count();
                    let _ = reply.send(removed);
                }
                Command::Snapshot { reply } => {
                    let _ = reply.send(self.snapshot());
                }
                Command::Shutdown { reply } => {
                    let closing: Vec<_> = self.peers.drain().collect();
                    info!("Closing {} peer connections", closing.len());
                    self.peer_count.send_replace(0);
                    join_all(closing.into_iter().map(|(id, s)| async move {
                        close_connection(&id, s.connection).await;
                    }))
                    .await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // Offers that finished negotiating after shutdown was queued
        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let Command::Insert { session, .. } = command {
                close_connection(&session.id, session.connection).await;
            }
        }
        debug!("Session registry stopped");
    }

    fn publish_count(&self) {
        let len = self.peers.len();
        self.peer_count.send_if_modified(|count| std::mem::replace(count, len) != len);
    }

    fn insert(&mut self, session: PeerSession) -> Option<Arc<dyn PeerConnection>> {
        // The transport may have failed between negotiation and registration
        if session.connection.connection_state().is_terminal() {
            spawn_close(session.id, session.connection);
            return None;
        }
        self.peers.insert(session.id.clone(), session).map(|old| old.connection)
    }

    fn state_changed(&mut self, peer_id: PeerId, generation: u64, state: ConnectionState) {
        let Some(session) = self.peers.get_mut(&peer_id) else {
            debug!(%peer_id, %state, "State change for unknown peer");
            return;
        };
        if session.generation != generation {
            debug!(%peer_id, %state, "State change from a replaced connection");
            return;
        }

        let next = session.state.on_connection_state(state);
        info!(%peer_id, %state, from = ?session.state, to = ?next, "Peer connection state changed");
        session.state = next;

        if next.is_terminal() {
            if let Some(session) = self.peers.remove(&peer_id) {
                info!(%peer_id, "Removed WebRTC peer");
                spawn_close(peer_id, session.connection);
            }
        }
    }

    fn snapshot(&self) -> Vec<(PeerInfo, Arc<dyn PeerConnection>)> {
        let mut peers: Vec<_> = self.peers.values().map(|s| (s.info(), Arc::clone(&s.connection))).collect();
        peers.sort_by(|(a, _), (b, _)| a.created_at.cmp(&b.created_at));
        peers
    }
}
