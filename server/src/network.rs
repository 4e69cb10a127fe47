//! Server network layer handling UDP communications and session lifecycle

use log::{debug, error, info, warn};
use chrono::{DateTime, Utc};
use shared::{
    checked_from_epoch_millis, decode, encode, Packet, SessionId, MAX_PACKET_SIZE,
    PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, ChannelBroadcaster, Outbound};
use crate::config::ServerConfig;
use crate::error::SyncError;
use crate::ledger::PingLedger;
use crate::offsets::OffsetRegistry;
use crate::relay::CommandRelay;
use crate::scheduler::ClockSyncScheduler;
use crate::sessions::SessionRegistry;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Messages sent from network tasks to main server loop
#[derive(Debug)]
pub enum ServerMessage {
    PacketReceived { packet: Packet, addr: SocketAddr },
    SessionTimeout { session_id: SessionId },
    Shutdown,
}

/// Main server wiring the transport to the clock-sync core
pub struct Server {
    socket: Arc<UdpSocket>,
    config: ServerConfig,

    ledger: Arc<RwLock<PingLedger>>,
    offsets: Arc<RwLock<OffsetRegistry>>,
    sessions: Arc<RwLock<SessionRegistry>>,
    broadcaster: Arc<dyn Broadcaster>,
    scheduler: Arc<ClockSyncScheduler>,
    relay: Arc<CommandRelay>,

    // Communication channels
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    outbound_rx: Option<mpsc::UnboundedReceiver<Outbound>>,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> Result<Self, BoxError> {
        let socket = Arc::new(UdpSocket::bind(&config.bind_addr).await?);
        info!("Server listening on {}", socket.local_addr()?);

        let (server_tx, server_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let ledger = Arc::new(RwLock::new(PingLedger::new(config.ledger_capacity)));
        let offsets = Arc::new(RwLock::new(OffsetRegistry::new()));
        let sessions = Arc::new(RwLock::new(SessionRegistry::new(config.max_sessions)));
        let broadcaster: Arc<dyn Broadcaster> =
            Arc::new(ChannelBroadcaster::new(outbound_tx.clone()));

        let scheduler = Arc::new(ClockSyncScheduler::new(
            Arc::clone(&ledger),
            Arc::clone(&broadcaster),
            config.ping_interval,
            config.probe_delay,
        ));
        let relay = Arc::new(CommandRelay::new(
            Arc::clone(&offsets),
            Arc::clone(&sessions),
            Arc::clone(&broadcaster),
            config.staleness_threshold,
            config.uplink_latency,
            config.downlink_latency,
        ));

        Ok(Server {
            socket,
            config,
            ledger,
            offsets,
            sessions,
            broadcaster,
            scheduler,
            relay,
            outbound_tx,
            outbound_rx: Some(outbound_rx),
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Handle for stopping `run` from another task
    pub fn shutdown_sender(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns task that continuously listens for incoming packets
    fn spawn_network_receiver(&self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_PACKET_SIZE];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        if let Ok(packet) = decode(&buffer[0..len]) {
                            if let Err(e) =
                                server_tx.send(ServerMessage::PacketReceived { packet, addr })
                            {
                                error!("Failed to send packet to main loop: {}", e);
                                break;
                            }
                        } else {
                            warn!("Failed to deserialize packet from {}", addr);
                        }
                    }
                    Err(e) => {
                        error!("Error receiving packet: {}", e);
                        sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        })
    }

    /// Spawns task that processes outgoing packet queue
    fn spawn_network_sender(&mut self) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let sessions = Arc::clone(&self.sessions);
        let mut outbound_rx = self
            .outbound_rx
            .take()
            .unwrap_or_else(|| mpsc::unbounded_channel().1);

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                match message {
                    Outbound::Reply { packet, addr } => {
                        if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                            error!("Failed to send packet to {}: {}", addr, e);
                        }
                    }
                    Outbound::SendTo { session_id, packet } => {
                        let addr = {
                            let sessions_guard = sessions.read().await;
                            sessions_guard.addr_of(session_id)
                        };

                        match addr {
                            Some(addr) => {
                                if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await
                                {
                                    error!("Failed to send to session {}: {}", session_id, e);
                                }
                            }
                            // Session left between queueing and sending
                            None => debug!("Dropping packet for departed session {}", session_id),
                        }
                    }
                    Outbound::Broadcast { packet } => {
                        let session_addrs = {
                            let sessions_guard = sessions.read().await;
                            sessions_guard.session_addrs()
                        };

                        for (session_id, addr) in session_addrs {
                            if let Err(e) = Self::send_packet_impl(&socket, &packet, addr).await {
                                error!("Failed to send to session {}: {}", session_id, e);
                            }
                        }
                    }
                }
            }
        })
    }

    /// Spawns task that monitors session timeouts
    fn spawn_timeout_checker(&self) -> JoinHandle<()> {
        let sessions = Arc::clone(&self.sessions);
        let server_tx = self.server_tx.clone();
        let timeout = self.config.session_timeout;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));

            loop {
                interval.tick().await;

                let timed_out = {
                    let mut sessions_guard = sessions.write().await;
                    sessions_guard.check_timeouts(timeout)
                };

                for session_id in timed_out {
                    if let Err(e) = server_tx.send(ServerMessage::SessionTimeout { session_id }) {
                        error!("Failed to send timeout message: {}", e);
                        return;
                    }
                }
            }
        })
    }

    async fn send_packet_impl(
        socket: &UdpSocket,
        packet: &Packet,
        addr: SocketAddr,
    ) -> Result<(), BoxError> {
        let data = encode(packet)?;
        socket.send_to(&data, addr).await?;
        Ok(())
    }

    fn reply(&self, packet: Packet, addr: SocketAddr) {
        if let Err(e) = self.outbound_tx.send(Outbound::Reply { packet, addr }) {
            error!("Failed to queue reply: {}", e);
        }
    }

    /// Pushes the current member list to every session
    async fn broadcast_sessions(&self) {
        let session_ids = {
            let sessions = self.sessions.read().await;
            sessions.members()
        };

        if let Err(e) = self
            .broadcaster
            .push_to_all(Packet::Sessions { session_ids })
        {
            error!("Failed to broadcast session list: {}", e);
        }
    }

    /// Drops everything known about a session and tells the others
    async fn end_session(&self, session_id: SessionId) {
        {
            let mut sessions = self.sessions.write().await;
            sessions.on_disconnect(session_id);
        }
        {
            let mut offsets = self.offsets.write().await;
            offsets.forget(session_id);
        }
        self.broadcast_sessions().await;
    }

    /// Resolves the sender of a packet and refreshes its liveness
    async fn session_for(&self, addr: SocketAddr) -> Option<SessionId> {
        let mut sessions = self.sessions.write().await;
        let session_id = sessions.find_by_addr(addr)?;
        sessions.touch(session_id);
        Some(session_id)
    }

    /// Processes incoming packets
    async fn handle_packet(&mut self, packet: Packet, addr: SocketAddr) {
        match packet {
            Packet::Connect { client_version } => {
                info!(
                    "Client connecting from {} (version: {})",
                    addr, client_version
                );

                if client_version != PROTOCOL_VERSION {
                    self.reply(
                        Packet::Disconnected {
                            reason: "Protocol version mismatch".to_string(),
                        },
                        addr,
                    );
                    return;
                }

                // Remove existing session if present
                let existing = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };

                if let Some(existing_id) = existing {
                    info!("Removing existing session {} from {}", existing_id, addr);
                    self.end_session(existing_id).await;
                }

                let connected = {
                    let mut sessions = self.sessions.write().await;
                    sessions.on_connect(addr)
                };

                match connected {
                    Ok(session_id) => {
                        self.reply(Packet::Connected { session_id }, addr);
                        self.broadcast_sessions().await;
                    }
                    Err(e) => {
                        self.reply(
                            Packet::Disconnected {
                                reason: e.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Reconnect { session_id } => {
                // An address speaks for one session at a time
                let existing = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };

                if let Some(existing_id) = existing.filter(|id| *id != session_id) {
                    info!("Removing existing session {} from {}", existing_id, addr);
                    self.end_session(existing_id).await;
                }

                let reconnected = {
                    let mut sessions = self.sessions.write().await;
                    sessions.on_reconnect(session_id, addr)
                };

                match reconnected {
                    Ok(()) => {
                        self.reply(Packet::Connected { session_id }, addr);
                        self.broadcast_sessions().await;
                    }
                    Err(e) => {
                        warn!("Refused reconnect of session {} from {}: {}", session_id, addr, e);
                        self.reply(
                            Packet::Disconnected {
                                reason: e.to_string(),
                            },
                            addr,
                        );
                    }
                }
            }

            Packet::Disconnect => {
                let session_id = {
                    let sessions = self.sessions.read().await;
                    sessions.find_by_addr(addr)
                };

                if let Some(session_id) = session_id {
                    self.end_session(session_id).await;
                }
            }

            Packet::Pong {
                probe_id,
                client_sent_at,
            } => {
                let Some(session_id) = self.session_for(addr).await else {
                    warn!("Pong from unknown address {}", addr);
                    return;
                };
                let Some(client_sent_at) = checked_from_epoch_millis(client_sent_at) else {
                    warn!(
                        "Dropping pong from session {}: {}",
                        session_id,
                        SyncError::InvalidTimestamp(client_sent_at)
                    );
                    return;
                };
                self.spawn_pong(probe_id, session_id, client_sent_at);
            }

            Packet::SubmitCommand {
                request_id,
                client_sent_at,
                message,
            } => {
                let Some(session_id) = self.session_for(addr).await else {
                    warn!("Command from unknown address {}", addr);
                    return;
                };
                let Some(sent_at) = checked_from_epoch_millis(client_sent_at) else {
                    let result = SyncError::InvalidTimestamp(client_sent_at).to_string();
                    info!("Command from session {} not relayed: {}", session_id, result);
                    if let Err(e) = self
                        .broadcaster
                        .push_to(session_id, Packet::CommandResult { request_id, result })
                    {
                        error!("Failed to answer session {}: {}", session_id, e);
                    }
                    return;
                };
                self.spawn_command(session_id, request_id, sent_at, message);
            }

            Packet::StartPing => {
                if self.session_for(addr).await.is_some() {
                    self.scheduler.fire().await;
                }
            }

            _ => {
                warn!("Unexpected packet type from client at {}", addr);
            }
        }
    }

    /// Records a pong after the simulated uplink and publishes the estimates
    fn spawn_pong(&self, probe_id: Uuid, session_id: SessionId, client_sent_at: DateTime<Utc>) {
        let ledger = Arc::clone(&self.ledger);
        let offsets = Arc::clone(&self.offsets);
        let sessions = Arc::clone(&self.sessions);
        let broadcaster = Arc::clone(&self.broadcaster);
        let pong_delay = self.config.pong_delay;

        tokio::spawn(async move {
            if !pong_delay.is_zero() {
                sleep(pong_delay).await;
            }
            let server_received_at = shared::now();

            let recorded = {
                // Held across the record so a concurrent disconnect cannot
                // forget the session in between
                let sessions = sessions.read().await;
                if !sessions.contains(session_id) {
                    debug!("Dropping pong from departed session {}", session_id);
                    return;
                }
                let ledger = ledger.read().await;
                let mut offsets = offsets.write().await;
                offsets
                    .record_response(
                        &ledger,
                        &probe_id,
                        session_id,
                        client_sent_at,
                        server_received_at,
                    )
                    .map(|on_record| (on_record, offsets.snapshot()))
            };

            match recorded {
                Ok((on_record, snapshot)) => {
                    debug!(
                        "Session {} offset {}ms (roundtrip {}ms)",
                        session_id,
                        on_record.client_offset_ms(),
                        on_record.roundtrip_ms()
                    );
                    let estimates = snapshot.iter().map(|e| e.report()).collect();
                    if let Err(e) = broadcaster.push_to_all(Packet::Estimates { estimates }) {
                        error!("Failed to broadcast estimates: {}", e);
                    }
                }
                Err(SyncError::UnknownPing(id)) => {
                    warn!("Dropping pong from session {} for unknown ping {}", session_id, id);
                }
                Err(e) => warn!("Failed to record pong from session {}: {}", session_id, e),
            }
        });
    }

    /// Relays a command on its own task and answers the submitter
    fn spawn_command(
        &self,
        session_id: SessionId,
        request_id: u32,
        client_sent_at: DateTime<Utc>,
        message: String,
    ) {
        let relay = Arc::clone(&self.relay);
        let broadcaster = Arc::clone(&self.broadcaster);

        tokio::spawn(async move {
            let result = match relay
                .submit_command(session_id, client_sent_at, message)
                .await
            {
                Ok(outcome) => outcome.reply(),
                Err(e) => {
                    info!("Command from session {} not relayed: {}", session_id, e);
                    e.to_string()
                }
            };

            if let Err(e) =
                broadcaster.push_to(session_id, Packet::CommandResult { request_id, result })
            {
                error!("Failed to answer session {}: {}", session_id, e);
            }
        });
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), BoxError> {
        let tasks = [
            self.spawn_network_receiver(),
            self.spawn_network_sender(),
            self.spawn_timeout_checker(),
            tokio::spawn(Arc::clone(&self.scheduler).run()),
        ];

        info!(
            "Server started: probe every {}ms, staleness threshold {}ms",
            self.config.ping_interval.as_millis(),
            self.config.staleness_threshold.num_milliseconds()
        );

        loop {
            match self.server_rx.recv().await {
                Some(ServerMessage::PacketReceived { packet, addr }) => {
                    self.handle_packet(packet, addr).await;
                }
                Some(ServerMessage::SessionTimeout { session_id }) => {
                    info!("Session {} timed out", session_id);
                    self.end_session(session_id).await;
                }
                Some(ServerMessage::Shutdown) | None => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        for task in tasks {
            task.abort();
        }

        Ok(())
    }
}
