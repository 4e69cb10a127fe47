use crate::clock::LocalClock;
use crate::state::ClientState;
use log::{error, info};
use shared::{decode, encode, Packet, SessionId, MAX_PACKET_SIZE, PROTOCOL_VERSION};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{interval, sleep, sleep_until, Instant};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server_addr: String,
    /// Simulated link latency, half applied on each direction
    pub fake_ping_ms: u64,
    pub clock_skew_ms: i64,
    /// Zero disables periodic commands
    pub command_interval: Duration,
    pub message: String,
    /// Ask the server for an immediate probe round once connected
    pub start_ping: bool,
    /// Resume this session id instead of connecting fresh
    pub resume_session: Option<SessionId>,
    /// Stop after this long; runs until Ctrl+C otherwise
    pub run_for: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:8080".to_string(),
            fake_ping_ms: 0,
            clock_skew_ms: 0,
            command_interval: Duration::from_millis(3000),
            message: "General Command".to_string(),
            start_ping: false,
            resume_session: None,
            run_for: None,
        }
    }
}

pub struct Client {
    socket: UdpSocket,
    server_addr: SocketAddr,
    config: ClientConfig,
    state: ClientState,
}

impl Client {
    pub async fn new(config: ClientConfig) -> Result<Self, BoxError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let server_addr = config.server_addr.parse()?;
        let state = ClientState::new(LocalClock::new(config.clock_skew_ms));

        Ok(Client {
            socket,
            server_addr,
            config,
            state,
        })
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    async fn connect(&mut self) -> Result<(), BoxError> {
        let packet = match self.config.resume_session {
            Some(session_id) => {
                info!("Resuming session {}...", session_id);
                Packet::Reconnect { session_id }
            }
            None => {
                info!("Connecting to server...");
                Packet::Connect {
                    client_version: PROTOCOL_VERSION,
                }
            }
        };
        self.send_packet(&packet).await
    }

    async fn send_packet(&self, packet: &Packet) -> Result<(), BoxError> {
        if self.config.fake_ping_ms > 0 {
            sleep(Duration::from_millis(self.config.fake_ping_ms / 2)).await;
        }

        let data = encode(packet)?;
        self.socket.send_to(&data, self.server_addr).await?;
        Ok(())
    }

    pub async fn run(&mut self) -> Result<(), BoxError> {
        self.connect().await?;

        let commands_enabled = !self.config.command_interval.is_zero();
        let mut command_interval = interval(if commands_enabled {
            self.config.command_interval
        } else {
            Duration::from_secs(3600)
        });
        // Skip the first tick since it fires immediately
        command_interval.tick().await;

        let deadline = self.config.run_for.map(|run_for| Instant::now() + run_for);
        let mut ping_requested = false;
        let mut buffer = [0u8; MAX_PACKET_SIZE];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, _)) => {
                            if self.config.fake_ping_ms > 0 {
                                sleep(Duration::from_millis(self.config.fake_ping_ms / 2)).await;
                            }

                            if let Ok(packet) = decode(&buffer[0..len]) {
                                if let Some(reply) = self.state.handle_packet(packet) {
                                    if let Err(e) = self.send_packet(&reply).await {
                                        error!("Error sending reply: {}", e);
                                    }
                                }
                            }

                            if self.config.start_ping && self.state.connected && !ping_requested {
                                ping_requested = true;
                                if let Err(e) = self.send_packet(&Packet::StartPing).await {
                                    error!("Error requesting probe: {}", e);
                                }
                            }
                        },
                        Err(e) => error!("Error receiving packet: {}", e),
                    }
                },

                _ = command_interval.tick(), if commands_enabled && self.state.connected => {
                    let packet = self.state.next_command(&self.config.message);
                    if let Err(e) = self.send_packet(&packet).await {
                        error!("Error sending command: {}", e);
                    }
                },

                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    info!("Run time elapsed");
                    break;
                },

                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, disconnecting...");
                    break;
                },
            }
        }

        if self.state.connected {
            if let Err(e) = self.send_packet(&Packet::Disconnect).await {
                error!("Error sending disconnect: {}", e);
            }
        }

        Ok(())
    }
}
