//! UDP control-channel adapter for Tello-class hardware.
//!
//! The wire protocol is request/response over UDP: a text command like
//! `command`, `takeoff`, or `rc a b c d` is sent, and the drone replies
//! with `ok` or `error <reason>` within a bounded window. A second UDP
//! socket carries telemetry state and raw video frames, both pushed by
//! the drone without an explicit request.

use async_trait::async_trait;
use fleet_core::{
    AltitudeMode, Direction, DroneCapability, ErrorCode, FleetError, Frame, Pose, RotateDirection,
    TelemetrySample, Velocity,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::{debug, warn};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);
const MAX_MISSED_PINGS: u32 = 3;

pub struct RealDroneAdapterConfig {
    pub ip: String,
    pub command_port: u16,
    pub telemetry_port: u16,
    pub video_port: u16,
    pub command_timeout: Duration,
}

impl Default for RealDroneAdapterConfig {
    fn default() -> Self {
        Self {
            ip: "192.168.10.1".to_string(),
            command_port: 8889,
            telemetry_port: 8890,
            video_port: 11111,
            command_timeout: Duration::from_secs(7),
        }
    }
}

/// Opens a UDP control channel to a drone IP and speaks the text
/// command/response protocol. `connect()` must succeed before any other
/// operation is attempted; `DroneFactory` is responsible for probing
/// reachability before constructing one of these.
pub struct RealDroneAdapter {
    config: RealDroneAdapterConfig,
    socket: Option<UdpSocket>,
    peer: SocketAddr,
    missed_pings: u32,
    frame_counter: Arc<AtomicU64>,
    last_telemetry: TelemetrySample,
}

impl RealDroneAdapter {
    pub fn new(config: RealDroneAdapterConfig) -> Result<Self, FleetError> {
        let peer: SocketAddr = format!("{}:{}", config.ip, config.command_port)
            .parse()
            .map_err(|e| {
                FleetError::new(ErrorCode::InvalidParameter, format!("invalid drone IP: {e}"))
            })?;
        Ok(Self {
            config,
            socket: None,
            peer,
            missed_pings: 0,
            frame_counter: Arc::new(AtomicU64::new(0)),
            last_telemetry: TelemetrySample {
                pose: Pose::default(),
                velocity: Velocity::default(),
                battery_pct: 0,
            },
        })
    }

    async fn open_socket(&mut self) -> Result<(), FleetError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| FleetError::new(ErrorCode::Unreachable, format!("failed to bind UDP socket: {e}")))?;
        socket
            .connect(self.peer)
            .await
            .map_err(|e| FleetError::new(ErrorCode::Unreachable, format!("failed to connect to {}: {e}", self.peer)))?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Send a text command and wait for the response within
    /// `command_timeout`. On timeout, retries exactly once with a fresh
    /// socket before surfacing `Timeout`.
    async fn send_command(&mut self, command: &str) -> Result<String, FleetError> {
        match self.try_send_once(command).await {
            Ok(response) => {
                self.missed_pings = 0;
                Ok(response)
            }
            Err(err) if err.code == ErrorCode::Timeout => {
                warn!(drone_ip = %self.config.ip, %command, "command timed out, retrying with a fresh socket");
                self.open_socket().await?;
                self.try_send_once(command).await
            }
            Err(err) => Err(err),
        }
    }

    async fn try_send_once(&mut self, command: &str) -> Result<String, FleetError> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| FleetError::new(ErrorCode::NotConnected, "adapter socket not open"))?;

        socket
            .send(command.as_bytes())
            .await
            .map_err(|e| FleetError::new(ErrorCode::Unreachable, format!("send failed: {e}")))?;

        let mut buf = [0u8; 1024];
        match timeout(self.config.command_timeout, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                if text.eq_ignore_ascii_case("error") || text.to_lowercase().starts_with("error") {
                    Err(FleetError::new(ErrorCode::ProtocolError, format!("drone returned error for {command:?}: {text}")))
                } else {
                    Ok(text)
                }
            }
            Ok(Err(e)) => Err(FleetError::new(ErrorCode::Unreachable, format!("recv failed: {e}"))),
            Err(_) => Err(FleetError::new(
                ErrorCode::Timeout,
                format!("no response to {command:?} within {:?}", self.config.command_timeout),
            )),
        }
    }

    /// Count one missed keepalive ping; past `MAX_MISSED_PINGS` the
    /// adapter reports itself unreachable so the supervisor can react.
    pub async fn keepalive_tick(&mut self) -> Result<(), FleetError> {
        match self.send_command("command").await {
            Ok(_) => {
                self.missed_pings = 0;
                Ok(())
            }
            Err(err) => {
                self.missed_pings += 1;
                debug!(drone_ip = %self.config.ip, missed = self.missed_pings, "keepalive missed");
                if self.missed_pings >= MAX_MISSED_PINGS {
                    Err(FleetError::new(
                        ErrorCode::Unreachable,
                        format!("{} consecutive missed keepalive pings", self.missed_pings),
                    ))
                } else {
                    Err(err)
                }
            }
        }
    }

    pub fn keepalive_interval() -> Duration {
        KEEPALIVE_INTERVAL
    }
}

#[async_trait]
impl DroneCapability for RealDroneAdapter {
    async fn connect(&mut self) -> Result<(), FleetError> {
        if self.socket.is_some() {
            return Ok(());
        }
        self.open_socket().await?;
        self.send_command("command").await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), FleetError> {
        self.socket = None;
        Ok(())
    }

    async fn takeoff(&mut self) -> Result<(), FleetError> {
        self.send_command("takeoff").await?;
        Ok(())
    }

    async fn land(&mut self) -> Result<(), FleetError> {
        self.send_command("land").await?;
        Ok(())
    }

    async fn emergency_stop(&mut self) -> Result<(), FleetError> {
        self.send_command("emergency").await?;
        Ok(())
    }

    async fn move_direction(
        &mut self,
        direction: Direction,
        distance_cm: f64,
        speed_cmps: f64,
    ) -> Result<(), FleetError> {
        let verb = match direction {
            Direction::Forward => "forward",
            Direction::Back => "back",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Up => "up",
            Direction::Down => "down",
        };
        self.send_command(&format!("{verb} {}", distance_cm.round() as i64)).await?;
        let _ = speed_cmps;
        Ok(())
    }

    async fn rotate(&mut self, direction: RotateDirection, angle_deg: f64) -> Result<(), FleetError> {
        let verb = match direction {
            RotateDirection::Clockwise => "cw",
            RotateDirection::CounterClockwise => "ccw",
        };
        self.send_command(&format!("{verb} {}", angle_deg.round() as i64)).await?;
        Ok(())
    }

    async fn set_altitude(&mut self, target_cm: f64, mode: AltitudeMode) -> Result<(), FleetError> {
        match mode {
            AltitudeMode::Absolute => {
                self.send_command(&format!("go 0 0 {} 50", target_cm.round() as i64)).await?;
            }
            AltitudeMode::Relative => {
                let verb = if target_cm >= 0.0 { "up" } else { "down" };
                self.send_command(&format!("{verb} {}", target_cm.abs().round() as i64)).await?;
            }
        }
        Ok(())
    }

    async fn get_telemetry(&mut self) -> Result<TelemetrySample, FleetError> {
        let response = self.send_command("battery?").await?;
        if let Ok(battery) = response.trim().parse::<u8>() {
            self.last_telemetry.battery_pct = battery;
        }
        Ok(self.last_telemetry)
    }

    async fn capture_frame(&mut self) -> Result<Frame, FleetError> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| FleetError::new(ErrorCode::Unreachable, format!("failed to bind video socket: {e}")))?;
        let video_addr = format!("{}:{}", self.config.ip, self.config.video_port);
        let mut buf = vec![0u8; 65536];
        let n = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
            .await
            .map_err(|_| FleetError::new(ErrorCode::Timeout, "no video frame received within 2s"))?
            .map_err(|e| FleetError::new(ErrorCode::Unreachable, format!("video recv failed: {e}")))?
            .0;
        let _ = video_addr;
        buf.truncate(n);
        let frame_id = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        Ok(Frame {
            frame_id,
            width: 960,
            height: 720,
            data: buf,
        })
    }

    async fn start_stream(&mut self) -> Result<(), FleetError> {
        self.send_command("streamon").await?;
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<(), FleetError> {
        self.send_command("streamoff").await?;
        Ok(())
    }

    fn is_real(&self) -> bool {
        true
    }
}
