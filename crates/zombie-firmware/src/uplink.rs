//! Wi-Fi uplink and record transport to the telemetry server
//!
//! The radio is only started when a wake cycle asks for a connection and is
//! stopped again in [`Uplink::disconnect`]. Each connection first sets the RTC
//! over SNTP. Records then go out either on their own short-lived TCP
//! connection or as one UDP datagram each, as selected by
//! [`ServerConfig::protocol`].

use alloc::string::String;

use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::udp::{PacketMetadata, SendError, UdpSocket};
use embassy_net::{IpEndpoint, Ipv4Address, Stack};
use embassy_time::{Duration, with_timeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiError};
use log::{debug, info, warn};
use zombie_core::config::{InternetConfig, ServerConfig, TransportProtocol};
use zombie_core::{Transport, TransportError, Uplink};

use crate::clock::RtcClock;
use crate::sntp::{self, SocketBuffers};
use crate::wifi_secrets::{WIFI_PASSWORD, WIFI_SSID};

/// Upper bound for associating with the access point
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for a TCP connect or write
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

const SOCKET_BUFFER_SIZE: usize = 256;

const UDP_PACKET_SLOTS: usize = 4;

pub struct WifiUplink<'a> {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    clock: RtcClock<'a>,
    protocol: TransportProtocol,
    server: IpEndpoint,
    time_server: [u8; 4],
    connected: bool,
    rx_buffer: [u8; SOCKET_BUFFER_SIZE],
    tx_buffer: [u8; SOCKET_BUFFER_SIZE],
    rx_meta: [PacketMetadata; UDP_PACKET_SLOTS],
    tx_meta: [PacketMetadata; UDP_PACKET_SLOTS],
}

impl<'a> WifiUplink<'a> {
    /// Configure the station. Empty credentials in `internet` fall back to
    /// the ones baked in at build time.
    pub fn new(
        mut controller: WifiController<'static>,
        stack: Stack<'static>,
        clock: RtcClock<'a>,
        server: &ServerConfig,
        internet: &InternetConfig,
    ) -> Result<Self, WifiError> {
        let (ssid, password) = if internet.ssid.is_empty() {
            (WIFI_SSID, WIFI_PASSWORD)
        } else {
            (internet.ssid.as_str(), internet.password.as_str())
        };

        let client = ClientConfig::default()
            .with_ssid(String::from(ssid))
            .with_password(String::from(password));
        controller.set_config(&ModeConfig::Client(client))?;

        Ok(Self {
            controller,
            stack,
            clock,
            protocol: server.protocol,
            server: IpEndpoint::new(Ipv4Address::from(server.address).into(), server.port()),
            time_server: server.address,
            connected: false,
            rx_buffer: [0; SOCKET_BUFFER_SIZE],
            tx_buffer: [0; SOCKET_BUFFER_SIZE],
            rx_meta: [PacketMetadata::EMPTY; UDP_PACKET_SLOTS],
            tx_meta: [PacketMetadata::EMPTY; UDP_PACKET_SLOTS],
        })
    }

    async fn bring_up(&mut self) -> Result<(), WifiError> {
        if !matches!(self.controller.is_started(), Ok(true)) {
            self.controller.start_async().await?;
        }
        self.controller.connect_async().await?;
        self.stack.wait_config_up().await;
        Ok(())
    }

    async fn stop_radio(&mut self) {
        if let Err(e) = self.controller.stop_async().await {
            warn!("Stopping Wi-Fi failed: {:?}", e);
        }
    }

    fn udp_buffers(&mut self) -> SocketBuffers<'_> {
        SocketBuffers {
            rx_meta: &mut self.rx_meta,
            rx_buffer: &mut self.rx_buffer,
            tx_meta: &mut self.tx_meta,
            tx_buffer: &mut self.tx_buffer,
        }
    }

    async fn send_tcp(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut socket = TcpSocket::new(self.stack, &mut self.rx_buffer, &mut self.tx_buffer);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        socket.connect(self.server).await.map_err(|e| {
            warn!("TCP connect to {} failed: {:?}", self.server, e);
            connect_error(e)
        })?;

        let result = match socket.write(bytes).await {
            Ok(written) => match socket.flush().await {
                Ok(()) => Ok(written),
                Err(e) => {
                    warn!("TCP flush failed: {:?}", e);
                    Err(TransportError::Io {
                        details: "Connection reset during flush",
                    })
                }
            },
            Err(e) => {
                warn!("TCP write failed: {:?}", e);
                Err(TransportError::Io {
                    details: "Connection reset during write",
                })
            }
        };

        socket.close();
        result
    }

    /// A datagram counts as delivered once the stack has sent it.
    async fn send_udp(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        let (stack, server) = (self.stack, self.server);
        let buffers = self.udp_buffers();
        let mut socket = UdpSocket::new(
            stack,
            buffers.rx_meta,
            buffers.rx_buffer,
            buffers.tx_meta,
            buffers.tx_buffer,
        );
        socket.bind(0).map_err(|e| {
            warn!("UDP bind failed: {:?}", e);
            TransportError::Io {
                details: "Could not bind UDP socket",
            }
        })?;

        let result = with_timeout(SOCKET_TIMEOUT, async {
            socket.send_to(bytes, server).await?;
            // Dropping the socket discards datagrams still queued.
            socket.flush().await;
            Ok::<(), SendError>(())
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(bytes.len()),
            Ok(Err(e)) => {
                warn!("UDP send to {} failed: {:?}", server, e);
                Err(TransportError::NotConnected)
            }
            Err(_) => Err(TransportError::Timeout),
        }
    }
}

fn connect_error(e: ConnectError) -> TransportError {
    match e {
        ConnectError::ConnectionReset => TransportError::ConnectionRefused,
        ConnectError::TimedOut => TransportError::Timeout,
        ConnectError::NoRoute => TransportError::NotConnected,
        ConnectError::InvalidState => TransportError::Io {
            details: "Socket in invalid state",
        },
    }
}

impl Transport for WifiUplink<'_> {
    async fn send(&mut self, bytes: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        let result = match self.protocol {
            TransportProtocol::Tcp => self.send_tcp(bytes).await,
            TransportProtocol::Udp => self.send_udp(bytes).await,
        };
        debug!("Sent {:?} to {} over {:?}", result, self.server, self.protocol);
        result
    }
}

impl Uplink for WifiUplink<'_> {
    async fn connect(&mut self) -> bool {
        self.connected = match with_timeout(CONNECT_TIMEOUT, self.bring_up()).await {
            Ok(Ok(())) => {
                info!("Wi-Fi connected");
                true
            }
            Ok(Err(e)) => {
                warn!("Wi-Fi connection failed: {:?}", e);
                false
            }
            Err(_) => {
                warn!("Wi-Fi connection timed out");
                false
            }
        };

        if !self.connected {
            self.stop_radio().await;
            return false;
        }

        let (stack, time_server, clock) = (self.stack, self.time_server, self.clock);
        sntp::sync_rtc(stack, time_server, clock, self.udp_buffers()).await;
        true
    }

    async fn disconnect(&mut self) {
        self.connected = false;
        if let Err(e) = self.controller.disconnect_async().await {
            debug!("Wi-Fi disconnect: {:?}", e);
        }
        self.stop_radio().await;
        info!("Wi-Fi disconnected");
    }
}
