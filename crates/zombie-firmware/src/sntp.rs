//! SNTP time sync against the telemetry server
//!
//! The server doubles as the node's time source. A sync runs once per
//! connected session and sets the RTC, so records measured while offline
//! carry timestamps from the last successful sync onwards.

use core::net::{IpAddr, SocketAddr};

use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpAddress, IpEndpoint, Stack};
use embassy_time::{Duration, with_timeout};
use log::{info, warn};
use sntpc::{NtpContext, NtpUdpSocket};

use crate::clock::RtcClock;

pub const NTP_PORT: u16 = 123;

/// Upper bound for one SNTP request and its reply
const SYNC_TIMEOUT: Duration = Duration::from_secs(3);

/// An embassy-net UDP socket speaking to sntpc
struct SntpSocket<'a> {
    socket: UdpSocket<'a>,
}

impl NtpUdpSocket for SntpSocket<'_> {
    async fn send_to(&self, buf: &[u8], addr: SocketAddr) -> sntpc::Result<usize> {
        let SocketAddr::V4(addr) = addr else {
            return Err(sntpc::Error::Network);
        };
        let endpoint = IpEndpoint::new(IpAddress::Ipv4(*addr.ip()), addr.port());

        self.socket
            .send_to(buf, endpoint)
            .await
            .map(|()| buf.len())
            .map_err(|_| sntpc::Error::Network)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> sntpc::Result<(usize, SocketAddr)> {
        let (len, meta) = self
            .socket
            .recv_from(buf)
            .await
            .map_err(|_| sntpc::Error::Network)?;
        let from = SocketAddr::new(IpAddr::from(meta.endpoint.addr), meta.endpoint.port);
        Ok((len, from))
    }
}

/// Ask `server` for the time and set the RTC from the answer.
///
/// Returns whether the RTC was set. Failures are logged and leave the RTC
/// running on.
pub async fn sync_rtc(
    stack: Stack<'_>,
    server: [u8; 4],
    clock: RtcClock<'_>,
    buffers: SocketBuffers<'_>,
) -> bool {
    let mut socket = UdpSocket::new(
        stack,
        buffers.rx_meta,
        buffers.rx_buffer,
        buffers.tx_meta,
        buffers.tx_buffer,
    );
    if let Err(e) = socket.bind(0) {
        warn!("SNTP socket bind failed: {:?}", e);
        return false;
    }
    let socket = SntpSocket { socket };

    let server = SocketAddr::new(IpAddr::from(server), NTP_PORT);
    let context = NtpContext::new(clock);

    match with_timeout(SYNC_TIMEOUT, sntpc::get_time(server, &socket, context)).await {
        Ok(Ok(time)) => {
            let micros = sntpc::fraction_to_microseconds(time.sec_fraction());
            clock.set_unix_time(u64::from(time.sec()), micros);
            info!("RTC set from {} to {} s", server, time.sec());
            true
        }
        Ok(Err(e)) => {
            warn!("SNTP request to {} failed: {:?}", server, e);
            false
        }
        Err(_) => {
            warn!("SNTP request to {} timed out", server);
            false
        }
    }
}

/// Borrowed buffers for one UDP socket
pub struct SocketBuffers<'a> {
    pub rx_meta: &'a mut [PacketMetadata],
    pub rx_buffer: &'a mut [u8],
    pub tx_meta: &'a mut [PacketMetadata],
    pub tx_buffer: &'a mut [u8],
}
