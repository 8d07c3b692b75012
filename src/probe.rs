use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::io::Read;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

pub const PROBE_TIMEOUT_SECS: u64 = 1; //wait for a single echo reply

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMP_HEADER_LEN: usize = 8;
const PROBE_PAYLOAD: &[u8] = b"solarmax";

/// Network-layer reachability check done before every TCP connect.
pub trait ReachabilityProbe: Send {
    fn is_reachable(&mut self, host: &str) -> bool;
}

/// Single ICMP echo request with a short timeout.
///
/// Tries an unprivileged datagram ICMP socket first (Linux `ping_group_range`)
/// and falls back to a raw socket.
pub struct IcmpProbe {
    pub timeout: Duration,
    sequence: u16,
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(PROBE_TIMEOUT_SECS))
    }
}

impl IcmpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            sequence: 0,
        }
    }

    fn resolve(host: &str) -> io::Result<Ipv4Addr> {
        (host, 0)
            .to_socket_addrs()?
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("no IPv4 address for {}", host),
                )
            })
    }

    fn open_socket() -> io::Result<Socket> {
        match Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)) {
            Ok(socket) => Ok(socket),
            Err(e) => {
                trace!("datagram ICMP socket not permitted ({}), trying raw socket", e);
                Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            }
        }
    }

    fn echo(&mut self, ip: Ipv4Addr) -> io::Result<bool> {
        self.sequence = self.sequence.wrapping_add(1);
        let request = echo_request(std::process::id() as u16, self.sequence, PROBE_PAYLOAD);

        let socket = IcmpProbe::open_socket()?;
        socket.set_write_timeout(Some(self.timeout))?;
        socket.send_to(&request, &SocketAddr::new(IpAddr::V4(ip), 0).into())?;

        let deadline = Instant::now() + self.timeout;
        let mut buffer = [0u8; 512];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(false);
            }
            socket.set_read_timeout(Some(remaining))?;
            let n = match (&socket).read(&mut buffer) {
                Ok(n) => n,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    return Ok(false)
                }
                Err(e) => return Err(e),
            };
            if is_echo_reply(&buffer[..n], self.sequence) {
                return Ok(true);
            }
        }
    }
}

impl ReachabilityProbe for IcmpProbe {
    fn is_reachable(&mut self, host: &str) -> bool {
        let result = IcmpProbe::resolve(host).and_then(|ip| self.echo(ip));
        match result {
            Ok(reachable) => {
                debug!("{}: ping {}", host, if reachable { "ok" } else { "timeout" });
                reachable
            }
            Err(e) => {
                error!("{}: ping error: {}", host, e);
                false
            }
        }
    }
}

/// For devices behind firewalls dropping ICMP: always lets the TCP connect go ahead.
pub struct SkipProbe;

impl ReachabilityProbe for SkipProbe {
    fn is_reachable(&mut self, _host: &str) -> bool {
        true
    }
}

/// RFC 1071 internet checksum
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

fn echo_request(ident: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![ICMP_ECHO_REQUEST, 0, 0, 0];
    packet.extend_from_slice(&ident.to_be_bytes());
    packet.extend_from_slice(&sequence.to_be_bytes());
    packet.extend_from_slice(payload);
    let crc = icmp_checksum(&packet);
    packet[2..4].copy_from_slice(&crc.to_be_bytes());
    packet
}

/// Raw sockets hand over the IPv4 header too, datagram sockets only the ICMP part.
/// The identifier is not compared: datagram sockets rewrite it.
fn is_echo_reply(data: &[u8], sequence: u16) -> bool {
    let icmp = match data.first() {
        Some(first) if first >> 4 == 4 => {
            let header_len = ((first & 0x0f) as usize) * 4;
            data.get(header_len..).unwrap_or(&[])
        }
        Some(_) => data,
        None => return false,
    };
    icmp.len() >= ICMP_HEADER_LEN
        && icmp[0] == ICMP_ECHO_REPLY
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}
