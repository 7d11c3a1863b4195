use std::{
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    time::{Duration, Instant},
};

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, FixedOffset, Local, Timelike};
use log::{debug, info};

use crate::{
    datatypes::DeviceInfo,
    error::{Error, Result},
    protocol::{checksum, PORT, RETRY_INTERVAL},
};

const PROBE_LEN: usize = 0x30;
const CMD_HELLO: u8 = 0x06;

/// The 48 byte hello datagram, stamped with local time and the address replies should go to
pub fn probe(local: SocketAddrV4, now: &DateTime<FixedOffset>) -> Vec<u8> {
    let mut packet = vec![0_u8; PROBE_LEN];

    let offset_hours = now.offset().local_minus_utc() / 3600;
    LittleEndian::write_i32(&mut packet[0x08..0x0c], offset_hours);
    LittleEndian::write_u16(&mut packet[0x0c..0x0e], now.year() as u16);
    packet[0x0e] = now.minute() as u8;
    packet[0x0f] = now.hour() as u8;
    packet[0x10] = (now.year() % 100) as u8;
    packet[0x11] = now.weekday().number_from_monday() as u8;
    packet[0x12] = now.day() as u8;
    packet[0x13] = now.month() as u8;

    let mut ip = local.ip().octets();
    ip.reverse();
    packet[0x18..0x1c].copy_from_slice(&ip);
    LittleEndian::write_u16(&mut packet[0x1c..0x1e], local.port());
    packet[0x26] = CMD_HELLO;

    let sum = checksum(&packet);
    LittleEndian::write_u16(&mut packet[0x20..0x22], sum);
    packet
}

/// Send hello probes to `target` every second and collect distinct replies until `timeout`.
/// With `first_only` the scan ends at the first device found.
fn scan(
    target: SocketAddr,
    timeout: Duration,
    local_ip: Option<Ipv4Addr>,
    first_only: bool,
) -> Result<Vec<DeviceInfo>> {
    let socket = UdpSocket::bind((local_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0))?;
    socket.set_broadcast(true)?;
    // unbound sockets advertise 0.0.0.0:0
    let local = match (local_ip, socket.local_addr()?) {
        (Some(_), SocketAddr::V4(local)) => local,
        _ => SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
    };

    let start = Instant::now();
    let mut buffer = [0_u8; 1024];
    let mut devices: Vec<DeviceInfo> = vec![];

    while let Some(left) = timeout.checked_sub(start.elapsed()) {
        if left == Duration::from_millis(0) {
            break;
        }
        socket.set_read_timeout(Some(left.min(RETRY_INTERVAL)))?;
        socket.send_to(&probe(local, &Local::now().into()), target)?;
        debug!("sent hello to {}", target);

        loop {
            let (size, addr) = match socket.recv_from(&mut buffer) {
                Ok(received) => received,
                Err(err) => match Error::from(err) {
                    Error::Timeout => break,
                    err => return Err(err),
                },
            };
            let device = match DeviceInfo::from_discovery_reply(addr, &buffer[..size]) {
                Ok(device) => device,
                Err(err) => {
                    debug!("ignoring reply from {}: {}", addr, err);
                    continue;
                }
            };
            if devices.iter().any(|seen| {
                seen.addr == device.addr && seen.mac == device.mac && seen.devtype == device.devtype
            }) {
                continue;
            }

            info!(
                "found {} {} ({:#06x}) at {}",
                device.kind.manufacturer, device.kind.model, device.devtype, device.addr
            );
            devices.push(device);
            if first_only {
                return Ok(devices);
            }
        }
    }

    Ok(devices)
}

/// Discover Broadlink devices on the local network by broadcast
pub fn discover(timeout: Duration, local_ip: Option<Ipv4Addr>) -> Result<Vec<DeviceInfo>> {
    let target = SocketAddr::from((Ipv4Addr::BROADCAST, PORT));
    scan(target, timeout, local_ip, false)
}

/// Address one device directly, learning its type and MAC from its hello reply
pub fn hello(host: &str, timeout: Duration) -> Result<DeviceInfo> {
    let target = (host, PORT)
        .to_socket_addrs()?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| Error::Other(format!("{} has no IPv4 address", host)))?;

    hello_addr(target, timeout)
}

pub fn hello_addr(target: SocketAddr, timeout: Duration) -> Result<DeviceInfo> {
    scan(target, timeout, None, true)?
        .into_iter()
        .next()
        .ok_or(Error::Timeout)
}
