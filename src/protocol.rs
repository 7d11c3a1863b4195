use std::{
    net::{SocketAddr, UdpSocket},
    time::{Duration, Instant},
};

use aes::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, trace};

use crate::error::{DeviceError, Error, Result};

#[cfg(test)]
use std::{cell::RefCell, collections::VecDeque, rc::Rc};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

pub type Key = [u8; 16];

pub const PORT: u16 = 80;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_KEY: Key = [
    0x09, 0x76, 0x28, 0x34, 0x3f, 0xe9, 0x9e, 0x23, 0x76, 0x5c, 0x15, 0x13, 0xac, 0xcf, 0x8b, 0x02,
];
pub const IV: Key = [
    0x56, 0x2e, 0x17, 0x99, 0x6d, 0x09, 0x3d, 0x28, 0xdd, 0xb3, 0xba, 0x69, 0x5a, 0x2e, 0x6f, 0x58,
];

const MAGIC: [u8; 8] = [0x5a, 0xa5, 0xaa, 0x55, 0x5a, 0xa5, 0xaa, 0x55];
const BLOCK_SIZE: usize = 16;

pub const HEADER_LEN: usize = 0x38;

pub const CMD_AUTH: u16 = 0x65;
pub const CMD_HUB: u16 = 0x6a;

const HUB_HEADER_LEN: usize = 0x0c;

/// Broadlink checksum: 0xbeaf plus every byte, wrapping at 16 bits
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0xbeaf_u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

/// AES-128-CBC with the fixed Broadlink IV; the plaintext is zero padded to the block size
pub fn encrypt(key: &Key, plain: &[u8]) -> Result<Vec<u8>> {
    let mut buf = plain.to_vec();
    let padding = (BLOCK_SIZE - buf.len() % BLOCK_SIZE) % BLOCK_SIZE;
    buf.resize(buf.len() + padding, 0);

    let len = buf.len();
    Aes128CbcEnc::new(&(*key).into(), &IV.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, len)
        .map_err(|_| Error::Crypto)?;
    Ok(buf)
}

pub fn decrypt(key: &Key, cipher: &[u8]) -> Result<Vec<u8>> {
    if cipher.len() % BLOCK_SIZE != 0 {
        return Err(Error::Crypto);
    }
    let mut buf = cipher.to_vec();
    let len = Aes128CbcDec::new(&(*key).into(), &IV.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| Error::Crypto)?
        .len();
    buf.truncate(len);
    Ok(buf)
}

/// Everything a device needs to recognise a request as coming from its session
pub struct Session {
    pub id: u32,
    pub key: Key,
    pub count: u16,
}

impl Session {
    pub fn new() -> Session {
        Session {
            id: 0,
            key: DEFAULT_KEY,
            count: 0,
        }
    }

    fn next_count(&mut self) -> u16 {
        self.count = self.count.wrapping_add(1) | 0x8000;
        self.count
    }
}

impl Default for Session {
    fn default() -> Self {
        Session::new()
    }
}

/// Frame and encrypt a command for the device identified by `devtype` and `mac`
pub fn build_packet(
    session: &mut Session,
    devtype: u16,
    mac: &[u8; 6],
    command: u16,
    payload: &[u8],
) -> Result<Vec<u8>> {
    let count = session.next_count();

    let mut packet = vec![0_u8; HEADER_LEN];
    packet[0x00..0x08].copy_from_slice(&MAGIC);
    LittleEndian::write_u16(&mut packet[0x24..0x26], devtype);
    LittleEndian::write_u16(&mut packet[0x26..0x28], command);
    LittleEndian::write_u16(&mut packet[0x28..0x2a], count);
    for (i, byte) in mac.iter().rev().enumerate() {
        packet[0x2a + i] = *byte;
    }
    LittleEndian::write_u32(&mut packet[0x30..0x34], session.id);
    LittleEndian::write_u16(&mut packet[0x34..0x36], checksum(payload));

    packet.extend(encrypt(&session.key, payload)?);

    let sum = checksum(&packet);
    LittleEndian::write_u16(&mut packet[0x20..0x22], sum);
    Ok(packet)
}

/// Check the error code of a device response and return its decrypted payload
pub fn open_response(key: &Key, response: &[u8]) -> Result<Vec<u8>> {
    if response.len() < HEADER_LEN {
        return Err(Error::Malformed(format!(
            "response of {} bytes is shorter than its header",
            response.len()
        )));
    }
    DeviceError::check(LittleEndian::read_i16(&response[0x22..0x24]))?;
    decrypt(key, &response[HEADER_LEN..])
}

/// Wrap a JSON document in the hub command envelope
pub fn pack_json(flag: u8, json: &[u8]) -> Vec<u8> {
    let mut packet = vec![0_u8; HUB_HEADER_LEN];
    LittleEndian::write_u16(&mut packet[0x00..0x02], 0xa5a5);
    LittleEndian::write_u16(&mut packet[0x02..0x04], 0x5a5a);
    packet[0x06] = flag;
    packet[0x07] = 0x0b;
    LittleEndian::write_u32(&mut packet[0x08..0x0c], json.len() as u32);
    packet.extend_from_slice(json);

    let sum = checksum(&packet);
    LittleEndian::write_u16(&mut packet[0x04..0x06], sum);
    packet
}

/// Extract the JSON document from a decrypted hub reply
pub fn unpack_json(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < HUB_HEADER_LEN {
        return Err(Error::Malformed(String::from("hub reply is missing its header")));
    }
    let len = LittleEndian::read_u32(&payload[0x08..0x0c]) as usize;
    payload
        .get(HUB_HEADER_LEN..HUB_HEADER_LEN + len)
        .ok_or_else(|| Error::Malformed(format!("hub reply announces {} bytes of JSON", len)))
}

pub trait Protocol {
    /// Send one packet and wait for the single datagram that answers it
    fn send(&self, addr: SocketAddr, packet: &[u8]) -> Result<Vec<u8>>;
}

pub struct DefaultProtocol {
    timeout: Duration,
}

impl DefaultProtocol {
    pub fn new() -> DefaultProtocol {
        DefaultProtocol::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> DefaultProtocol {
        DefaultProtocol { timeout }
    }
}

impl Default for DefaultProtocol {
    fn default() -> Self {
        DefaultProtocol::new()
    }
}

impl Protocol for DefaultProtocol {
    fn send(&self, addr: SocketAddr, packet: &[u8]) -> Result<Vec<u8>> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let start = Instant::now();
        let mut buffer = [0_u8; 2048];

        loop {
            let left = match self.timeout.checked_sub(start.elapsed()) {
                Some(left) if left > Duration::from_millis(0) => left,
                _ => return Err(Error::Timeout),
            };
            socket.set_read_timeout(Some(left.min(RETRY_INTERVAL)))?;

            debug!("sending {} bytes to {}", packet.len(), addr);
            trace!("> {:02x?}", packet);
            socket.send_to(packet, addr)?;

            match socket.recv_from(&mut buffer) {
                Ok((size, from)) => {
                    debug!("received {} bytes from {}", size, from);
                    trace!("< {:02x?}", &buffer[..size]);
                    return Ok(buffer[..size].to_vec());
                }
                Err(err) => match Error::from(err) {
                    Error::Timeout => continue,
                    err => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
#[derive(Clone, Default)]
pub struct ProtocolMock {
    requests: Rc<RefCell<Vec<(SocketAddr, Vec<u8>)>>>,
    responses: Rc<RefCell<VecDeque<Result<Vec<u8>>>>>,
}

#[cfg(test)]
impl ProtocolMock {
    pub fn new() -> ProtocolMock {
        ProtocolMock::default()
    }

    pub fn push_response(&self, resp: Result<Vec<u8>>) {
        self.responses.borrow_mut().push_back(resp);
    }

    pub fn requests(&self) -> Vec<(SocketAddr, Vec<u8>)> {
        self.requests.borrow().clone()
    }
}

#[cfg(test)]
impl Protocol for ProtocolMock {
    fn send(&self, addr: SocketAddr, packet: &[u8]) -> Result<Vec<u8>> {
        self.requests.borrow_mut().push((addr, packet.to_vec()));
        self.responses
            .borrow_mut()
            .pop_front()
            .unwrap_or(Err(Error::Timeout))
    }
}

/// A device reply carrying `code` and `payload` encrypted with `key`
#[cfg(test)]
pub fn reply(key: &Key, code: i16, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0_u8; HEADER_LEN];
    packet[0x00..0x08].copy_from_slice(&MAGIC);
    LittleEndian::write_i16(&mut packet[0x22..0x24], code);
    packet.extend(encrypt(key, payload).unwrap());
    packet
}

/// Decrypt the payload of a request built by `build_packet`
#[cfg(test)]
pub fn request_payload(key: &Key, packet: &[u8]) -> Vec<u8> {
    decrypt(key, &packet[HEADER_LEN..]).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn checksum_starts_at_beaf() {
        assert_eq!(0xbeaf, checksum(&[]));
        assert_eq!(0xbeb2, checksum(&[1, 2]));
        assert_eq!(0xbbb0, checksum(&[0xff; 0x1ff]));
    }

    #[test]
    fn encrypt_pads_to_block_size() {
        let cipher = encrypt(&DEFAULT_KEY, b"{\"did\":\"abc\"}").unwrap();
        assert_eq!(16, cipher.len());

        let plain = decrypt(&DEFAULT_KEY, &cipher).unwrap();
        assert_eq!(b"{\"did\":\"abc\"}", &plain[..13]);
        assert_eq!(&[0_u8; 3], &plain[13..]);
    }

    #[test]
    fn decrypt_rejects_partial_blocks() {
        assert!(matches!(decrypt(&DEFAULT_KEY, &[0; 15]), Err(Error::Crypto)));
    }

    #[test]
    fn packet_header_layout() {
        let mut session = Session::new();
        let mac = hex!("780f77112233");
        let packet = build_packet(&mut session, 0xa59c, &mac, CMD_HUB, &[1, 2, 3]).unwrap();

        assert_eq!(HEADER_LEN + 16, packet.len());
        assert_eq!(MAGIC, packet[0x00..0x08]);
        assert_eq!(hex!("9ca5"), packet[0x24..0x26]);
        assert_eq!(hex!("6a00"), packet[0x26..0x28]);
        assert_eq!(hex!("0180"), packet[0x28..0x2a]);
        assert_eq!(hex!("33221177 0f78"), packet[0x2a..0x30]);
        assert_eq!(hex!("00000000"), packet[0x30..0x34]);
        assert_eq!(checksum(&[1, 2, 3]), LittleEndian::read_u16(&packet[0x34..0x36]));

        let mut unsummed = packet.clone();
        unsummed[0x20] = 0;
        unsummed[0x21] = 0;
        assert_eq!(checksum(&unsummed), LittleEndian::read_u16(&packet[0x20..0x22]));
    }

    #[test]
    fn counter_keeps_high_bit() {
        let mut session = Session::new();
        session.count = 0xffff;
        assert_eq!(0x8000, session.next_count());
        assert_eq!(0x8001, session.next_count());
    }

    #[test]
    fn open_response_checks_error_code() {
        let ok = reply(&DEFAULT_KEY, 0, b"hello");
        assert_eq!(b"hello", &open_response(&DEFAULT_KEY, &ok).unwrap()[..5]);

        let failed = reply(&DEFAULT_KEY, -7, &[]);
        match open_response(&DEFAULT_KEY, &failed) {
            Err(Error::Device(err)) => assert_eq!(-7, err.code),
            other => panic!("unexpected {:?}", other),
        }

        assert!(matches!(
            open_response(&DEFAULT_KEY, &[0; 8]),
            Err(Error::Malformed(_))
        ));
    }

    #[test]
    fn hub_envelope() {
        let json = br#"{"did":"00000000000000000000a043b0d06963"}"#;
        let packet = pack_json(1, json);

        assert_eq!(hex!("a5a5 5a5a"), packet[0x00..0x04]);
        assert_eq!(hex!("010b"), packet[0x06..0x08]);
        assert_eq!(json.len() as u32, LittleEndian::read_u32(&packet[0x08..0x0c]));

        // trailing zero padding from decryption is ignored
        let mut padded = packet.clone();
        padded.extend_from_slice(&[0; 7]);
        assert_eq!(&json[..], unpack_json(&padded).unwrap());
    }

    #[test]
    fn unpack_rejects_truncated_json() {
        let mut packet = pack_json(1, b"{}");
        packet.truncate(HUB_HEADER_LEN + 1);
        assert!(unpack_json(&packet).is_err());
    }

    #[test]
    fn default_protocol_resends_until_answered() {
        let device = UdpSocket::bind("127.0.0.1:0").unwrap();
        device.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let addr = device.local_addr().unwrap();
        let answering = std::thread::spawn(move || {
            let mut buffer = [0_u8; 16];
            // the first copy is dropped on the floor
            let (size, _) = device.recv_from(&mut buffer).unwrap();
            assert_eq!(b"ping", &buffer[..size]);
            let (size, from) = device.recv_from(&mut buffer).unwrap();
            assert_eq!(b"ping", &buffer[..size]);
            device.send_to(b"pong", from).unwrap();
        });

        let reply = DefaultProtocol::with_timeout(Duration::from_secs(5))
            .send(addr, b"ping")
            .unwrap();

        answering.join().unwrap();
        assert_eq!(b"pong".to_vec(), reply);
    }

    #[test]
    fn default_protocol_times_out() {
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();
        let start = Instant::now();

        let result = DefaultProtocol::with_timeout(Duration::from_millis(300)).send(addr, b"ping");

        assert!(matches!(result, Err(Error::Timeout)));
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert!(start.elapsed() < RETRY_INTERVAL * 2);
    }

    #[test]
    fn mock_records_requests() {
        let protocol = ProtocolMock::new();
        let addr: SocketAddr = "192.168.1.5:80".parse().unwrap();
        protocol.push_response(Ok(vec![1]));

        assert_eq!(vec![1], protocol.send(addr, &[9]).unwrap());
        assert!(matches!(protocol.send(addr, &[8]), Err(Error::Timeout)));
        assert_eq!(2, protocol.requests().len());
    }
}
