use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::{
    capabilities::{DeviceActions, Hub},
    datatypes::DeviceInfo,
    error::{Error, Result},
    protocol::{self, DefaultProtocol, Protocol, Session, CMD_AUTH},
};

// DEVICES

pub struct RawDevice {
    info: DeviceInfo,
    protocol: Box<dyn Protocol>,
    session: Session,
    authenticated: bool,
}

impl RawDevice {
    pub fn with_timeout(info: DeviceInfo, timeout: Duration) -> Self {
        Self::with_protocol(info, Box::new(DefaultProtocol::with_timeout(timeout)))
    }

    pub fn with_protocol(info: DeviceInfo, protocol: Box<dyn Protocol>) -> Self {
        Self {
            info,
            protocol,
            session: Session::new(),
            authenticated: false,
        }
    }
}

impl DeviceActions for RawDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    fn auth(&mut self) -> Result<()> {
        let mut payload = vec![0_u8; 0x50];
        payload[0x04..0x14].copy_from_slice(&[0x31; 16]);
        payload[0x1e] = 0x01;
        payload[0x2d] = 0x01;
        payload[0x30..0x36].copy_from_slice(b"Test 1");

        self.authenticated = false;
        self.session.id = 0;
        self.session.key = protocol::DEFAULT_KEY;

        let reply = self.send_packet(CMD_AUTH, &payload)?;
        if reply.len() < 0x14 {
            return Err(Error::Malformed(String::from("auth reply carries no key")));
        }

        self.session.id = LittleEndian::read_u32(&reply[0x00..0x04]);
        self.session.key.copy_from_slice(&reply[0x04..0x14]);
        self.authenticated = true;
        debug!("authenticated with {} as session {:#010x}", self.info.addr, self.session.id);
        Ok(())
    }

    fn send_packet(&mut self, command: u16, payload: &[u8]) -> Result<Vec<u8>> {
        let packet = protocol::build_packet(
            &mut self.session,
            self.info.devtype,
            &self.info.mac,
            command,
            payload,
        )?;
        let response = self.protocol.send(self.info.addr, &packet)?;
        protocol::open_response(&self.session.key, &response)
    }
}

macro_rules! new_device {
    ( $x:ident ) => {
        pub struct $x {
            raw: RawDevice,
        }

        impl From<RawDevice> for $x {
            fn from(raw: RawDevice) -> Self {
                Self { raw }
            }
        }

        impl DeviceActions for $x {
            fn info(&self) -> &DeviceInfo {
                self.raw.info()
            }

            fn is_authenticated(&self) -> bool {
                self.raw.is_authenticated()
            }

            fn auth(&mut self) -> Result<()> {
                self.raw.auth()
            }

            fn send_packet(&mut self, command: u16, payload: &[u8]) -> Result<Vec<u8>> {
                self.raw.send_packet(command, payload)
            }
        }
    };
}

new_device!(S3);

impl Hub for S3 {}

pub enum Device {
    S3(S3),
    Unknown(RawDevice),
}

impl Device {
    pub fn from_info(info: DeviceInfo, timeout: Duration) -> Device {
        Device::from_raw(RawDevice::with_timeout(info, timeout))
    }

    pub fn from_raw(raw: RawDevice) -> Device {
        match raw.info().model_class() {
            "s3" => Device::S3(S3::from(raw)),
            _ => Device::Unknown(raw),
        }
    }

    fn actions(&self) -> &dyn DeviceActions {
        match self {
            Device::S3(device) => device,
            Device::Unknown(device) => device,
        }
    }

    fn actions_mut(&mut self) -> &mut dyn DeviceActions {
        match self {
            Device::S3(device) => device,
            Device::Unknown(device) => device,
        }
    }
}

impl DeviceActions for Device {
    fn info(&self) -> &DeviceInfo {
        self.actions().info()
    }

    fn is_authenticated(&self) -> bool {
        self.actions().is_authenticated()
    }

    fn auth(&mut self) -> Result<()> {
        self.actions_mut().auth()
    }

    fn send_packet(&mut self, command: u16, payload: &[u8]) -> Result<Vec<u8>> {
        self.actions_mut().send_packet(command, payload)
    }
}

// Devices of unknown type are still asked; those without subdevices answer with an error code.
impl Hub for Device {}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::capabilities::SwitchIndex;
    use crate::datatypes::tests::{STATE_JSON, SUBDEVICES_JSON};
    use crate::protocol::{pack_json, reply, request_payload, unpack_json, Key, ProtocolMock};
    use serde_json::{json, Value};

    pub const SESSION_KEY: Key = [
        0x0f, 0x1e, 0x2d, 0x3c, 0x4b, 0x5a, 0x69, 0x78, 0x87, 0x96, 0xa5, 0xb4, 0xc3, 0xd2, 0xe1, 0xf0,
    ];

    pub fn s3_info(host: &str) -> DeviceInfo {
        DeviceInfo::new(
            format!("{}:80", host).parse().unwrap(),
            0xa59c,
            [0x78, 0x0f, 0x77, 0x11, 0x22, 0x33],
        )
    }

    pub fn auth_reply() -> Vec<u8> {
        let mut payload = vec![0_u8; 0x20];
        payload[0x00..0x04].copy_from_slice(&[0x01, 0x00, 0x00, 0x00]);
        payload[0x04..0x14].copy_from_slice(&SESSION_KEY);
        reply(&protocol::DEFAULT_KEY, 0, &payload)
    }

    pub fn hub_reply(json: &str) -> Vec<u8> {
        let value: Value = serde_json::from_str(json).unwrap();
        reply(&SESSION_KEY, 0, &pack_json(1, &serde_json::to_vec(&value).unwrap()))
    }

    /// JSON body of a hub command sent after authentication
    pub fn hub_request(packet: &[u8]) -> Value {
        let payload = request_payload(&SESSION_KEY, packet);
        serde_json::from_slice(unpack_json(&payload).unwrap()).unwrap()
    }

    pub fn mocked(info: DeviceInfo) -> (Device, ProtocolMock) {
        let protocol = ProtocolMock::new();
        let device = Device::from_raw(RawDevice::with_protocol(info, Box::new(protocol.clone())));
        (device, protocol)
    }

    #[test]
    fn test_device_from_info() {
        let (device, _) = mocked(s3_info("192.168.1.5"));
        assert!(matches!(device, Device::S3(_)));

        let sp4 = DeviceInfo::new("192.168.1.6:80".parse().unwrap(), 0x7579, [0; 6]);
        let (device, _) = mocked(sp4);
        assert!(matches!(device, Device::Unknown(_)));
    }

    #[test]
    fn test_auth_installs_session_key() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));

        device.auth().unwrap();

        assert!(device.is_authenticated());
        let requests = protocol.requests();
        assert_eq!(1, requests.len());
        assert_eq!("192.168.1.5:80", requests[0].0.to_string());
        assert_eq!(CMD_AUTH, LittleEndian::read_u16(&requests[0].1[0x26..0x28]));

        let sent = request_payload(&protocol::DEFAULT_KEY, &requests[0].1);
        assert_eq!(b"Test 1", &sent[0x30..0x36]);
    }

    #[test]
    fn test_auth_failure() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(reply(&protocol::DEFAULT_KEY, -1, &[])));

        match device.auth() {
            Err(Error::Device(err)) => assert_eq!(-1, err.code),
            _ => panic!("expected a device error"),
        }
        assert!(!device.is_authenticated());
    }

    #[test]
    fn test_state_requires_auth() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));

        assert!(matches!(device.get_state("abc123"), Err(Error::NotAuthenticated)));
        assert!(protocol.requests().is_empty());
    }

    #[test]
    fn test_get_state() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(STATE_JSON)));

        device.auth().unwrap();
        let state = device.get_state("00000000000000000000a043b0d0783a").unwrap();

        assert_eq!(Some(&json!(0)), state.get("pwr2"));
        let requests = protocol.requests();
        assert_eq!(protocol::CMD_HUB, LittleEndian::read_u16(&requests[1].1[0x26..0x28]));
        // session id from the auth reply
        assert_eq!(1, LittleEndian::read_u32(&requests[1].1[0x30..0x34]));
        assert_eq!(
            json!({"did": "00000000000000000000a043b0d0783a"}),
            hub_request(&requests[1].1)
        );
    }

    #[test]
    fn test_set_state_touches_one_switch() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(STATE_JSON)));

        device.auth().unwrap();
        device.set_state("abc123", SwitchIndex::Pwr3, 7).unwrap();

        let requests = protocol.requests();
        assert_eq!(json!({"did": "abc123", "pwr3": 1}), hub_request(&requests[1].1));
    }

    #[test]
    fn test_get_subdevices() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(SUBDEVICES_JSON)));

        device.auth().unwrap();
        let subdevices = device.get_subdevices().unwrap();

        assert_eq!(2, subdevices.len());
        assert_eq!(2, protocol.requests().len());
        assert_eq!(
            json!({"count": 5, "index": 0}),
            hub_request(&protocol.requests()[1].1)
        );
    }

    #[test]
    fn test_get_subdevices_pages_and_dedups() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(
            r#"{"total": 3, "list": [{"did": "a"}, {"did": "b"}, {"did": "a"}]}"#,
        )));
        protocol.push_response(Ok(hub_reply(
            r#"{"total": 3, "list": [{"did": "b"}, {"did": "c"}]}"#,
        )));

        device.auth().unwrap();
        let dids = device
            .get_subdevices()
            .unwrap()
            .iter()
            .map(|subdevice| subdevice.did().unwrap().to_string())
            .collect::<Vec<_>>();

        assert_eq!(vec!["a", "b", "c"], dids);
        assert_eq!(
            json!({"count": 5, "index": 5}),
            hub_request(&protocol.requests()[2].1)
        );
    }

    #[test]
    fn test_get_subdevices_follows_reported_total() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(
            r#"{"total": 12, "list": [{"did": "1"}, {"did": "2"}, {"did": "3"}, {"did": "4"}, {"did": "5"}]}"#,
        )));
        protocol.push_response(Ok(hub_reply(
            r#"{"total": 12, "list": [{"did": "6"}, {"did": "7"}, {"did": "8"}, {"did": "9"}, {"did": "10"}]}"#,
        )));
        protocol.push_response(Ok(hub_reply(
            r#"{"total": 12, "list": [{"did": "11"}, {"did": "12"}]}"#,
        )));

        device.auth().unwrap();
        let subdevices = device.get_subdevices().unwrap();

        assert_eq!(12, subdevices.len());
        assert_eq!(Some("12"), subdevices[11].did());
        let requests = protocol.requests();
        assert_eq!(4, requests.len());
        assert_eq!(json!({"count": 5, "index": 10}), hub_request(&requests[3].1));
    }

    #[test]
    fn test_get_subdevices_stops_when_pages_run_dry() {
        let (mut device, protocol) = mocked(s3_info("192.168.1.5"));
        protocol.push_response(Ok(auth_reply()));
        protocol.push_response(Ok(hub_reply(r#"{"total": 7, "list": [{"did": "a"}]}"#)));
        protocol.push_response(Ok(hub_reply(r#"{"total": 7, "list": [{"did": "b"}]}"#)));

        device.auth().unwrap();
        assert_eq!(2, device.get_subdevices().unwrap().len());
        // pages at index 0 and 5, index 10 is past the total
        assert_eq!(3, protocol.requests().len());
    }
}
