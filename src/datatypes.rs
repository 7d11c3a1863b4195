use std::net::SocketAddr;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Family, model and manufacturer of a Broadlink device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceKind {
    #[serde(rename = "type")]
    pub class: &'static str,
    pub model: &'static str,
    pub manufacturer: &'static str,
}

const UNKNOWN: DeviceKind = DeviceKind {
    class: "device",
    model: "Unknown",
    manufacturer: "Unknown",
};

macro_rules! kinds {
    ( $( $devtype:expr => ($class:expr, $model:expr, $manufacturer:expr) ),* $(,)? ) => {
        &[ $( ($devtype, DeviceKind { class: $class, model: $model, manufacturer: $manufacturer }) ),* ]
    };
}

const DEVICE_TYPES: &[(u16, DeviceKind)] = kinds![
    0x0000 => ("sp1", "SP1", "Broadlink"),
    0x2717 => ("sp2", "NEO", "Ankuoo"),
    0x2719 => ("sp2", "SP2-compatible", "Honeywell"),
    0x271a => ("sp2", "SP2-compatible", "Honeywell"),
    0x2720 => ("sp2", "SP mini", "Broadlink"),
    0x2728 => ("sp2", "SP2-compatible", "URANT"),
    0x273e => ("sp2", "SP mini", "Broadlink"),
    0x7530 => ("sp2", "SP2", "Broadlink (OEM)"),
    0x2733 => ("sp3", "SP3", "Broadlink"),
    0x7d00 => ("sp3", "SP3-EU", "Broadlink (OEM)"),
    0x9479 => ("sp3s", "SP3S-US", "Broadlink"),
    0x947a => ("sp3s", "SP3S-EU", "Broadlink"),
    0x7568 => ("sp4", "SP4L-CN", "Broadlink"),
    0x756c => ("sp4", "SP4M", "Broadlink"),
    0x756f => ("sp4", "MCB1", "Broadlink"),
    0x7579 => ("sp4", "SP4L-EU", "Broadlink"),
    0x2712 => ("rm", "RM pro/pro+", "Broadlink"),
    0x2737 => ("rm", "RM mini 3", "Broadlink"),
    0x51da => ("rm4", "RM4 mini", "Broadlink"),
    0x6026 => ("rm4", "RM4 pro", "Broadlink"),
    0x2714 => ("a1", "e-Sensor", "Broadlink"),
    0x4eb5 => ("mp1", "MP1-1K4S", "Broadlink"),
    0x504e => ("lb1", "LB1", "Broadlink"),
    0x4ead => ("hysen", "HY02/HY03", "Hysen"),
    0x4e4d => ("dooya", "DT360E-45/20", "Dooya"),
    0xa59c => ("s3", "S3", "Broadlink"),
    0xa64d => ("s3", "S3", "Broadlink"),
];

impl DeviceKind {
    pub fn from_devtype(devtype: u16) -> DeviceKind {
        DEVICE_TYPES
            .iter()
            .find(|(known, _)| *known == devtype)
            .map(|(_, kind)| *kind)
            .unwrap_or(UNKNOWN)
    }
}

/// A device as announced in its discovery reply
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceInfo {
    #[serde(rename = "host", serialize_with = "serialize_host")]
    pub addr: SocketAddr,
    pub devtype: u16,
    #[serde(serialize_with = "serialize_mac")]
    pub mac: [u8; 6],
    pub name: String,
    pub is_locked: bool,
    #[serde(flatten)]
    pub kind: DeviceKind,
}

impl DeviceInfo {
    pub fn new(addr: SocketAddr, devtype: u16, mac: [u8; 6]) -> DeviceInfo {
        DeviceInfo {
            addr,
            devtype,
            mac,
            name: String::new(),
            is_locked: false,
            kind: DeviceKind::from_devtype(devtype),
        }
    }

    /// Parse the datagram a device sends back to a discovery probe
    pub fn from_discovery_reply(addr: SocketAddr, reply: &[u8]) -> Result<DeviceInfo> {
        if reply.len() < 0x40 {
            return Err(Error::Malformed(format!(
                "discovery reply of {} bytes from {}",
                reply.len(),
                addr
            )));
        }

        let devtype = LittleEndian::read_u16(&reply[0x34..0x36]);
        let mut mac = [0_u8; 6];
        for (i, byte) in reply[0x3a..0x40].iter().rev().enumerate() {
            mac[i] = *byte;
        }
        let name = reply[0x40..]
            .split(|byte| *byte == 0)
            .next()
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_default();
        let is_locked = reply.get(0x7f).map_or(false, |lock| *lock != 0);

        Ok(DeviceInfo {
            name,
            is_locked,
            ..DeviceInfo::new(addr, devtype, mac)
        })
    }

    pub fn model_class(&self) -> &'static str {
        self.kind.class
    }

    pub fn mac_string(&self) -> String {
        format_mac(&self.mac)
    }
}

/// Hosts are written as `[ip, port]`, so joining the array with commas gives `ip,port`
pub fn serialize_host<S: Serializer>(addr: &SocketAddr, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    (addr.ip(), addr.port()).serialize(serializer)
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

fn serialize_mac<S: Serializer>(mac: &[u8; 6], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    format_mac(mac).serialize(serializer)
}

/// A subdevice exactly as the hub reports it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subdevice(pub Map<String, Value>);

impl Subdevice {
    pub fn did(&self) -> Option<&str> {
        self.0.get("did").and_then(Value::as_str)
    }
}

/// One page of the hub's subdevice listing
#[derive(Debug, Clone, Deserialize)]
pub struct SubdeviceList {
    pub total: usize,
    #[serde(default)]
    pub list: Vec<Subdevice>,
}

/// Switch index name (`pwr1`, `pwr2`, ...) to its current value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwitchState(pub Map<String, Value>);

impl SwitchState {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn value(&self, key: &str) -> Result<&Value> {
        self.get(key)
            .ok_or_else(|| Error::MissingSwitch(String::from(key)))
    }
}

/// Text form of a state value: strings bare, everything else as JSON
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// A subdevice annotated with the address of its hub and its live state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct SubdeviceRecord(Map<String, Value>);

impl SubdeviceRecord {
    pub fn new(subdevice: Subdevice, host: SocketAddr, status: SwitchState) -> Result<SubdeviceRecord> {
        let mut fields = subdevice.0;
        fields.insert(
            String::from("host"),
            serialize_host(&host, serde_json::value::Serializer)?,
        );
        fields.insert(String::from("status"), Value::Object(status.0));
        Ok(SubdeviceRecord(fields))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn did(&self) -> Option<&str> {
        self.0.get("did").and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.0.get("name").and_then(Value::as_str)
    }

    pub fn status(&self) -> Option<&Map<String, Value>> {
        self.0.get("status").and_then(Value::as_object)
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(String::from(key), value.into());
    }
}
