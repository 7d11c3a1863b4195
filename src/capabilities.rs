use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::{
    datatypes::{DeviceInfo, Subdevice, SubdeviceList, SwitchState},
    error::{Error, Result},
    protocol::{self, CMD_HUB},
};

const FLAG_GET_STATE: u8 = 1;
const FLAG_SET_STATE: u8 = 2;
const FLAG_LIST_SUBDEVICES: u8 = 14;

/// One of the three switch channels of an LC1 wall switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchIndex {
    Pwr1,
    Pwr2,
    Pwr3,
}

impl SwitchIndex {
    /// Recognises exactly `pwr1`, `pwr2` and `pwr3`
    pub fn from_name(name: &str) -> Option<SwitchIndex> {
        match name {
            "pwr1" => Some(SwitchIndex::Pwr1),
            "pwr2" => Some(SwitchIndex::Pwr2),
            "pwr3" => Some(SwitchIndex::Pwr3),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SwitchIndex::Pwr1 => "pwr1",
            SwitchIndex::Pwr2 => "pwr2",
            SwitchIndex::Pwr3 => "pwr3",
        }
    }
}

impl fmt::Display for SwitchIndex {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// LC1 wall switch layout, told apart by which channels its state reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lc1Switch {
    OneGang,
    TwoGang,
    ThreeGang,
}

impl Lc1Switch {
    /// The name hubs give LC1 subdevices
    pub const NAME: &'static str = "simpfc_cli";

    pub fn from_status(status: &Map<String, Value>) -> Option<Lc1Switch> {
        let has = |switch: SwitchIndex| status.contains_key(switch.name());
        match (has(SwitchIndex::Pwr1), has(SwitchIndex::Pwr2), has(SwitchIndex::Pwr3)) {
            (true, true, true) => Some(Lc1Switch::ThreeGang),
            (true, true, false) => Some(Lc1Switch::TwoGang),
            (true, false, false) => Some(Lc1Switch::OneGang),
            _ => None,
        }
    }

    pub fn switches(self) -> &'static [SwitchIndex] {
        match self {
            Lc1Switch::OneGang => &[SwitchIndex::Pwr1],
            Lc1Switch::TwoGang => &[SwitchIndex::Pwr1, SwitchIndex::Pwr2],
            Lc1Switch::ThreeGang => &[SwitchIndex::Pwr1, SwitchIndex::Pwr2, SwitchIndex::Pwr3],
        }
    }

    pub fn gangs(self) -> usize {
        self.switches().len()
    }

    pub fn model(self) -> &'static str {
        match self {
            Lc1Switch::OneGang => "LC1 1 Gang",
            Lc1Switch::TwoGang => "LC1 Switch 2 Gang",
            Lc1Switch::ThreeGang => "LC1 Switch 3 Gang",
        }
    }
}

pub trait DeviceActions {
    fn info(&self) -> &DeviceInfo;

    fn is_authenticated(&self) -> bool;

    /// Handshake with the device, replacing the default key with a session key
    fn auth(&mut self) -> Result<()>;

    /// Encrypt and send a command, returning the decrypted reply payload
    fn send_packet(&mut self, command: u16, payload: &[u8]) -> Result<Vec<u8>>;
}

pub trait Hub: DeviceActions {
    const MAX_SUBDEVICES: usize = 8;
    const PAGE_SIZE: usize = 5;

    /// Send a JSON hub command and parse the JSON it answers with
    fn send_json<T: DeserializeOwned>(&mut self, flag: u8, body: &Value) -> Result<T> {
        if !self.is_authenticated() {
            return Err(Error::NotAuthenticated);
        }
        let request = protocol::pack_json(flag, &serde_json::to_vec(body)?);
        let reply = self.send_packet(CMD_HUB, &request)?;
        Ok(serde_json::from_slice(protocol::unpack_json(&reply)?)?)
    }

    fn get_subdevices(&mut self) -> Result<Vec<Subdevice>> {
        let mut subdevices: Vec<Subdevice> = vec![];
        let mut index = 0;
        // until the first page arrives, assume the hub is full
        let mut total = Self::MAX_SUBDEVICES;

        while index < total {
            let page: SubdeviceList = self.send_json(
                FLAG_LIST_SUBDEVICES,
                &json!({"count": Self::PAGE_SIZE, "index": index}),
            )?;
            for subdevice in page.list {
                let did = subdevice
                    .did()
                    .ok_or_else(|| Error::Malformed(String::from("subdevice without did")))?;
                if subdevices.iter().all(|seen| seen.did() != Some(did)) {
                    subdevices.push(subdevice);
                }
            }
            total = page.total;
            if subdevices.len() >= total {
                break;
            }
            index += Self::PAGE_SIZE;
        }

        Ok(subdevices)
    }

    fn get_state(&mut self, did: &str) -> Result<SwitchState> {
        self.send_json(FLAG_GET_STATE, &json!({ "did": did }))
    }

    /// Set one channel, leaving the others as they are; any non-zero value means on
    fn set_state(&mut self, did: &str, switch: SwitchIndex, value: i64) -> Result<SwitchState> {
        self.send_json(
            FLAG_SET_STATE,
            &json!({ "did": did, switch.name(): i32::from(value != 0) }),
        )
    }
}
