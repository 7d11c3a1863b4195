//! The work behind each subcommand, independent of where devices come from
use std::io::Write;

use log::{debug, warn};
use serde_json::Value;

use crate::{
    capabilities::{Hub, Lc1Switch, SwitchIndex},
    datatypes::{SubdeviceRecord, SwitchState},
    error::Result,
};

/// Only the part of a host argument before the first comma names the device
pub fn truncate_host(host: &str) -> &str {
    host.split(',').next().unwrap_or(host)
}

fn ensure_auth<H: Hub>(hub: &mut H) -> Result<()> {
    if !hub.is_authenticated() {
        hub.auth()?;
    }
    Ok(())
}

/// Authenticate every device whose model class matches `model` (all of them when `None`),
/// list its subdevices and annotate each with its hub address and current state.
///
/// Nothing is returned unless every device answered.
pub fn list_subdevices<H: Hub>(devices: &mut [H], model: Option<&str>) -> Result<Vec<SubdeviceRecord>> {
    let mut records = vec![];

    for device in devices
        .iter_mut()
        .filter(|device| model.map_or(true, |model| device.info().model_class() == model))
    {
        ensure_auth(device)?;
        let host = device.info().addr;
        for subdevice in device.get_subdevices()? {
            let status = device.get_state(subdevice.did().unwrap_or_default())?;
            debug!("{:?} on {}: {:?}", subdevice.did(), host, status);
            records.push(SubdeviceRecord::new(subdevice, host, status)?);
        }
    }

    Ok(records)
}

/// Keep the LC1 wall switches among `records`, tagged with their `model` and `gangs`.
///
/// Subdevices whose switch layout can't be told are logged and left out.
pub fn lc1_switches(records: Vec<SubdeviceRecord>) -> Vec<SubdeviceRecord> {
    let mut switches = vec![];

    for mut record in records {
        if record.name() != Some(Lc1Switch::NAME) {
            warn!("device not recognised: {:?} ({:?})", record.did(), record.name());
            continue;
        }
        let kind = match record.status().and_then(Lc1Switch::from_status) {
            Some(kind) => kind,
            None => {
                warn!("switch type of {:?} was not detectable: {:?}", record.did(), record.status());
                continue;
            }
        };
        record.insert("model", kind.model());
        record.insert("gangs", kind.gangs());
        switches.push(record);
    }

    switches
}

/// Current value of one switch of a subdevice
pub fn query_state<H: Hub>(hub: &mut H, did: &str, switch: &str) -> Result<Value> {
    ensure_auth(hub)?;
    let state = hub.get_state(did)?;
    Ok(state.value(switch)?.clone())
}

pub fn write_set_header<W: Write>(out: &mut W, host: &str, did: &str, payload: i64) -> Result<()> {
    writeln!(out, "{}", host)?;
    writeln!(out, "{}", did)?;
    writeln!(out, "{}", payload)?;
    Ok(())
}

/// Set the named switch of a subdevice to `payload`, reporting progress to `out`.
///
/// Names other than `pwr1`, `pwr2` and `pwr3` change nothing and are not an error.
pub fn set_state<H: Hub, W: Write>(
    hub: &mut H,
    did: &str,
    payload: i64,
    switch: &str,
    out: &mut W,
) -> Result<Option<SwitchState>> {
    ensure_auth(hub)?;

    let switch = match SwitchIndex::from_name(switch) {
        Some(switch) => switch,
        None => {
            warn!("{} is not a switch index, nothing was set", switch);
            return Ok(None);
        }
    };

    writeln!(out, "set device {}", switch)?;
    let state = hub.set_state(did, switch, payload)?;
    writeln!(out, "{}", serde_json::to_string(&state)?)?;
    Ok(Some(state))
}
