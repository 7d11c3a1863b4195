extern crate broadlinker;

use std::{
    io::{self, Write},
    net::Ipv4Addr,
    process,
    time::Duration,
};

use clap::{value_t, App, AppSettings, Arg, ArgMatches, SubCommand};
use log::error;

use broadlinker::{
    commands,
    datatypes::{display_value, DeviceInfo},
    devices::Device,
    discovery,
    error::{Error, Result},
};

struct Options {
    json: bool,
    timeout: Duration,
    local_ip: Option<Ipv4Addr>,
}

fn command_discover(options: &Options) -> Result<()> {
    let devices = discovery::discover(options.timeout, options.local_ip)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if options.json {
        writeln!(out, "{}", serde_json::to_string(&devices)?)?;
    } else {
        for device in devices.iter() {
            discover_print_human(&mut out, device)?;
        }
    }
    out.flush()?;
    Ok(())
}

fn discover_print_human<W: Write>(out: &mut W, device: &DeviceInfo) -> Result<()> {
    writeln!(
        out,
        "{}\t{}\t{}\t{}\t{}",
        device.addr,
        pad(device.kind.model, 16),
        pad(device.kind.manufacturer, 18),
        device.mac_string(),
        device.name,
    )?;
    Ok(())
}

fn pad(value: &str, padding: usize) -> String {
    let pad = " ".repeat(padding.saturating_sub(value.len()));
    format!("{}{}", value, pad)
}

fn command_subdevices(options: &Options, model: Option<&str>, lc1: bool) -> Result<()> {
    let mut devices = discovery::discover(options.timeout, options.local_ip)?
        .into_iter()
        .map(|info| Device::from_info(info, options.timeout))
        .collect::<Vec<_>>();

    let mut records = commands::list_subdevices(&mut devices, model)?;
    if lc1 {
        records = commands::lc1_switches(records);
    }

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", serde_json::to_string(&records)?)?;
    out.flush()?;
    Ok(())
}

fn connect(host: &str, options: &Options) -> Result<Device> {
    let info = discovery::hello(host, options.timeout)?;
    Ok(Device::from_info(info, options.timeout))
}

fn command_get_state(options: &Options, matches: &ArgMatches) -> Result<()> {
    let host = commands::truncate_host(matches.value_of("host").unwrap_or_default());
    let did = matches.value_of("did").unwrap_or_default();
    let switch = matches.value_of("switch").unwrap_or_default();

    let mut device = connect(host, options)?;
    let value = commands::query_state(&mut device, did, switch)?;

    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "{}", display_value(&value))?;
    out.flush()?;
    Ok(())
}

fn command_set_state(options: &Options, matches: &ArgMatches) -> Result<()> {
    let host = commands::truncate_host(matches.value_of("host").unwrap_or_default());
    let did = matches.value_of("did").unwrap_or_default();
    let payload = value_t!(matches, "payload", i64).unwrap_or_else(|e| e.exit());
    let switch = matches.value_of("switch").unwrap_or_default();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    commands::write_set_header(&mut out, host, did, payload)?;
    out.flush()?;

    let mut device = connect(host, options)?;
    commands::set_state(&mut device, did, payload, switch, &mut out)?;
    out.flush()?;
    Ok(())
}

fn lc1_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name("lc1")
        .long("lc1")
        .takes_value(false)
        .help("Only list LC1 wall switches, with their model and number of gangs")
}

fn report<W: Write>(err: &Error, out: &mut W) {
    let _ = writeln!(out, "Error: {}", err);
}

fn run(matches: &ArgMatches) -> Result<()> {
    let options = Options {
        json: matches.is_present("json"),
        timeout: Duration::from_secs(value_t!(matches, "timeout", u64).unwrap_or_else(|e| e.exit())),
        local_ip: if matches.is_present("local-ip") {
            Some(value_t!(matches, "local-ip", Ipv4Addr).unwrap_or_else(|e| e.exit()))
        } else {
            None
        },
    };

    match matches.subcommand() {
        ("discover", Some(_)) => command_discover(&options),
        ("all-subdevices", Some(sub)) => command_subdevices(&options, None, sub.is_present("lc1")),
        ("subdevices", Some(sub)) => {
            command_subdevices(&options, sub.value_of("model"), sub.is_present("lc1"))
        }
        ("get-state", Some(sub)) => command_get_state(&options, sub),
        ("set-state", Some(sub)) => command_set_state(&options, sub),
        _ => Ok(()),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let default_timeout = broadlinker::DEFAULT_TIMEOUT.as_secs().to_string();
    let matches = App::new("Broadlink S3 hub CLI")
        .version("0.1")
        .about("Discover Broadlink hubs on the local network and read or set their switches.")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(Arg::with_name("json")
            .long("json")
            .takes_value(false)
            .help("Respond with JSON.")
        )
        .arg(Arg::with_name("timeout")
            .long("timeout")
            .takes_value(true)
            .value_name("SECS")
            .default_value(&default_timeout)
            .help("Seconds to wait for devices to answer.")
        )
        .arg(Arg::with_name("local-ip")
            .long("local-ip")
            .takes_value(true)
            .value_name("IP")
            .help("Local IPv4 address to discover from.")
        )
        .subcommand(SubCommand::with_name("discover")
            .about("Discover devices on the local network")
        )
        .subcommand(SubCommand::with_name("all-subdevices")
            .about("List the subdevices of every discovered device as JSON")
            .arg(lc1_arg())
        )
        .subcommand(SubCommand::with_name("subdevices")
            .about("List the subdevices of discovered devices of one type as JSON")
            .arg(Arg::with_name("model")
                .long("model")
                .takes_value(true)
                .default_value("s3")
                .help("Device type to list, e.g. s3")
            )
            .arg(lc1_arg())
        )
        .subcommand(SubCommand::with_name("get-state")
            .about("Print the value of one switch of a subdevice")
            .arg(Arg::with_name("host").required(true).help("Hub address; anything after a comma is ignored"))
            .arg(Arg::with_name("did").required(true).help("Subdevice id"))
            .arg(Arg::with_name("switch").required(true).help("Switch index, e.g. pwr1"))
        )
        .subcommand(SubCommand::with_name("set-state")
            .about("Set one switch of a subdevice")
            .arg(Arg::with_name("host").required(true).help("Hub address; anything after a comma is ignored"))
            .arg(Arg::with_name("did").required(true).help("Subdevice id"))
            .arg(Arg::with_name("payload").required(true).allow_hyphen_values(true).help("Value to set, 0 is off"))
            .arg(Arg::with_name("switch").required(true).help("pwr1, pwr2 or pwr3; anything else sets nothing"))
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        error!("{}", err);
        report(&err, &mut io::stderr());
        process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_writes_error() {
        let mut out = vec![];
        report(&Error::MissingSwitch(String::from("pwr3")), &mut out);

        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("Error: "));
        assert!(out.contains("pwr3"));
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn test_pad() {
        assert_eq!("S3    ", pad("S3", 6));
        assert_eq!("Broadlink", pad("Broadlink", 4));
    }
}
