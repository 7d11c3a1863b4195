//! Error types
use serde_json;
use std::{convert::From, error, fmt, io, result};

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Serde(serde_json::Error),
    Device(DeviceError),
    Timeout,
    Crypto,
    Malformed(String),
    NotAuthenticated,
    MissingSwitch(String),
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "Error connecting to the device: {}", err),
            Error::Serde(err) => write!(
                f,
                "Could not parse the response received from the device: {}",
                err
            ),
            Error::Device(err) => write!(f, "Device error: {}", err),
            Error::Timeout => f.write_str("No response received from the device"),
            Error::Crypto => f.write_str("Encrypted payload has an invalid length"),
            Error::Malformed(what) => write!(f, "Malformed packet: {}", what),
            Error::NotAuthenticated => f.write_str("Device is not authenticated"),
            Error::MissingSwitch(key) => write!(f, "Switch state has no '{}' entry", key),
            Error::Other(err) => f.write_str(err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            Error::Serde(err) => Some(err),
            Error::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout,
            _ => Error::IO(error),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Serde(error)
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<DeviceError> for Error {
    fn from(error: DeviceError) -> Self {
        Error::Device(error)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Non-zero error code reported in a device response header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceError {
    pub code: i16,
}

impl DeviceError {
    /// Turn a response error code into a result; zero means success
    pub fn check(code: i16) -> result::Result<(), DeviceError> {
        if code == 0 {
            Ok(())
        } else {
            Err(DeviceError { code })
        }
    }

    pub fn message(&self) -> &'static str {
        match self.code {
            -1 => "Authentication failed",
            -2 => "You have been logged out",
            -3 => "The device is offline",
            -4 => "Command not supported",
            -5 => "The device storage is full",
            -6 => "Structure is abnormal",
            -7 => "Control key is expired",
            -8 => "Send error",
            -9 => "Write error",
            -10 => "Read error",
            -11 => "SSID could not be found in AP configuration",
            _ => "Unknown error",
        }
    }
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({}) {}", self.code, self.message())
    }
}

impl error::Error for DeviceError {}
