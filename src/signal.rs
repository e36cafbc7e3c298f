//! Signal name parsing for the `kill` verb.

use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::error::{Error, Result};

/// Parses a signal argument: a number (`9`), a `SIG`-prefixed name
/// (`SIGKILL`), or an unprefixed name (`kill`), case-insensitively.
pub fn parse_signal(raw: &str) -> Result<Signal> {
    if let Ok(num) = raw.parse::<i32>() {
        return Signal::try_from(num).map_err(|_| Error::UnknownSignal(raw.to_string()));
    }

    let upper = raw.to_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| Error::UnknownSignal(raw.to_string()))
}
