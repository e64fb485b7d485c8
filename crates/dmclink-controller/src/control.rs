//! Command vocabulary the engine itself puts on the wire.

use crate::error::{ControllerError, Result};

/// Asks the controller to explain the last `?`.
pub const ERROR_QUERY: &str = "TC1";
/// Routes unsolicited output to the message channel's handle.
pub const DEFAULT_HANDSHAKE: &str = "CF I";
/// Lists the arrays defined on the controller.
pub const LIST_ARRAYS: &str = "LA";
/// Ends an array download payload.
pub const DOWNLOAD_TERMINATOR: char = '\\';

/// Explanation used when the diagnostic query itself yields nothing.
pub const UNKNOWN_ERROR: &str = "unknown error";

/// `XQ#<name>`: start a subroutine.
pub fn execute(name: &str) -> Result<String> {
    validate_label(name)?;
    Ok(format!("XQ#{name}"))
}

/// `QU <name>[]`: upload an array.
pub fn upload(name: &str) -> Result<String> {
    validate_array_name(name)?;
    Ok(format!("QU {name}[]"))
}

/// `QD <name>[]\r<v0>,<v1>,...\`: the complete download payload.
pub fn download(name: &str, values: &[f64]) -> Result<String> {
    validate_array_name(name)?;
    let mut payload = format!("QD {name}[]\r");
    for (i, value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(ControllerError::InvalidInput(format!(
                "{name}[{i}] is not a finite number"
            )));
        }
        if i > 0 {
            payload.push(',');
        }
        payload.push_str(&value.to_string());
    }
    payload.push(DOWNLOAD_TERMINATOR);
    Ok(payload)
}

/// A command must stay on one line for the correlator to pair it with
/// exactly one prompt.
pub fn validate_command(command: &str) -> Result<()> {
    if command.trim().is_empty() {
        return Err(ControllerError::InvalidInput("empty command".into()));
    }
    if command.contains(['\r', '\n']) {
        return Err(ControllerError::InvalidInput(format!(
            "command contains a line break: {command:?}"
        )));
    }
    Ok(())
}

fn validate_label(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ControllerError::InvalidInput(format!(
            "invalid subroutine label '{name}'"
        )));
    }
    Ok(())
}

fn validate_array_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let leading = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    if !leading || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ControllerError::InvalidInput(format!(
            "invalid array name '{name}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_trigger_and_transfer_commands() {
        assert_eq!(execute("Startup").unwrap(), "XQ#Startup");
        assert_eq!(upload("order").unwrap(), "QU order[]");
        assert_eq!(download("order", &[0.0, 1.0, 2.0]).unwrap(), "QD order[]\r0,1,2\\");
        assert_eq!(download("pos", &[-1.5, 2.25]).unwrap(), "QD pos[]\r-1.5,2.25\\");
        assert_eq!(download("empty", &[]).unwrap(), "QD empty[]\r\\");
    }

    #[test]
    fn rejects_names_that_would_corrupt_the_line() {
        assert!(execute("").is_err());
        assert!(execute("Start up").is_err());
        assert!(upload("1abc").is_err());
        assert!(upload("a[]").is_err());
        assert!(download("ok", &[f64::NAN]).is_err());
        assert!(download("ok", &[f64::INFINITY]).is_err());
    }

    #[test]
    fn command_must_be_single_line() {
        assert!(validate_command("MG \"Hello\"").is_ok());
        assert!(validate_command("  ").is_err());
        assert!(validate_command("TC1\rXQ").is_err());
    }
}
