//! Bulk numeric array transfer.
//!
//! Downloads are a single raw write, `QD <name>[]\r<v0>,...\`, answered by
//! the ordinary prompt. Uploads send `QU <name>[]` and read values until the
//! upload terminator `\x1a:`.

use std::time::Duration;

use dmclink_frame::Sentinel;
use tracing::debug;

use crate::control::{self, LIST_ARRAYS};
use crate::correlator::CommandCorrelator;
use crate::error::{ControllerError, Result};

/// Write `values` into the controller array `name`.
pub async fn download(
    correlator: &CommandCorrelator,
    name: &str,
    values: &[f64],
    timeout: Duration,
) -> Result<()> {
    let payload = control::download(name, values)?;
    let label = format!("QD {name}[]");
    correlator
        .send_raw(&label, payload.as_bytes(), timeout)
        .await?;
    debug!(array = name, count = values.len(), "array downloaded");
    Ok(())
}

/// Read the controller array `name`.
pub async fn upload(
    correlator: &CommandCorrelator,
    name: &str,
    timeout: Duration,
) -> Result<Vec<f64>> {
    let command = control::upload(name)?;
    let response = correlator
        .stream(&command, Sentinel::UploadEnd, timeout)
        .await?;
    let values = parse_values(name, &response.lines)?;
    debug!(array = name, count = values.len(), "array uploaded");
    Ok(values)
}

/// List the arrays defined on the controller, one entry per line.
pub async fn list(correlator: &CommandCorrelator, timeout: Duration) -> Result<Vec<String>> {
    let response = correlator.send(LIST_ARRAYS, timeout).await?;
    Ok(response
        .lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

/// Parse upload lines. Values may be split by line breaks, commas or
/// whitespace.
pub fn parse_values(name: &str, lines: &[String]) -> Result<Vec<f64>> {
    lines
        .iter()
        .flat_map(|line| line.split(|c: char| c == ',' || c.is_whitespace()))
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<f64>().map_err(|_| {
                ControllerError::Protocol(format!(
                    "non-numeric value '{token}' in upload of {name}"
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_any_separator() {
        assert_eq!(
            parse_values("order", &lines(&["0", "1", "2"])).unwrap(),
            vec![0.0, 1.0, 2.0]
        );
        assert_eq!(
            parse_values("order", &lines(&[" 0.0000, 1.5000", "2.0000 -3"])).unwrap(),
            vec![0.0, 1.5, 2.0, -3.0]
        );
        assert!(parse_values("order", &[]).unwrap().is_empty());
    }

    #[test]
    fn non_numeric_token_is_protocol_error() {
        let err = parse_values("order", &lines(&["1", "abc"])).unwrap_err();
        assert!(matches!(err, ControllerError::Protocol(msg) if msg.contains("'abc'")));
    }
}
