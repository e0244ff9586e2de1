use crate::error::CliError;
use serde::Serialize;

/// Writes `report` as pretty JSON to `path`, or to stdout when no path is
/// given.
pub async fn emit<T: Serialize>(report: &T, path: Option<&str>) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(report)?;
    match path {
        Some(path) => tokio::fs::write(path, json).await?,
        None => println!("{json}"),
    }
    Ok(())
}
