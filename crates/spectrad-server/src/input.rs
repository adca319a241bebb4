use spectrad_core::config::Input;
use std::io::Read;

/// The sample byte stream arrives on stdin; the driver table exists so other
/// sources can slot in behind the same `Read` seam.
pub fn open(input: &Input) -> anyhow::Result<(Box<dyn Read + Send>, &'static str)> {
    match input.driver.name.as_str() {
        "stdin" => Ok((Box::new(std::io::stdin()), "stdin")),
        other => anyhow::bail!("unknown input.driver.name {other:?}"),
    }
}
