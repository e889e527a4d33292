use anyhow::{Context, Result};
use drover_runtime::RequestDescriptor;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Load requests from a JSON-lines file, or stdin when `path` is "-".
pub fn load_requests(path: &Path) -> Result<Vec<RequestDescriptor>> {
    if path == Path::new("-") {
        return parse_requests(io::stdin().lock()).context("Failed to read requests from stdin");
    }

    let file = File::open(path)
        .with_context(|| format!("Failed to open request file {}", path.display()))?;
    parse_requests(BufReader::new(file))
        .with_context(|| format!("Failed to parse requests in {}", path.display()))
}

/// One request object per line; blank lines and `#` comments are skipped.
pub fn parse_requests(reader: impl BufRead) -> Result<Vec<RequestDescriptor>> {
    let mut requests = Vec::new();

    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let request: RequestDescriptor = serde_json::from_str(trimmed)
            .with_context(|| format!("Invalid request on line {}", number + 1))?;
        requests.push(request);
    }

    Ok(requests)
}
