//! services/api/src/bin/openapi.rs
//!
//! Dumps the OpenAPI document of the REST surface, for client generation.
//!
//! Usage: `openapi [PATH]`. Writes `openapi.json` by default; `-` prints to stdout.

use pawtrack_api::web::rest::ApiDoc;
use std::io::Write;
use utoipa::OpenApi;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let target = std::env::args().nth(1);
    let document = ApiDoc::openapi().to_pretty_json()?;

    match target.as_deref() {
        Some("-") => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(document.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
        other => {
            let path = other.unwrap_or("openapi.json");
            std::fs::write(path, document)?;
            eprintln!("Wrote {} paths to {}", ApiDoc::openapi().paths.paths.len(), path);
        }
    }
    Ok(())
}
