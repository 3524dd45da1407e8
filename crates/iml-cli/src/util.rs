use anyhow::{bail, Result};
use std::path::Path;

/// Check that `path` exists and has a `.csv` or `.tsv` extension.
pub fn validate_tsv_or_csv_file(path: &str) -> Result<()> {
    let path = Path::new(path);

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|s| s.to_lowercase());
    match extension.as_deref() {
        Some("tsv") | Some("csv") => {}
        _ => bail!("File must have a .tsv or .csv extension: {}", path.display()),
    }

    if !path.exists() {
        bail!("File does not exist: {}", path.display());
    }

    Ok(())
}
