use std::path::PathBuf;

/// Directory where runtime assets (the SQLite database) live.
///
/// Defaults to the platform data dir; falls back to the working directory
/// when the platform does not expose one (containers, CI).
pub fn asset_dir() -> PathBuf {
    let dir = dirs::data_dir()
        .map(|d| d.join("device-triage"))
        .unwrap_or_else(|| PathBuf::from(".device-triage"));
    if !dir.exists() {
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!("failed to create asset dir {}: {}", dir.display(), e);
        }
    }
    dir
}
