use crate::logw;
use std::path::Path;

/// Opens a folder or a media file with the desktop's default handler.
pub fn open_path<P: AsRef<Path>>(path: P) -> bool {
    let path = path.as_ref();
    if path.as_os_str().is_empty() || !path.exists() {
        logw(format!("Nothing to open at {}", path.display()));
        return false;
    }

    #[cfg(target_os = "windows")]
    let spawned = std::process::Command::new("explorer").arg(path).spawn();

    #[cfg(target_os = "macos")]
    let spawned = std::process::Command::new("open").arg(path).spawn();

    #[cfg(all(unix, not(target_os = "macos")))]
    let spawned = std::process::Command::new("xdg-open").arg(path).spawn();

    match spawned {
        Ok(_) => true,
        Err(e) => {
            logw(format!("Could not open {}: {}", path.display(), e));
            false
        }
    }
}
