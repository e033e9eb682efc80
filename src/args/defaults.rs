use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_PROXY_HOST: &str = "localhost";
pub(crate) const DEFAULT_PROXY_PORT: u16 = 8001;
pub(crate) const DEFAULT_TARGET_HOST: &str = "localhost";
pub(crate) const DEFAULT_TARGET_PORT: u16 = 7001;
pub(crate) const DEFAULT_RECORDING_FILE: &str = "recording.json";

pub(crate) const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const DEFAULT_WORKER_PROCESSES: usize = 1;

pub(crate) fn default_file_store_directory() -> PathBuf {
    default_base_dir().join("file-store")
}

fn default_base_dir() -> PathBuf {
    if let Some(home) = user_home_dir() {
        return home.join(".stampede");
    }

    PathBuf::from(".stampede")
}

fn user_home_dir() -> Option<PathBuf> {
    #[cfg(windows)]
    {
        if let Some(value) = std::env::var_os("USERPROFILE") {
            return Some(PathBuf::from(value));
        }
    }

    std::env::var_os("HOME").map(PathBuf::from)
}
