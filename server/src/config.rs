use std::env;
use std::path::PathBuf;

const PORT: u16 = 9000;
const UPLOAD_DIR: &str = "./data/uploads";
const TEMP_DIR: &str = "./data/temp";
const METADATA_FILE: &str = "./data/file-info.json";
const BODY_LIMIT: usize = 2 * 1024 * 1024 * 1024; /* 2GB */

/// Server settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root of the final file tree
    pub upload_dir: PathBuf,
    /// Root holding one chunk directory per content fingerprint
    pub temp_dir: PathBuf,
    /// Location of the metadata registry
    pub metadata_file: PathBuf,
    /// Largest request body accepted, in bytes
    pub body_limit: usize,
}

impl Config {
    /// Reads `FILEHUB_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let port = env::var("FILEHUB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(PORT);
        let upload_dir =
            env::var("FILEHUB_UPLOAD_DIR").unwrap_or_else(|_| String::from(UPLOAD_DIR));
        let temp_dir = env::var("FILEHUB_TEMP_DIR").unwrap_or_else(|_| String::from(TEMP_DIR));
        let metadata_file =
            env::var("FILEHUB_METADATA_FILE").unwrap_or_else(|_| String::from(METADATA_FILE));
        let body_limit = env::var("FILEHUB_BODY_LIMIT")
            .ok()
            .and_then(|l| l.parse().ok())
            .unwrap_or(BODY_LIMIT);

        Self {
            port,
            upload_dir: PathBuf::from(upload_dir),
            temp_dir: PathBuf::from(temp_dir),
            metadata_file: PathBuf::from(metadata_file),
            body_limit,
        }
    }

    /// Places every piece of persisted state under a single directory.
    #[must_use]
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            port: 0,
            upload_dir: root.join("uploads"),
            temp_dir: root.join("temp"),
            metadata_file: root.join("file-info.json"),
            body_limit: BODY_LIMIT,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
