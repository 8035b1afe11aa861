//! Default locations and path expansion

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::KeystoreError;

/// Secret key file name, placed directly in the user's home directory
pub const KEY_FILE_NAME: &str = "zmqauth.cfg";

/// Location of the CURVE secret key file (`$HOME/zmqauth.cfg`)
pub fn default_key_path() -> Result<PathBuf, KeystoreError> {
    key_path_in(env::var_os("HOME"))
}

fn key_path_in(home: Option<OsString>) -> Result<PathBuf, KeystoreError> {
    match home {
        Some(home) if !home.is_empty() => Ok(PathBuf::from(home).join(KEY_FILE_NAME)),
        _ => Err(KeystoreError::NoHomeDir),
    }
}

/// Directory holding the settings file
///
/// `$XDG_CONFIG_HOME/zmqhub`, falling back to `$HOME/.config/zmqhub` and
/// finally to the working directory.
pub fn default_config_dir() -> PathBuf {
    config_dir_in(env::var_os("XDG_CONFIG_HOME"), env::var_os("HOME"))
}

fn config_dir_in(xdg: Option<OsString>, home: Option<OsString>) -> PathBuf {
    if let Some(xdg) = xdg.filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("zmqhub");
    }
    match home.filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(".config").join("zmqhub"),
        None => PathBuf::from(".zmqhub"),
    }
}

/// Expand a leading `~` to the home directory
pub fn expand_path(path: &Path) -> PathBuf {
    expand_with_home(path, env::var_os("HOME"))
}

fn expand_with_home(path: &Path, home: Option<OsString>) -> PathBuf {
    let Some(home) = home.filter(|v| !v.is_empty()) else {
        return path.to_path_buf();
    };

    match path.strip_prefix("~") {
        Ok(rest) => PathBuf::from(home).join(rest),
        Err(_) => path.to_path_buf(),
    }
}
