use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::OnceLock,
};
use tracing::warn;

pub mod cache;
pub mod color;
pub mod config;
pub mod dedup;
pub mod fetch;
pub mod pipeline;
pub mod tracks;

fn save_dir<'a>() -> &'a Path {
    static DIR: OnceLock<PathBuf> = OnceLock::new();

    DIR.get_or_init(|| {
        let config_dir = if let Ok(config) = env::var("XDG_CONFIG_HOME") {
            Path::new(&config).to_path_buf()
        } else if let Ok(home) = env::var("HOME") {
            Path::new(&home).join(".config")
        } else if let Ok(userprofile) = env::var("USERPROFILE") {
            Path::new(&userprofile).join(".config")
        } else {
            warn!("could not find home directory, using cwd");
            Path::new("./").to_path_buf()
        };

        config_dir.join("coverhue")
    })
}

/// # Errors
///
/// - The config dir could not be created.
/// - See [`fs::write`].
/// - [`serde_yaml`] serialization failed.
pub fn save<T: Serialize>(obj: &T, name: &str) -> anyhow::Result<()> {
    let dir = save_dir();
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    fs::write(dir.join(name), serde_yaml::to_string(obj)?)?;
    Ok(())
}

/// # Errors
///
/// - See [`fs::read_to_string`].
/// - [`serde_yaml`] deserialization failed.
pub fn load<T: for<'a> Deserialize<'a>>(name: &str) -> anyhow::Result<T> {
    let file = fs::read_to_string(save_dir().join(name))?;
    Ok(serde_yaml::from_str(&file)?)
}
