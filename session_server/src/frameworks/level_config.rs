// Loads the level layout from a TOML file, falling back to the built-in level.

use crate::use_cases::{LayoutError, LevelLayout};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LevelConfigError {
    #[error("failed to read level file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse level file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid level layout: {0}")]
    Invalid(#[from] LayoutError),
}

pub fn load_level(path: Option<&Path>) -> Result<LevelLayout, LevelConfigError> {
    let layout = match path {
        None => LevelLayout::default(),
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| LevelConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&text).map_err(|source| LevelConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        }
    };

    layout.validate()?;
    Ok(layout)
}
