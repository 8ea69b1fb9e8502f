//! Configuration loading: file, then `OBJECTIO__*` environment, then flags.

use anyhow::{Context, Result};
use objectio_common::Config;
use std::path::Path;

/// Layer the optional TOML file under environment overrides such as
/// `OBJECTIO__DOUBLE_BUFFER__FLUSH_BATCH_SIZE=64`.
pub fn load(path: &Path) -> Result<Config> {
    let settings = ::config::Config::builder()
        .add_source(::config::File::from(path).required(false))
        .add_source(
            ::config::Environment::with_prefix("OBJECTIO")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("reading configuration from {}", path.display()))?;
    settings
        .try_deserialize()
        .context("invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectio_common::config::ChoosePolicyKind;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.double_buffer.flush_batch_size, 1000);
        assert_eq!(config.placement.choose_policy, ChoosePolicyKind::Random);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[double_buffer]\nflush_batch_size = 8\n\n[placement]\nchoose_policy = \"round_robin\""
        )
        .unwrap();

        let config = load(&path).unwrap();
        assert_eq!(config.double_buffer.flush_batch_size, 8);
        assert_eq!(config.double_buffer.max_pending, 10_000);
        assert_eq!(config.placement.choose_policy, ChoosePolicyKind::RoundRobin);
    }
}
