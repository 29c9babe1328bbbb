//! Layered config load: defaults, then file, then environment overrides
//! (spec §10.4), adapted from the teacher's `memory-cli::config::loader`
//! env-var-then-default-paths search, trimmed to TOML only.

use super::types::Config;
use contextd_core::{Error, Result};
use std::path::Path;

const ENV_CONFIG_PATH: &str = "CONTEXTD_CONFIG";

const DEFAULT_PATHS: &[&str] = &["contextd.toml", ".contextd.toml"];

/// Load configuration: `path`, or else `$CONTEXTD_CONFIG`, or else the
/// first of [`DEFAULT_PATHS`] that exists, or else [`Config::default`].
/// Environment variables of the form `CONTEXTD_<SECTION>_<FIELD>` are
/// applied last, overriding whatever the file (or defaults) set.
///
/// # Errors
///
/// Returns [`Error::Configuration`] if a resolved file cannot be read or
/// fails to parse as TOML, or if env overrides are malformed.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let mut config = match path.map(Path::to_path_buf).or_else(find_default_path) {
        Some(path) => load_file(&path)?,
        None => Config::default(),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn load_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("reading config file {}: {e}", path.display()))
    })?;
    toml::from_str(&content)
        .map_err(|e| Error::Configuration(format!("parsing config file {}: {e}", path.display())))
}

fn find_default_path() -> Option<std::path::PathBuf> {
    if let Ok(from_env) = std::env::var(ENV_CONFIG_PATH) {
        let path = Path::new(&from_env);
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!(path = %from_env, "CONTEXTD_CONFIG points to a non-existent file, ignoring");
    }
    DEFAULT_PATHS.iter().map(Path::new).find(|p| p.exists()).map(Path::to_path_buf)
}

/// Apply a narrow set of environment overrides for values operators most
/// often need to set without touching a checked-in file (endpoint,
/// credentials, provider selection).
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(provider) = std::env::var("CONTEXTD_VECTORSTORE_PROVIDER") {
        config.vectorstore.provider = match provider.to_lowercase().as_str() {
            "embedded" => super::types::Provider::Embedded,
            "remote" => super::types::Provider::Remote,
            other => {
                return Err(Error::Configuration(format!(
                    "CONTEXTD_VECTORSTORE_PROVIDER: unrecognised provider '{other}'"
                )));
            }
        };
    }
    if let Ok(path) = std::env::var("CONTEXTD_VECTORSTORE_EMBEDDED_PATH") {
        config.vectorstore.embedded.path = path;
    }
    if let Ok(endpoint) = std::env::var("CONTEXTD_VECTORSTORE_REMOTE_ENDPOINT") {
        config.vectorstore.remote.endpoint = Some(endpoint);
    }
    if let Ok(token) = std::env::var("CONTEXTD_VECTORSTORE_REMOTE_AUTH_TOKEN") {
        config.vectorstore.remote.auth_token = Some(token);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_and_no_default_file_falls_back_to_defaults() {
        // SAFETY(single-threaded test): removing a var this test also controls.
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
        let config = load(None).expect("defaults always load");
        assert_eq!(config.vectorstore.provider, super::super::types::Provider::Embedded);
    }

    #[test]
    fn explicit_path_is_parsed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("cfg.toml");
        std::fs::write(
            &path,
            "[vectorstore]\nprovider = \"remote\"\n[vectorstore.remote]\nendpoint = \"https://127.0.0.1:9000\"\n",
        )
        .expect("write config");
        let config = load(Some(&path)).expect("load explicit file");
        assert_eq!(config.vectorstore.provider, super::super::types::Provider::Remote);
        assert_eq!(config.vectorstore.remote.endpoint.as_deref(), Some("https://127.0.0.1:9000"));
    }
}
