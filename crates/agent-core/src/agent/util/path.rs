use std::borrow::Cow;
use std::env::VarError;
use std::path::{
    Component,
    Path,
    PathBuf,
};

use url::Url;

use super::error::{
    ErrorContext as _,
    UtilError,
};
use super::providers::{
    EnvProvider,
    HomeProvider,
    SystemProvider,
};

/// Performs tilde and environment variable expansion on the provided input.
pub fn expand_path<'a>(input: &'a str, provider: &'_ impl SystemProvider) -> Result<Cow<'a, str>, UtilError> {
    Ok(shellexpand::full_with_context(
        input,
        shellexpand_home(provider),
        shellexpand_context(provider),
    )?)
}

/// Converts the given path to a normalized absolute path.
///
/// Tilde and env vars are expanded, relative paths are resolved against the provider's cwd, and
/// `.`/`..` components are resolved. Paths that exist on disk are canonicalized.
pub fn canonicalize_path_sys<P: SystemProvider>(path: impl AsRef<str>, provider: &P) -> Result<String, UtilError> {
    let expanded = expand_path(path.as_ref(), provider)?;
    let path_buf = if Path::new(expanded.as_ref() as &str).is_absolute() {
        PathBuf::from(expanded.as_ref() as &str)
    } else {
        provider
            .cwd()
            .context("could not get current directory")?
            .join(expanded.as_ref() as &str)
    };

    match path_buf.canonicalize() {
        Ok(normalized) => Ok(normalized.to_string_lossy().to_string()),
        Err(_) => Ok(normalize_path(&path_buf).to_string_lossy().to_string()),
    }
}

/// Builds a `file://` URI for an absolute path.
pub fn file_uri(path: impl AsRef<Path>) -> Result<String, UtilError> {
    let path = path.as_ref();
    Url::from_file_path(path)
        .map(String::from)
        .map_err(|_| UtilError::NotAbsolute(path.to_string_lossy().to_string()))
}

/// Expands `${VAR}` and `$VAR` references in env var values passed to MCP servers.
pub fn expand_env_vars(env: &mut std::collections::HashMap<String, String>, provider: &impl SystemProvider) {
    for value in env.values_mut() {
        let expanded = shellexpand::env_with_context(value.as_str(), shellexpand_context(provider)).map(Cow::into_owned);
        if let Ok(expanded) = expanded {
            *value = expanded;
        }
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => (),
            Component::ParentDir => {
                components.pop();
            },
            _ => components.push(component),
        }
    }
    components.iter().collect()
}

fn shellexpand_home<H: HomeProvider>(provider: &H) -> impl Fn() -> Option<String> {
    || HomeProvider::home(provider).map(|h| h.to_string_lossy().to_string())
}

fn shellexpand_context<E: EnvProvider>(provider: &E) -> impl Fn(&str) -> Result<Option<String>, VarError> {
    |input: &str| Ok(EnvProvider::var(provider, input).ok())
}
