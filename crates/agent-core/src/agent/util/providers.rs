use std::env::VarError;
use std::path::PathBuf;
use std::sync::Arc;

use super::directories;

/// Access to process context (env vars, home dir, current working dir).
///
/// Root paths handed to MCP servers are resolved through this trait so tests can fake the
/// environment.
pub trait SystemProvider: EnvProvider + HomeProvider + CwdProvider + std::fmt::Debug + Send + Sync + 'static {}

pub trait EnvProvider {
    fn var(&self, input: &str) -> Result<String, VarError>;
}

pub trait HomeProvider {
    fn home(&self) -> Option<PathBuf>;
}

pub trait CwdProvider {
    fn cwd(&self) -> Result<PathBuf, std::io::Error>;
}

impl EnvProvider for Arc<dyn SystemProvider> {
    fn var(&self, input: &str) -> Result<String, VarError> {
        (**self).var(input)
    }
}

impl HomeProvider for Arc<dyn SystemProvider> {
    fn home(&self) -> Option<PathBuf> {
        (**self).home()
    }
}

impl CwdProvider for Arc<dyn SystemProvider> {
    fn cwd(&self) -> Result<PathBuf, std::io::Error> {
        (**self).cwd()
    }
}

impl SystemProvider for Arc<dyn SystemProvider> {}

/// Reads from the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealProvider;

impl EnvProvider for RealProvider {
    fn var(&self, input: &str) -> Result<String, VarError> {
        std::env::var(input)
    }
}

impl HomeProvider for RealProvider {
    fn home(&self) -> Option<PathBuf> {
        directories::home_dir().ok()
    }
}

impl CwdProvider for RealProvider {
    fn cwd(&self) -> Result<PathBuf, std::io::Error> {
        std::env::current_dir()
    }
}

impl SystemProvider for RealProvider {}
