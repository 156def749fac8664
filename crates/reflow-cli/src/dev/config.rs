//! Development session configuration.
//!
//! Resolves `reflow.toml` (discovered or given with `--config`), applies CLI
//! overrides, validates against the filesystem and picks the server port.

use reflow_config::{ConfigDiscovery, ConfigError, ReflowConfig, validate_fs};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::cli::DevArgs;
use crate::error::Result;

/// Ports tried after the requested one.
const PORT_SEARCH_SPAN: u16 = 10;

/// Configuration of one development session.
#[derive(Debug, Clone)]
pub struct DevConfig {
    /// Loaded and validated configuration
    pub config: ReflowConfig,

    /// Absolute path of the configuration file
    pub config_path: PathBuf,

    /// Cleaned absolute watch root
    pub root: PathBuf,

    /// Server socket address (IP + port)
    pub addr: SocketAddr,

    /// Open browser automatically on start
    pub open: bool,

    port_override: Option<u16>,
}

impl DevConfig {
    /// Create DevConfig from CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns error if no configuration is found, it does not validate, or no
    /// port in range is free
    pub fn from_args(args: &DevArgs) -> Result<Self> {
        let config_path = match &args.config {
            Some(path) => path.clone(),
            None => {
                let cwd = std::env::current_dir()?;
                ConfigDiscovery::new(&cwd)
                    .find()
                    .ok_or(ConfigError::NotFound { looked_in: cwd })?
            }
        };

        let (config, root) = Self::load(&config_path, args.port)?;
        let addr = find_available_port(config.dev.port)?;

        Ok(Self {
            config_path: config.source.clone().unwrap_or(config_path),
            config,
            root,
            addr,
            open: args.open,
            port_override: args.port,
        })
    }

    /// Re-read the configuration file. The server address is kept, since the
    /// server outlives a full restart.
    pub fn reload(&self) -> Result<Self> {
        let (config, root) = Self::load(&self.config_path, self.port_override)?;
        Ok(Self {
            config,
            root,
            config_path: self.config_path.clone(),
            addr: self.addr,
            open: self.open,
            port_override: self.port_override,
        })
    }

    /// URL of the SSE server.
    pub fn server_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn load(path: &Path, port_override: Option<u16>) -> Result<(ReflowConfig, PathBuf)> {
        let mut config = ConfigDiscovery::load_from(path)?;
        if let Some(port) = port_override {
            config.dev.port = port;
        }
        let root = path_clean::clean(config.watch_root());
        validate_fs(&config, &root)?;
        Ok((config, root))
    }
}

/// Find an available port starting from the requested port.
///
/// Tries the requested port first, then the next ten.
fn find_available_port(requested_port: u16) -> Result<SocketAddr> {
    use std::net::TcpListener;

    if requested_port < 1024 {
        crate::ui::warning(&format!(
            "Port {} is in privileged range, may require root access",
            requested_port
        ));
    }

    for offset in 0..=PORT_SEARCH_SPAN {
        let port = requested_port.saturating_add(offset);
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if TcpListener::bind(addr).is_ok() {
            if offset > 0 {
                crate::ui::warning(&format!(
                    "Port {} is busy, using port {} instead",
                    requested_port, port
                ));
            }
            return Ok(addr);
        }
    }

    Err(ConfigError::InvalidValue {
        field: "dev.port".to_string(),
        hint: Some(format!(
            "Ports {}-{} are all in use. Try a different port with --port.",
            requested_port,
            requested_port.saturating_add(PORT_SEARCH_SPAN)
        )),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project(toml: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("reflow.toml"), toml).unwrap();
        dir
    }

    fn args(config: PathBuf, port: Option<u16>) -> DevArgs {
        DevArgs {
            config: Some(config),
            port,
            open: false,
        }
    }

    #[test]
    fn test_from_args_resolves_root_and_port_override() {
        let dir = project("[app]\nbuild_command = \"true\"\nlaunch_command = \"true\"\n");
        let dev = DevConfig::from_args(&args(dir.path().join("reflow.toml"), Some(0))).unwrap();

        assert_eq!(dev.root, path_clean::clean(dir.path()));
        assert_eq!(dev.config.dev.port, 0);
        assert!(dev.config_path.is_absolute());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = project("[app]\nbuild_command = \"\"\nlaunch_command = \"true\"\n");
        let err = DevConfig::from_args(&args(dir.path().join("reflow.toml"), Some(0))).unwrap_err();
        assert!(err.to_string().contains("build_command"));
    }

    #[test]
    fn test_reload_picks_up_changes() {
        let dir = project("[app]\nbuild_command = \"true\"\nlaunch_command = \"true\"\n");
        let dev = DevConfig::from_args(&args(dir.path().join("reflow.toml"), Some(0))).unwrap();
        assert!(dev.config.watch.is_empty());

        fs::write(
            dir.path().join("reflow.toml"),
            "[app]\nbuild_command = \"true\"\nlaunch_command = \"true\"\n\n[[watch]]\npattern = \"*.sql\"\nrestart_process_only = true\n",
        )
        .unwrap();
        let reloaded = dev.reload().unwrap();
        assert_eq!(reloaded.config.watch.len(), 1);
        assert_eq!(reloaded.addr, dev.addr);
    }

    #[test]
    fn test_busy_port_falls_through() {
        let busy = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = busy.local_addr().unwrap().port();
        let addr = find_available_port(port).unwrap();
        assert_ne!(addr.port(), port);
    }
}
