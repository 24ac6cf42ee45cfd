//! Settings assembly: preset, then config file, then command-line overrides.

use std::{fs, path::Path};

use eyre::{Result, WrapErr, eyre};
use kestrel_net_p2p::Settings;

use crate::cli::NetworkArgs;

/// Table of the config file holding network settings.
const NETWORK_TABLE: &str = "network";

pub(crate) fn load_settings(args: &NetworkArgs) -> Result<Settings> {
    let preset = if args.testnet {
        Settings::testnet()
    } else {
        Settings::mainnet()
    };

    let mut settings = match &args.config {
        Some(path) => overlay_file(preset, path)?,
        None => preset,
    };

    if let Some(threads) = args.threads {
        settings.threads = threads;
    }
    if let Some(port) = args.port {
        settings.inbound_port = port;
    }
    if let Some(hosts_file) = &args.hosts_file {
        settings.hosts_file = hosts_file.clone();
    }
    Ok(settings)
}

fn overlay_file(preset: Settings, path: &Path) -> Result<Settings> {
    let contents = fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
    overlay(preset, &contents).wrap_err_with(|| format!("invalid config file {}", path.display()))
}

/// Applies the keys of the `[network]` table in `contents` over `preset`.
fn overlay(preset: Settings, contents: &str) -> Result<Settings> {
    let file: toml::Table = toml::from_str(contents)?;
    let Some(network) = file.get(NETWORK_TABLE) else {
        return Ok(preset);
    };
    let network = network
        .as_table()
        .ok_or_else(|| eyre!("`{NETWORK_TABLE}` must be a table"))?;

    let mut merged = match toml::Value::try_from(&preset)? {
        toml::Value::Table(table) => table,
        _ => return Err(eyre!("settings did not serialize to a table")),
    };
    for (key, value) in network {
        merged.insert(key.clone(), value.clone());
    }

    Ok(toml::Value::Table(merged).try_into()?)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args() -> NetworkArgs {
        NetworkArgs {
            config: None,
            testnet: false,
            threads: None,
            port: None,
            hosts_file: None,
            peers: Vec::new(),
        }
    }

    #[test]
    fn test_preset_selection() {
        assert_eq!(load_settings(&args()).unwrap(), Settings::mainnet());

        let testnet = NetworkArgs {
            testnet: true,
            ..args()
        };
        assert_eq!(load_settings(&testnet).unwrap(), Settings::testnet());
    }

    #[test]
    fn test_network_table_overlays_testnet() {
        let settings = overlay(
            Settings::testnet(),
            r#"
            [network]
            threads = 8
            seeds = []
            "#,
        )
        .unwrap();

        assert_eq!(settings.threads, 8);
        assert!(settings.seeds.is_empty());
        assert_eq!(settings.inbound_port, Settings::testnet().inbound_port);
        assert_eq!(settings.identifier, Settings::testnet().identifier);
    }

    #[test]
    fn test_missing_network_table_keeps_preset() {
        let settings = overlay(Settings::mainnet(), "[other]\nkey = 1\n").unwrap();
        assert_eq!(settings, Settings::mainnet());
    }

    #[test]
    fn test_unknown_value_type_rejected() {
        assert!(overlay(Settings::mainnet(), "[network]\nthreads = \"many\"\n").is_err());
        assert!(overlay(Settings::mainnet(), "network = 3\n").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kestrel.toml");
        fs::write(&path, "[network]\nthreads = 8\ninbound_port = 9000\n").unwrap();

        let settings = load_settings(&NetworkArgs {
            config: Some(path.clone()),
            port: Some(0),
            hosts_file: Some(PathBuf::from("/tmp/hosts.json")),
            ..args()
        })
        .unwrap();

        assert_eq!(settings.threads, 8);
        assert_eq!(settings.inbound_port, 0);
        assert_eq!(settings.hosts_file, PathBuf::from("/tmp/hosts.json"));
    }
}
