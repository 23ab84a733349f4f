//! Environment-driven configuration
//!
//! Everything has a sane local default so a bare `recorder` run records to
//! `./data` with no downstream fanout configured.

use anyhow::{anyhow, bail, Result};
use common::Exchange;
use publish::{ExchSimConfig, SymbolMap};
use std::path::PathBuf;

const DEFAULT_SYMBOL_MAP: &str = "BITFLYER:FX_BTC_JPY=BTCJPY,GMO:BTC=BTCJPY";

/// Full runtime configuration of the recorder
#[derive(Clone, Debug)]
pub struct RecorderConfig {
    /// Directory for the hourly CSV files
    pub data_dir: PathBuf,
    /// Bitflyer stream endpoint
    pub bitflyer_ws_url: String,
    /// Bitflyer symbols, native casing
    pub bitflyer_symbols: Vec<String>,
    /// GMO stream endpoint
    pub gmo_ws_url: String,
    /// GMO symbols, native casing
    pub gmo_symbols: Vec<String>,
    /// Redis leg, enabled when `REDIS_URL` is set
    pub redis_url: Option<String>,
    /// Simulator leg, enabled when `EXCHSIM_URL` is set
    pub exchsim: Option<ExchSimConfig>,
    /// Downstream symbol mapping
    pub symbol_map: SymbolMap,
}

impl RecorderConfig {
    /// Read the whole configuration from the process environment
    pub fn from_env() -> Result<Self> {
        let symbol_map =
            parse_symbol_map(&env_or("SYMBOL_MAP", DEFAULT_SYMBOL_MAP))?;
        let exchsim = std::env::var("EXCHSIM_URL").ok().map(|base_url| {
            let defaults = ExchSimConfig::default();
            ExchSimConfig {
                base_url,
                username: env_or("EXCHSIM_USERNAME", &defaults.username),
                password: env_or("EXCHSIM_PASSWORD", &defaults.password),
            }
        });
        Ok(Self {
            data_dir: PathBuf::from(env_or("RECORDER_DATA_DIR", "data")),
            bitflyer_ws_url: env_or("BITFLYER_WS_URL", feeds::bitflyer::DEFAULT_WS_URL),
            bitflyer_symbols: parse_symbols(&env_or(
                "BITFLYER_SYMBOLS",
                &feeds::bitflyer::DEFAULT_SYMBOLS.join(","),
            )),
            gmo_ws_url: env_or("GMO_WS_URL", feeds::gmo::DEFAULT_WS_URL),
            gmo_symbols: parse_symbols(&env_or(
                "GMO_SYMBOLS",
                &feeds::gmo::DEFAULT_SYMBOLS.join(","),
            )),
            redis_url: std::env::var("REDIS_URL").ok(),
            exchsim,
            symbol_map,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `EXCHANGE:NATIVE=DOWNSTREAM` entries separated by commas
pub fn parse_symbol_map(raw: &str) -> Result<SymbolMap> {
    let mut map = SymbolMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (lhs, downstream) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("symbol map entry missing '=': {entry}"))?;
        let (exchange, native) = lhs
            .split_once(':')
            .ok_or_else(|| anyhow!("symbol map entry missing ':': {entry}"))?;
        let exchange = match exchange.trim().to_ascii_uppercase().as_str() {
            "BITFLYER" => Exchange::Bitflyer,
            "GMO" => Exchange::Gmo,
            other => bail!("unknown exchange in symbol map: {other}"),
        };
        map.insert(exchange, native.trim(), downstream.trim());
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_default_symbol_map() {
        let map = parse_symbol_map(DEFAULT_SYMBOL_MAP).unwrap();
        assert_eq!(map.resolve(Exchange::Bitflyer, "FX_BTC_JPY"), Some("BTCJPY"));
        assert_eq!(map.resolve(Exchange::Gmo, "BTC"), Some("BTCJPY"));
        assert_eq!(map.resolve(Exchange::Bitflyer, "BTC_JPY"), None);
    }

    #[test]
    fn rejects_malformed_symbol_map_entries() {
        assert!(parse_symbol_map("BITFLYER:FX_BTC_JPY").is_err());
        assert!(parse_symbol_map("FX_BTC_JPY=BTCJPY").is_err());
        assert!(parse_symbol_map("BINANCE:BTCUSDT=BTCUSD").is_err());
    }

    #[test]
    fn empty_map_resolves_nothing() {
        let map = parse_symbol_map("").unwrap();
        assert_eq!(map.resolve(Exchange::Gmo, "BTC"), None);
    }

    #[test]
    fn symbol_lists_are_trimmed() {
        assert_eq!(
            parse_symbols("BTC_JPY, FX_BTC_JPY ,"),
            vec!["BTC_JPY".to_string(), "FX_BTC_JPY".to_string()]
        );
    }
}
