//! Application configuration.
//!
//! TOML file with a `[global]` table and one `[[symbols]]` table per
//! instrument. `AppConfig::load` layers `PERP_MM__*` environment overrides on
//! top of the file, e.g. `PERP_MM__GLOBAL__DRY_RUN=true`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use perp_core::SymbolConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "PERP_MM";

/// Settings shared by every symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Cap on total notional across all symbols.
    #[serde(default = "default_total_notional_max")]
    pub total_notional_max: Decimal,
    /// Quote cycle period (ms), 100..=5000.
    #[serde(default = "default_quote_interval_ms")]
    pub quote_interval_ms: u64,
    /// Log order diffs without submitting them.
    #[serde(default)]
    pub dry_run: bool,
    /// JSON state snapshot file. Persistence is off when unset.
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
    /// Mid older than this skips the cycle.
    #[serde(default = "default_stale_price_secs")]
    pub stale_price_secs: u64,
}

fn default_total_notional_max() -> Decimal {
    Decimal::from(100_000)
}

fn default_quote_interval_ms() -> u64 {
    500
}

fn default_snapshot_interval_secs() -> u64 {
    60
}

fn default_stale_price_secs() -> u64 {
    5
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            total_notional_max: default_total_notional_max(),
            quote_interval_ms: default_quote_interval_ms(),
            dry_run: false,
            snapshot_path: None,
            snapshot_interval_secs: default_snapshot_interval_secs(),
            stale_price_secs: default_stale_price_secs(),
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub symbols: Vec<SymbolConfig>,
}

impl AppConfig {
    /// Load `path` and apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| AppError::Config(format!("Failed to load {}: {e}", path.display())))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Load from a specific file, no environment layering.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        toml::from_str(content).map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    /// Reject configurations the engine cannot run safely.
    pub fn validate(&self) -> AppResult<()> {
        let g = &self.global;
        if g.total_notional_max <= Decimal::ZERO {
            return Err(AppError::Config(format!(
                "total_notional_max must be > 0, got {}",
                g.total_notional_max
            )));
        }
        if !(100..=5000).contains(&g.quote_interval_ms) {
            return Err(AppError::Config(format!(
                "quote_interval_ms must be in 100..=5000, got {}",
                g.quote_interval_ms
            )));
        }
        if g.stale_price_secs == 0 {
            return Err(AppError::Config("stale_price_secs must be > 0".to_string()));
        }
        if g.snapshot_path.is_some() && g.snapshot_interval_secs == 0 {
            return Err(AppError::Config("snapshot_interval_secs must be > 0".to_string()));
        }
        if self.symbols.is_empty() {
            return Err(AppError::Config("at least one [[symbols]] entry is required".to_string()));
        }

        let mut seen = HashSet::new();
        for symbol in &self.symbols {
            if !seen.insert(symbol.symbol.as_str()) {
                return Err(AppError::Config(format!("duplicate symbol {}", symbol.symbol)));
            }
            symbol.validate()?;
        }
        Ok(())
    }

    pub fn quote_interval(&self) -> Duration {
        Duration::from_millis(self.global.quote_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.global.snapshot_interval_secs)
    }

    pub fn symbol_names(&self) -> Vec<String> {
        self.symbols.iter().map(|s| s.symbol.clone()).collect()
    }

    pub fn symbol(&self, symbol: &str) -> Option<&SymbolConfig> {
        self.symbols.iter().find(|s| s.symbol == symbol)
    }

    /// Whether any symbol needs the public trade stream.
    pub fn any_vpin_enabled(&self) -> bool {
        self.symbols.iter().any(|s| s.vpin.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const SAMPLE: &str = r#"
[global]
total_notional_max = 50000
quote_interval_ms = 200
dry_run = true

[[symbols]]
symbol = "BTCUSDC"
net_max = "0.5"
min_spread = "0.0005"
tick_size = "0.1"
min_qty = "0.001"
base_layer_size = "0.005"

[symbols.vpin]
enabled = true
bucket_size = 20000.0

[[symbols]]
symbol = "ETHUSDC"
tick_size = "0.01"

[symbols.unified_grid]
total_layers = 18
start_offset = "1.2"
first_spacing = "1.2"
max_spacing = "25"
"#;

    #[test]
    fn test_parse_sample() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.global.total_notional_max, dec!(50000));
        assert_eq!(config.quote_interval(), Duration::from_millis(200));
        assert!(config.global.dry_run);
        assert_eq!(config.global.stale_price_secs, 5);
        assert_eq!(config.symbol_names(), vec!["BTCUSDC", "ETHUSDC"]);

        let btc = config.symbol("BTCUSDC").unwrap();
        assert_eq!(btc.net_max, dec!(0.5));
        assert!(btc.vpin.enabled);
        assert_eq!(btc.vpin.num_buckets, 50);
        assert!(config.any_vpin_enabled());

        let eth = config.symbol("ETHUSDC").unwrap();
        let grid = eth.unified_grid.as_ref().unwrap();
        assert_eq!(grid.spacing_multiplier, dec!(1.15));
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_global_rules() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.global.quote_interval_ms = 50;
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.global.total_notional_max = Decimal::ZERO;
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.symbols.clear();
        assert!(config.validate().is_err());

        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let dup = config.symbols[0].clone();
        config.symbols.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_symbol_rules() {
        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.symbols[0].min_spread = dec!(0.02);
        assert!(matches!(config.validate(), Err(AppError::Core(_))));

        let mut config = AppConfig::from_toml_str(SAMPLE).unwrap();
        config.symbols[0].pinning.enabled = true;
        config.symbols[0].grinding.enabled = true;
        config.symbols[0].pinning.threshold = dec!(0.6);
        config.symbols[0].grinding.threshold = dec!(0.7);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.symbols.len(), 2);
        assert_eq!(config.global.quote_interval_ms, 200);

        let same = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(same.global.total_notional_max, config.global.total_notional_max);
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            AppConfig::from_file("/nonexistent/perp.toml"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_serialization_round_trip() {
        let config = AppConfig::from_toml_str(SAMPLE).unwrap();
        let text = toml::to_string(&config).unwrap();
        assert!(text.contains("quote_interval_ms"));
        let back = AppConfig::from_toml_str(&text).unwrap();
        assert_eq!(back.symbols.len(), 2);
    }
}
