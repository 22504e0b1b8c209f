use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Weekday;
use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::locations::Hierarchy;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LoggingConfig {
    pub icds_agg: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const ICDS_AGG_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            icds_agg: Self::ICDS_AGG_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.icds_agg.clone();
        self.icds_agg = self.icds_agg.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.icds_agg.as_str()) {
            eprintln!(
                "Config error: icds_agg log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::ICDS_AGG_LEVEL
            );
            self.icds_agg = Self::ICDS_AGG_LEVEL.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReplicaConfig {
    pub path: String,
    pub weight: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub path: String,
    #[serde(default = "EngineConfig::default_pool_size")]
    pub pool_size: u32,
    #[serde(default)]
    pub read_replicas: Vec<ReplicaConfig>,
}

impl EngineConfig {
    fn default_pool_size() -> u32 {
        16
    }

    pub fn for_path(path: impl Into<String>) -> Self {
        EngineConfig {
            path: path.into(),
            pool_size: Self::default_pool_size(),
            read_replicas: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DatabaseConfig {
    pub busy_timeout_ms: u64,
    pub engines: BTreeMap<String, EngineConfig>,
}

impl DatabaseConfig {
    pub const DEFAULT_ENGINE: &str = "default";
    pub const UCR_ENGINE: &str = "icds-ucr";
    pub const UCR_CITUS_ENGINE: &str = "icds-ucr-citus";
    const DB_FILE: &str = "icds_agg.db";

    fn default() -> Self {
        let mut engines = BTreeMap::new();
        for id in [Self::DEFAULT_ENGINE, Self::UCR_ENGINE, Self::UCR_CITUS_ENGINE] {
            engines.insert(id.to_owned(), EngineConfig::for_path(Self::DB_FILE));
        }
        DatabaseConfig {
            busy_timeout_ms: 30_000,
            engines,
        }
    }

    /// Relative engine and replica paths are anchored at `base`.
    fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut String| {
            if !Path::new(p.as_str()).is_absolute() {
                *p = base.join(p.as_str()).to_string_lossy().into_owned();
            }
        };
        for engine in self.engines.values_mut() {
            anchor(&mut engine.path);
            for replica in engine.read_replicas.iter_mut() {
                anchor(&mut replica.path);
            }
        }
    }

    fn ensure_valid(&mut self) {
        for (id, engine) in self.engines.iter_mut() {
            if engine.pool_size == 0 {
                eprintln!(
                    "Config error: pool_size of 0 for engine '{}' is invalid - using {}",
                    id,
                    EngineConfig::default_pool_size()
                );
                engine.pool_size = EngineConfig::default_pool_size();
            }
            engine.read_replicas.retain(|r| {
                if r.weight == 0 {
                    eprintln!(
                        "Config error: replica '{}' of engine '{}' has weight 0 - ignoring it",
                        r.path, id
                    );
                }
                r.weight > 0
            });
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AggregationConfig {
    pub domain: String,
    pub hierarchy: String,
    pub workers: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub historical_run_weekdays: Vec<String>,
    pub historical_run_month_days: Vec<u32>,
    /// `MM-DD` entries
    pub historical_run_dates: Vec<String>,
}

impl AggregationConfig {
    const HIERARCHIES: [&str; 2] = ["icds", "aaa"];
    const DEFAULT_HIERARCHY: &str = "icds";
    const WEEKDAYS: [&str; 7] = ["mon", "tue", "wed", "thu", "fri", "sat", "sun"];

    fn default() -> Self {
        AggregationConfig {
            domain: "icds-cas".to_owned(),
            hierarchy: Self::DEFAULT_HIERARCHY.to_owned(),
            workers: 15,
            max_attempts: 3,
            retry_backoff_ms: 500,
            historical_run_weekdays: vec!["sat".to_owned()],
            historical_run_month_days: vec![1, 2, 3],
            historical_run_dates: vec!["11-11".to_owned()],
        }
    }

    pub fn hierarchy(&self) -> Hierarchy {
        match self.hierarchy.as_str() {
            "aaa" => Hierarchy::Aaa,
            _ => Hierarchy::Icds,
        }
    }

    pub fn run_weekdays(&self) -> Vec<Weekday> {
        self.historical_run_weekdays
            .iter()
            .filter_map(|d| d.parse::<Weekday>().ok())
            .collect()
    }

    fn ensure_valid(&mut self) {
        let str_original = self.hierarchy.clone();
        self.hierarchy = self.hierarchy.trim().to_ascii_lowercase();
        if !Self::HIERARCHIES.contains(&self.hierarchy.as_str()) {
            eprintln!(
                "Config error: hierarchy of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_HIERARCHY
            );
            self.hierarchy = Self::DEFAULT_HIERARCHY.to_owned();
        }

        if self.workers == 0 {
            eprintln!("Config error: workers must be at least 1 - using 1");
            self.workers = 1;
        }
        if self.max_attempts == 0 {
            eprintln!("Config error: max_attempts must be at least 1 - using 1");
            self.max_attempts = 1;
        }

        let mut weekdays = Vec::new();
        for day in &self.historical_run_weekdays {
            let normalized = day.trim().to_ascii_lowercase();
            if Self::WEEKDAYS.contains(&normalized.as_str()) {
                weekdays.push(normalized);
            } else {
                eprintln!("Config error: weekday '{}' is invalid - ignoring it", day);
            }
        }
        self.historical_run_weekdays = weekdays;

        self.historical_run_month_days.retain(|d| {
            let valid = (1..=31).contains(d);
            if !valid {
                eprintln!("Config error: day of month {} is invalid - ignoring it", d);
            }
            valid
        });

        self.historical_run_dates.retain(|md| {
            let valid = chrono::NaiveDate::parse_from_str(&format!("2000-{}", md.trim()), "%Y-%m-%d")
                .is_ok();
            if !valid {
                eprintln!("Config error: run date '{}' is not MM-DD - ignoring it", md);
            }
            valid
        });
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub aggregation: AggregationConfig,
}

impl Config {
    const ENV_PREFIX: &str = "ICDS_AGG_";

    pub fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            database: DatabaseConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }

    pub fn default_config_path(project_dirs: &ProjectDirs) -> PathBuf {
        project_dirs.data_local_dir().join("config.toml")
    }

    /// Loads the configuration from a TOML file, layered over defaults and under
    /// `ICDS_AGG_` environment variables (`__` separates nested keys).
    /// If the file is missing the defaults are written there first.
    pub fn load_config(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            if let Some(parent) = config_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    eprintln!(
                        "Failed to create configuration directory {}: {}",
                        parent.display(),
                        e
                    );
                }
            }
            match toml::to_string_pretty(&default_config) {
                Ok(toml_string) => {
                    if let Err(e) = fs::write(config_path, toml_string) {
                        eprintln!(
                            "Failed to write default config to {}: {}",
                            config_path.display(),
                            e
                        );
                    }
                }
                Err(_) => eprintln!("Failed to serialize default config."),
            }
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();
        if let Some(base) = config_path.parent() {
            config.database.resolve_paths(base);
        }

        config
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.database.ensure_valid();
        self.aggregation.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    #[serial]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_config(&path);

        assert!(path.exists());
        assert_eq!(config.logging.icds_agg, "info");
        assert_eq!(config.aggregation.workers, 15);
        assert_eq!(config.aggregation.hierarchy(), Hierarchy::Icds);
        let engine = &config.database.engines[DatabaseConfig::UCR_ENGINE];
        assert_eq!(
            Path::new(&engine.path),
            dir.path().join("icds_agg.db").as_path()
        );
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[logging]
icds_agg = " LOUD "

[aggregation]
domain = "icds-cas"
hierarchy = " AAA "
workers = 0
max_attempts = 0
retry_backoff_ms = 10
historical_run_weekdays = ["Sat", "someday"]
historical_run_month_days = [1, 40]
historical_run_dates = ["11-11", "13-45"]
"#,
        )
        .unwrap();

        let config = Config::load_config(&path);

        assert_eq!(config.logging.icds_agg, "info");
        assert_eq!(config.aggregation.hierarchy(), Hierarchy::Aaa);
        assert_eq!(config.aggregation.workers, 1);
        assert_eq!(config.aggregation.max_attempts, 1);
        assert_eq!(config.aggregation.historical_run_weekdays, vec!["sat"]);
        assert_eq!(config.aggregation.run_weekdays(), vec![Weekday::Sat]);
        assert_eq!(config.aggregation.historical_run_month_days, vec![1]);
        assert_eq!(config.aggregation.historical_run_dates, vec!["11-11"]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
[aggregation]
domain = "icds-cas"
hierarchy = "icds"
workers = 4
max_attempts = 2
retry_backoff_ms = 10
historical_run_weekdays = []
historical_run_month_days = []
historical_run_dates = []
"#,
            )?;
            jail.set_env("ICDS_AGG_AGGREGATION__WORKERS", "7");

            let config = Config::load_config(&jail.directory().join("config.toml"));
            assert_eq!(config.aggregation.workers, 7);
            assert_eq!(config.aggregation.max_attempts, 2);
            Ok(())
        });
    }

    #[test]
    fn test_zero_weight_replicas_dropped() {
        let mut db = DatabaseConfig::default();
        db.engines.insert(
            "reads".into(),
            EngineConfig {
                path: "a.db".into(),
                pool_size: 0,
                read_replicas: vec![
                    ReplicaConfig { path: "r1.db".into(), weight: 0 },
                    ReplicaConfig { path: "r2.db".into(), weight: 3 },
                ],
            },
        );
        db.ensure_valid();

        let engine = &db.engines["reads"];
        assert_eq!(engine.pool_size, 16);
        assert_eq!(engine.read_replicas.len(), 1);
        assert_eq!(engine.read_replicas[0].path, "r2.db");
    }
}
