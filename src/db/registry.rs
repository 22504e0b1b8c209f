use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info};
use r2d2_sqlite::SqliteConnectionManager;
use rand::distributions::{Distribution, WeightedIndex};

use crate::config::{DatabaseConfig, EngineConfig};
use crate::db::Database;
use crate::error::AggError;

pub type SqlitePool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConn = r2d2::PooledConnection<SqliteConnectionManager>;

struct Engine {
    writer: SqlitePool,
    replicas: Vec<SqlitePool>,
    weights: Option<WeightedIndex<u32>>,
}

/// Maps logical engine ids to pooled SQLite connections.
///
/// Built once at startup from [`DatabaseConfig`] and handed to everything that needs a
/// connection. Pools are opened on first use and live until [`dispose_all`] or until an
/// override for that engine is installed or released.
///
/// [`dispose_all`]: ConnectionRegistry::dispose_all
pub struct ConnectionRegistry {
    configs: Mutex<BTreeMap<String, EngineConfig>>,
    engines: Mutex<HashMap<String, Arc<Engine>>>,
    busy_timeout: Duration,
}

impl ConnectionRegistry {
    pub fn new(config: &DatabaseConfig) -> Self {
        ConnectionRegistry {
            configs: Mutex::new(config.engines.clone()),
            engines: Mutex::new(HashMap::new()),
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
        }
    }

    /// Write connection for `engine_id`.
    pub fn get_engine(&self, engine_id: &str) -> Result<PooledConn, AggError> {
        let engine = self.engine(engine_id)?;
        Ok(engine.writer.get()?)
    }

    /// Read connection for `engine_id`, drawn from a replica chosen by weight when the
    /// engine has any, otherwise from the writer.
    pub fn get_read_engine(&self, engine_id: &str) -> Result<PooledConn, AggError> {
        let engine = self.engine(engine_id)?;
        match &engine.weights {
            Some(weights) => {
                let index = weights.sample(&mut rand::thread_rng());
                Ok(engine.replicas[index].get()?)
            }
            None => Ok(engine.writer.get()?),
        }
    }

    /// Fails with a configuration error unless every id resolves to an engine.
    pub fn check_engines(&self, engine_ids: &[&str]) -> Result<(), AggError> {
        let configs = self.lock_configs()?;
        for id in engine_ids {
            if !configs.contains_key(*id) {
                return Err(AggError::ConfigurationError(format!(
                    "no database configured for engine '{}'",
                    id
                )));
            }
        }
        Ok(())
    }

    /// Points `engine_id` at `path` until the returned guard is dropped.
    pub fn override_engine(&self, engine_id: &str, path: &str) -> Result<EngineOverride<'_>, AggError> {
        let previous = {
            let mut configs = self.lock_configs()?;
            let replacement = match configs.get(engine_id) {
                Some(existing) => EngineConfig {
                    path: path.to_owned(),
                    pool_size: existing.pool_size,
                    read_replicas: Vec::new(),
                },
                None => EngineConfig::for_path(path),
            };
            configs.insert(engine_id.to_owned(), replacement)
        };
        self.evict(engine_id)?;
        debug!("Engine '{}' overridden to {}", engine_id, path);

        Ok(EngineOverride {
            registry: self,
            engine_id: engine_id.to_owned(),
            previous,
        })
    }

    /// Closes every cached pool. Connections already handed out stay usable until returned.
    pub fn dispose_all(&self) -> Result<(), AggError> {
        let mut engines = self.lock_engines()?;
        let count = engines.len();
        engines.clear();
        info!("Disposed {} database engine(s)", count);
        Ok(())
    }

    fn engine(&self, engine_id: &str) -> Result<Arc<Engine>, AggError> {
        let mut engines = self.lock_engines()?;
        if let Some(engine) = engines.get(engine_id) {
            return Ok(Arc::clone(engine));
        }

        let config = self
            .lock_configs()?
            .get(engine_id)
            .cloned()
            .ok_or_else(|| {
                AggError::ConfigurationError(format!(
                    "no database configured for engine '{}'",
                    engine_id
                ))
            })?;

        let engine = Arc::new(self.open_engine(engine_id, &config)?);
        engines.insert(engine_id.to_owned(), Arc::clone(&engine));
        Ok(engine)
    }

    fn open_engine(&self, engine_id: &str, config: &EngineConfig) -> Result<Engine, AggError> {
        info!(
            "Opening engine '{}' at {} ({} read replica(s))",
            engine_id,
            config.path,
            config.read_replicas.len()
        );
        let writer = self.open_pool(engine_id, &config.path, config.pool_size)?;
        {
            let conn = writer.get()?;
            Database::ensure_schema(&conn)?;
        }

        let mut replicas = Vec::with_capacity(config.read_replicas.len());
        for replica in &config.read_replicas {
            replicas.push(self.open_pool(engine_id, &replica.path, config.pool_size)?);
        }
        let weights = if replicas.is_empty() {
            None
        } else {
            let weights = WeightedIndex::new(config.read_replicas.iter().map(|r| r.weight))
                .map_err(|e| {
                    AggError::ConfigurationError(format!(
                        "invalid replica weights for engine '{}': {}",
                        engine_id, e
                    ))
                })?;
            Some(weights)
        };

        Ok(Engine {
            writer,
            replicas,
            weights,
        })
    }

    fn open_pool(&self, engine_id: &str, path: &str, size: u32) -> Result<SqlitePool, AggError> {
        let busy_timeout = self.busy_timeout;
        let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        });
        r2d2::Pool::builder()
            .max_size(size)
            .connection_timeout(busy_timeout)
            .build(manager)
            .map_err(|e| {
                AggError::ConfigurationError(format!(
                    "cannot open database '{}' for engine '{}': {}",
                    path, engine_id, e
                ))
            })
    }

    fn evict(&self, engine_id: &str) -> Result<(), AggError> {
        self.lock_engines()?.remove(engine_id);
        Ok(())
    }

    fn lock_configs(&self) -> Result<MutexGuard<'_, BTreeMap<String, EngineConfig>>, AggError> {
        self.configs
            .lock()
            .map_err(|_| AggError::Error("engine config lock poisoned".into()))
    }

    fn lock_engines(&self) -> Result<MutexGuard<'_, HashMap<String, Arc<Engine>>>, AggError> {
        self.engines
            .lock()
            .map_err(|_| AggError::Error("engine cache lock poisoned".into()))
    }
}

/// Restores an engine's previous mapping when dropped.
pub struct EngineOverride<'a> {
    registry: &'a ConnectionRegistry,
    engine_id: String,
    previous: Option<EngineConfig>,
}

impl Drop for EngineOverride<'_> {
    fn drop(&mut self) {
        if let Ok(mut configs) = self.registry.configs.lock() {
            match self.previous.take() {
                Some(previous) => {
                    configs.insert(self.engine_id.clone(), previous);
                }
                None => {
                    configs.remove(&self.engine_id);
                }
            }
        }
        if let Ok(mut engines) = self.registry.engines.lock() {
            engines.remove(&self.engine_id);
        }
    }
}
