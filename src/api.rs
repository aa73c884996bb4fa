//! Entry point wiring the services to one store and one configuration.

use std::path::Path;
use std::sync::Arc;

use crate::access::{self, AccessControlService, Session};
use crate::config::{ConfigError, CoreConfig};
use crate::location::{GeoIndex, ProximityService};
use crate::retry::RetryPolicy;
use crate::store::{DocumentStore, MemoryStore, SqliteStore, StoreError};

/// Core interface for the access-control and proximity engine.
///
/// Holds one [`AccessControlService`] and one [`ProximityService`] sharing
/// the same document store.
#[derive(Debug)]
pub struct ConvoyCore {
    access: AccessControlService,
    proximity: ProximityService,
    config: CoreConfig,
}

impl ConvoyCore {
    /// Creates the services on top of `store`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use convoy_core::store::MemoryStore;
    /// use convoy_core::{ConvoyCore, CoreConfig};
    ///
    /// let core = ConvoyCore::new(Arc::new(MemoryStore::new()), CoreConfig::default()).unwrap();
    /// assert_eq!(core.config().proximity.page_size, 50);
    /// ```
    pub fn new(store: Arc<dyn DocumentStore>, config: CoreConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let index = GeoIndex::new(config.geo.key_precision)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Self {
            access: AccessControlService::new(store.clone(), RetryPolicy::from(&config.retry)),
            proximity: ProximityService::new(store, index, config.proximity.clone()),
            config,
        })
    }

    /// Creates the services on an empty in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the configuration is out of range.
    pub fn in_memory(config: CoreConfig) -> Result<Self, ConfigError> {
        Self::new(Arc::new(MemoryStore::new()), config)
    }

    /// Creates the services on a `SQLite` database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the
    /// configuration is out of range.
    pub fn open_sqlite(path: &Path, config: CoreConfig) -> Result<Self, OpenError> {
        let store = SqliteStore::new(path)?;
        Ok(Self::new(Arc::new(store), config)?)
    }

    /// Starts a session for `uid` with its caches loaded from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the uid is invalid or the store fails.
    pub async fn start_session(&self, uid: &str) -> access::Result<Session> {
        let session = Session::new(uid);
        self.access.load_session(&session).await?;
        tracing::info!(uid = %uid, "session started");
        Ok(session)
    }

    /// Relationship transitions and permission checks.
    #[must_use]
    pub const fn access(&self) -> &AccessControlService {
        &self.access
    }

    /// Location updates and proximity search.
    #[must_use]
    pub const fn proximity(&self) -> &ProximityService {
        &self.proximity
    }

    /// The configuration the services were built with.
    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }
}

/// Error returned by [`ConvoyCore::open_sqlite`].
#[derive(thiserror::Error, Debug)]
pub enum OpenError {
    /// The database could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
