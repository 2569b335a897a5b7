//! Postgres-backed implementations of the runtime's store traits.

mod postgres;

use std::sync::Arc;

use sqlx::PgPool;

use agora_runtime::Stores;

pub use postgres::{
    PostgresEventStore, PostgresInstallationStore, PostgresPermissionStore, PostgresSettingStore,
};

/// Bundle all four Postgres stores over one pool.
pub fn postgres_stores(pool: PgPool) -> Stores {
    Stores {
        installs: Arc::new(PostgresInstallationStore::new(pool.clone())),
        settings: Arc::new(PostgresSettingStore::new(pool.clone())),
        events: Arc::new(PostgresEventStore::new(pool.clone())),
        permissions: Arc::new(PostgresPermissionStore::new(pool)),
    }
}
