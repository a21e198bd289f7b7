//! MySqlStore - primary store backed by a sqlx MySQL pool
//!
//! Rows are keyed by `reading_id`. A retry after an ambiguous failure hits
//! the primary key and is reported as a duplicate, never a second row.
//! Plain `INSERT` keeps data errors as errors; values that would not fit a
//! column are rejected before the query is sent.

use std::str::FromStr;
use std::time::Duration;

use contracts::{
    redact_url, ContractError, InsertOutcome, ReadingStore, SensorReading, StoreConfig,
    MAX_DEVICE_ID_LEN, MAX_SENSOR_TYPE_LEN,
};
use sqlx::mysql::{MySqlConnectOptions, MySqlDatabaseError, MySqlPool, MySqlPoolOptions};
use tracing::{debug, info, instrument, warn};

/// MySQL error numbers worth retrying: too many connections, lock wait
/// timeout, deadlock, server gone away, lost connection.
const TRANSIENT_MYSQL_ERRORS: &[u16] = &[1040, 1205, 1213, 2006, 2013];

/// ER_DUP_ENTRY
const DUPLICATE_KEY_ERROR: u16 = 1062;

pub struct MySqlStore {
    name: String,
    pool: MySqlPool,
    table: String,
    create_table: bool,
    insert_sql: String,
}

impl MySqlStore {
    /// Build the pool. Connections are opened lazily, so this succeeds
    /// while the database is down. Must be called inside a tokio runtime.
    pub fn from_config(name: impl Into<String>, config: &StoreConfig) -> Result<Self, ContractError> {
        let options = MySqlConnectOptions::from_str(&config.url).map_err(|e| {
            ContractError::config_validation(
                "store.url",
                format!("{}: {e}", redact_url(&config.url)),
            )
        })?;

        let pool = MySqlPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
            .connect_lazy_with(options);

        Ok(Self {
            name: name.into(),
            pool,
            table: config.table.clone(),
            create_table: config.create_table,
            insert_sql: insert_statement(&config.table),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

/// `table` must already be validated as a plain identifier.
pub fn insert_statement(table: &str) -> String {
    format!(
        "INSERT INTO `{table}` (reading_id, device_id, sensor_type, value, received_at) \
         VALUES (?, ?, ?, ?, ?)"
    )
}

pub fn create_table_statement(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (\
         reading_id CHAR(36) NOT NULL PRIMARY KEY, \
         device_id VARCHAR({MAX_DEVICE_ID_LEN}) NOT NULL, \
         sensor_type VARCHAR({MAX_SENSOR_TYPE_LEN}) NOT NULL, \
         value DOUBLE NOT NULL, \
         received_at DATETIME(6) NOT NULL, \
         KEY idx_device_received (device_id, received_at))"
    )
}

/// Reject values that do not fit their column instead of letting the
/// server truncate them.
pub fn check_column_lengths(store: &str, reading: &SensorReading) -> Result<(), ContractError> {
    let columns = [
        ("device_id", reading.device_id.len(), MAX_DEVICE_ID_LEN),
        ("sensor_type", reading.sensor_type.len(), MAX_SENSOR_TYPE_LEN),
    ];
    for (column, len, max) in columns {
        if len > max {
            return Err(ContractError::store_permanent(
                store,
                format!("{column} is {len} bytes, column holds {max}"),
            ));
        }
    }
    Ok(())
}

fn is_duplicate_key(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db
            .try_downcast_ref::<MySqlDatabaseError>()
            .is_some_and(|e| e.number() == DUPLICATE_KEY_ERROR),
        _ => false,
    }
}

/// Map a sqlx error onto the store error taxonomy.
///
/// Connection-level failures are transient. Errors reported by the server
/// are permanent unless their number is in `TRANSIENT_MYSQL_ERRORS`.
pub fn classify_error(store: &str, err: sqlx::Error) -> ContractError {
    let message = err.to_string();
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => ContractError::store_transient(store, message),
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(MySqlDatabaseError::number);
            match number {
                Some(n) if TRANSIENT_MYSQL_ERRORS.contains(&n) => {
                    ContractError::store_transient(store, message)
                }
                _ => ContractError::store_permanent(store, message),
            }
        }
        _ => ContractError::store_permanent(store, message),
    }
}

impl ReadingStore for MySqlStore {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(name = "mysql_store_connect", skip(self), fields(store = %self.name))]
    async fn connect(&self) -> Result<(), ContractError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| ContractError::StoreConnection {
                store: self.name.clone(),
                message: e.to_string(),
            })?;

        if self.create_table {
            sqlx::query(&create_table_statement(&self.table))
                .execute(&self.pool)
                .await
                .map_err(|e| classify_error(&self.name, e))?;
            info!(table = %self.table, "ensured readings table exists");
        }

        info!(table = %self.table, "mysql store connected");
        Ok(())
    }

    async fn insert(&self, reading: &SensorReading) -> Result<InsertOutcome, ContractError> {
        check_column_lengths(&self.name, reading)?;

        let result = sqlx::query(&self.insert_sql)
            .bind(reading.reading_id.to_string())
            .bind(reading.device_id.as_str())
            .bind(reading.sensor_type.as_str())
            .bind(reading.value)
            .bind(reading.received_at)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 1 => Ok(InsertOutcome::Inserted),
            Ok(done) => Err(ContractError::store_permanent(
                &self.name,
                format!("insert affected {} rows", done.rows_affected()),
            )),
            Err(e) if is_duplicate_key(&e) => {
                debug!(reading_id = %reading.reading_id, "reading already stored");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(classify_error(&self.name, e)),
        }
    }

    async fn is_healthy(&self) -> bool {
        if self.pool.is_closed() {
            return false;
        }
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                warn!(store = %self.name, error = %e, "health check failed");
                false
            }
        }
    }

    #[instrument(name = "mysql_store_close", skip(self), fields(store = %self.name))]
    async fn close(&self) -> Result<(), ContractError> {
        self.pool.close().await;
        info!("mysql pool closed");
        Ok(())
    }
}
