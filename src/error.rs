// Failure taxonomy for the ETL. Only connectivity failures are retried by the runner.

use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which side of the pipeline a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Readings,
    Aggregates,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Readings => f.write_str("reading store"),
            StoreKind::Aggregates => f.write_str("aggregate store"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Missing or invalid connection descriptor / settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Store unreachable, timed out, or dropped the connection mid-pass.
    #[error("{store} unreachable: {source}")]
    Connectivity {
        store: StoreKind,
        #[source]
        source: BoxError,
    },

    /// Malformed reading or a query/decode failure that retrying won't fix.
    #[error("data error: {0}")]
    Data(String),
}

impl EtlError {
    pub fn connectivity(store: StoreKind, source: impl Into<BoxError>) -> Self {
        EtlError::Connectivity {
            store,
            source: source.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EtlError::Connectivity { .. })
    }

    /// Classify a sqlx failure coming from `store`.
    pub fn from_sqlx(store: StoreKind, err: sqlx::Error) -> Self {
        let retryable_server_error = match &err {
            sqlx::Error::Database(db) => is_retryable_db_error(
                db.code().as_deref(),
                db.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number()),
            ),
            _ => false,
        };
        if retryable_server_error {
            return EtlError::connectivity(store, err);
        }
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => EtlError::connectivity(store, err),
            sqlx::Error::Configuration(e) => EtlError::Config(format!("{store}: {e}")),
            other => EtlError::Data(format!("{store}: {other}")),
        }
    }
}

/// Server-side errors that clear up on their own: connection exceptions (SQLSTATE class 08),
/// insufficient resources (53), operator intervention such as shutdown or startup (57P0x),
/// serialization failures and deadlocks. MySQL reports several of these as HY000, so its
/// error number is checked too (1040 too many connections, 1205 lock wait timeout, 1213 deadlock).
pub(crate) fn is_retryable_db_error(sqlstate: Option<&str>, mysql_number: Option<u16>) -> bool {
    if matches!(mysql_number, Some(1040 | 1205 | 1213)) {
        return true;
    }
    let Some(code) = sqlstate else {
        return false;
    };
    code.starts_with("08")
        || code.starts_with("53")
        || code.starts_with("57P0")
        || code == "40001"
        || code == "40P01"
}
