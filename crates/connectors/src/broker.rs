use crate::{
    error::{BrokerError, DbError, SecretError},
    secrets::{SecretRecord, SecretStore},
    sql::{
        base::connection::{DatabaseKind, SqlConnection},
        mssql::connection::MssqlConnection,
        mysql::connection::MySqlConnection,
        postgres::connection::PgConnection,
    },
};
use async_trait::async_trait;
use std::{fmt, sync::Arc};
use tracing::{error, info, warn};

/// Typed connection parameters resolved from a secret.
#[derive(Clone)]
pub struct ConnectionDescriptor {
    pub secret: String,
    pub kind: DatabaseKind,
    pub driver: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub ssl_mode: Option<String>,
    password: String,
}

impl ConnectionDescriptor {
    pub fn from_secret(record: &SecretRecord) -> Result<Self, BrokerError> {
        let secret = record.name().to_string();
        let unavailable = |source: SecretError| BrokerError::SecretUnavailable {
            secret: secret.clone(),
            source,
        };

        let driver = record
            .require(&["driver", "engine"])
            .map_err(unavailable)?;
        let kind = DatabaseKind::from_driver(&driver).ok_or_else(|| BrokerError::UnsupportedDriver {
            secret: secret.clone(),
            driver: driver.clone(),
        })?;

        let port = match record.field(&["port"]) {
            Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
                unavailable(SecretError::Malformed {
                    name: secret.clone(),
                    reason: format!("port `{raw}` is not a valid port number"),
                })
            })?,
            None => kind.default_port(),
        };

        Ok(Self {
            kind,
            driver,
            host: record.require(&["server", "host"]).map_err(unavailable)?,
            port,
            database: record.require(&["database", "dbname"]).map_err(unavailable)?,
            user: record
                .require(&["user", "username", "uid"])
                .map_err(unavailable)?,
            password: record
                .require(&["user_pass", "password", "pwd"])
                .map_err(unavailable)?,
            ssl_mode: record.field(&["sslmode", "ssl_mode"]),
            secret,
        })
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("secret", &self.secret)
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Opens a live connection for a descriptor.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn SqlConnection>, DbError>;
}

/// Dispatches on [`DatabaseKind`] to the native drivers.
#[derive(Debug, Default, Clone, Copy)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Box<dyn SqlConnection>, DbError> {
        match descriptor.kind {
            DatabaseKind::Postgres => Ok(Box::new(PgConnection::connect(descriptor).await?)),
            DatabaseKind::MySql => Ok(Box::new(MySqlConnection::connect(descriptor).await?)),
            DatabaseKind::Mssql => Ok(Box::new(MssqlConnection::connect(descriptor).await?)),
        }
    }
}

/// Resolves secrets into connections. Every call to [`open`](Self::open)
/// produces a fresh handle; nothing is pooled.
#[derive(Clone)]
pub struct ConnectionBroker {
    secrets: Arc<dyn SecretStore>,
    connector: Arc<dyn Connector>,
}

impl ConnectionBroker {
    pub fn new(secrets: Arc<dyn SecretStore>, connector: Arc<dyn Connector>) -> Self {
        Self { secrets, connector }
    }

    pub fn with_drivers(secrets: Arc<dyn SecretStore>) -> Self {
        Self::new(secrets, Arc::new(DriverConnector))
    }

    pub async fn describe(&self, secret: &str) -> Result<ConnectionDescriptor, BrokerError> {
        let record = self
            .secrets
            .fetch(secret)
            .await
            .map_err(|source| BrokerError::SecretUnavailable {
                secret: secret.to_string(),
                source,
            })?;
        ConnectionDescriptor::from_secret(&record)
    }

    pub async fn open(&self, secret: &str) -> Result<ConnectionHandle, BrokerError> {
        let descriptor = self.describe(secret).await?;
        info!(
            secret,
            kind = %descriptor.kind,
            host = %descriptor.host,
            database = %descriptor.database,
            "Opening database connection"
        );

        match self.connector.connect(&descriptor).await {
            Ok(conn) => Ok(ConnectionHandle::new(descriptor, conn)),
            Err(source) => {
                let driver = source.driver_error();
                error!(secret, host = %descriptor.host, %driver, "Database connection failed");
                Err(BrokerError::ConnectionFailed {
                    secret: descriptor.secret.clone(),
                    host: descriptor.host.clone(),
                    database: descriptor.database.clone(),
                    driver,
                    source,
                })
            }
        }
    }
}

/// Exclusive ownership of one live connection.
///
/// Call [`close`](Self::close) on the way out; if the handle is dropped
/// instead (early return, panic, cancelled future) the connection is dropped
/// with it, which closes the underlying socket.
pub struct ConnectionHandle {
    descriptor: ConnectionDescriptor,
    conn: Option<Box<dyn SqlConnection>>,
}

impl ConnectionHandle {
    pub fn new(descriptor: ConnectionDescriptor, conn: Box<dyn SqlConnection>) -> Self {
        Self {
            descriptor,
            conn: Some(conn),
        }
    }

    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    pub fn connection(&mut self) -> Result<&mut (dyn SqlConnection + 'static), DbError> {
        self.conn.as_deref_mut().ok_or(DbError::Closed)
    }

    pub async fn close(mut self) -> Result<(), DbError> {
        match self.conn.take() {
            Some(mut conn) => {
                let result = conn.close().await;
                info!(secret = %self.descriptor.secret, "Database connection closed");
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.conn.take().is_some() {
            warn!(
                secret = %self.descriptor.secret,
                "Connection handle dropped without close; discarding connection"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use model::records::columnar::ColumnarBatch;
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use crate::sql::base::connection::RowStream;

    struct MapSecrets(HashMap<String, String>);

    #[async_trait]
    impl SecretStore for MapSecrets {
        async fn fetch(&self, name: &str) -> Result<SecretRecord, SecretError> {
            let raw = self
                .0
                .get(name)
                .ok_or_else(|| SecretError::NotFound(name.to_string()))?;
            SecretRecord::from_json_str(name, raw)
        }
    }

    #[derive(Default)]
    struct Counters {
        dropped: AtomicUsize,
        closed: AtomicUsize,
    }

    struct FakeConnection(Arc<Counters>);

    #[async_trait]
    impl SqlConnection for FakeConnection {
        fn kind(&self) -> DatabaseKind {
            DatabaseKind::Postgres
        }

        async fn query_stream<'a>(&'a mut self, _sql: &'a str) -> Result<RowStream<'a>, DbError> {
            Ok(RowStream {
                columns: vec![],
                rows: Box::pin(stream::empty()),
            })
        }

        async fn truncate(&mut self, _table: &str) -> Result<u64, DbError> {
            Ok(0)
        }

        async fn insert_columns(&mut self, _t: &str, b: &ColumnarBatch) -> Result<u64, DbError> {
            Ok(b.len() as u64)
        }

        async fn close(&mut self) -> Result<(), DbError> {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    impl Drop for FakeConnection {
        fn drop(&mut self) {
            self.0.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        fail: bool,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(
            &self,
            _descriptor: &ConnectionDescriptor,
        ) -> Result<Box<dyn SqlConnection>, DbError> {
            if self.fail {
                return Err(DbError::Closed);
            }
            Ok(Box::new(FakeConnection(self.counters.clone())))
        }
    }

    fn broker(fail: bool) -> (ConnectionBroker, Arc<Counters>) {
        let mut secrets = HashMap::new();
        secrets.insert(
            "pg".to_string(),
            r#"{"driver":"PostgreSQL Unicode","server":"db","port":"6543","database":"sales","uid":"etl","pwd":"s3cret"}"#
                .to_string(),
        );
        secrets.insert(
            "mssql".to_string(),
            r#"{"driver":"ODBC Driver 17 for SQL Server","server":"db","database":"d","user":"u","password":"p"}"#
                .to_string(),
        );
        let counters = Arc::new(Counters::default());
        let broker = ConnectionBroker::new(
            Arc::new(MapSecrets(secrets)),
            Arc::new(FakeConnector {
                counters: counters.clone(),
                fail,
            }),
        );
        (broker, counters)
    }

    #[tokio::test]
    async fn test_descriptor_from_aliases() {
        let (broker, _) = broker(false);
        let descriptor = broker.describe("pg").await.unwrap();
        assert_eq!(descriptor.kind, DatabaseKind::Postgres);
        assert_eq!(descriptor.port, 6543);
        assert_eq!(descriptor.user, "etl");
        assert_eq!(descriptor.password(), "s3cret");
        assert!(!format!("{descriptor:?}").contains("s3cret"));
    }

    #[tokio::test]
    async fn test_missing_secret_is_unavailable() {
        let (broker, _) = broker(false);
        let err = broker.open("nope").await.err().unwrap();
        assert!(matches!(
            err,
            BrokerError::SecretUnavailable {
                source: SecretError::NotFound(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unsupported_driver() {
        let (broker, _) = broker(false);
        let err = broker.open("mssql").await.err().unwrap();
        assert!(matches!(err, BrokerError::UnsupportedDriver { .. }));
    }

    #[tokio::test]
    async fn test_connection_failure_carries_context() {
        let (broker, _) = broker(true);
        let err = broker.open("pg").await.err().unwrap();
        match &err {
            BrokerError::ConnectionFailed { host, database, .. } => {
                assert_eq!(host, "db");
                assert_eq!(database, "sales");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.driver_error().is_some());
    }

    #[tokio::test]
    async fn test_handle_released_on_close_and_on_drop() {
        let (broker, counters) = broker(false);

        let handle = broker.open("pg").await.unwrap();
        handle.close().await.unwrap();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 1);

        {
            let mut handle = broker.open("pg").await.unwrap();
            handle.connection().unwrap().truncate("t").await.unwrap();
        }
        assert_eq!(counters.dropped.load(Ordering::SeqCst), 2);
    }
}
