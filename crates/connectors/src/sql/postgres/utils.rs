use crate::{broker::ConnectionDescriptor, sql::base::error::DbError};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::{Client, Config, NoTls, config::SslMode};
use tracing::{error, warn};

pub(crate) type PgSession = (Client, JoinHandle<()>);

pub(crate) fn config_for(descriptor: &ConnectionDescriptor) -> Config {
    let mut config = Config::new();
    config
        .host(&descriptor.host)
        .port(descriptor.port)
        .dbname(&descriptor.database)
        .user(&descriptor.user)
        .password(descriptor.password())
        .application_name("sluice")
        .ssl_mode(ssl_mode(descriptor.ssl_mode.as_deref()));
    config
}

fn ssl_mode(raw: Option<&str>) -> SslMode {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("disable") => SslMode::Disable,
        Some("require") | Some("verify-ca") | Some("verify-full") => SslMode::Require,
        _ => SslMode::Prefer,
    }
}

pub(crate) async fn connect_client(config: Config) -> Result<PgSession, DbError> {
    match config.get_ssl_mode() {
        SslMode::Disable => connect_without_tls(config).await,
        SslMode::Prefer => match connect_with_tls(config.clone()).await {
            Ok(session) => Ok(session),
            Err(error) => {
                warn!(%error, "Postgres TLS handshake failed, retrying without TLS");
                connect_without_tls(config).await
            }
        },
        _ => connect_with_tls(config).await,
    }
}

async fn connect_with_tls(config: Config) -> Result<PgSession, DbError> {
    let connector = TlsConnector::builder().build()?;
    let tls = MakeTlsConnector::new(connector);
    let (client, connection) = config.connect(tls).await?;
    let task = tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok((client, task))
}

async fn connect_without_tls(config: Config) -> Result<PgSession, DbError> {
    let (client, connection) = config.connect(NoTls).await?;
    let task = tokio::spawn(async move {
        if let Err(err) = connection.await {
            error!(%err, "Postgres connection error");
        }
    });
    Ok((client, task))
}
