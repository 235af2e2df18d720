//! Entry point: database administration and connections

use crate::args::QueryArgs;
use crate::config::{BackendKind, Capabilities, ClientConfig};
use crate::connection::Connection;
use crate::db::within;
use crate::error::Result;
use crate::index::Page;
use crate::paging;
use crate::query::{QueryRequest, Row};
use crate::service::{LocalService, Service};
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument};

/// Client of one transaction/query service
#[derive(Clone)]
pub struct Client {
    service: Arc<dyn Service>,
    config: Arc<ClientConfig>,
}

impl Client {
    /// Client over `service` with default configuration
    pub fn new(service: Arc<dyn Service>) -> Self {
        Self::with_config(service, ClientConfig::default())
    }

    pub fn with_config(service: Arc<dyn Service>, config: ClientConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }

    /// Client over a fresh local service of the configured backend kind
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let service = match config.backend {
            BackendKind::InProcess => LocalService::in_process(),
            BackendKind::EmulatedRemote => LocalService::remote_peer(),
        };
        info!(system = %config.system, backend = ?config.backend, "client configured");
        Ok(Self::with_config(Arc::new(service), config))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.service.capabilities()
    }

    /// Create a database; `false` when it already existed. Fails with
    /// [`Error::Unsupported`](crate::error::Error::Unsupported) on backends
    /// without database administration.
    #[instrument(skip(self))]
    pub async fn create_database(&self, name: &str) -> Result<bool> {
        self.service.create_database(name).await
    }

    #[instrument(skip(self))]
    pub async fn delete_database(&self, name: &str) -> Result<bool> {
        self.service.delete_database(name).await
    }

    pub async fn list_databases(&self) -> Result<Vec<String>> {
        self.service.list_databases().await
    }

    /// Connect to an existing database
    #[instrument(skip(self))]
    pub async fn connect(&self, name: &str) -> Result<Connection> {
        self.service.latest(name).await?;
        Ok(Connection::new(name, self.service.clone(), self.config.clone()))
    }

    /// Run a query over the views and values in `args`
    pub async fn q(&self, args: QueryArgs) -> Result<Vec<Row>> {
        let request = args.into_request(&self.config)?;
        within(request.timeout, self.service.query(request)).await
    }

    /// Lazily paged query results. The arg-map offset and limit bound the
    /// whole stream; pages hold at most `chunk_size` rows.
    pub fn qseq(&self, args: QueryArgs) -> Result<BoxStream<'static, Result<Vec<Row>>>> {
        let request = args.into_request(&self.config)?;
        Ok(query_chunks(self.service.clone(), self.config.chunk_size, request))
    }
}

pub(crate) fn query_chunks(
    service: Arc<dyn Service>,
    chunk_size: usize,
    request: QueryRequest,
) -> BoxStream<'static, Result<Vec<Row>>> {
    let base = request.page.offset;
    let limit = request.page.limit;
    paging::chunks(chunk_size, limit, move |page| {
        let service = service.clone();
        let request = QueryRequest {
            page: Page::new(base + page.offset, page.limit),
            ..request.clone()
        };
        async move {
            let timeout = request.timeout;
            within(timeout, service.query(request)).await
        }
    })
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Value;
    use crate::error::{Anomaly, AnomalyCategory, Error};
    use crate::query::{Query, QueryInput};
    use crate::service::MockService;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_connect_to_missing_database() {
        let client = Client::from_config(ClientConfig::default()).unwrap();
        let err = client.connect("nope").await.unwrap_err();
        assert_eq!(err, Error::NotFound("Db not found: nope".to_string()));
    }

    #[tokio::test]
    async fn test_admin_round_trip() {
        let client = Client::from_config(ClientConfig::default()).unwrap();
        assert!(client.create_database("films").await.unwrap());
        assert!(!client.create_database("films").await.unwrap());
        assert_eq!(client.list_databases().await.unwrap(), vec!["films".to_string()]);
        client.connect("films").await.unwrap();
        assert!(client.delete_database("films").await.unwrap());
        assert!(client.list_databases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_emulated_remote_refuses_admin() {
        let config = ClientConfig {
            backend: BackendKind::EmulatedRemote,
            ..ClientConfig::default()
        };
        let client = Client::from_config(config).unwrap();
        let err = client.create_database("films").await.unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_query_marshals_inputs_and_options() {
        let mut service = MockService::new();
        service
            .expect_query()
            .withf(|request| {
                request.query == Query::Text("[:find ?e :in $ ?t :where [?e :movie/title ?t]]".into())
                    && request.inputs == vec![QueryInput::Value(Value::from("Commando"))]
                    && request.page.offset == 1
            })
            .times(1)
            .returning(|_| Ok(vec![vec![Value::Long(1001)]]));
        let client = Client::new(Arc::new(service));

        let rows = client
            .q(QueryArgs::new("[:find ?e :in $ ?t :where [?e :movie/title ?t]]")
                .input("Commando")
                .offset(1))
            .await
            .unwrap();
        assert_eq!(rows, vec![vec![Value::Long(1001)]]);
    }

    #[tokio::test]
    async fn test_query_limit_zero_never_reaches_service() {
        let mut service = MockService::new();
        service.expect_query().times(0);
        let client = Client::new(Arc::new(service));
        let err = client
            .q(QueryArgs::new("[:find ?e]").limit(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_qseq_pages_through_rows() {
        let mut service = MockService::new();
        service.expect_query().times(2).returning(|request| {
            let rows: Vec<Row> = (0..5i64).map(|n| vec![Value::Long(n)]).collect();
            Ok(request.page.apply(rows.into_iter()).collect())
        });
        let config = ClientConfig {
            chunk_size: 3,
            ..ClientConfig::default()
        };
        let client = Client::with_config(Arc::new(service), config);

        let chunks: Vec<Vec<Row>> = client
            .qseq(QueryArgs::new("[:find ?n]").limit(-1))
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![3, 2]);
    }

    #[tokio::test]
    async fn test_service_anomaly_passes_through() {
        let mut service = MockService::new();
        service.expect_query().returning(|_| {
            Err(Anomaly::new(AnomalyCategory::Busy, "server busy").into())
        });
        let client = Client::new(Arc::new(service));
        let err = client.q(QueryArgs::new("[:find ?e]")).await.unwrap_err();
        assert_eq!(
            err.anomaly(),
            Some(&Anomaly::new(AnomalyCategory::Busy, "server busy"))
        );
    }
}
