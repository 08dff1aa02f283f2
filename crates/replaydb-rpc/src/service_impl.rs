//! Replay service façade and RPC handlers.

use crate::connection::run_initialize_connection;
use crate::insert_stream::run_insert_stream;
use crate::sample_stream::run_sample_stream;
use crate::service::replay_service_server::ReplayService;
use crate::status::{table_not_found, to_status};
use log::info;
use replaydb_commons::ReplayError;
use replaydb_proto::{
    CheckpointRequest, CheckpointResponse, InitializeConnectionRequest,
    InitializeConnectionResponse, InsertStreamRequest, InsertStreamResponse,
    MutatePrioritiesRequest, MutatePrioritiesResponse, ResetRequest, ResetResponse,
    SampleStreamRequest, SampleStreamResponse, ServerInfoRequest, ServerInfoResponse, TableInfo,
    Uint128,
};
use replaydb_core::{Checkpointer, ChunkStore, Table, TaskExecutor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

/// Capacity of the per-stream outbound channels. A single slot keeps the
/// one-write-in-flight invariant observable end to end: the writer blocks
/// until the transport picked up the previous response.
const RESPONSE_CHANNEL_CAPACITY: usize = 1;

struct ServiceInner {
    /// Immutable after initialization; concurrent lookups need no locking.
    tables: HashMap<String, Arc<dyn Table>>,
    checkpointer: Option<Arc<dyn Checkpointer>>,
    chunk_store: Arc<ChunkStore>,
    tables_state_id: Uint128,
    callback_executor: Arc<TaskExecutor>,
}

/// Cheaply cloneable handle to the replay service state.
///
/// Stream reactors and unary handlers all resolve tables through this
/// handle. Construction wires the whole service: optional checkpoint
/// restore, table registration, executor attachment, and a fresh random
/// tables-state id.
#[derive(Clone)]
pub struct ReplayServiceImpl {
    inner: Arc<ServiceInner>,
}

impl ReplayServiceImpl {
    /// Initializes the service.
    ///
    /// When a checkpointer is configured, the latest checkpoint is restored
    /// first; if none exists, the fallback checkpoint is tried. A missing
    /// fallback leaves the provided tables in place; any other load error
    /// propagates.
    pub fn new(
        tables: Vec<Arc<dyn Table>>,
        checkpointer: Option<Arc<dyn Checkpointer>>,
        callback_executor_num_threads: usize,
    ) -> Result<Self, ReplayError> {
        let chunk_store = Arc::new(ChunkStore::new());
        let mut tables = tables;
        if let Some(checkpointer) = &checkpointer {
            match checkpointer.load_latest(&chunk_store) {
                Ok(loaded) => tables = loaded,
                Err(ReplayError::NotFound(_)) => match checkpointer.load_fallback(&chunk_store) {
                    Ok(loaded) => tables = loaded,
                    Err(ReplayError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                },
                Err(err) => return Err(err),
            }
        }

        let callback_executor = Arc::new(TaskExecutor::new(
            callback_executor_num_threads,
            "table-callback",
        ));
        let mut registry: HashMap<String, Arc<dyn Table>> = HashMap::new();
        for table in tables {
            let name = table.name().to_string();
            table.set_callback_executor(Arc::clone(&callback_executor));
            if registry.insert(name.clone(), table).is_some() {
                return Err(ReplayError::invalid_argument(format!(
                    "duplicate table name {}",
                    name
                )));
            }
        }

        let id = Uuid::new_v4().as_u128();
        let service = Self {
            inner: Arc::new(ServiceInner {
                tables: registry,
                checkpointer,
                chunk_store,
                tables_state_id: Uint128 {
                    high: (id >> 64) as u64,
                    low: id as u64,
                },
                callback_executor,
            }),
        };
        info!("replay service initialized: {:?}", service);
        Ok(service)
    }

    /// Constant-time lookup against the immutable registry.
    pub fn table_by_name(&self, name: &str) -> Option<Arc<dyn Table>> {
        self.inner.tables.get(name).cloned()
    }

    /// Snapshot of the registered tables.
    pub fn tables(&self) -> Vec<Arc<dyn Table>> {
        self.inner.tables.values().cloned().collect()
    }

    pub fn chunk_store(&self) -> &Arc<ChunkStore> {
        &self.inner.chunk_store
    }

    /// Random identifier of this table-set incarnation, constant for the
    /// service lifetime.
    pub fn tables_state_id(&self) -> Uint128 {
        self.inner.tables_state_id.clone()
    }

    /// Closes every table and stops the callback executor.
    pub fn close(&self) {
        for table in self.inner.tables.values() {
            table.close();
        }
        self.inner.callback_executor.close();
    }
}

impl fmt::Debug for ReplayServiceImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.inner.tables.keys().map(String::as_str).collect();
        names.sort_unstable();
        write!(
            f,
            "ReplayService(tables=[{}], checkpointer={})",
            names.join(", "),
            if self.inner.checkpointer.is_some() {
                "configured"
            } else {
                "none"
            }
        )
    }
}

#[async_trait::async_trait]
impl ReplayService for ReplayServiceImpl {
    async fn checkpoint(
        &self,
        _request: Request<CheckpointRequest>,
    ) -> Result<Response<CheckpointResponse>, Status> {
        let checkpointer = match &self.inner.checkpointer {
            Some(checkpointer) => Arc::clone(checkpointer),
            None => {
                return Err(Status::invalid_argument(
                    "no checkpointer configured for the replay service",
                ));
            }
        };
        let tables = self.tables();
        let checkpoint_path = checkpointer.save(&tables, 1).map_err(to_status)?;
        info!("Stored checkpoint to {}", checkpoint_path);
        Ok(Response::new(CheckpointResponse { checkpoint_path }))
    }

    type InsertStreamStream = ReceiverStream<Result<InsertStreamResponse, Status>>;

    async fn insert_stream(
        &self,
        request: Request<Streaming<InsertStreamRequest>>,
    ) -> Result<Response<Self::InsertStreamStream>, Status> {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(run_insert_stream(self.clone(), request.into_inner(), tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn mutate_priorities(
        &self,
        request: Request<MutatePrioritiesRequest>,
    ) -> Result<Response<MutatePrioritiesResponse>, Status> {
        let request = request.into_inner();
        let table = match self.table_by_name(&request.table) {
            Some(table) => table,
            None => return Err(table_not_found(&request.table)),
        };
        table
            .mutate_items(&request.updates, &request.delete_keys)
            .map_err(to_status)?;
        Ok(Response::new(MutatePrioritiesResponse {}))
    }

    async fn reset(&self, request: Request<ResetRequest>) -> Result<Response<ResetResponse>, Status> {
        let request = request.into_inner();
        let table = match self.table_by_name(&request.table) {
            Some(table) => table,
            None => return Err(table_not_found(&request.table)),
        };
        table.reset().map_err(to_status)?;
        Ok(Response::new(ResetResponse {}))
    }

    type SampleStreamStream = ReceiverStream<Result<SampleStreamResponse, Status>>;

    async fn sample_stream(
        &self,
        request: Request<Streaming<SampleStreamRequest>>,
    ) -> Result<Response<Self::SampleStreamStream>, Status> {
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(run_sample_stream(self.clone(), request.into_inner(), tx));
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn server_info(
        &self,
        _request: Request<ServerInfoRequest>,
    ) -> Result<Response<ServerInfoResponse>, Status> {
        let mut table_info: Vec<TableInfo> =
            self.inner.tables.values().map(|table| table.info()).collect();
        table_info.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Response::new(ServerInfoResponse {
            table_info,
            tables_state_id: Some(self.tables_state_id()),
        }))
    }

    type InitializeConnectionStream = ReceiverStream<Result<InitializeConnectionResponse, Status>>;

    async fn initialize_connection(
        &self,
        request: Request<Streaming<InitializeConnectionRequest>>,
    ) -> Result<Response<Self::InitializeConnectionStream>, Status> {
        let peer = request.remote_addr();
        let (tx, rx) = mpsc::channel(RESPONSE_CHANNEL_CAPACITY);
        tokio::spawn(run_initialize_connection(
            self.clone(),
            peer,
            request.into_inner(),
            tx,
        ));
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replaydb_core::{PriorityTable, RateLimiter, Selector};

    fn test_table(name: &str) -> Arc<dyn Table> {
        Arc::new(PriorityTable::new(
            name,
            10,
            Selector::Uniform,
            0,
            RateLimiter::unbounded(),
        ))
    }

    /// Scripted checkpointer: yields fixed results for the load calls and
    /// records saves.
    struct MockCheckpointer {
        latest: Result<Vec<String>, ReplayError>,
        fallback: Result<Vec<String>, ReplayError>,
        saved: std::sync::Mutex<usize>,
    }

    impl MockCheckpointer {
        fn not_found() -> Self {
            Self {
                latest: Err(ReplayError::not_found("no checkpoint")),
                fallback: Err(ReplayError::not_found("no fallback")),
                saved: std::sync::Mutex::new(0),
            }
        }
    }

    impl Checkpointer for MockCheckpointer {
        fn save(
            &self,
            tables: &[Arc<dyn Table>],
            _keep_latest: usize,
        ) -> Result<String, ReplayError> {
            *self.saved.lock().unwrap() += tables.len();
            Ok("/checkpoints/2024-01-01T00:00:00".to_string())
        }

        fn load_latest(
            &self,
            _chunk_store: &ChunkStore,
        ) -> Result<Vec<Arc<dyn Table>>, ReplayError> {
            self.latest
                .clone()
                .map(|names| names.iter().map(|name| test_table(name)).collect())
        }

        fn load_fallback(
            &self,
            _chunk_store: &ChunkStore,
        ) -> Result<Vec<Arc<dyn Table>>, ReplayError> {
            self.fallback
                .clone()
                .map(|names| names.iter().map(|name| test_table(name)).collect())
        }
    }

    fn test_service(tables: Vec<Arc<dyn Table>>) -> ReplayServiceImpl {
        ReplayServiceImpl::new(tables, None, 2).unwrap()
    }

    #[test]
    fn test_registry_lookup() {
        let service = test_service(vec![test_table("a"), test_table("b")]);
        assert!(service.table_by_name("a").is_some());
        assert!(service.table_by_name("missing").is_none());
        assert_eq!(service.tables().len(), 2);
        service.close();
    }

    #[test]
    fn test_duplicate_table_names_rejected() {
        let result = ReplayServiceImpl::new(vec![test_table("a"), test_table("a")], None, 2);
        assert!(matches!(result, Err(ReplayError::InvalidArgument(_))));
    }

    #[test]
    fn test_tables_state_id_is_stable() {
        let service = test_service(vec![test_table("a")]);
        let first = service.tables_state_id();
        let second = service.tables_state_id();
        assert_eq!(first.high, second.high);
        assert_eq!(first.low, second.low);
        assert!(first.high != 0 || first.low != 0);
        service.close();
    }

    #[test]
    fn test_state_ids_differ_between_instances() {
        let a = test_service(vec![]);
        let b = test_service(vec![]);
        let (ida, idb) = (a.tables_state_id(), b.tables_state_id());
        assert!(ida.high != idb.high || ida.low != idb.low);
    }

    #[test]
    fn test_startup_restores_latest_checkpoint() {
        let checkpointer = Arc::new(MockCheckpointer {
            latest: Ok(vec!["restored".to_string()]),
            fallback: Err(ReplayError::not_found("unused")),
            saved: std::sync::Mutex::new(0),
        });
        let service =
            ReplayServiceImpl::new(vec![test_table("configured")], Some(checkpointer), 2).unwrap();
        assert!(service.table_by_name("restored").is_some());
        assert!(service.table_by_name("configured").is_none());
        service.close();
    }

    #[test]
    fn test_startup_falls_back_when_latest_missing() {
        let checkpointer = Arc::new(MockCheckpointer {
            latest: Err(ReplayError::not_found("empty root")),
            fallback: Ok(vec!["fallback".to_string()]),
            saved: std::sync::Mutex::new(0),
        });
        let service = ReplayServiceImpl::new(vec![], Some(checkpointer), 2).unwrap();
        assert!(service.table_by_name("fallback").is_some());
        service.close();
    }

    #[test]
    fn test_startup_keeps_configured_tables_without_checkpoints() {
        let checkpointer = Arc::new(MockCheckpointer::not_found());
        let service =
            ReplayServiceImpl::new(vec![test_table("configured")], Some(checkpointer), 2).unwrap();
        assert!(service.table_by_name("configured").is_some());
        service.close();
    }

    #[test]
    fn test_startup_propagates_load_errors() {
        let checkpointer = Arc::new(MockCheckpointer {
            latest: Err(ReplayError::internal("corrupt checkpoint")),
            fallback: Err(ReplayError::not_found("unused")),
            saved: std::sync::Mutex::new(0),
        });
        let result = ReplayServiceImpl::new(vec![], Some(checkpointer), 2);
        assert!(matches!(result, Err(ReplayError::Internal(_))));
    }

    #[tokio::test]
    async fn test_checkpoint_saves_every_table() {
        let checkpointer = Arc::new(MockCheckpointer::not_found());
        let service = ReplayServiceImpl::new(
            vec![test_table("a"), test_table("b")],
            Some(Arc::clone(&checkpointer) as Arc<dyn Checkpointer>),
            2,
        )
        .unwrap();
        let response = service
            .checkpoint(Request::new(CheckpointRequest {}))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.checkpoint_path, "/checkpoints/2024-01-01T00:00:00");
        assert_eq!(*checkpointer.saved.lock().unwrap(), 2);
        service.close();
    }

    #[tokio::test]
    async fn test_checkpoint_requires_checkpointer() {
        let service = test_service(vec![]);
        let err = service
            .checkpoint(Request::new(CheckpointRequest {}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_mutate_priorities_unknown_table() {
        let service = test_service(vec![]);
        let err = service
            .mutate_priorities(Request::new(MutatePrioritiesRequest {
                table: "nope".to_string(),
                updates: vec![],
                delete_keys: vec![],
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
        assert_eq!(err.message(), "Priority table nope was not found");
    }

    #[tokio::test]
    async fn test_server_info_lists_tables_sorted() {
        let service = test_service(vec![test_table("b"), test_table("a")]);
        let response = service
            .server_info(Request::new(ServerInfoRequest {}))
            .await
            .unwrap()
            .into_inner();
        let names: Vec<&str> = response
            .table_info
            .iter()
            .map(|info| info.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(response.tables_state_id.is_some());
        service.close();
    }

    #[test]
    fn test_debug_summary() {
        let service = test_service(vec![test_table("queue")]);
        let summary = format!("{:?}", service);
        assert_eq!(summary, "ReplayService(tables=[queue], checkpointer=none)");
        service.close();
    }
}
