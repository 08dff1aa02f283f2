//! Replay gRPC service definition.
//!
//! Client and server are written by hand against the tonic codegen surface
//! (no protoc/build step). The wire messages live in `replaydb-proto`.
//!
//! ## Service: `replaydb.ReplayService`
//!
//! | Method | Shape |
//! |---|---|
//! | `Checkpoint` | unary |
//! | `InsertStream` | bidirectional streaming |
//! | `MutatePriorities` | unary |
//! | `Reset` | unary |
//! | `SampleStream` | bidirectional streaming |
//! | `ServerInfo` | unary |
//! | `InitializeConnection` | bidirectional streaming |
//!
//! ## Adding a new RPC
//!
//! 1. Define the request/response messages in `replaydb-proto`
//! 2. Add the method to the `replay_service_server::ReplayService` trait
//! 3. Add the path routing in `ReplayServer::call()`
//! 4. Add the client method in `replay_service_client::ReplayServiceClient`

pub use replaydb_proto::{
    CheckpointRequest, CheckpointResponse, InitializeConnectionRequest,
    InitializeConnectionResponse, InsertStreamRequest, InsertStreamResponse,
    MutatePrioritiesRequest, MutatePrioritiesResponse, ResetRequest, ResetResponse,
    SampleStreamRequest, SampleStreamResponse, ServerInfoRequest, ServerInfoResponse,
};

// ─── gRPC Client ────────────────────────────────────────────────────────────

pub mod replay_service_client {
    use super::*;
    use tonic::codegen::*;

    /// Replay service gRPC client
    #[derive(Debug, Clone)]
    pub struct ReplayServiceClient<T> {
        inner: tonic::client::Grpc<T>,
    }

    impl ReplayServiceClient<tonic::transport::Channel> {
        /// Create a new client from a channel
        pub fn new(channel: tonic::transport::Channel) -> Self {
            let inner = tonic::client::Grpc::new(channel);
            Self { inner }
        }
    }

    impl<T> ReplayServiceClient<T>
    where
        T: tonic::client::GrpcService<tonic::body::BoxBody>,
        T::Error: Into<StdError> + std::fmt::Debug,
        T::ResponseBody: Body<Data = Bytes> + std::marker::Send + 'static,
        <T::ResponseBody as Body>::Error: Into<StdError> + std::marker::Send,
    {
        /// Snapshot every table through the configured checkpointer.
        pub async fn checkpoint(
            &mut self,
            request: impl tonic::IntoRequest<CheckpointRequest>,
        ) -> std::result::Result<tonic::Response<CheckpointResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replaydb.ReplayService/Checkpoint");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "Checkpoint"));
            self.inner.unary(req, path, codec).await
        }

        /// Upload chunks and items; the server acknowledges admitted item
        /// keys in completion order.
        pub async fn insert_stream(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = InsertStreamRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<InsertStreamResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replaydb.ReplayService/InsertStream");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "InsertStream"));
            self.inner.streaming(req, path, codec).await
        }

        /// Apply priority updates and deletions to a table.
        pub async fn mutate_priorities(
            &mut self,
            request: impl tonic::IntoRequest<MutatePrioritiesRequest>,
        ) -> std::result::Result<tonic::Response<MutatePrioritiesResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replaydb.ReplayService/MutatePriorities");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "MutatePriorities"));
            self.inner.unary(req, path, codec).await
        }

        /// Clear a table.
        pub async fn reset(
            &mut self,
            request: impl tonic::IntoRequest<ResetRequest>,
        ) -> std::result::Result<tonic::Response<ResetResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static("/replaydb.ReplayService/Reset");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "Reset"));
            self.inner.unary(req, path, codec).await
        }

        /// Request batches of samples from a table.
        pub async fn sample_stream(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = SampleStreamRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<SampleStreamResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replaydb.ReplayService/SampleStream");
            let mut req = request.into_streaming_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "SampleStream"));
            self.inner.streaming(req, path, codec).await
        }

        /// Fetch per-table info and the tables-state id.
        pub async fn server_info(
            &mut self,
            request: impl tonic::IntoRequest<ServerInfoRequest>,
        ) -> std::result::Result<tonic::Response<ServerInfoResponse>, tonic::Status> {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path =
                http::uri::PathAndQuery::from_static("/replaydb.ReplayService/ServerInfo");
            let mut req = request.into_request();
            req.extensions_mut()
                .insert(GrpcMethod::new("replaydb.ReplayService", "ServerInfo"));
            self.inner.unary(req, path, codec).await
        }

        /// Same-process fast-path handshake.
        pub async fn initialize_connection(
            &mut self,
            request: impl tonic::IntoStreamingRequest<Message = InitializeConnectionRequest>,
        ) -> std::result::Result<
            tonic::Response<tonic::codec::Streaming<InitializeConnectionResponse>>,
            tonic::Status,
        > {
            self.inner.ready().await.map_err(|e| {
                tonic::Status::new(tonic::Code::Unknown, format!("Service not ready: {:?}", e))
            })?;

            let codec = tonic::codec::ProstCodec::default();
            let path = http::uri::PathAndQuery::from_static(
                "/replaydb.ReplayService/InitializeConnection",
            );
            let mut req = request.into_streaming_request();
            req.extensions_mut().insert(GrpcMethod::new(
                "replaydb.ReplayService",
                "InitializeConnection",
            ));
            self.inner.streaming(req, path, codec).await
        }
    }
}

// ─── gRPC Server ────────────────────────────────────────────────────────────

pub mod replay_service_server {
    use super::*;
    use std::sync::Arc;
    use tonic::codegen::*;

    /// Replay service trait — implement this to handle incoming RPCs.
    #[async_trait::async_trait]
    pub trait ReplayService: std::marker::Send + std::marker::Sync + 'static {
        /// Handle a checkpoint request.
        async fn checkpoint(
            &self,
            request: tonic::Request<CheckpointRequest>,
        ) -> std::result::Result<tonic::Response<CheckpointResponse>, tonic::Status>;

        /// Server streaming response type for the InsertStream method.
        type InsertStreamStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<InsertStreamResponse, tonic::Status>,
            > + std::marker::Send
            + 'static;

        /// Handle an insert stream.
        async fn insert_stream(
            &self,
            request: tonic::Request<tonic::Streaming<InsertStreamRequest>>,
        ) -> std::result::Result<tonic::Response<Self::InsertStreamStream>, tonic::Status>;

        /// Handle a priority mutation request.
        async fn mutate_priorities(
            &self,
            request: tonic::Request<MutatePrioritiesRequest>,
        ) -> std::result::Result<tonic::Response<MutatePrioritiesResponse>, tonic::Status>;

        /// Handle a table reset request.
        async fn reset(
            &self,
            request: tonic::Request<ResetRequest>,
        ) -> std::result::Result<tonic::Response<ResetResponse>, tonic::Status>;

        /// Server streaming response type for the SampleStream method.
        type SampleStreamStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<SampleStreamResponse, tonic::Status>,
            > + std::marker::Send
            + 'static;

        /// Handle a sample stream.
        async fn sample_stream(
            &self,
            request: tonic::Request<tonic::Streaming<SampleStreamRequest>>,
        ) -> std::result::Result<tonic::Response<Self::SampleStreamStream>, tonic::Status>;

        /// Handle a server info request.
        async fn server_info(
            &self,
            request: tonic::Request<ServerInfoRequest>,
        ) -> std::result::Result<tonic::Response<ServerInfoResponse>, tonic::Status>;

        /// Server streaming response type for the InitializeConnection method.
        type InitializeConnectionStream: tonic::codegen::tokio_stream::Stream<
                Item = std::result::Result<InitializeConnectionResponse, tonic::Status>,
            > + std::marker::Send
            + 'static;

        /// Handle a same-process fast-path handshake.
        async fn initialize_connection(
            &self,
            request: tonic::Request<tonic::Streaming<InitializeConnectionRequest>>,
        ) -> std::result::Result<tonic::Response<Self::InitializeConnectionStream>, tonic::Status>;
    }

    /// Replay service tonic server wrapper
    #[derive(Debug)]
    pub struct ReplayServer<T: ReplayService> {
        inner: Arc<T>,
    }

    impl<T: ReplayService> ReplayServer<T> {
        pub fn new(inner: T) -> Self {
            Self {
                inner: Arc::new(inner),
            }
        }

        pub fn from_arc(inner: Arc<T>) -> Self {
            Self { inner }
        }
    }

    impl<T: ReplayService> Clone for ReplayServer<T> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<T: ReplayService> tonic::server::NamedService for ReplayServer<T> {
        const NAME: &'static str = "replaydb.ReplayService";
    }

    impl<T, B> tonic::codegen::Service<http::Request<B>> for ReplayServer<T>
    where
        T: ReplayService,
        B: Body + std::marker::Send + 'static,
        B::Error: Into<StdError> + std::marker::Send + 'static,
    {
        type Response = http::Response<tonic::body::BoxBody>;
        type Error = std::convert::Infallible;
        type Future = BoxFuture<Self::Response, Self::Error>;

        fn poll_ready(
            &mut self,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
            std::task::Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<B>) -> Self::Future {
            let inner = self.inner.clone();

            match req.uri().path() {
                "/replaydb.ReplayService/Checkpoint" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = CheckpointSvc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/InsertStream" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = InsertStreamSvc(inner);
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/MutatePriorities" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = MutatePrioritiesSvc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/Reset" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = ResetSvc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/SampleStream" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = SampleStreamSvc(inner);
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/ServerInfo" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = ServerInfoSvc(inner);
                        let res = grpc.unary(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                "/replaydb.ReplayService/InitializeConnection" => {
                    let fut = async move {
                        let mut grpc =
                            tonic::server::Grpc::new(tonic::codec::ProstCodec::default());
                        let method = InitializeConnectionSvc(inner);
                        let res = grpc.streaming(method, req).await;
                        Ok(res)
                    };
                    Box::pin(fut)
                }
                _ => Box::pin(async move {
                    let mut builder = http::Response::builder();
                    builder = builder.status(200).header("grpc-status", "12");
                    Ok(builder.body(tonic::body::empty_body()).unwrap())
                }),
            }
        }
    }

    struct CheckpointSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::UnaryService<CheckpointRequest> for CheckpointSvc<T> {
        type Response = CheckpointResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<CheckpointRequest>) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.checkpoint(request).await };
            Box::pin(fut)
        }
    }

    struct InsertStreamSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::StreamingService<InsertStreamRequest>
        for InsertStreamSvc<T>
    {
        type Response = InsertStreamResponse;
        type ResponseStream = T::InsertStreamStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(
            &mut self,
            request: tonic::Request<tonic::Streaming<InsertStreamRequest>>,
        ) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.insert_stream(request).await };
            Box::pin(fut)
        }
    }

    struct MutatePrioritiesSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::UnaryService<MutatePrioritiesRequest>
        for MutatePrioritiesSvc<T>
    {
        type Response = MutatePrioritiesResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<MutatePrioritiesRequest>) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.mutate_priorities(request).await };
            Box::pin(fut)
        }
    }

    struct ResetSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::UnaryService<ResetRequest> for ResetSvc<T> {
        type Response = ResetResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<ResetRequest>) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.reset(request).await };
            Box::pin(fut)
        }
    }

    struct SampleStreamSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::StreamingService<SampleStreamRequest>
        for SampleStreamSvc<T>
    {
        type Response = SampleStreamResponse;
        type ResponseStream = T::SampleStreamStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(
            &mut self,
            request: tonic::Request<tonic::Streaming<SampleStreamRequest>>,
        ) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.sample_stream(request).await };
            Box::pin(fut)
        }
    }

    struct ServerInfoSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::UnaryService<ServerInfoRequest> for ServerInfoSvc<T> {
        type Response = ServerInfoResponse;
        type Future = BoxFuture<tonic::Response<Self::Response>, tonic::Status>;

        fn call(&mut self, request: tonic::Request<ServerInfoRequest>) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.server_info(request).await };
            Box::pin(fut)
        }
    }

    struct InitializeConnectionSvc<T: ReplayService>(Arc<T>);

    impl<T: ReplayService> tonic::server::StreamingService<InitializeConnectionRequest>
        for InitializeConnectionSvc<T>
    {
        type Response = InitializeConnectionResponse;
        type ResponseStream = T::InitializeConnectionStream;
        type Future = BoxFuture<tonic::Response<Self::ResponseStream>, tonic::Status>;

        fn call(
            &mut self,
            request: tonic::Request<tonic::Streaming<InitializeConnectionRequest>>,
        ) -> Self::Future {
            let inner = self.0.clone();
            let fut = async move { inner.initialize_connection(request).await };
            Box::pin(fut)
        }
    }
}
