//! The gRPC side of the provider.
//!
//! [`ProviderService`] is the high-level trait the provider implements; this
//! module adapts it to the generated `hemmer.provider.v1.Provider` service and
//! runs it behind the stdout handshake.
//!
//! # Shutdown
//!
//! On SIGTERM or SIGINT the server stops accepting connections and gives
//! in-flight requests up to [`ServeOptions::shutdown_timeout`] to finish.
//! The provider's `stop()` runs afterwards in every case.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tonic::transport::Server;
use tracing::field::Empty;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as pb;
use crate::schema::{has_errors, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    PlanResult, ProviderMetadata, ReattachConfig, ServerCapabilities, StateResult,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION, REATTACH_ENV_VAR,
};

/// Trait the provider implements.
///
/// Works with `serde_json::Value` states and [`Diagnostic`]s instead of the
/// protobuf types. An `Err` from any operation is reported to the host as
/// diagnostics on the response, never as a transport failure. Operations
/// that produce state return a [`StateResult`], which can carry state next
/// to error diagnostics when the remote object changed before the failure.
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// Schemas of the provider configuration and of every resource and
    /// data source type.
    fn schema(&self) -> ProviderSchema;

    /// Type names served, sorted; derived from [`schema`](Self::schema).
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: sorted_names(&schema.resources),
            data_sources: sorted_names(&schema.data_sources),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    /// Check a provider configuration without applying it.
    async fn validate_provider_config(
        &self,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(Vec::new())
    }

    /// Apply the provider configuration. Error diagnostics leave the
    /// provider unconfigured.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Release whatever `configure` set up. Called on the Stop RPC and on shutdown.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource configuration against its schema.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(Vec::new())
    }

    /// Diff `prior_state` (`None` on create) against `proposed_state`
    /// (`Null` on destroy).
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the resource and return its state.
    async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<StateResult, ProviderError>;

    /// Refresh `current_state` from the remote system.
    async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<StateResult, ProviderError>;

    /// Apply `planned_state` to an existing resource and return the new state.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<StateResult, ProviderError>;

    /// Remove the resource.
    async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError>;

    /// Check a data source configuration against its schema.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(Vec::new())
    }

    /// Look up the data source described by `config`.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<StateResult, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(data_source_type.to_string()))
    }
}

fn sorted_names(schemas: &HashMap<String, Schema>) -> Vec<String> {
    let mut names: Vec<String> = schemas.keys().cloned().collect();
    names.sort();
    names
}

/// Wrapper that implements the generated gRPC trait.
struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

/// Decode a JSON payload. Empty bytes decode to null.
fn decode(bytes: &[u8]) -> Result<Value, tonic::Status> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(bytes).map_err(|e| ProviderError::from(e).into())
}

fn encode(value: &Value) -> Vec<u8> {
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<pb::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| pb::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => pb::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => pb::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: ProviderError) -> Vec<pb::Diagnostic> {
    diagnostics_to_proto(err.into_diagnostics())
}

fn schema_to_proto(schema: &Schema) -> pb::Schema {
    let attributes = schema
        .attribute_names()
        .into_iter()
        .filter_map(|name| schema.attribute(name).map(|attr| (name, attr)))
        .map(|(name, attr)| pb::Attribute {
            name: name.to_string(),
            r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
            required: attr.flags.required,
            optional: attr.flags.optional,
            computed: attr.flags.computed,
            sensitive: false,
            description: attr.description.clone().unwrap_or_default(),
            force_new: attr.force_new,
            default_value: Vec::new(),
        })
        .collect();

    pb::Schema {
        version: schema.version as i64,
        block: Some(pb::Block {
            attributes,
            description: schema.block.description.clone().unwrap_or_default(),
        }),
    }
}

/// Log the outcome of an operation that returns diagnostics.
fn log_diagnostics(operation: &str, type_name: &str, diagnostics: &[Diagnostic]) {
    if has_errors(diagnostics) {
        warn!(
            operation,
            type_name,
            diagnostics = diagnostics.len(),
            "Completed with errors"
        );
    } else {
        info!(operation, type_name, "Completed successfully");
    }
}

/// Response diagnostics for a validate/configure style call.
fn diagnostics_outcome(
    operation: &str,
    type_name: &str,
    result: Result<Vec<Diagnostic>, ProviderError>,
) -> Vec<pb::Diagnostic> {
    match result {
        Ok(diagnostics) => {
            log_diagnostics(operation, type_name, &diagnostics);
            diagnostics_to_proto(diagnostics)
        },
        Err(e) => {
            error!(operation, type_name, error = %e, "Failed");
            error_to_proto(e)
        },
    }
}

/// Encoded state and diagnostics for a call that returns state.
///
/// State is encoded whenever the provider returned some, including next to
/// error diagnostics. An `Err` has empty state.
fn state_outcome(
    operation: &str,
    type_name: &str,
    result: Result<StateResult, ProviderError>,
) -> (Vec<u8>, Vec<pb::Diagnostic>) {
    match result {
        Ok(StateResult { state, diagnostics }) => {
            log_diagnostics(operation, type_name, &diagnostics);
            let state = state.as_ref().map(encode).unwrap_or_default();
            (state, diagnostics_to_proto(diagnostics))
        },
        Err(e) => {
            error!(operation, type_name, error = %e, "Failed");
            (Vec::new(), error_to_proto(e))
        },
    }
}

type GrpcResult<T> = Result<tonic::Response<T>, tonic::Status>;

#[tonic::async_trait]
impl<P: ProviderService> pb::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: tonic::Request<pb::GetMetadataRequest>,
    ) -> GrpcResult<pb::GetMetadataResponse> {
        let metadata = self.provider.metadata();
        debug!(
            resources = ?metadata.resources,
            data_sources = ?metadata.data_sources,
            "Serving metadata"
        );
        Ok(tonic::Response::new(pb::GetMetadataResponse {
            server_capabilities: Some(pb::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: Vec::new(),
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: tonic::Request<pb::GetSchemaRequest>,
    ) -> GrpcResult<pb::GetSchemaResponse> {
        let schema = self.provider.schema();
        let by_name = |schemas: &HashMap<String, Schema>| -> HashMap<String, pb::Schema> {
            schemas
                .iter()
                .map(|(name, s)| (name.clone(), schema_to_proto(s)))
                .collect()
        };
        Ok(tonic::Response::new(pb::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: by_name(&schema.resources),
            data_sources: by_name(&schema.data_sources),
            diagnostics: Vec::new(),
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: tonic::Request<pb::ValidateProviderConfigRequest>,
    ) -> GrpcResult<pb::ValidateProviderConfigResponse> {
        let config = decode(&request.into_inner().config)?;
        let result = self.provider.validate_provider_config(config).await;
        Ok(tonic::Response::new(pb::ValidateProviderConfigResponse {
            diagnostics: diagnostics_outcome("ValidateProviderConfig", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: tonic::Request<pb::ConfigureRequest>,
    ) -> GrpcResult<pb::ConfigureResponse> {
        let config = decode(&request.into_inner().config)?;
        let result = self.provider.configure(config).await;
        Ok(tonic::Response::new(pb::ConfigureResponse {
            diagnostics: diagnostics_outcome("Configure", "provider", result),
        }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: tonic::Request<pb::StopRequest>,
    ) -> GrpcResult<pb::StopResponse> {
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "Stop failed");
                e.to_string()
            },
        };
        Ok(tonic::Response::new(pb::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(resource_type = Empty))]
    async fn validate_resource_config(
        &self,
        request: tonic::Request<pb::ValidateResourceConfigRequest>,
    ) -> GrpcResult<pb::ValidateResourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let config = decode(&req.config)?;

        let result = self
            .provider
            .validate_resource_config(&req.resource_type, config)
            .await;
        Ok(tonic::Response::new(pb::ValidateResourceConfigResponse {
            diagnostics: diagnostics_outcome("ValidateResourceConfig", &req.resource_type, result),
        }))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(resource_type = Empty))]
    async fn plan(&self, request: tonic::Request<pb::PlanRequest>) -> GrpcResult<pb::PlanResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());

        // No prior state means the resource is being created.
        let prior_state = match req.prior_state.as_slice() {
            [] => None,
            bytes => Some(decode(bytes)?),
        };
        let proposed_state = decode(&req.proposed_state)?;
        let config = decode(&req.config)?;

        let response = match self
            .provider
            .plan(&req.resource_type, prior_state, proposed_state, config)
            .await
        {
            Ok(plan) => {
                info!(
                    changes = plan.changes.len(),
                    requires_replace = plan.requires_replace,
                    "Planned"
                );
                pb::PlanResponse {
                    planned_state: encode(&plan.planned_state),
                    changes: plan.changes.into_iter().map(Into::into).collect(),
                    requires_replace: plan.requires_replace,
                    diagnostics: Vec::new(),
                }
            },
            Err(e) => {
                error!(error = %e, "Plan failed");
                pb::PlanResponse {
                    diagnostics: error_to_proto(e),
                    ..Default::default()
                }
            },
        };
        Ok(tonic::Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(resource_type = Empty))]
    async fn create(
        &self,
        request: tonic::Request<pb::CreateRequest>,
    ) -> GrpcResult<pb::CreateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let planned_state = decode(&req.planned_state)?;

        let result = self.provider.create(&req.resource_type, planned_state).await;
        let (state, diagnostics) = state_outcome("Create", &req.resource_type, result);
        Ok(tonic::Response::new(pb::CreateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read", fields(resource_type = Empty))]
    async fn read(&self, request: tonic::Request<pb::ReadRequest>) -> GrpcResult<pb::ReadResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode(&req.current_state)?;

        let result = self.provider.read(&req.resource_type, current_state).await;
        let (state, diagnostics) = state_outcome("Read", &req.resource_type, result);
        Ok(tonic::Response::new(pb::ReadResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.update", fields(resource_type = Empty))]
    async fn update(
        &self,
        request: tonic::Request<pb::UpdateRequest>,
    ) -> GrpcResult<pb::UpdateResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let prior_state = decode(&req.prior_state)?;
        let planned_state = decode(&req.planned_state)?;

        let result = self
            .provider
            .update(&req.resource_type, prior_state, planned_state)
            .await;
        let (state, diagnostics) = state_outcome("Update", &req.resource_type, result);
        Ok(tonic::Response::new(pb::UpdateResponse { state, diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(resource_type = Empty))]
    async fn delete(
        &self,
        request: tonic::Request<pb::DeleteRequest>,
    ) -> GrpcResult<pb::DeleteResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("resource_type", req.resource_type.as_str());
        let current_state = decode(&req.current_state)?;

        let result = self
            .provider
            .delete(&req.resource_type, current_state)
            .await
            .map(|()| Vec::new());
        Ok(tonic::Response::new(pb::DeleteResponse {
            diagnostics: diagnostics_outcome("Delete", &req.resource_type, result),
        }))
    }

    #[instrument(
        skip_all,
        name = "grpc.validate_data_source_config",
        fields(data_source_type = Empty)
    )]
    async fn validate_data_source_config(
        &self,
        request: tonic::Request<pb::ValidateDataSourceConfigRequest>,
    ) -> GrpcResult<pb::ValidateDataSourceConfigResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let config = decode(&req.config)?;

        let result = self
            .provider
            .validate_data_source_config(&req.data_source_type, config)
            .await;
        Ok(tonic::Response::new(pb::ValidateDataSourceConfigResponse {
            diagnostics: diagnostics_outcome(
                "ValidateDataSourceConfig",
                &req.data_source_type,
                result,
            ),
        }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(data_source_type = Empty))]
    async fn read_data_source(
        &self,
        request: tonic::Request<pb::ReadDataSourceRequest>,
    ) -> GrpcResult<pb::ReadDataSourceResponse> {
        let req = request.into_inner();
        tracing::Span::current().record("data_source_type", req.data_source_type.as_str());
        let config = decode(&req.config)?;

        let result = self
            .provider
            .read_data_source(&req.data_source_type, config)
            .await;
        let (state, diagnostics) = state_outcome("ReadDataSource", &req.data_source_type, result);
        Ok(tonic::Response::new(pb::ReadDataSourceResponse { state, diagnostics }))
    }
}

/// Default for [`ServeOptions::shutdown_timeout`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Server settings.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// Grace period for in-flight requests, counted from the shutdown signal.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServeOptions {
    /// [`Default`] options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the shutdown grace period.
    pub fn with_shutdown_timeout(self, shutdown_timeout: Duration) -> Self {
        Self { shutdown_timeout }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT; CTRL+C on Windows).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
            _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        }
    }

    #[cfg(windows)]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
        info!("Received CTRL+C, initiating graceful shutdown");
    }

    #[cfg(not(any(unix, windows)))]
    {
        std::future::pending::<()>().await;
    }
}

/// Render the instructions printed by [`serve_debug`].
fn reattach_instructions(
    provider_address: &str,
    addr: SocketAddr,
) -> Result<String, serde_json::Error> {
    let mut reattach = serde_json::Map::new();
    reattach.insert(
        provider_address.to_string(),
        serde_json::to_value(ReattachConfig::new(addr.to_string()))?,
    );
    Ok(format!(
        "Provider started in debug mode. To attach, run the host with:\n\n    {}='{}'\n",
        REATTACH_ENV_VAR,
        Value::Object(reattach)
    ))
}

/// Run the provider the way the host expects: bind a free port on
/// 127.0.0.1, print `HEMMER_PROVIDER|<version>|<address>` to stdout and
/// serve until SIGTERM/SIGINT.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), Box<dyn std::error::Error>> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Serve a provider with custom options. See [`serve`].
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    serve_with_handshake(provider, listener, options).await
}

/// Serve a provider for a debugger.
///
/// Instead of the handshake, prints the value of
/// `HEMMER_REATTACH_PROVIDERS` the host needs to attach to this process,
/// keyed by `provider_address`.
pub async fn serve_debug<P: ProviderService>(
    provider: P,
    provider_address: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    println!("{}", reattach_instructions(provider_address, addr)?);
    info!(address = %addr, provider = provider_address, "Provider server starting in debug mode");

    serve_listener_with_shutdown(
        provider,
        listener,
        wait_for_shutdown_signal(),
        ServeOptions::default(),
    )
    .await
}

async fn serve_with_handshake<P: ProviderService>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let addr = listener.local_addr()?;

    // stdout carries nothing but this line
    println!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr);
    info!(address = %addr, "Provider server starting");

    serve_listener_with_shutdown(provider, listener, wait_for_shutdown_signal(), options).await
}

/// Serve on an already-bound listener until `shutdown` resolves.
///
/// Prints nothing to stdout. After `shutdown` resolves, in-flight requests get
/// `options.shutdown_timeout` to finish, then the provider's `stop()` runs.
pub async fn serve_listener_with_shutdown<P, F>(
    provider: P,
    listener: TcpListener,
    shutdown: F,
    options: ServeOptions,
) -> Result<(), Box<dyn std::error::Error>>
where
    P: ProviderService,
    F: Future<Output = ()> + Send + 'static,
{
    let provider = Arc::new(provider);
    let grpc_service = ProviderGrpcService {
        provider: Arc::clone(&provider),
    };

    let (signalled_tx, mut signalled_rx) = tokio::sync::oneshot::channel::<()>();
    let server_future = Server::builder()
        .add_service(pb::provider_server::ProviderServer::new(grpc_service))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            async move {
                shutdown.await;
                let _ = signalled_tx.send(());
            },
        );
    tokio::pin!(server_future);

    // The timeout only starts once shutdown has been requested.
    let result = tokio::select! {
        biased;
        result = &mut server_future => Some(result),
        Ok(()) = &mut signalled_rx => {
            tokio::time::timeout(options.shutdown_timeout, &mut server_future)
                .await
                .ok()
        },
    };

    match result {
        Some(Ok(())) => info!("Server shutdown complete"),
        Some(Err(e)) => {
            error!(error = %e, "Server error");
            return Err(e.into());
        },
        None => warn!(
            timeout = ?options.shutdown_timeout,
            "Shutdown timeout exceeded, forcing shutdown"
        ),
    }

    debug!("Calling provider stop()");
    if let Err(e) = provider.stop().await {
        warn!(error = %e, "Provider stop() returned error");
    }

    info!("Provider shutdown complete");
    Ok(())
}
