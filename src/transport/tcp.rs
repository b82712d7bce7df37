use super::json_rpc::{
    AUTHENTICATION_REQUIRED, CONNECTION_CLOSED, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    id_key,
};
use super::operation::{Operation, OperationResult};
use super::{Connector, ManagementChannel};
use crate::credentials::CredentialSource;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

type ResponseHandlers = Arc<Mutex<HashMap<String, oneshot::Sender<JsonRpcResponse>>>>;

/// TcpTransport talks to a management endpoint over a TCP connection.
///
/// Requests are newline-delimited JSON-RPC messages. A background task reads
/// responses and dispatches them by id, so concurrent status queries can
/// share one connection.
///
/// When the endpoint answers [`AUTHENTICATION_REQUIRED`], the transport asks
/// its [`CredentialSource`] for a username and password, authenticates the
/// connection and retries the request once.
///
/// # Example
///
/// ```no_run
/// use appserver_runner::transport::{Address, Operation, TcpTransport};
/// use appserver_runner::error::Result;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<()> {
///     let transport = TcpTransport::connect("127.0.0.1:9990", None, Duration::from_secs(30)).await?;
///
///     let op = Operation::read_attribute(Address::root(), "server-state");
///     let result = transport.execute(op).await?;
///     println!("server-state: {}", result.result);
///
///     transport.close().await
/// }
/// ```
pub struct TcpTransport {
    /// Endpoint address
    endpoint: String,
    /// Write half of the connection
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// Response handlers
    response_handlers: ResponseHandlers,
    /// Task handle for reading responses
    reader_task: Mutex<Option<JoinHandle<()>>>,
    /// Supplier of credentials when the endpoint asks for them
    credentials: Option<Arc<dyn CredentialSource>>,
    /// Set once the connection authenticated
    authenticated: AtomicBool,
    /// Upper bound on waiting for any single response
    request_timeout: Duration,
}

impl TcpTransport {
    /// Connects to `address` and starts the response reader. The connect
    /// itself is bounded by `request_timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionRefused`] when nothing is listening,
    /// [`Error::Timeout`] when the connect does not complete in time, or
    /// [`Error::Transport`] for any other connect failure.
    pub async fn connect(
        address: &str,
        credentials: Option<Arc<dyn CredentialSource>>,
        request_timeout: Duration,
    ) -> Result<Self> {
        Self::connect_within(address, request_timeout, credentials, request_timeout).await
    }

    /// Like [`TcpTransport::connect`], with its own bound on the connect.
    pub async fn connect_within(
        address: &str,
        connect_timeout: Duration,
        credentials: Option<Arc<dyn CredentialSource>>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(address)).await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => {
                return Err(Error::ConnectionRefused(address.to_string()));
            }
            Ok(Err(e)) => {
                return Err(Error::Transport(format!(
                    "Failed to connect to {}: {}",
                    address, e
                )));
            }
            Err(_) => {
                tracing::debug!(%address, ?connect_timeout, "Connect timed out");
                return Err(Error::Timeout(format!(
                    "Connecting to {} took longer than {:?}",
                    address, connect_timeout
                )));
            }
        };
        Ok(Self::from_stream(
            address.to_string(),
            stream,
            credentials,
            request_timeout,
        ))
    }

    /// Wraps an already connected stream.
    pub fn from_stream(
        endpoint: String,
        stream: TcpStream,
        credentials: Option<Arc<dyn CredentialSource>>,
        request_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = stream.into_split();
        let response_handlers: ResponseHandlers = Arc::new(Mutex::new(HashMap::new()));
        let reader_task = tokio::spawn(read_responses(
            endpoint.clone(),
            read_half,
            Arc::clone(&response_handlers),
        ));

        Self {
            endpoint,
            writer: tokio::sync::Mutex::new(write_half),
            response_handlers,
            reader_task: Mutex::new(Some(reader_task)),
            credentials,
            authenticated: AtomicBool::new(false),
            request_timeout,
        }
    }

    /// Gets the endpoint this transport is connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn write_line(&self, mut data: Vec<u8>) -> Result<()> {
        data.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&data)
            .await
            .map_err(|e| Error::Transport(format!("Failed to write request: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("Failed to flush request: {}", e)))
    }

    /// Sends a JSON-RPC request and waits for its response.
    ///
    /// The response is returned as-is, including JSON-RPC errors, so callers
    /// can react to specific error codes.
    pub async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = id_key(&request.id)
            .ok_or_else(|| Error::JsonRpc("Invalid request ID type".to_string()))?;

        let (sender, receiver) = oneshot::channel();
        {
            let mut handlers = self
                .response_handlers
                .lock()
                .map_err(|_| Error::Transport("Failed to lock response handlers".to_string()))?;
            handlers.insert(id.clone(), sender);
        }

        let request_json = serde_json::to_vec(&request)
            .map_err(|e| Error::Serialization(format!("Failed to serialize request: {}", e)))?;
        if let Err(e) = self.write_line(request_json).await {
            self.forget_handler(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(Error::Transport(format!(
                "Connection to {} closed before a response arrived",
                self.endpoint
            ))),
            Err(_) => {
                self.forget_handler(&id);
                Err(Error::Timeout(format!(
                    "No response from {} within {:?}",
                    self.endpoint, self.request_timeout
                )))
            }
        }
    }

    fn forget_handler(&self, id: &str) {
        if let Ok(mut handlers) = self.response_handlers.lock() {
            handlers.remove(id);
        }
    }

    /// Authenticates the connection with credentials from the configured source.
    #[tracing::instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn authenticate(&self) -> Result<()> {
        let credentials = self.credentials.clone().ok_or_else(|| {
            Error::Unauthorized(format!(
                "{} requires authentication but no credentials are configured",
                self.endpoint
            ))
        })?;

        // Prompting blocks on the console.
        let (username, password) = tokio::task::spawn_blocking(move || {
            Ok::<_, Error>((credentials.username()?, credentials.password()?))
        })
        .await
        .map_err(|e| Error::Other(format!("Credential task failed: {}", e)))??;

        let request = JsonRpcRequest::authenticate(Uuid::new_v4().to_string(), &username, &password);
        let response = self.send_request(request).await?;
        if let Some(error) = response.error {
            tracing::warn!(code = error.code, "Authentication rejected");
            return Err(Error::Unauthorized(error.message));
        }

        self.authenticated.store(true, Ordering::SeqCst);
        tracing::debug!(user = %username, "Connection authenticated");
        Ok(())
    }

    /// Executes one management operation.
    pub async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        let response = self
            .send_request(JsonRpcRequest::execute(
                Uuid::new_v4().to_string(),
                &operation,
            ))
            .await?;

        let needs_auth = response
            .error
            .as_ref()
            .is_some_and(|e| e.code == AUTHENTICATION_REQUIRED);
        if needs_auth && !self.authenticated.load(Ordering::SeqCst) {
            self.authenticate().await?;
            let response = self
                .send_request(JsonRpcRequest::execute(
                    Uuid::new_v4().to_string(),
                    &operation,
                ))
                .await?;
            return Self::operation_result(response);
        }

        Self::operation_result(response)
    }

    fn operation_result(response: JsonRpcResponse) -> Result<OperationResult> {
        if let Some(error) = response.error {
            return Err(match error.code {
                AUTHENTICATION_REQUIRED => Error::Unauthorized(error.message),
                CONNECTION_CLOSED => Error::Transport(error.message),
                _ => Error::JsonRpc(error.to_string()),
            });
        }
        let result = response
            .result
            .ok_or_else(|| Error::JsonRpc("No result in response".to_string()))?;
        serde_json::from_value(result)
            .map_err(|e| Error::Serialization(format!("Malformed operation result: {}", e)))
    }

    /// Closes the transport and fails any request still waiting for a response.
    pub async fn close(&self) -> Result<()> {
        let task = self.reader_task.lock().ok().and_then(|mut task| task.take());
        if let Some(task) = task {
            task.abort();
            // Ignore errors from abort as it's expected
            let _ = task.await;
        }

        fail_pending(&self.response_handlers);

        let mut writer = self.writer.lock().await;
        // The peer may already be gone.
        let _ = writer.shutdown().await;
        Ok(())
    }
}

async fn read_responses(endpoint: String, read_half: OwnedReadHalf, handlers: ResponseHandlers) {
    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JsonRpcMessage>(&line) {
                    Ok(JsonRpcMessage::Response(response)) => {
                        let Some(id) = id_key(&response.id) else {
                            continue;
                        };
                        if let Ok(mut handlers) = handlers.lock() {
                            if let Some(sender) = handlers.remove(&id) {
                                let _ = sender.send(response);
                            }
                        }
                    }
                    Ok(_) => tracing::trace!(%endpoint, "Ignoring non-response message"),
                    Err(e) => tracing::debug!(%endpoint, error = %e, "Unparseable message"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(%endpoint, error = %e, "Read from management connection failed");
                break;
            }
        }
    }
    tracing::debug!(%endpoint, "Management connection closed");
    fail_pending(&handlers);
}

fn fail_pending(handlers: &ResponseHandlers) {
    if let Ok(mut handlers) = handlers.lock() {
        for (_, sender) in handlers.drain() {
            let _ = sender.send(JsonRpcResponse::error(
                serde_json::Value::Null,
                CONNECTION_CLOSED,
                "Connection closed",
                None,
            ));
        }
    }
}

#[async_trait]
impl ManagementChannel for TcpTransport {
    async fn execute(&self, operation: Operation) -> Result<OperationResult> {
        self.execute(operation).await
    }

    async fn close(&self) -> Result<()> {
        self.close().await
    }
}

/// Opens [`TcpTransport`]s to a fixed address.
#[derive(Clone)]
pub struct TcpConnector {
    address: String,
    credentials: Option<Arc<dyn CredentialSource>>,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            credentials: None,
            connect_timeout: request_timeout,
            request_timeout,
        }
    }

    /// Bound on opening the connection; defaults to the request timeout
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Use `credentials` when the endpoint requests authentication
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Arc<dyn ManagementChannel>> {
        let transport = TcpTransport::connect_within(
            &self.address,
            self.connect_timeout,
            self.credentials.clone(),
            self.request_timeout,
        )
        .await?;
        Ok(Arc::new(transport))
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}
