//! Management channel abstraction.
//!
//! The orchestrator talks to a server through a [`ManagementChannel`]: an
//! opaque RPC connection that executes one [`Operation`] at a time and returns
//! its [`OperationResult`]. A [`Connector`] opens channels; it is what the
//! readiness poller retries while the server is still binding its
//! management interface.
//!
//! [`TcpTransport`] is the shipped implementation: newline-delimited JSON-RPC
//! over TCP.
mod json_rpc;
mod operation;
mod tcp;

pub use json_rpc::{
    AUTHENTICATION_REQUIRED, CONNECTION_CLOSED, JsonRpcError, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse,
};
pub use operation::{Address, Operation, OperationResult, Outcome, RESERVED_PARAMS};
pub use tcp::{TcpConnector, TcpTransport};

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A connection to a server's administrative endpoint.
#[async_trait]
pub trait ManagementChannel: Send + Sync {
    /// Execute one operation and return the server's answer.
    ///
    /// A failed outcome is returned as `Ok`; only transport-level problems
    /// are errors.
    async fn execute(&self, operation: Operation) -> Result<OperationResult>;

    /// Close the connection. Further calls to `execute` fail.
    async fn close(&self) -> Result<()>;
}

/// Opens [`ManagementChannel`]s to one endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new channel.
    ///
    /// Must return [`crate::Error::ConnectionRefused`] when nothing listens
    /// on the endpoint yet.
    async fn connect(&self) -> Result<Arc<dyn ManagementChannel>>;

    /// Printable endpoint, used in logs and errors
    fn endpoint(&self) -> String;
}
