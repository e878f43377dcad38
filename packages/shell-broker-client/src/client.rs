//! A single persistent connection to the broker, serializing concurrent
//! calls so request/response is never interleaved on the wire (§4.2).

use futures::{SinkExt, StreamExt};
use shell_broker_proto::{BrokerRequest, BrokerResponse, Envelope, JsonFrameCodec, PopResult};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::debug;

type Connection = Framed<TcpStream, JsonFrameCodec<BrokerResponse, BrokerRequest>>;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not reach broker at {addr}: {source}")]
    Connect { addr: String, #[source] source: std::io::Error },
    #[error("broker transport error: {0}")]
    Transport(#[from] shell_broker_proto::FrameError),
    #[error("broker rejected request: {0}")]
    Protocol(String),
    #[error("broker closed the connection")]
    ConnectionClosed,
}

/// A client for one broker endpoint, holding at most one live TCP
/// connection at a time behind a mutex (§4.2: "Concurrency").
pub struct BrokerClient {
    addr: String,
    conn: Mutex<Option<Connection>>,
}

impl BrokerClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into(), conn: Mutex::new(None) }
    }

    pub async fn push(&self, envelope: Envelope) -> Result<(), ClientError> {
        let response = self.call(BrokerRequest::Push(envelope)).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Protocol(response.error.unwrap_or_default()))
        }
    }

    /// Returns `None` when the broker's heap is empty (`{status: "empty"}`).
    pub async fn pop(&self) -> Result<Option<PopResult>, ClientError> {
        let response = self.call(BrokerRequest::Pop).await?;
        if response.is_empty() {
            return Ok(None);
        }
        if !response.is_ok() {
            return Err(ClientError::Protocol(response.error.unwrap_or_default()));
        }
        let data = response.data.ok_or_else(|| ClientError::Protocol("ok response missing data".into()))?;
        let popped: PopResult = serde_json::from_value(data)
            .map_err(|e| ClientError::Protocol(format!("malformed pop payload: {e}")))?;
        Ok(Some(popped))
    }

    pub async fn ack(&self, id: impl Into<String>) -> Result<(), ClientError> {
        let response = self.call(BrokerRequest::Ack { id: id.into() }).await?;
        if response.is_ok() {
            Ok(())
        } else {
            Err(ClientError::Protocol(response.error.unwrap_or_default()))
        }
    }

    /// Cancellation is idempotent at the broker; this always succeeds
    /// unless the connection itself is unreachable (§4.1: "CANCEL").
    pub async fn cancel(&self, id: impl Into<String>) -> Result<(), ClientError> {
        self.call(BrokerRequest::Cancel { id: id.into() }).await?;
        Ok(())
    }

    /// Send one request and await its response, reconnecting once on any
    /// I/O failure before giving up (§4.2 leaves reconnect policy to the
    /// consumer loop for POP-driven traffic; single calls get one retry).
    async fn call(&self, request: BrokerRequest) -> Result<BrokerResponse, ClientError> {
        let mut guard = self.conn.lock().await;
        match self.try_call(&mut guard, request.clone()).await {
            Ok(response) => Ok(response),
            Err(_) => {
                debug!(addr = %self.addr, "reconnecting after transport error");
                *guard = None;
                self.try_call(&mut guard, request).await
            }
        }
    }

    async fn try_call(&self, guard: &mut Option<Connection>, request: BrokerRequest) -> Result<BrokerResponse, ClientError> {
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let conn = guard.as_mut().expect("just ensured connection is present");
        conn.send(request).await?;
        match conn.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(err)) => {
                *guard = None;
                Err(err.into())
            }
            None => {
                *guard = None;
                Err(ClientError::ConnectionClosed)
            }
        }
    }

    async fn connect(&self) -> Result<Connection, ClientError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect { addr: self.addr.clone(), source })?;
        Ok(Framed::new(stream, JsonFrameCodec::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shell_broker::{connection, BrokerState};
    use std::sync::Arc;
    use tokio::net::TcpListener;

    async fn spawn_test_broker() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(BrokerState::new());
        tokio::spawn(async move {
            loop {
                let (socket, peer) = listener.accept().await.unwrap();
                let state = Arc::clone(&state);
                tokio::spawn(connection::handle_connection(socket, peer, state));
            }
        });
        addr
    }

    #[tokio::test]
    async fn push_pop_ack_round_trip_over_the_wire() {
        let addr = spawn_test_broker().await;
        let client = BrokerClient::new(addr);

        client.push(Envelope { id: "j1".into(), priority: 5, payload: json!({"command": "echo"}) }).await.unwrap();
        let popped = client.pop().await.unwrap().expect("envelope should be present");
        assert_eq!(popped.id, "j1");
        client.ack(popped.id).await.unwrap();

        assert!(client.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pop_on_empty_broker_returns_none() {
        let addr = spawn_test_broker().await;
        let client = BrokerClient::new(addr);
        assert!(client.pop().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_collision_surfaces_as_protocol_error() {
        let addr = spawn_test_broker().await;
        let client = BrokerClient::new(addr);
        client.push(Envelope { id: "j1".into(), priority: 1, payload: json!(null) }).await.unwrap();
        let err = client.push(Envelope { id: "j1".into(), priority: 1, payload: json!(null) }).await.unwrap_err();
        assert!(matches!(err, ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn cancel_of_unknown_id_succeeds() {
        let addr = spawn_test_broker().await;
        let client = BrokerClient::new(addr);
        client.cancel("ghost").await.unwrap();
    }
}
