//! Per-connection request/response loop (§4.1: "Concurrency" — one task per
//! accepted connection, strictly request/response, no pipelining).

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use shell_broker_proto::{BrokerRequest, BrokerResponse, JsonFrameCodec, PopResult};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::heap::{AckError, BrokerState, PushError};

pub async fn handle_connection(socket: TcpStream, peer: std::net::SocketAddr, state: Arc<BrokerState>) {
    let mut framed: Framed<TcpStream, JsonFrameCodec<BrokerRequest, BrokerResponse>> =
        Framed::new(socket, JsonFrameCodec::default());

    loop {
        let request = match framed.next().await {
            Some(Ok(request)) => request,
            Some(Err(err)) => {
                warn!(%peer, error = %err, "closing connection after malformed frame");
                return;
            }
            None => {
                debug!(%peer, "connection closed by peer");
                return;
            }
        };

        let response = dispatch(&state, request);

        if let Err(err) = framed.send(response).await {
            warn!(%peer, error = %err, "failed to write response; closing connection");
            return;
        }
    }
}

fn dispatch(state: &BrokerState, request: BrokerRequest) -> BrokerResponse {
    match request {
        BrokerRequest::Push(envelope) => match state.push(envelope.clone()) {
            Ok(()) => {
                info!(id = %envelope.id, priority = envelope.priority, "pushed envelope");
                BrokerResponse::ok_empty()
            }
            Err(PushError::Collision) => {
                BrokerResponse::error(format!("envelope id {} already live", envelope.id))
            }
        },
        BrokerRequest::Pop => match state.pop() {
            Some(envelope) => {
                info!(id = %envelope.id, "reserved envelope for pop");
                BrokerResponse::ok(PopResult { id: envelope.id, payload: envelope.payload })
            }
            None => BrokerResponse::empty(),
        },
        BrokerRequest::Ack { id } => match state.ack(&id) {
            Ok(()) => {
                info!(%id, "acked envelope");
                BrokerResponse::ok_empty()
            }
            Err(AckError::Unknown) => BrokerResponse::error(format!("no reservation for id {id}")),
        },
        BrokerRequest::Cancel { id } => {
            state.cancel(&id);
            info!(%id, "canceled envelope");
            BrokerResponse::ok_empty()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shell_broker_proto::Envelope;

    #[test]
    fn push_then_pop_then_ack_all_respond_ok() {
        let state = BrokerState::new();
        let push = dispatch(&state, BrokerRequest::Push(Envelope { id: "a".into(), priority: 1, payload: json!(null) }));
        assert!(push.is_ok());

        let pop = dispatch(&state, BrokerRequest::Pop);
        assert!(pop.is_ok());

        let ack = dispatch(&state, BrokerRequest::Ack { id: "a".into() });
        assert!(ack.is_ok());
    }

    #[test]
    fn pop_on_empty_queue_responds_empty() {
        let state = BrokerState::new();
        let pop = dispatch(&state, BrokerRequest::Pop);
        assert!(pop.is_empty());
    }

    #[test]
    fn push_collision_responds_error() {
        let state = BrokerState::new();
        dispatch(&state, BrokerRequest::Push(Envelope { id: "a".into(), priority: 1, payload: json!(null) }));
        let second = dispatch(&state, BrokerRequest::Push(Envelope { id: "a".into(), priority: 9, payload: json!(null) }));
        assert_eq!(second.status, shell_broker_proto::ResponseStatus::Error);
    }

    #[test]
    fn ack_of_unknown_id_responds_error() {
        let state = BrokerState::new();
        let resp = dispatch(&state, BrokerRequest::Ack { id: "ghost".into() });
        assert_eq!(resp.status, shell_broker_proto::ResponseStatus::Error);
    }

    #[test]
    fn cancel_of_unknown_id_responds_ok() {
        let state = BrokerState::new();
        let resp = dispatch(&state, BrokerRequest::Cancel { id: "ghost".into() });
        assert!(resp.is_ok());
    }
}
