//! WebSocket proxying between clients and backend instances.
//!
//! The upstream instance is resolved through the load balancer BEFORE the
//! 101 upgrade is sent, so "no healthy instance" is still an ordinary 503
//! JSON response. After the upgrade, frames are pumped in both directions
//! until either side closes; close frames are forwarded so shutdown
//! semantics survive the hop.

use axum::extract::ws::{self, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite};

use crate::core::{error::GatewayError, load_balancer::LoadBalancer};

/// Resolve an instance for `service` and upgrade the connection,
/// bridging it to `ws://{instance}{path}`.
pub fn proxy_upgrade(
    balancer: &LoadBalancer,
    service: &str,
    path_and_query: &str,
    upgrade: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
    let instance = balancer
        .select(service)
        .ok_or_else(|| GatewayError::ServiceUnavailable {
            service: service.to_string(),
        })?;

    let target = format!("ws://{}{}", instance.address(), path_and_query);
    let service = service.to_string();
    let instance_id = instance.id;

    tracing::info!(
        service = %service,
        instance.id = %instance_id,
        target = %target,
        "upgrading websocket connection"
    );

    Ok(upgrade.on_upgrade(move |client| async move {
        bridge(client, &target, &service, &instance_id).await;
    }))
}

/// Connect upstream and pump frames both ways until either side closes.
async fn bridge(mut client: WebSocket, target: &str, service: &str, instance_id: &str) {
    let upstream = match connect_async(target).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            tracing::error!(
                service = %service,
                instance.id = %instance_id,
                error = %err,
                "upstream websocket connect failed"
            );
            let _ = client
                .send(ws::Message::Close(Some(ws::CloseFrame {
                    code: 1011,
                    reason: ws::Utf8Bytes::from_static("upstream unavailable"),
                })))
                .await;
            return;
        }
    };

    let (mut upstream_tx, mut upstream_rx) = upstream.split();
    let (mut client_tx, mut client_rx) = client.split();

    loop {
        tokio::select! {
            from_client = client_rx.next() => {
                match from_client {
                    Some(Ok(msg)) => {
                        let close = matches!(msg, ws::Message::Close(_));
                        if upstream_tx.send(client_to_upstream(msg)).await.is_err() || close {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(service = %service, error = %err, "client websocket error");
                        let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                    None => {
                        let _ = upstream_tx.send(tungstenite::Message::Close(None)).await;
                        break;
                    }
                }
            }
            from_upstream = upstream_rx.next() => {
                match from_upstream {
                    Some(Ok(msg)) => {
                        let close = matches!(msg, tungstenite::Message::Close(_));
                        let Some(forwarded) = upstream_to_client(msg) else { continue };
                        if client_tx.send(forwarded).await.is_err() || close {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        tracing::debug!(service = %service, error = %err, "upstream websocket error");
                        let _ = client_tx.send(ws::Message::Close(None)).await;
                        break;
                    }
                    None => {
                        let _ = client_tx.send(ws::Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(service = %service, instance.id = %instance_id, "websocket bridge closed");
}

fn client_to_upstream(msg: ws::Message) -> tungstenite::Message {
    match msg {
        ws::Message::Text(text) => tungstenite::Message::Text(text.as_str().into()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => tungstenite::Message::Close(frame.map(|f| {
            tungstenite::protocol::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }
        })),
    }
}

/// Tungstenite's raw `Frame` variant never appears when reading a
/// complete-message stream; it is skipped rather than forwarded.
fn upstream_to_client(msg: tungstenite::Message) -> Option<ws::Message> {
    match msg {
        tungstenite::Message::Text(text) => Some(ws::Message::Text(text.as_str().into())),
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        tungstenite::Message::Ping(data) => Some(ws::Message::Ping(data)),
        tungstenite::Message::Pong(data) => Some(ws::Message::Pong(data)),
        tungstenite::Message::Close(frame) => Some(ws::Message::Close(frame.map(|f| {
            ws::CloseFrame {
                code: f.code.into(),
                reason: f.reason.as_str().into(),
            }
        }))),
        tungstenite::Message::Frame(_) => None,
    }
}
