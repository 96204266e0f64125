//! Per-connection WebSocket actor: one [`WsSession`] per accepted
//! socket, `StreamHandler` over `ws::Message`. It does no
//! heartbeat/buffering of its own — the protocol here has no
//! ping/pong contract beyond the WebSocket frame level, and the saga
//! engine already handles a dropped connection via
//! [`range_sync_core::ConnectionLossHook`].
//!
//! Every inbound text frame is handed off to `ConnectionHandler` on a
//! spawned task rather than awaited inline, since actor message
//! handlers are synchronous; the actor's own address is fed back in
//! as the `SendHandle` so the core crate can push commands out without
//! ever knowing an actix actor exists on the other end.

use std::sync::Arc;

use actix::{Actor, Addr, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use range_sync_core::{ConnectionError, ConnectionHandler, SendHandle};

/// A JSON envelope to be written to the client. Delivered via
/// `Addr::try_send`, never blocking the sender.
#[derive(Message)]
#[rtype(result = "()")]
pub struct OutboundFrame(pub Value);

#[derive(Message)]
#[rtype(result = "()")]
struct RegistrationSucceeded(String);

#[derive(Message)]
#[rtype(result = "()")]
struct RegistrationFailed(String);

/// Adapts an actor address into the core crate's `SendHandle` seam.
/// `try_send` never blocks; a full or closed mailbox surfaces as an
/// `Err` the same way a broken socket write would.
pub struct ActixSendHandle(pub Addr<WsSession>);

#[async_trait]
impl SendHandle for ActixSendHandle {
    async fn send(&self, envelope: Value) -> Result<(), String> {
        self.0.try_send(OutboundFrame(envelope)).map_err(|e| e.to_string())
    }
}

pub struct WsSession {
    registered_id: Option<String>,
    handler: ConnectionHandler,
}

impl WsSession {
    pub fn new(handler: ConnectionHandler) -> Self {
        WsSession {
            registered_id: None,
            handler,
        }
    }

    fn handle_text_frame(&mut self, raw: String, ctx: &mut ws::WebsocketContext<Self>) {
        match &self.registered_id {
            None => {
                let handler = self.handler.clone();
                let addr = ctx.address();
                actix::spawn(async move {
                    let send_handle: Arc<dyn SendHandle> = Arc::new(ActixSendHandle(addr.clone()));
                    match handler.register_first_frame(&raw, send_handle).await {
                        Ok(info) => addr.do_send(RegistrationSucceeded(info.id)),
                        Err(ConnectionError::MalformedEnvelope(reason)) => {
                            addr.do_send(RegistrationFailed(reason))
                        }
                        Err(ConnectionError::MissingRegistration) => {
                            addr.do_send(RegistrationFailed(
                                "first frame must be a register envelope".to_string(),
                            ))
                        }
                    }
                });
            }
            Some(id) => {
                let handler = self.handler.clone();
                let id = id.clone();
                actix::spawn(async move {
                    handler.handle_frame(&id, &raw).await;
                });
            }
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(id) = self.registered_id.take() {
            let handler = self.handler.clone();
            actix::spawn(async move {
                handler.handle_disconnect(&id).await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_text_frame(text.to_string(), ctx);
            }
            Ok(ws::Message::Ping(bytes)) => {
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Binary(bin)) => {
                debug!(bytes = bin.len(), "ignoring unexpected binary frame");
            }
            Ok(ws::Message::Close(reason)) => {
                info!(simulation_id = ?self.registered_id, ?reason, "client closed connection");
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                warn!(error = %e, "websocket protocol error, closing connection");
                ctx.stop();
            }
        }
    }
}

impl Handler<OutboundFrame> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: OutboundFrame, ctx: &mut Self::Context) -> Self::Result {
        match serde_json::to_string(&msg.0) {
            Ok(text) => ctx.text(text),
            Err(e) => warn!(error = %e, "failed to serialize outbound envelope"),
        }
    }
}

impl Handler<RegistrationSucceeded> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: RegistrationSucceeded, ctx: &mut Self::Context) -> Self::Result {
        info!(simulation_id = %msg.0, "simulation registered");
        self.registered_id = Some(msg.0);
        let ack = serde_json::to_value(range_sync_core::OutboundEnvelope::registered_ok()).unwrap();
        ctx.text(ack.to_string());
    }
}

impl Handler<RegistrationFailed> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: RegistrationFailed, ctx: &mut Self::Context) -> Self::Result {
        warn!(reason = %msg.0, "registration failed, closing connection");
        ctx.stop();
    }
}
