//! WebSocket transport: upgrades an HTTP connection into a
//! [`session::WsSession`] actor.

pub mod session;

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use range_sync_core::ConnectionHandler;

pub use session::{ActixSendHandle, OutboundFrame, WsSession};

pub async fn websocket_handler(
    req: HttpRequest,
    stream: web::Payload,
    handler: web::Data<ConnectionHandler>,
) -> Result<HttpResponse, Error> {
    ws::start(WsSession::new(handler.get_ref().clone()), &req, stream)
}
