//! WebSocket adapters for the distributors and the signaling loop

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::stream::SplitSink;
use futures::{Sink, SinkExt, Stream, StreamExt, future};

use crate::stream::ClientEvent;

type WsSink = SplitSink<WebSocket, Message>;

/// Split a socket into its outbound sink and inbound client events. Ping and pong frames are
/// answered by the socket itself and filtered out here.
pub(super) fn split(socket: WebSocket) -> (WsSink, impl Stream<Item = Result<ClientEvent, axum::Error>> + Unpin) {
    let (sink, stream) = socket.split();
    let events = stream.filter_map(|msg| {
        future::ready(match msg {
            Ok(Message::Text(text)) => Some(Ok(ClientEvent::Text(text.to_string()))),
            Ok(Message::Binary(data)) => Some(Ok(ClientEvent::Binary(data))),
            Ok(Message::Close(_)) => Some(Ok(ClientEvent::Close)),
            Ok(Message::Ping(_) | Message::Pong(_)) => None,
            Err(e) => Some(Err(e)),
        })
    });
    (sink, events)
}

pub(super) fn binary_sink(sink: WsSink) -> impl Sink<Bytes, Error = axum::Error> + Unpin {
    sink.with(|data: Bytes| future::ready(Ok::<_, axum::Error>(Message::Binary(data))))
}

pub(super) fn text_sink(sink: WsSink) -> impl Sink<String, Error = axum::Error> + Unpin {
    sink.with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))))
}
