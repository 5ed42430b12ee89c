use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use sightguide_common::detection::{parse_detection_message, Detection};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::RemoteError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// What the detection socket reported.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// One answered frame; `None` when nothing was detected.
    Detection(Option<Detection>),
    Closed,
    Error(String),
}

/// Spoken line for a socket detection.
pub fn narration(detection: &Detection) -> String {
    format!("{} detected at {:.1} centimeters", detection.class, detection.depth)
}

/// Connection to the streaming detection endpoint.
pub struct DetectionStream;

impl DetectionStream {
    /// Open the socket. Inbound messages arrive on the returned receiver; the
    /// receiver yields `Closed` once and then ends. There is no reconnect.
    pub async fn connect(url: &str) -> Result<(DetectionSender, mpsc::Receiver<SocketEvent>), RemoteError> {
        let (socket, _) = connect_async(url).await?;
        info!(url, "detection socket opened");
        let (sink, mut stream) = socket.split();
        let (tx, rx) = mpsc::channel(32);

        let reader = tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "detection socket close frame");
                        break;
                    }
                    Ok(message) if message.is_text() => match message.to_text() {
                        Ok(text) => match parse_detection_message(text) {
                            Ok(detection) => SocketEvent::Detection(detection),
                            Err(e) => {
                                warn!(error = %e, "unparseable detection message");
                                continue;
                            }
                        },
                        Err(e) => SocketEvent::Error(e.to_string()),
                    },
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(error = %e, "detection socket error");
                        let _ = tx.send(SocketEvent::Error(e.to_string())).await;
                        break;
                    }
                };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            info!("detection socket closed");
            let _ = tx.send(SocketEvent::Closed).await;
        });

        Ok((DetectionSender { sink, reader }, rx))
    }
}

/// Outbound half: frames go out as bare base64 text.
pub struct DetectionSender {
    sink: SplitSink<Socket, Message>,
    reader: JoinHandle<()>,
}

impl DetectionSender {
    pub async fn send_frame(&mut self, base64: String) -> Result<(), RemoteError> {
        if self.reader.is_finished() {
            return Err(RemoteError::Closed);
        }
        self.sink.send(Message::text(base64)).await?;
        Ok(())
    }

    pub async fn close(mut self) {
        if let Err(e) = self.sink.close().await {
            debug!(error = %e, "detection socket close failed");
        }
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::{Message as AxumMessage, WebSocket, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    async fn answer(mut socket: WebSocket) {
        while let Some(Ok(AxumMessage::Text(text))) = socket.recv().await {
            let reply = match text.as_str() {
                "empty" => "{}".to_string(),
                "bye" => {
                    let _ = socket.send(AxumMessage::Close(None)).await;
                    return;
                }
                _ => r#"{"box":[1,2,30,40],"class":"car","confidence":0.91,"depth":153.27}"#.to_string(),
            };
            if socket.send(AxumMessage::Text(reply)).await.is_err() {
                return;
            }
        }
    }

    async fn serve() -> String {
        let app = Router::new().route(
            "/ws/detect-objects",
            get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(answer).into_response() }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("ws://{addr}/ws/detect-objects")
    }

    #[tokio::test]
    async fn frames_are_answered_with_detections() {
        let url = serve().await;
        let (mut sender, mut events) = DetectionStream::connect(&url).await.unwrap();

        sender.send_frame("aGVsbG8=".into()).await.unwrap();
        let SocketEvent::Detection(Some(detection)) = events.recv().await.unwrap() else {
            panic!("expected a detection");
        };
        assert_eq!(detection.class, "car");
        assert_eq!(narration(&detection), "car detected at 153.3 centimeters");

        sender.send_frame("empty".into()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Detection(None));

        sender.send_frame("bye".into()).await.unwrap();
        assert_eq!(events.recv().await.unwrap(), SocketEvent::Closed);
        assert!(events.recv().await.is_none());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = DetectionStream::connect(&format!("ws://{addr}/ws/detect-objects")).await;
        assert!(result.is_err());
    }
}
