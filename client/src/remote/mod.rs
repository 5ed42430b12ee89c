pub mod http;
pub mod ws;

pub use http::RecognitionClient;
pub use ws::{DetectionSender, DetectionStream, SocketEvent};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server responded with status {0}")]
    Status(u16),
    #[error("websocket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("socket is closed")]
    Closed,
}
