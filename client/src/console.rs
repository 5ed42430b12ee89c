use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// Lines typed on the terminal, shared by the command pump and the recognizer.
pub type ConsoleLines = Arc<Mutex<mpsc::Receiver<String>>>;

/// Spawn a reader on stdin. The channel closes when stdin does.
pub fn spawn_stdin_reader() -> ConsoleLines {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
        debug!("stdin closed");
    });
    Arc::new(Mutex::new(rx))
}

/// Wrap an existing channel, used by tests to script input.
pub fn from_receiver(rx: mpsc::Receiver<String>) -> ConsoleLines {
    Arc::new(Mutex::new(rx))
}

/// Wait for the next line; `None` once input is closed.
pub async fn next_line(lines: &ConsoleLines) -> Option<String> {
    lines.lock().await.recv().await
}
