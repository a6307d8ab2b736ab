use anyhow::{Context, Result};
use common::{COMMAND_TERMINATOR, Command, MAX_COMMAND_BYTES};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::net::UnixListener;

use crate::events::{ControlEvent, EventSender};

/// Bind the command socket, replacing a stale one left by a crash.
pub fn bind(socket_path: &Path) -> Result<UnixListener> {
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    if socket_path.exists() {
        std::fs::remove_file(socket_path)
            .with_context(|| format!("Failed to remove stale {}", socket_path.display()))?;
    }

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("Failed to bind {}", socket_path.display()))?;
    log::info!("IPC server listening on: {}", socket_path.display());
    Ok(listener)
}

pub fn unbind(socket_path: &Path) {
    match std::fs::remove_file(socket_path) {
        Ok(()) => log::debug!("Removed {}", socket_path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Failed to remove {}: {}", socket_path.display(), e),
    }
}

/// Accept connections forever, forwarding decoded commands in arrival order.
pub async fn serve(listener: UnixListener, events: EventSender) {
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &events).await {
                        log::debug!("Error handling client: {}", e);
                    }
                });
            }
            Err(e) => {
                log::error!("Error accepting connection: {}", e);
            }
        }
    }
}

/// Read terminated records until EOF. Nothing is ever written back.
pub async fn handle_connection<R>(stream: R, events: &EventSender) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut record = Vec::new();
    let limit = (MAX_COMMAND_BYTES + 1) as u64;

    loop {
        record.clear();
        let read = (&mut reader)
            .take(limit)
            .read_until(COMMAND_TERMINATOR, &mut record)
            .await?;
        if read == 0 {
            return Ok(());
        }

        let terminated = record.last() == Some(&COMMAND_TERMINATOR);
        if !terminated && read as u64 >= limit {
            log::warn!(
                "Dropping connection: command exceeds {} bytes",
                MAX_COMMAND_BYTES
            );
            return Ok(());
        }

        // An unterminated tail at EOF is still a complete write.
        match Command::decode(&record) {
            Ok(command) => {
                log::debug!("Received command: {:?}", command);
                if events.send(ControlEvent::Command(command)).is_err() {
                    log::debug!("Control loop closed, dropping connection");
                    return Ok(());
                }
            }
            Err(e) => log::debug!("Ignoring malformed command: {}", e),
        }

        if !terminated {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::DisplayTarget;
    use std::path::PathBuf;
    use tokio::io::AsyncWriteExt;
    use tokio::net::UnixStream;

    use crate::events;

    fn drain(rx: &mut events::EventReceiver) -> Vec<ControlEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_multiple_records_in_order() {
        let (tx, mut rx) = events::channel();
        let mut input = Command::Pause.encode().unwrap();
        input.extend(
            Command::SetWallpaper {
                path: PathBuf::from("/w/a.gif"),
                display: DisplayTarget::Index(2),
            }
            .encode()
            .unwrap(),
        );

        handle_connection(input.as_slice(), &tx).await.unwrap();

        let received = drain(&mut rx);
        assert_eq!(received.len(), 2);
        assert_eq!(received[0], ControlEvent::Command(Command::Pause));
        assert!(matches!(
            &received[1],
            ControlEvent::Command(Command::SetWallpaper { display: DisplayTarget::Index(2), .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_skipped() {
        let (tx, mut rx) = events::channel();
        let mut input = b"{not json}\n\n".to_vec();
        input.extend(Command::Resume.encode().unwrap());

        handle_connection(input.as_slice(), &tx).await.unwrap();
        assert_eq!(drain(&mut rx), vec![ControlEvent::Command(Command::Resume)]);
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_accepted() {
        let (tx, mut rx) = events::channel();
        handle_connection(&br#""Quit""#[..], &tx).await.unwrap();
        assert_eq!(drain(&mut rx), vec![ControlEvent::Command(Command::Quit)]);
    }

    #[tokio::test]
    async fn test_oversized_record_closes_connection() {
        let (tx, mut rx) = events::channel();
        let mut input = vec![b'x'; MAX_COMMAND_BYTES + 10];
        input.push(COMMAND_TERMINATOR);
        input.extend(Command::Pause.encode().unwrap());

        handle_connection(input.as_slice(), &tx).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_socket_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("backdrop.sock");
        let (tx, mut rx) = events::channel();

        let listener = bind(&socket).unwrap();
        let server = tokio::spawn(serve(listener, tx));

        let mut client = UnixStream::connect(&socket).await.unwrap();
        client
            .write_all(&Command::SetAlwaysOn { enabled: true }.encode().unwrap())
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(
            event,
            Some(ControlEvent::Command(Command::SetAlwaysOn { enabled: true }))
        );

        server.abort();
        unbind(&socket);
        assert!(!socket.exists());
    }

    #[test]
    fn test_bind_replaces_stale_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("backdrop.sock");
        std::fs::write(&socket, b"").unwrap();

        let runtime = tokio::runtime::Runtime::new().unwrap();
        let _guard = runtime.enter();
        assert!(bind(&socket).is_ok());
    }
}
