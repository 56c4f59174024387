//! Protocol reader: pumps decoded messages into the handler until the
//! stream ends, plus the outbound writer task.

use crate::codec::{encode, MessageStream};
use crate::error::IndiError;
use crate::events::DeviceEvent;
use crate::handler::ProtocolHandler;
use crate::protocol::IndiMessage;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbound pump task. Decodes messages off the transport and hands each
/// one to the handler synchronously, preserving wire order.
pub struct ProtocolReader {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProtocolReader {
    /// Spawn the pump. It runs until clean EOF, a transport error, or
    /// `close()`. EOF and transport errors emit `ConnectionClosed`; a
    /// graceful close emits nothing.
    pub fn start<R>(input: R, handler: Arc<ProtocolHandler>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut stream = MessageStream::new(input);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("reader closed");
                        return;
                    }
                    result = stream.next_message() => match result {
                        Ok(Some(message)) => {
                            handler.handle_message(Arc::new(message));
                        }
                        Ok(None) => {
                            info!("connection closed by server");
                            handler.sender().fire(DeviceEvent::ConnectionClosed);
                            return;
                        }
                        Err(IndiError::MalformedMessage(reason)) => {
                            // A single bad message never stops the pump.
                            warn!(%reason, "skipping malformed message");
                        }
                        Err(err) => {
                            warn!(%err, "transport error, stopping reader");
                            handler.sender().fire(DeviceEvent::ConnectionClosed);
                            return;
                        }
                    }
                }
            }
        });

        Self {
            shutdown: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Stop the pump and wait for it. Idempotent; emits no event.
    pub async fn close(&self) {
        let shutdown = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(tx) = shutdown {
            let _ = tx.send(());
        }

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

/// Spawn the outbound writer: encodes queued commands and writes them to
/// the transport. Stops when the queue closes or the transport fails.
pub fn spawn_writer<W>(
    mut output: W,
    mut commands: mpsc::UnboundedReceiver<IndiMessage>,
) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(message) = commands.recv().await {
            let xml = match encode(&message) {
                Ok(xml) => xml,
                Err(err) => {
                    warn!(%err, "failed to encode outbound message");
                    continue;
                }
            };

            debug!(vector = ?message.vector_name(), "sending message");

            if let Err(err) = output.write_all(xml.as_bytes()).await {
                warn!(%err, "transport write failed, stopping writer");
                return;
            }
            if let Err(err) = output.flush().await {
                warn!(%err, "transport flush failed, stopping writer");
                return;
            }
        }

        debug!("writer closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverTable;
    use crate::events::DeviceInterface;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::timeout;

    const DRIVER_INFO_XML: &str = "<defTextVector device=\"Telescope1\" name=\"DRIVER_INFO\" \
         state=\"Idle\" perm=\"ro\" timestamp=\"2024-01-01T00:00:00\">\
         <defText name=\"DRIVER_NAME\">Telescope Simulator</defText>\
         <defText name=\"DRIVER_EXEC\">indi_simulator_telescope</defText>\
         </defTextVector>";

    /// Honors RUST_LOG when debugging a test run.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn recv_event(
        rx: &mut tokio::sync::broadcast::Receiver<DeviceEvent>,
    ) -> DeviceEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn test_reader_pumps_messages_into_handler() {
        init_tracing();
        let (handler, _outbound) = ProtocolHandler::new(DriverTable::default());
        let mut events = handler.subscribe();

        let (transport, mut remote) = tokio::io::duplex(4096);
        let _reader = ProtocolReader::start(transport, handler.clone());

        remote.write_all(DRIVER_INFO_XML.as_bytes()).await.unwrap();

        assert_eq!(
            recv_event(&mut events).await,
            DeviceEvent::Attached {
                device: "Telescope1".to_string(),
                interface: DeviceInterface::Mount,
            }
        );
        assert!(handler.mount("Telescope1").is_some());
    }

    #[tokio::test]
    async fn test_eof_emits_connection_closed() {
        init_tracing();
        let (handler, _outbound) = ProtocolHandler::new(DriverTable::default());
        let mut events = handler.subscribe();

        let (transport, remote) = tokio::io::duplex(4096);
        let _reader = ProtocolReader::start(transport, handler);

        drop(remote);

        assert_eq!(recv_event(&mut events).await, DeviceEvent::ConnectionClosed);
    }

    #[tokio::test]
    async fn test_graceful_close_emits_nothing() {
        init_tracing();
        let (handler, _outbound) = ProtocolHandler::new(DriverTable::default());
        let mut events = handler.subscribe();

        let (transport, _remote) = tokio::io::duplex(4096);
        let reader = ProtocolReader::start(transport, handler.clone());

        reader.close().await;
        reader.close().await;

        // The handler is still alive, so an empty channel means no event
        // was emitted rather than a dropped sender.
        assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
        drop(handler);
    }

    #[tokio::test]
    async fn test_unknown_elements_do_not_stop_the_pump() {
        init_tracing();
        let (handler, _outbound) = ProtocolHandler::new(DriverTable::default());
        let mut events = handler.subscribe();

        let (transport, mut remote) = tokio::io::duplex(4096);
        let _reader = ProtocolReader::start(transport, handler);

        let noise = "<setBLOBVector device=\"CCD1\" name=\"CCD1\" state=\"Ok\" \
             timestamp=\"2024-01-01T00:00:00\"><oneBLOB name=\"CCD1\">AAAA</oneBLOB>\
             </setBLOBVector>";
        remote.write_all(noise.as_bytes()).await.unwrap();
        remote.write_all(DRIVER_INFO_XML.as_bytes()).await.unwrap();

        assert_eq!(
            recv_event(&mut events).await,
            DeviceEvent::Attached {
                device: "Telescope1".to_string(),
                interface: DeviceInterface::Mount,
            }
        );
    }

    #[tokio::test]
    async fn test_writer_encodes_queued_commands() {
        init_tracing();
        let (handler, outbound) = ProtocolHandler::new(DriverTable::default());

        let (transport, mut remote) = tokio::io::duplex(4096);
        let _writer = spawn_writer(transport, outbound);

        handler.sender().send_new_switch("Telescope1", "CONNECTION", &[("CONNECT", true)]);

        let mut buf = vec![0u8; 4096];
        let n = timeout(Duration::from_secs(2), remote.read(&mut buf))
            .await
            .expect("timed out waiting for writer")
            .unwrap();
        let written = String::from_utf8_lossy(&buf[..n]);

        assert!(written.contains("newSwitchVector"));
        assert!(written.contains("device=\"Telescope1\""));
        assert!(written.contains(">On<"));
    }
}
