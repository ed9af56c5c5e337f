//! MK2 adapter client
//!
//! Owns the serial stream once the line is configured: a background task
//! reads bytes, runs them through the [`FrameScanner`] and fans validated
//! frames out over a broadcast channel; [`Mk2Client::transact`] serializes
//! requests on the half-duplex wire and matches the response frame.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use tokio_serial::SerialStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::error::{EssrvError, Result};
use crate::protocol::codec::{hex, Frame};
use crate::protocol::frame_reader::FrameScanner;

/// A request that has not been answered within this window has been lost;
/// the VE.Bus replies well under a second.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

/// The adapter broadcasts its version periodically; if nothing valid
/// arrives within this window the line is dead.
const SYNC_TIMEOUT: Duration = Duration::from_secs(50);

const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Client side of the MK2/MK3 framed protocol.
pub struct Mk2Client {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    /// Serializes transactions: the wire is half-duplex by convention, so
    /// only one request may be in flight.
    command_mutex: Mutex<()>,
    frames: broadcast::Sender<Frame>,
}

impl Mk2Client {
    /// Start the frame reader on a configured serial stream and wait for
    /// initial synchronization (first validated frame, usually the version
    /// broadcast).
    pub async fn start(stream: SerialStream, cancel: &CancellationToken) -> Result<Arc<Self>> {
        let (reader, writer) = tokio::io::split(stream);
        Self::start_io(reader, writer, cancel).await
    }

    /// I/O-generic constructor, also used by the wire tests.
    pub async fn start_io<R, W>(reader: R, writer: W, cancel: &CancellationToken) -> Result<Arc<Self>>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let (sync_tx, mut sync_rx) = watch::channel(false);

        let client = Arc::new(Self {
            writer: Mutex::new(Box::new(writer)),
            command_mutex: Mutex::new(()),
            frames: frames.clone(),
        });

        tokio::spawn(read_task(reader, frames, sync_tx, cancel.clone()));

        let synchronized = async {
            while !*sync_rx.borrow_and_update() {
                sync_rx
                    .changed()
                    .await
                    .map_err(|_| EssrvError::io("frame reader terminated during initial sync"))?;
            }
            Ok(())
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(EssrvError::Cancelled),
            result = tokio::time::timeout(SYNC_TIMEOUT, synchronized) => match result {
                Ok(inner) => inner.map(|()| client),
                Err(_) => Err(EssrvError::timeout("could not do initial sync")),
            },
        }
    }

    /// Write `request` and return the first inbound frame `accept` maps to
    /// a value, dropping everything else. Holds the command mutex for the
    /// whole call.
    pub async fn transact<T, F>(
        &self,
        cancel: &CancellationToken,
        request: Vec<u8>,
        accept: F,
    ) -> Result<T>
    where
        F: FnMut(&Frame) -> Option<T>,
    {
        self.transact_with_prefix(cancel, None, request, accept).await
    }

    /// Like [`transact`](Self::transact) but first writes `prefix`, a frame
    /// that gets no reply of its own. Both frames go out under one command
    /// mutex acquisition so nothing can interleave on the wire between
    /// them (the RAM/setting write sequences require this).
    pub async fn transact_with_prefix<T, F>(
        &self,
        cancel: &CancellationToken,
        prefix: Option<Vec<u8>>,
        request: Vec<u8>,
        mut accept: F,
    ) -> Result<T>
    where
        F: FnMut(&Frame) -> Option<T>,
    {
        let _guard = self.command_mutex.lock().await;

        // Subscribe before writing so the response cannot slip past.
        let mut inbound = self.frames.subscribe();

        if let Some(frame) = prefix {
            self.write(&frame).await?;
        }
        self.write(&request).await?;

        let deadline = tokio::time::sleep(RESPONSE_TIMEOUT);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(EssrvError::Cancelled),
                _ = &mut deadline => {
                    return Err(EssrvError::timeout("timed out waiting for response"));
                }
                received = inbound.recv() => match received {
                    Ok(frame) => {
                        if let Some(value) = accept(&frame) {
                            return Ok(value);
                        }
                        trace!(frame = %hex(frame.as_bytes()), "dropping while waiting for response");
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("response listener lagged, {missed} frames missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(EssrvError::io("frame reader terminated"));
                    }
                },
            }
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await?;
        debug!(data = %hex(data), len = data.len(), "sent bytes");
        Ok(())
    }
}

/// Reads the serial stream, frames it and fans frames out. Broadcast 'V'
/// frames prove synchronization but are not published to request listeners.
async fn read_task<R>(
    mut reader: R,
    frames: broadcast::Sender<Frame>,
    sync_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut scanner = FrameScanner::new();
    let mut chunk = [0u8; 1024];

    loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break,
            result = reader.read(&mut chunk) => match result {
                Ok(0) => {
                    error!("serial stream closed");
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("serial read failed: {e}");
                    break;
                }
            },
        };

        trace!(data = %hex(&chunk[..n]), len = n, "read bytes");
        let complete = scanner.push(&chunk[..n]);

        if scanner.is_synchronized() {
            sync_tx.send_if_modified(|synced| {
                if *synced {
                    false
                } else {
                    *synced = true;
                    true
                }
            });
        }

        for frame in complete {
            if frame.is_version_broadcast() {
                debug!(data = %hex(frame.data()), "received broadcast frame 'V'");
            } else {
                debug!(data = %hex(frame.as_bytes()), "received frame");
                let _ = frames.send(frame);
            }
        }
    }
    debug!("frame reader exits");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::encode_command;
    use crate::protocol::constants::{CMD_ADDRESS, CMD_VERSION};
    use tokio::io::DuplexStream;

    fn version_broadcast() -> Vec<u8> {
        encode_command(CMD_VERSION, &[0x93, 0x20, 0x12, 0x00, 0x00])
    }

    /// Client plus the device end of the fake serial line. The broadcast is
    /// written first so `start_io` sees its initial synchronization.
    async fn started_client(cancel: &CancellationToken) -> (Arc<Mk2Client>, DuplexStream) {
        let (client_side, mut device_side) = tokio::io::duplex(4096);
        device_side.write_all(&version_broadcast()).await.unwrap();

        let (reader, writer) = tokio::io::split(client_side);
        let client = Mk2Client::start_io(reader, writer, cancel).await.unwrap();
        (client, device_side)
    }

    #[tokio::test(start_paused = true)]
    async fn test_transact_matches_response() {
        let cancel = CancellationToken::new();
        let (client, mut device) = started_client(&cancel).await;

        let request = encode_command(CMD_ADDRESS, &[0x01, 0x00]);
        let expected = request.clone();

        let device_task = tokio::spawn(async move {
            let mut buf = vec![0u8; expected.len()];
            device.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, expected);
            // Unrelated broadcast first, then the echo reply.
            device.write_all(&version_broadcast()).await.unwrap();
            device
                .write_all(&encode_command(CMD_ADDRESS, &[0x01, 0x00]))
                .await
                .unwrap();
            device
        });

        let frame = client
            .transact(&cancel, request, |frame| {
                (frame.command() == CMD_ADDRESS).then(|| frame.clone())
            })
            .await
            .unwrap();
        assert_eq!(frame.data(), &[0x01, 0x00]);

        device_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transact_drops_non_matching_frames() {
        let cancel = CancellationToken::new();
        let (client, mut device) = started_client(&cancel).await;

        let device_task = tokio::spawn(async move {
            let mut buf = [0u8; 6];
            device.read_exact(&mut buf).await.unwrap();
            // A 'W' frame the accept predicate does not match, then the
            // 'A' frame it does.
            device
                .write_all(&encode_command(b'W', &[0x85, 0x00, 0x00]))
                .await
                .unwrap();
            device
                .write_all(&encode_command(CMD_ADDRESS, &[0x00, 0x03]))
                .await
                .unwrap();
            device
        });

        let frame = client
            .transact(
                &cancel,
                encode_command(CMD_ADDRESS, &[0x00, 0x00]),
                |frame| (frame.command() == CMD_ADDRESS).then(|| frame.clone()),
            )
            .await
            .unwrap();
        assert_eq!(frame.data(), &[0x00, 0x03]);

        device_task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_transact_times_out_without_response() {
        let cancel = CancellationToken::new();
        let (client, _device) = started_client(&cancel).await;

        let result = client
            .transact(
                &cancel,
                encode_command(CMD_ADDRESS, &[0x00, 0x00]),
                |frame| (frame.command() == CMD_ADDRESS).then(|| frame.clone()),
            )
            .await;
        assert!(matches!(result, Err(EssrvError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transact_observes_cancellation() {
        let cancel = CancellationToken::new();
        let (client, _device) = started_client(&cancel).await;

        let transact_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            client
                .transact(
                    &transact_cancel,
                    encode_command(CMD_ADDRESS, &[0x00, 0x00]),
                    |frame| (frame.command() == CMD_ADDRESS).then(|| frame.clone()),
                )
                .await
        });

        tokio::task::yield_now().await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(matches!(result, Err(EssrvError::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_io_fails_without_sync() {
        let cancel = CancellationToken::new();
        let (client_side, _device_side) = tokio::io::duplex(4096);
        let (reader, writer) = tokio::io::split(client_side);

        // No device traffic at all: the 50 s sync window elapses.
        let result = Mk2Client::start_io(reader, writer, &cancel).await;
        assert!(matches!(result, Err(EssrvError::Timeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcasts_are_not_published_to_listeners() {
        let cancel = CancellationToken::new();
        let (client, mut device) = started_client(&cancel).await;

        let device_task = tokio::spawn(async move {
            let mut buf = [0u8; 6];
            device.read_exact(&mut buf).await.unwrap();
            // Only broadcasts: the transaction must time out instead of
            // matching one.
            for _ in 0..3 {
                device.write_all(&version_broadcast()).await.unwrap();
            }
            device
        });

        let result = client
            .transact(
                &cancel,
                encode_command(CMD_ADDRESS, &[0x00, 0x00]),
                |frame| Some(frame.clone()),
            )
            .await;
        assert!(matches!(result, Err(EssrvError::Timeout(_))));

        device_task.await.unwrap();
    }
}
