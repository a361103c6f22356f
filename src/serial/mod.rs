//! Single-threaded cooperative serial scheduler. Each configured radio
//! device gets a lightweight reader task that does nothing but push raw
//! bytes into a channel; all frame assembly, decoding and meter dispatch
//! happens in the one task that owns `run_until_stopped`, preserving the
//! race-free "one thread owns core state" model. Grounded on the
//! teacher's per-subsystem `XxxManager::new()` / `start_thread()` pattern.
pub mod dongle;

use crate::wmbus::frame::FrameAssembler;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::sync::Notify;
use tokio_serial::SerialPortBuilderExt;

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug)]
pub struct RawChunk {
    pub device_name: String,
    pub bytes: Vec<u8>,
}

/// Opens a device and spawns its dumb byte-forwarding reader task. The
/// returned task does no parsing; it only feeds `tx`.
pub fn spawn_device_reader(
    device_name: String,
    path: &str,
    baud_rate: u32,
    tx: Sender<RawChunk>,
) -> Result<(), SerialError> {
    let mut port = tokio_serial::new(path, baud_rate)
        .open_native_async()
        .map_err(|e| SerialError::Open {
            path: path.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;

    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        loop {
            match port.read(&mut buf).await {
                Ok(0) => {
                    warn!("serial device {device_name} closed");
                    break;
                }
                Ok(n) => {
                    if tx
                        .send(RawChunk {
                            device_name: device_name.clone(),
                            bytes: buf[..n].to_vec(),
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    error!("serial read error on {device_name}: {e}");
                    break;
                }
            }
        }
    });

    Ok(())
}

/// The single cooperative loop: collects raw chunks from every device's
/// reader task, assembles complete frames per device, and hands each
/// frame to `on_frame` — this is the only place telegram processing runs.
pub struct SerialManager {
    receiver: Receiver<RawChunk>,
    assemblers: std::collections::HashMap<String, FrameAssembler>,
    stop: Arc<Notify>,
    check_interval: Duration,
}

impl SerialManager {
    pub fn new(check_interval: Duration) -> (Self, Sender<RawChunk>, Arc<Notify>) {
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let stop = Arc::new(Notify::new());
        (
            SerialManager {
                receiver: rx,
                assemblers: std::collections::HashMap::new(),
                stop: stop.clone(),
                check_interval,
            },
            tx,
            stop,
        )
    }

    pub async fn run_until_stopped<F>(&mut self, mut on_frame: F)
    where
        F: FnMut(&str, Vec<u8>),
    {
        let mut status_timer = tokio::time::interval(self.check_interval);
        info!("serial manager running");
        loop {
            tokio::select! {
                chunk = self.receiver.recv() => {
                    match chunk {
                        Some(chunk) => {
                            let assembler = self
                                .assemblers
                                .entry(chunk.device_name.clone())
                                .or_insert_with(FrameAssembler::new);
                            for frame in assembler.feed(&chunk.bytes) {
                                on_frame(&chunk.device_name, frame);
                            }
                        }
                        None => {
                            warn!("all serial reader tasks exited");
                            break;
                        }
                    }
                }
                _ = status_timer.tick() => {
                    debug_status(&self.assemblers);
                }
                _ = self.stop.notified() => {
                    info!("serial manager received stop signal");
                    break;
                }
            }
        }
    }
}

fn debug_status(assemblers: &std::collections::HashMap<String, FrameAssembler>) {
    log::debug!("{} device(s) active", assemblers.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_notify_ends_the_loop_without_any_devices() {
        let (mut manager, _tx, stop) = SerialManager::new(Duration::from_millis(50));
        let stop2 = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            stop2.notify_one();
        });
        manager.run_until_stopped(|_, _| {}).await;
    }

    #[tokio::test]
    async fn a_fed_chunk_assembles_into_a_complete_frame() {
        let (mut manager, tx, stop) = SerialManager::new(Duration::from_secs(60));
        tx.send(RawChunk { device_name: "dev0".to_string(), bytes: vec![0x02, 0xAA, 0xBB] })
            .await
            .unwrap();
        let stop2 = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            stop2.notify_one();
        });
        let mut frames = Vec::new();
        manager
            .run_until_stopped(|_name, frame| frames.push(frame))
            .await;
        assert_eq!(frames, vec![vec![0x02, 0xAA, 0xBB]]);
    }
}
