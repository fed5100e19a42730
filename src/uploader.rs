// Copyright PingCAP Inc. 2025.
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; version 2 of the License.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_channel::{Receiver, Sender};
use bytes::{Bytes, BytesMut};
use sha1::{Digest, Sha1};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::catalogue::pad_number;
use crate::store::{ObjectStore, Part, StoreError};
use crate::MEGABYTE;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("source read failed: {0}")]
    Source(#[from] std::io::Error),

    #[error("upload cancelled")]
    Cancelled,

    #[error("upload workers stopped unexpectedly")]
    WorkersStopped,

    #[error("abort failed: {abort} following {cause}")]
    AbortFailed {
        abort: Box<UploadError>,
        cause: Box<UploadError>,
    },
}

/// Summary of a completed upload.
#[derive(Debug, Clone)]
pub struct SendDetails {
    pub bucket: String,
    pub path: String,
    pub volumes: usize,
    pub parts: u64,
    pub bytes: u64,
    pub hash: Vec<u8>,
    pub duration: Duration,
}

impl fmt::Display for SendDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sent = self.bytes as f64 / MEGABYTE as f64;
        let rate = sent / self.duration.as_secs_f64().max(f64::EPSILON);

        writeln!(f, "Bucket: {}", self.bucket)?;
        writeln!(f, "Path: {}", self.path)?;
        writeln!(f, "Parts: {}", self.parts)?;
        writeln!(f, "Hash: {}", hex::encode(&self.hash))?;
        writeln!(f, "Sent: {sent:.2}")?;
        write!(f, "Rate: {rate:.2} MB/s")
    }
}

/// A reusable buffer slot cycling between the producer and the workers.
struct PartRequest {
    bucket: String,
    key: String,
    upload_id: String,
    volume: usize,
    part: u32,
    data: Bytes,
    response: Option<Part>,
}

impl PartRequest {
    fn empty() -> Self {
        Self {
            bucket: String::new(),
            key: String::new(),
            upload_id: String::new(),
            volume: 0,
            part: 0,
            data: Bytes::new(),
            response: None,
        }
    }
}

struct Volume {
    sequence: usize,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<Part>,
    part_count: u32,
    bytes: u64,
    hash: Sha1,
    completed: bool,
    aborted: bool,
}

struct Progress {
    start: Instant,
    parts: u64,
    bytes: u64,
    hash: Sha1,
}

enum Halt {
    Eof,
    Cause(UploadError),
    WorkersFailed,
}

/// Streams a source into volumes of multipart uploads under a key prefix.
///
/// One producer (the calling task) reads the source and owns the volumes
/// vector; `threads` workers upload parts. Buffers hand off through two
/// bounded channels and are recycled, so memory is capped at
/// `threads * part_size` regardless of stream length.
pub struct Upload {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    path: String,
    threads: usize,
    part_size: usize,
    volume_size: u64,
    volumes: Vec<Volume>,
    progress: Progress,
    token: CancellationToken,
}

impl Upload {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        path: &str,
        threads: usize,
        part_size: u64,
        volume_size: u64,
        token: CancellationToken,
    ) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
            path: path.to_string(),
            threads: threads.max(1),
            part_size: part_size.max(1) as usize,
            volume_size: volume_size.max(1),
            volumes: Vec::new(),
            progress: Progress {
                start: Instant::now(),
                parts: 0,
                bytes: 0,
                hash: Sha1::new(),
            },
            token,
        }
    }

    /// Uploads the source to end of stream.
    ///
    /// Either every produced volume has completed, or every multipart upload
    /// this call opened has been aborted before the error returns.
    pub async fn send<R>(mut self, mut source: R) -> Result<SendDetails, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        let (free_tx, free_rx) = async_channel::bounded(self.threads);
        let (pending_tx, pending_rx) = async_channel::bounded(self.threads);

        for _ in 0..self.threads {
            // Channel capacity equals the slot count, this cannot block.
            let _ = free_tx.send(PartRequest::empty()).await;
        }

        let workers: Vec<JoinHandle<Result<(), UploadError>>> = (0..self.threads)
            .map(|_| {
                tokio::spawn(run_worker(
                    Arc::clone(&self.store),
                    pending_rx.clone(),
                    free_tx.clone(),
                ))
            })
            .collect();

        drop(pending_rx);
        drop(free_tx);

        self.progress.start = Instant::now();

        let halt = self.produce(&mut source, &free_rx, &pending_tx).await;

        // Closing pending lets the workers drain and exit.
        drop(pending_tx);

        let mut cause = match halt {
            Halt::Eof => None,
            Halt::Cause(cause) => Some(cause),
            Halt::WorkersFailed => None,
        };

        for worker in workers {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    cause.get_or_insert(error);
                }
                Err(_) => {
                    cause.get_or_insert(UploadError::WorkersStopped);
                }
            }
        }

        // The workers have exited and their free senders are gone; drain the
        // channel to harvest the tags of the last parts.
        while let Ok(mut request) = free_rx.recv().await {
            self.harvest(&mut request);
        }

        if let Some(cause) = cause {
            return Err(self.fail(cause).await);
        }

        self.complete().await?;
        Ok(self.details())
    }

    /// The read loop: recycle a buffer, pick the volume, fill, enqueue.
    async fn produce<R>(
        &mut self,
        source: &mut R,
        free: &Receiver<PartRequest>,
        pending: &Sender<PartRequest>,
    ) -> Halt
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let mut request = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Halt::Cause(UploadError::Cancelled),
                request = free.recv() => match request {
                    Ok(request) => request,
                    // All workers died before EOF.
                    Err(_) => return Halt::WorkersFailed,
                },
            };

            self.harvest(&mut request);

            let capacity = self.capacity();
            let mut buffer = reclaim(std::mem::take(&mut request.data));

            let filled = match self.fill(source, &mut buffer, capacity).await {
                Ok(filled) => filled,
                Err(error) => return Halt::Cause(error),
            };

            if filled == 0 {
                return Halt::Eof;
            }

            let volume = match self.volume().await {
                Ok(volume) => volume,
                Err(error) => return Halt::Cause(error),
            };

            if self
                .enqueue(request, volume, buffer.freeze(), pending)
                .await
                .is_err()
            {
                // A worker closed the channel after failing.
                return Halt::WorkersFailed;
            }
        }
    }

    /// How many bytes the next part may carry, without opening a volume yet.
    fn capacity(&self) -> usize {
        let remaining = match self.volumes.last() {
            Some(volume) if volume.bytes < self.volume_size => self.volume_size - volume.bytes,
            _ => self.volume_size,
        };
        (self.part_size as u64).min(remaining) as usize
    }

    async fn fill<R>(
        &self,
        source: &mut R,
        buffer: &mut BytesMut,
        capacity: usize,
    ) -> Result<usize, UploadError>
    where
        R: AsyncRead + Unpin,
    {
        buffer.clear();
        buffer.resize(capacity, 0);

        let mut filled = 0;
        while filled < capacity {
            let read = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Err(UploadError::Cancelled),
                read = source.read(&mut buffer[filled..]) => read?,
            };
            if read == 0 {
                break;
            }
            filled += read;
        }

        buffer.truncate(filled);
        Ok(filled)
    }

    /// The current volume's index, opening the next multipart upload when
    /// the current one is full or none exists yet.
    async fn volume(&mut self) -> Result<usize, UploadError> {
        if let Some(volume) = self.volumes.last() {
            if volume.bytes < self.volume_size {
                return Ok(self.volumes.len() - 1);
            }
        }

        let sequence = self.volumes.len();
        let key = format!("{}/{}", self.path, pad_number(sequence));
        let opened = self.store.create_multipart(&self.bucket, &key).await?;

        debug!("opened volume {sequence} as '{}'", opened.key);

        self.volumes.push(Volume {
            sequence,
            bucket: opened.bucket,
            key: opened.key,
            upload_id: opened.upload_id,
            parts: Vec::new(),
            part_count: 0,
            bytes: 0,
            hash: Sha1::new(),
            completed: false,
            aborted: false,
        });
        Ok(sequence)
    }

    async fn enqueue(
        &mut self,
        mut request: PartRequest,
        volume: usize,
        data: Bytes,
        pending: &Sender<PartRequest>,
    ) -> Result<(), ()> {
        let vol = &mut self.volumes[volume];
        vol.part_count += 1;
        vol.bytes += data.len() as u64;
        vol.hash.update(&data);

        self.progress.parts += 1;
        self.progress.bytes += data.len() as u64;
        self.progress.hash.update(&data);

        request.bucket = vol.bucket.clone();
        request.key = vol.key.clone();
        request.upload_id = vol.upload_id.clone();
        request.volume = vol.sequence;
        request.part = vol.part_count;
        request.data = data;
        request.response = None;

        pending.send(request).await.map(|_| ()).map_err(|_| ())
    }

    /// The producer-side synchronization point for the part lists: a worker's
    /// result is folded in before its buffer is reused, or during the final
    /// drain once all workers have exited.
    fn harvest(&mut self, request: &mut PartRequest) {
        if let Some(part) = request.response.take() {
            self.volumes[request.volume].parts.push(part);
        }
    }

    async fn complete(&mut self) -> Result<(), UploadError> {
        for index in 0..self.volumes.len() {
            let volume = &mut self.volumes[index];
            volume.parts.sort_by_key(|part| part.part_number);

            let result = self
                .store
                .complete_multipart(
                    &volume.bucket,
                    &volume.key,
                    &volume.upload_id,
                    volume.parts.clone(),
                )
                .await;

            match result {
                Ok(_) => {
                    let volume = &mut self.volumes[index];
                    volume.completed = true;
                    debug!(
                        "volume {} completed ({} bytes, sha1 {})",
                        volume.sequence,
                        volume.bytes,
                        hex::encode(std::mem::take(&mut volume.hash).finalize()),
                    );
                }
                Err(error) => return Err(self.fail(error.into()).await),
            }
        }
        Ok(())
    }

    /// Aborts whatever is still open and reports the original cause; an
    /// abort failure wraps it.
    async fn fail(&mut self, cause: UploadError) -> UploadError {
        match self.abort().await {
            Ok(()) => cause,
            Err(abort) => UploadError::AbortFailed {
                abort: Box::new(abort),
                cause: Box::new(cause),
            },
        }
    }

    async fn abort(&mut self) -> Result<(), UploadError> {
        for volume in &mut self.volumes {
            if !volume.aborted && !volume.completed {
                self.store
                    .abort_multipart(&volume.bucket, &volume.key, &volume.upload_id)
                    .await?;
                volume.aborted = true;
            }
        }
        Ok(())
    }

    fn details(mut self) -> SendDetails {
        SendDetails {
            bucket: self.bucket,
            path: self.path,
            volumes: self.volumes.len(),
            parts: self.progress.parts,
            bytes: self.progress.bytes,
            hash: std::mem::take(&mut self.progress.hash).finalize().to_vec(),
            duration: self.progress.start.elapsed(),
        }
    }
}

async fn run_worker(
    store: Arc<dyn ObjectStore>,
    pending: Receiver<PartRequest>,
    free: Sender<PartRequest>,
) -> Result<(), UploadError> {
    while let Ok(mut request) = pending.recv().await {
        let result = store
            .upload_part(
                &request.bucket,
                &request.key,
                &request.upload_id,
                request.part,
                request.data.clone(),
            )
            .await;

        match result {
            Ok(output) => {
                debug!(
                    "part {} of volume {} uploaded",
                    request.part, request.volume
                );
                request.response = Some(Part {
                    part_number: request.part,
                    tag: output.tag,
                });
                if free.send(request).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                // Stops the producer and lets the other workers drain out.
                pending.close();
                return Err(error.into());
            }
        }
    }
    Ok(())
}

/// Takes the slot's allocation back without copying when the upload no
/// longer references it.
fn reclaim(data: Bytes) -> BytesMut {
    data.try_into_mut().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_render_a_summary() {
        let details = SendDetails {
            bucket: "backups".to_string(),
            path: "pool-0/test/00000".to_string(),
            volumes: 1,
            parts: 3,
            bytes: 2_500_000,
            hash: vec![0xab, 0xcd],
            duration: Duration::from_secs(2),
        };

        let text = details.to_string();
        assert!(text.contains("Bucket: backups"));
        assert!(text.contains("Parts: 3"));
        assert!(text.contains("Hash: abcd"));
        assert!(text.contains("Sent: 2.50"));
        assert!(text.contains("Rate: 1.25 MB/s"));
    }

    #[test]
    fn reclaim_reuses_a_unique_allocation() {
        let mut buffer = BytesMut::with_capacity(64);
        buffer.extend_from_slice(b"0123456789");
        let pointer = buffer.as_ptr();

        let reclaimed = reclaim(buffer.freeze());
        assert_eq!(reclaimed.as_ptr(), pointer);
    }

    #[test]
    fn reclaim_falls_back_when_shared() {
        let data = Bytes::from_static(b"shared");
        let clone = data.clone();

        let reclaimed = reclaim(data);
        assert_eq!(reclaimed.len(), 0);
        drop(clone);
    }
}
