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

//! Upload pipeline tests against an in-memory object store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;

use snapr::store::{
    AbortMultipartOutput, CompleteMultipartOutput, CreateMultipartOutput, GetObjectOutput,
    Metadata, ObjectStore, Part, PutObjectOutput, StoreError, UploadPartOutput,
};
use snapr::uploader::{Upload, UploadError};

const BUCKET: &str = "backups";
const PATH: &str = "pool-0/test/00000";

#[derive(Debug, Default)]
struct State {
    uploads: HashMap<String, OpenUpload>,
    objects: HashMap<String, Vec<u8>>,
    aborted: Vec<String>,
    sequence: usize,
}

#[derive(Debug, Default)]
struct OpenUpload {
    key: String,
    parts: HashMap<u32, (String, Vec<u8>)>,
}

/// In-memory stand-in for the S3 client. `fail_part` makes one specific
/// part upload return the given status, as if its retry budget were spent.
#[derive(Debug, Default)]
struct FakeStore {
    state: Mutex<State>,
    fail_part: Option<(String, u32, u16)>,
}

impl FakeStore {
    fn failing(key: &str, part_number: u32, status: u16) -> Self {
        Self {
            state: Mutex::default(),
            fail_part: Some((key.to_string(), part_number, status)),
        }
    }

    fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(key).cloned()
    }

    fn open_uploads(&self) -> usize {
        self.state.lock().unwrap().uploads.len()
    }

    fn aborted(&self) -> Vec<String> {
        self.state.lock().unwrap().aborted.clone()
    }

    fn object_count(&self) -> usize {
        self.state.lock().unwrap().objects.len()
    }
}

fn status(context: &str, status: u16) -> StoreError {
    StoreError::Status {
        context: context.to_string(),
        status,
        message: String::new(),
        request_id: String::new(),
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn list_all_keys(&self, _bucket: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn put_object(
        &self,
        _bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutObjectOutput, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.objects.insert(key.to_string(), data.to_vec());
        Ok(PutObjectOutput {
            tag: format!("\"{key}\""),
            metadata: Metadata::default(),
        })
    }

    async fn get_object(
        &self,
        _bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<GetObjectOutput, StoreError> {
        let state = self.state.lock().unwrap();
        let Some(data) = state.objects.get(key) else {
            return Err(status(key, 404));
        };

        let size = data.len() as u64;
        let begin = match range {
            Some((begin, _)) => begin.min(size),
            None => 0,
        };
        let stop = match range {
            Some((_, end)) if end > begin => (end + 1).min(size),
            _ => size,
        };

        Ok(GetObjectOutput {
            tag: format!("\"{key}\""),
            modified: None,
            begin,
            end: stop.saturating_sub(1),
            size,
            content: Bytes::copy_from_slice(&data[begin as usize..stop as usize]),
            metadata: Metadata::default(),
        })
    }

    async fn delete_object(&self, _bucket: &str, key: &str) -> Result<(), StoreError> {
        self.state.lock().unwrap().objects.remove(key);
        Ok(())
    }

    async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<CreateMultipartOutput, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.sequence += 1;
        let upload_id = format!("upload-{}", state.sequence);
        state.uploads.insert(
            upload_id.clone(),
            OpenUpload {
                key: key.to_string(),
                parts: HashMap::new(),
            },
        );
        Ok(CreateMultipartOutput {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            metadata: Metadata::default(),
        })
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartOutput, StoreError> {
        if let Some((fail_key, fail_part, fail_status)) = &self.fail_part {
            if key == fail_key.as_str() && part_number == *fail_part {
                return Err(status(key, *fail_status));
            }
        }

        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.get_mut(upload_id) else {
            return Err(status(key, 404));
        };

        let tag = format!("\"{key}-{part_number}\"");
        upload.parts.insert(part_number, (tag.clone(), data.to_vec()));
        Ok(UploadPartOutput {
            tag,
            metadata: Metadata::default(),
        })
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompleteMultipartOutput, StoreError> {
        let mut state = self.state.lock().unwrap();
        let Some(upload) = state.uploads.remove(upload_id) else {
            return Err(status(key, 404));
        };

        if parts.is_empty() {
            return Err(status(key, 400));
        }

        let mut assembled = Vec::new();
        let mut previous = 0;
        for part in &parts {
            assert!(
                part.part_number > previous,
                "completion must list parts in ascending order"
            );
            previous = part.part_number;

            let Some((tag, data)) = upload.parts.get(&part.part_number) else {
                return Err(status(key, 400));
            };
            assert_eq!(&part.tag, tag, "completion must carry the stored tag");
            assembled.extend_from_slice(data);
        }

        state.objects.insert(upload.key.clone(), assembled);
        Ok(CompleteMultipartOutput {
            location: String::new(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            tag: format!("\"{key}\""),
            metadata: Metadata::default(),
        })
    }

    async fn abort_multipart(
        &self,
        _bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<AbortMultipartOutput, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.uploads.remove(upload_id);
        state.aborted.push(key.to_string());
        Ok(AbortMultipartOutput {
            metadata: Metadata::default(),
        })
    }
}

fn upload(store: &Arc<FakeStore>, threads: usize, part_size: u64, volume_size: u64) -> Upload {
    Upload::new(
        Arc::clone(store) as Arc<dyn ObjectStore>,
        BUCKET,
        PATH,
        threads,
        part_size,
        volume_size,
        CancellationToken::new(),
    )
}

fn source(length: usize) -> Vec<u8> {
    (0..length).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn chunks_a_stream_into_volumes_of_parts() {
    let store = Arc::new(FakeStore::default());
    let data = source(60);

    // P=10, V=25: volumes carry 25, 25, 10 bytes as parts of 10/10/5.
    let details = upload(&store, 3, 10, 25).send(&data[..]).await.unwrap();

    assert_eq!(details.volumes, 3);
    assert_eq!(details.parts, 7);
    assert_eq!(details.bytes, 60);

    assert_eq!(store.object(&format!("{PATH}/00000")).unwrap().len(), 25);
    assert_eq!(store.object(&format!("{PATH}/00001")).unwrap().len(), 25);
    assert_eq!(store.object(&format!("{PATH}/00002")).unwrap().len(), 10);
    assert_eq!(store.open_uploads(), 0);

    let mut reassembled = Vec::new();
    for volume in 0..3 {
        reassembled.extend(store.object(&format!("{PATH}/{volume:05}")).unwrap());
    }
    assert_eq!(reassembled, data);
}

#[tokio::test]
async fn an_exact_multiple_of_the_volume_size_opens_no_empty_volume() {
    let store = Arc::new(FakeStore::default());
    let data = source(50);

    let details = upload(&store, 2, 10, 25).send(&data[..]).await.unwrap();

    assert_eq!(details.volumes, 2);
    assert_eq!(details.parts, 6);
    assert_eq!(details.bytes, 50);
    assert_eq!(store.object_count(), 2);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn an_empty_source_produces_no_volumes() {
    let store = Arc::new(FakeStore::default());

    let details = upload(&store, 2, 10, 25).send(&b""[..]).await.unwrap();

    assert_eq!(details.volumes, 0);
    assert_eq!(details.parts, 0);
    assert_eq!(details.bytes, 0);
    assert_eq!(store.object_count(), 0);
    assert_eq!(store.open_uploads(), 0);
}

#[tokio::test]
async fn a_short_stream_is_a_single_short_part() {
    let store = Arc::new(FakeStore::default());
    let data = source(3);

    let details = upload(&store, 4, 10, 25).send(&data[..]).await.unwrap();

    assert_eq!(details.volumes, 1);
    assert_eq!(details.parts, 1);
    assert_eq!(store.object(&format!("{PATH}/00000")).unwrap(), data);
}

#[tokio::test]
async fn tracks_the_hash_of_the_stream_in_source_order() {
    let store = Arc::new(FakeStore::default());
    let data = source(123);

    let details = upload(&store, 3, 10, 25).send(&data[..]).await.unwrap();

    let expected = Sha1::digest(&data).to_vec();
    assert_eq!(details.hash, expected);

    // The stored bytes carry the same hash, volume by volume in order.
    let mut hasher = Sha1::new();
    for volume in 0..details.volumes {
        hasher.update(store.object(&format!("{PATH}/{volume:05}")).unwrap());
    }
    assert_eq!(hasher.finalize().to_vec(), expected);
}

#[tokio::test]
async fn a_failing_part_aborts_every_open_volume() {
    // Part 2 of the second volume fails hard, as if past the retry budget.
    let store = Arc::new(FakeStore::failing(&format!("{PATH}/00001"), 2, 500));
    let data = source(75);

    let error = upload(&store, 2, 10, 25).send(&data[..]).await.unwrap_err();

    match error {
        UploadError::Store(StoreError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected a transport error, got {other}"),
    }

    // Nothing completed and nothing is left open.
    assert_eq!(store.object_count(), 0);
    assert_eq!(store.open_uploads(), 0);

    let aborted = store.aborted();
    assert!(aborted.contains(&format!("{PATH}/00000")));
    assert!(aborted.contains(&format!("{PATH}/00001")));
}

#[tokio::test]
async fn a_cancelled_upload_aborts_and_reports_cancellation() {
    let store = Arc::new(FakeStore::default());
    let token = CancellationToken::new();
    token.cancel();

    let upload = Upload::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        BUCKET,
        PATH,
        2,
        10,
        25,
        token,
    );

    let data = source(75);
    let error = upload.send(&data[..]).await.unwrap_err();
    assert!(matches!(error, UploadError::Cancelled));
    assert_eq!(store.object_count(), 0);
    assert_eq!(store.open_uploads(), 0);
}
