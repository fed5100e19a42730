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

use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::Method;

use super::auth::uri_encode;
use super::xml;
use super::{Call, Metadata, Store, StoreError};

static CONTENT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bytes\s(?P<begin>\d+)-(?P<end>\d+)/(?P<size>\d+)").unwrap()
});

#[derive(Debug, Clone)]
pub struct PutObjectOutput {
    pub tag: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct GetObjectOutput {
    pub tag: String,
    pub modified: Option<DateTime<Utc>>,
    pub begin: u64,
    pub end: u64,
    pub size: u64,
    pub content: Bytes,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct ObjectSummary {
    pub key: String,
    pub modified: Option<DateTime<Utc>>,
    pub tag: String,
    pub size: u64,
    pub storage_class: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListObjectsOutput {
    pub name: String,
    pub key_count: u64,
    pub truncated: bool,
    pub continuation: Option<String>,
    pub objects: Vec<ObjectSummary>,
    pub metadata: Metadata,
}

impl Store {
    /// Uploads an object.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_PutObject.html
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
    ) -> Result<PutObjectOutput, StoreError> {
        let url = format!("{}/{}", self.provider().bucket_url(bucket), key);
        let call = Call::new(
            Method::PUT,
            url,
            &[200],
            format!("failed putting object '{key}' to '{bucket}'"),
        )
        .body(data);

        let reply = self.dispatch(&call).await?;
        Ok(PutObjectOutput {
            tag: header(&reply.headers, "etag"),
            metadata: reply.metadata,
        })
    }

    /// Fetches an object, optionally a byte range of it.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_GetObject.html
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<(u64, u64)>,
    ) -> Result<GetObjectOutput, StoreError> {
        let url = format!("{}/{}", self.provider().bucket_url(bucket), key);
        let mut call = Call::new(
            Method::GET,
            url,
            &[200, 206],
            format!("failed getting object '{key}' from '{bucket}'"),
        );

        if let Some((begin, end)) = range {
            if end > begin {
                call = call.header("range", format!("bytes={begin}-{end}"));
            }
        }

        let reply = self.dispatch(&call).await?;

        let length = reply.content.len() as u64;
        let (begin, end, size) = match parse_content_range(&reply.headers) {
            Some(window) => window,
            // No range in the reply means the whole object came back.
            None => (0, length.saturating_sub(1), length),
        };

        Ok(GetObjectOutput {
            tag: header(&reply.headers, "etag"),
            modified: header_date(&reply.headers, "last-modified"),
            begin,
            end,
            size,
            content: reply.content,
            metadata: reply.metadata,
        })
    }

    /// Removes an object.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_DeleteObject.html
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let url = format!("{}/{}", self.provider().bucket_url(bucket), key);
        let call = Call::new(
            Method::DELETE,
            url,
            &[204],
            format!("failed deleting object '{key}' from '{bucket}'"),
        );

        self.dispatch(&call).await?;
        Ok(())
    }

    /// Lists one page of objects in a bucket.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListObjectsV2.html
    pub async fn list_objects(
        &self,
        bucket: &str,
        continuation: Option<&str>,
    ) -> Result<ListObjectsOutput, StoreError> {
        let mut url = format!("{}/?list-type=2", self.provider().bucket_url(bucket));
        if let Some(continuation) = continuation {
            url.push_str("&continuation-token=");
            url.push_str(&uri_encode(continuation));
        }

        let call = Call::new(Method::GET, url, &[200], "failed listing objects".to_string());
        let reply = self.dispatch(&call).await?;

        let text = String::from_utf8_lossy(&reply.content);
        Ok(decode_listing(&text, reply.metadata))
    }

    /// Assembles a full listing using pagination.
    pub async fn list_all_objects(&self, bucket: &str) -> Result<ListObjectsOutput, StoreError> {
        let mut assembled = ListObjectsOutput::default();

        let mut continuation: Option<String> = None;
        loop {
            let page = self.list_objects(bucket, continuation.as_deref()).await?;

            assembled.name = page.name;
            assembled.key_count += page.key_count;
            assembled.objects.extend(page.objects);
            continuation = page.continuation;

            if !page.truncated {
                break;
            }
        }
        Ok(assembled)
    }

    /// Assembles a full listing of keys using pagination.
    pub async fn list_all_keys(&self, bucket: &str) -> Result<Vec<String>, StoreError> {
        let listing = self.list_all_objects(bucket).await?;
        Ok(listing.objects.into_iter().map(|o| o.key).collect())
    }
}

fn header(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn header_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(&header(headers, name))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn parse_content_range(headers: &HeaderMap) -> Option<(u64, u64, u64)> {
    let content_range = header(headers, "content-range");
    let groups = CONTENT_RANGE.captures(&content_range)?;
    Some((
        groups["begin"].parse().ok()?,
        groups["end"].parse().ok()?,
        groups["size"].parse().ok()?,
    ))
}

fn decode_listing(text: &str, metadata: Metadata) -> ListObjectsOutput {
    let objects = xml::blocks(text, "Contents")
        .into_iter()
        .map(|block| ObjectSummary {
            key: xml::tag(block, "Key").unwrap_or_default(),
            modified: xml::tag(block, "LastModified")
                .and_then(|t| t.parse::<DateTime<Utc>>().ok()),
            tag: xml::tag(block, "ETag").unwrap_or_default(),
            size: xml::tag(block, "Size").and_then(|s| s.parse().ok()).unwrap_or(0),
            storage_class: xml::tag(block, "StorageClass").unwrap_or_default(),
        })
        .collect();

    ListObjectsOutput {
        name: xml::tag(text, "Name").unwrap_or_default(),
        key_count: xml::tag(text, "KeyCount").and_then(|s| s.parse().ok()).unwrap_or(0),
        truncated: xml::tag(text, "IsTruncated").as_deref() == Some("true"),
        continuation: xml::tag(text, "NextContinuationToken"),
        objects,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn parses_a_content_range() {
        let mut headers = HeaderMap::new();
        headers.insert("content-range", HeaderValue::from_static("bytes 0-9/443"));

        assert_eq!(parse_content_range(&headers), Some((0, 9, 443)));
    }

    #[test]
    fn missing_content_range_is_none() {
        assert_eq!(parse_content_range(&HeaderMap::new()), None);
    }

    #[test]
    fn decodes_a_listing() {
        let text = r#"<?xml version="1.0" encoding="UTF-8"?>
            <ListBucketResult>
                <Name>backups</Name>
                <KeyCount>2</KeyCount>
                <MaxKeys>1000</MaxKeys>
                <IsTruncated>true</IsTruncated>
                <NextContinuationToken>token-1</NextContinuationToken>
                <Contents>
                    <Key>pool-0/test/00000/00000</Key>
                    <LastModified>2021-10-06T21:11:00.000Z</LastModified>
                    <ETag>&quot;abc&quot;</ETag>
                    <Size>200000000</Size>
                    <StorageClass>STANDARD</StorageClass>
                </Contents>
                <Contents>
                    <Key>pool-0/test/00000/contents</Key>
                    <Size>120</Size>
                </Contents>
            </ListBucketResult>"#;

        let listing = decode_listing(text, Metadata::default());
        assert_eq!(listing.name, "backups");
        assert_eq!(listing.key_count, 2);
        assert!(listing.truncated);
        assert_eq!(listing.continuation.as_deref(), Some("token-1"));
        assert_eq!(listing.objects.len(), 2);
        assert_eq!(listing.objects[0].key, "pool-0/test/00000/00000");
        assert_eq!(listing.objects[0].tag, "\"abc\"");
        assert_eq!(listing.objects[0].size, 200_000_000);
        assert_eq!(listing.objects[1].key, "pool-0/test/00000/contents");
    }
}
