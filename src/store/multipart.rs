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
use reqwest::Method;

use super::auth::uri_encode;
use super::xml;
use super::{Call, Metadata, Store, StoreError};

const XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// One uploaded part as needed for completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub part_number: u32,
    pub tag: String,
}

#[derive(Debug, Clone)]
pub struct CreateMultipartOutput {
    pub bucket: String,
    pub key: String,
    pub upload_id: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct UploadPartOutput {
    pub tag: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct CompleteMultipartOutput {
    pub location: String,
    pub bucket: String,
    pub key: String,
    pub tag: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct AbortMultipartOutput {
    pub metadata: Metadata,
}

impl Store {
    /// Opens a multi-part upload.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_CreateMultipartUpload.html
    pub async fn create_multipart(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<CreateMultipartOutput, StoreError> {
        let url = format!("{}/{}?uploads", self.provider().bucket_url(bucket), key);
        let call = Call::new(
            Method::POST,
            url,
            &[200],
            format!("failed creating multi-part upload '{key}' in bucket '{bucket}'"),
        );

        let reply = self.dispatch(&call).await?;
        let text = String::from_utf8_lossy(&reply.content);

        Ok(CreateMultipartOutput {
            bucket: xml::tag(&text, "Bucket").unwrap_or_default(),
            key: xml::tag(&text, "Key").unwrap_or_default(),
            upload_id: xml::tag(&text, "UploadId")
                .ok_or_else(|| StoreError::Decode(format!("no upload id for '{key}'")))?,
            metadata: reply.metadata,
        })
    }

    /// Uploads one part of a multi-part upload.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_UploadPart.html
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<UploadPartOutput, StoreError> {
        let url = format!(
            "{}/{}?partNumber={}&uploadId={}",
            self.provider().bucket_url(bucket),
            key,
            part_number,
            uri_encode(upload_id),
        );
        let call = Call::new(
            Method::PUT,
            url,
            &[200],
            format!("failed uploading part {part_number} of '{key}'"),
        )
        .body(data);

        let reply = self.dispatch(&call).await?;
        Ok(UploadPartOutput {
            tag: reply
                .headers
                .get("etag")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            metadata: reply.metadata,
        })
    }

    /// Completes a multi-part upload. Parts are sent sorted by part number.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_CompleteMultipartUpload.html
    pub async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        mut parts: Vec<Part>,
    ) -> Result<CompleteMultipartOutput, StoreError> {
        parts.sort_by_key(|p| p.part_number);

        let url = format!(
            "{}/{}?uploadId={}",
            self.provider().bucket_url(bucket),
            key,
            uri_encode(upload_id),
        );
        let call = Call::new(
            Method::POST,
            url,
            &[200],
            format!("failed completing multi-part upload '{key}' to bucket '{bucket}'"),
        )
        .body(Bytes::from(complete_body(&parts)));

        let reply = self.dispatch(&call).await?;
        let text = String::from_utf8_lossy(&reply.content);

        Ok(CompleteMultipartOutput {
            location: xml::tag(&text, "Location").unwrap_or_default(),
            bucket: xml::tag(&text, "Bucket").unwrap_or_default(),
            key: xml::tag(&text, "Key").unwrap_or_default(),
            tag: xml::tag(&text, "ETag").unwrap_or_default(),
            metadata: reply.metadata,
        })
    }

    /// Abandons a multi-part upload and its stored parts.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_AbortMultipartUpload.html
    pub async fn abort_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<AbortMultipartOutput, StoreError> {
        let url = format!(
            "{}/{}?uploadId={}",
            self.provider().bucket_url(bucket),
            key,
            uri_encode(upload_id),
        );
        let call = Call::new(
            Method::DELETE,
            url,
            &[204],
            format!("failed aborting multi-part upload '{key}' in bucket '{bucket}'"),
        );

        let reply = self.dispatch(&call).await?;
        Ok(AbortMultipartOutput {
            metadata: reply.metadata,
        })
    }
}

fn complete_body(parts: &[Part]) -> String {
    let mut body = format!("<CompleteMultipartUpload xmlns=\"{XMLNS}\">");
    for part in parts {
        body.push_str("<Part><PartNumber>");
        body.push_str(&part.part_number.to_string());
        body.push_str("</PartNumber><ETag>");
        body.push_str(&xml::escape(&part.tag));
        body.push_str("</ETag></Part>");
    }
    body.push_str("</CompleteMultipartUpload>");
    body
}
