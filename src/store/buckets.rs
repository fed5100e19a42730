use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Method;

use super::xml;
use super::{Call, Metadata, Store, StoreError};

#[derive(Debug, Clone)]
pub struct CreateBucketOutput {
    pub location: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct DeleteBucketOutput {
    pub metadata: Metadata,
}

#[derive(Debug, Clone)]
pub struct BucketSummary {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ListBucketsOutput {
    pub owner: String,
    pub buckets: Vec<BucketSummary>,
    pub metadata: Metadata,
}

impl Store {
    /// Creates a bucket in the provider's region.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_CreateBucket.html
    pub async fn create_bucket(&self, name: &str) -> Result<CreateBucketOutput, StoreError> {
        let body = format!(
            "<CreateBucketConfiguration xmlns=\"http://s3.amazonaws.com/doc/2006-03-01/\">\
             <LocationConstraint>{}</LocationConstraint>\
             </CreateBucketConfiguration>",
            xml::escape(&self.provider().region),
        );

        let call = Call::new(
            Method::PUT,
            self.provider().bucket_url(name),
            &[200],
            format!("failed creating bucket '{name}'"),
        )
        .body(Bytes::from(body));

        let reply = self.dispatch(&call).await?;
        Ok(CreateBucketOutput {
            location: reply
                .headers
                .get("location")
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string(),
            metadata: reply.metadata,
        })
    }

    /// Deletes a bucket.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_DeleteBucket.html
    pub async fn delete_bucket(&self, name: &str) -> Result<DeleteBucketOutput, StoreError> {
        let call = Call::new(
            Method::DELETE,
            self.provider().bucket_url(name),
            &[204],
            format!("failed deleting bucket '{name}'"),
        );

        let reply = self.dispatch(&call).await?;
        Ok(DeleteBucketOutput {
            metadata: reply.metadata,
        })
    }

    /// Lists all buckets.
    /// See: https://docs.aws.amazon.com/AmazonS3/latest/API/API_ListBuckets.html
    pub async fn list_buckets(&self) -> Result<ListBucketsOutput, StoreError> {
        let call = Call::new(
            Method::GET,
            self.provider().url(),
            &[200],
            "failed listing buckets".to_string(),
        );

        let reply = self.dispatch(&call).await?;
        let text = String::from_utf8_lossy(&reply.content);

        let buckets = xml::blocks(&text, "Bucket")
            .into_iter()
            .map(|block| BucketSummary {
                name: xml::tag(block, "Name").unwrap_or_default(),
                created: xml::tag(block, "CreationDate")
                    .and_then(|t| t.parse::<DateTime<Utc>>().ok()),
            })
            .collect();

        Ok(ListBucketsOutput {
            owner: xml::tag(&text, "ID").unwrap_or_default(),
            buckets,
            metadata: reply.metadata,
        })
    }
}
