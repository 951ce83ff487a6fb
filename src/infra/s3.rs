use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use tracing::info;

use crate::output::Renderer;
use crate::pipeline::types::Bulletin;

/// Serializes a value to JSON and uploads it with `application/json` content
/// type, gzip-encoded when `gzip` is set.
pub async fn write_json_to_s3(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    value: &impl Serialize,
    gzip: bool,
) -> Result<()> {
    let body = serde_json::to_vec(value)?;

    let request = client
        .put_object()
        .bucket(bucket)
        .content_type("application/json");

    let request = if gzip {
        request
            .key(format!("{key}.gz"))
            .content_encoding("gzip")
            .body(ByteStream::from(gzip_bytes(&body)?))
    } else {
        request.key(key).body(ByteStream::from(body))
    };
    request.send().await?;

    Ok(())
}

pub fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Publishes each bulletin twice: under its cycle key and as `latest.json`.
pub struct S3Renderer {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    gzip: bool,
}

impl S3Renderer {
    pub async fn from_env(bucket: String, prefix: String, gzip: bool) -> Self {
        let config = aws_config::load_from_env().await;
        Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket,
            prefix,
            gzip,
        }
    }

    pub fn keys(&self, bulletin: &Bulletin) -> [String; 2] {
        let prefix = self.prefix.trim_end_matches('/');
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            }
        };
        [join(&format!("{}.json", bulletin.cycle)), join("latest.json")]
    }
}

#[async_trait]
impl Renderer for S3Renderer {
    fn name(&self) -> &str {
        "s3"
    }

    #[tracing::instrument(skip_all, fields(bucket = %self.bucket, cycle = %bulletin.cycle))]
    async fn render(&self, bulletin: &Bulletin) -> Result<()> {
        for key in self.keys(bulletin) {
            write_json_to_s3(&self.client, &self.bucket, &key, bulletin, self.gzip).await?;
            info!(key = %key, gzip = self.gzip, "Bulletin published to S3");
        }
        Ok(())
    }
}
