use crate::logw;
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STORAGE_BASE: &str = "https://storage.googleapis.com/storage/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcsObject {
    pub bucket: String,
    pub object: String,
}

impl GcsObject {
    pub fn parse(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("gs://")
            .ok_or_else(|| anyhow::anyhow!("Invalid GCS URI format: {}", uri))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("GCS URI has no object path: {}", uri))?;
        if bucket.is_empty() || object.is_empty() {
            anyhow::bail!("Invalid GCS URI format: {}", uri);
        }
        Ok(Self {
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    pub fn media_url(&self) -> String {
        format!(
            "{}/b/{}/o/{}?alt=media",
            STORAGE_BASE,
            url_encode_component(&self.bucket),
            url_encode_component(&self.object)
        )
    }
}

fn url_encode_component(input: &str) -> String {
    let mut out = String::new();
    for b in input.as_bytes() {
        let c = *b as char;
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' || c == '~' {
            out.push(c);
        } else {
            out.push('%');
            out.push_str(&format!("{:02X}", b));
        }
    }
    out
}

/// Streams the object to `dest`; a failed transfer leaves no file behind.
pub async fn gcs_download(client: &Client, token: &str, uri: &str, dest: &Path) -> Result<u64> {
    let object = GcsObject::parse(uri)?;
    let mut resp = client
        .get(object.media_url())
        .bearer_auth(token)
        .send()
        .await
        .context("GCS download request failed")?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        logw(format!("GCS download HTTP {} for {}", status, uri));
        anyhow::bail!("GCS download returned HTTP {}", status);
    }

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }

    let mut file = fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut written: u64 = 0;
    let copied: Result<()> = async {
        while let Some(chunk) = resp.chunk().await.context("GCS download interrupted")? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(())
    }
    .await;

    if let Err(e) = copied {
        drop(file);
        let _ = fs::remove_file(dest).await;
        return Err(e);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bucket_and_object() {
        let o = GcsObject::parse("gs://abd756/veo_output/scene_1/sample_0.mp4").unwrap();
        assert_eq!(o.bucket, "abd756");
        assert_eq!(o.object, "veo_output/scene_1/sample_0.mp4");
    }

    #[test]
    fn rejects_non_gcs_uris() {
        assert!(GcsObject::parse("https://example.com/a.mp4").is_err());
        assert!(GcsObject::parse("gs://bucket-only").is_err());
        assert!(GcsObject::parse("gs:///object").is_err());
    }

    #[test]
    fn media_url_escapes_object_path() {
        let o = GcsObject::parse("gs://b/dir/shared image.mp4").unwrap();
        assert_eq!(
            o.media_url(),
            "https://storage.googleapis.com/storage/v1/b/b/o/dir%2Fshared%20image.mp4?alt=media"
        );
    }
}
