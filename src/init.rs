use crate::logi;
use anyhow::Result;
use std::path::Path;
use tokio::fs;

/// Creates the project directory if needed.
pub async fn ensure_project_dir(project_dir: &Path) -> Result<()> {
    if !project_dir.exists() {
        fs::create_dir_all(project_dir).await?;
        logi(format!("Created directory: {}", project_dir.display()));
    }
    Ok(())
}

async fn tool_available(tool: &str) -> bool {
    match tokio::process::Command::new(tool)
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}

pub async fn check_ffmpeg() -> bool {
    tool_available("ffmpeg").await && tool_available("ffprobe").await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_nested_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_project_dir(&nested).await.unwrap();
        assert!(nested.is_dir());
        ensure_project_dir(&nested).await.unwrap();
    }
}
