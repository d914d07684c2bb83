//! Subprocess wrapper for the object-storage command-line client.
//!
//! Operators push payload files with the bucket CLI; the ingester itself
//! only reads over HTTP. The wrapper covers the three operations the
//! pipeline tooling needs: list, copy and remove.

use std::path::Path;

use tokio::process::Command;
use tracing::{info, warn};

use zonal_common::{ZonalError, ZonalResult};

/// Bucket CLI invoker. `quiet` adds the client's quiet flag, matching how
/// the tooling is run when debug logging is off.
pub struct BucketCli {
    program: String,
    quiet: bool,
}

impl BucketCli {
    pub fn new(program: &str, quiet: bool) -> Self {
        Self {
            program: program.to_string(),
            quiet,
        }
    }

    fn command(&self, op: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        if self.quiet {
            cmd.arg("-q");
        }
        cmd.arg(op);
        cmd
    }

    /// List objects under a bucket path.
    pub async fn list(&self, bucket_path: &str) -> ZonalResult<Vec<String>> {
        let output = self.command("ls").arg(bucket_path).output().await?;

        if !output.status.success() {
            return Err(ZonalError::InternalError(format!(
                "{} ls {} failed: {}",
                self.program,
                bucket_path,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Copy a local file into the bucket, unless the object already exists.
    pub async fn copy(&self, local_path: &Path, bucket_path: &str) -> ZonalResult<()> {
        // A failed listing just means the object is not there yet.
        match self.list(bucket_path).await {
            Ok(existing) if !existing.is_empty() => {
                info!(path = %bucket_path, "Object already in bucket, skipping upload");
                return Ok(());
            }
            _ => {}
        }

        info!(from = %local_path.display(), to = %bucket_path, "Uploading to bucket");
        let output = self
            .command("cp")
            .arg(local_path)
            .arg(bucket_path)
            .output()
            .await?;

        if !output.status.success() {
            return Err(ZonalError::InternalError(format!(
                "{} cp failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }

    /// Remove an object from the bucket.
    pub async fn remove(&self, bucket_path: &str) -> ZonalResult<()> {
        info!(path = %bucket_path, "Removing from bucket");
        let output = self.command("rm").arg(bucket_path).output().await?;

        if !output.status.success() {
            return Err(ZonalError::InternalError(format!(
                "{} rm failed: {}",
                self.program,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(())
    }
}

/// Best-effort local file removal; failures are logged, never raised.
pub fn delete_local_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!(path = %path.display(), "Deleted local file"),
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete local file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_collects_stdout_lines() {
        // `echo` stands in for the bucket client: it prints its arguments.
        let cli = BucketCli::new("echo", false);
        let lines = cli.list("gs://bucket/obj.json").await.unwrap();
        assert_eq!(lines, vec!["ls gs://bucket/obj.json"]);
    }

    #[tokio::test]
    async fn test_failed_command_is_an_error() {
        let cli = BucketCli::new("false", false);
        assert!(cli.remove("gs://bucket/obj.json").await.is_err());
    }

    #[tokio::test]
    async fn test_quiet_flag_is_prepended() {
        let cli = BucketCli::new("echo", true);
        let lines = cli.list("gs://bucket/obj.json").await.unwrap();
        assert_eq!(lines, vec!["-q ls gs://bucket/obj.json"]);
    }

    #[test]
    fn test_delete_local_file_never_panics() {
        delete_local_file(Path::new("/nonexistent/definitely/missing.csv"));
    }
}
