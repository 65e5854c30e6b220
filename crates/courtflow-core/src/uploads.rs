//! Staged upload files and the sweep that removes abandoned ones.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use uuid::Uuid;

/// Writes `contents` under `dir` with a generated name and returns the path.
pub async fn stage_upload(dir: &Path, contents: &[u8]) -> io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}.csv", Uuid::new_v4()));
    tokio::fs::write(&path, contents).await?;
    Ok(path)
}

/// Removes a staged file. A file that is already gone is not an error.
pub async fn remove_staged(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Clone, Default)]
pub struct PurgePlan {
    pub orphaned: Vec<PathBuf>,
    pub kept_in_use: usize,
    pub kept_recent: usize,
}

/// Lists staged files older than `older_than` that no active batch references.
pub async fn plan_purge(
    dir: &Path,
    in_use: &[String],
    older_than: Duration,
) -> io::Result<PurgePlan> {
    let mut plan = PurgePlan::default();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(plan),
        Err(err) => return Err(err),
    };

    let referenced: HashSet<PathBuf> = in_use.iter().map(|path| normalize(Path::new(path))).collect();
    let now = SystemTime::now();

    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let path = entry.path();
        if referenced.contains(&normalize(&path)) {
            plan.kept_in_use += 1;
            continue;
        }
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < older_than {
            plan.kept_recent += 1;
            continue;
        }
        plan.orphaned.push(path);
    }

    plan.orphaned.sort();
    Ok(plan)
}

pub async fn apply_purge(plan: &PurgePlan) -> io::Result<usize> {
    for path in &plan.orphaned {
        remove_staged(path).await?;
    }
    Ok(plan.orphaned.len())
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
