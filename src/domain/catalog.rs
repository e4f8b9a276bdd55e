//! Flatten an uploaded folder tree into an ordered list of work groups.
//!
//! Every directory below the root that directly holds media becomes one group,
//! keyed by its path relative to the root (`"summer"`, `"summer/reels"`).
//! Nested folders are therefore handled the same way as flat ones.

use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::work::{MediaKind, UnitId, WorkGroup, WorkUnit};

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

async fn sorted_entries(dir: &Path) -> io::Result<Vec<(String, PathBuf, bool)>> {
    let mut entries = Vec::new();
    let mut reader = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = reader.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_hidden(&name) {
            continue;
        }
        let is_dir = entry.file_type().await?.is_dir();
        entries.push((name, entry.path(), is_dir));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Walk `root` and return its groups in lexicographic key order. Groups
/// without any recognised media are dropped.
pub async fn discover_groups(root: &Path) -> io::Result<Vec<WorkGroup>> {
    let mut pending: Vec<(String, PathBuf)> = Vec::new();
    for (name, path, is_dir) in sorted_entries(root).await? {
        if is_dir {
            pending.push((name, path));
        } else {
            debug!(file = %path.display(), "ignoring file outside of any folder");
        }
    }

    let mut found: Vec<(String, Vec<(PathBuf, MediaKind)>)> = Vec::new();
    while let Some((key, dir)) = pending.pop() {
        let mut media = Vec::new();
        for (name, path, is_dir) in sorted_entries(&dir).await? {
            if is_dir {
                pending.push((format!("{}/{}", key, name), path));
            } else if let Some(kind) = MediaKind::from_path(&path) {
                media.push((path, kind));
            }
        }

        if media.is_empty() {
            debug!(group = %key, "no media files found in folder");
            continue;
        }
        found.push((key, media));
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(found
        .into_iter()
        .enumerate()
        .map(|(group_index, (key, media))| {
            let units = media
                .into_iter()
                .enumerate()
                .map(|(unit_index, (path, kind))| {
                    WorkUnit::new(
                        UnitId {
                            group: group_index,
                            unit: unit_index,
                        },
                        path,
                        kind,
                    )
                })
                .collect();
            WorkGroup::new(key, units)
        })
        .collect())
}
