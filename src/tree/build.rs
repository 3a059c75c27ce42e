use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::arena::{FileNode, FileTree, NodeId};
use crate::walker::dirent::EntryStat;
use crate::walker::scanner::DirListing;

/// Build a `FileTree` from the listings every worker recorded for one root.
///
/// Listings arrive in whatever order the workers happened to scan them. Sorted
/// by depth, every directory's parent has been linked before the directory's
/// own listing is processed, so a single path map is enough to attach it.
pub fn build_tree(root_path: &Path, root: &EntryStat, mut listings: Vec<DirListing>) -> FileTree {
    let mut tree = FileTree::new(FileNode::new(
        root_path.as_os_str(),
        root.ino,
        root.disk_usage(),
        root.mtime,
        root.is_dir(),
    ));
    let Some(root_id) = tree.root() else {
        return tree;
    };

    listings.sort_by_key(|l| l.depth);

    let entry_count: usize = listings.iter().map(|l| l.entries.len()).sum();
    tracing::debug!(
        root = %root_path.display(),
        dirs = listings.len(),
        entries = entry_count,
        "Building tree"
    );

    // Map from directory path → NodeId, entries are removed once their listing is attached
    let mut path_map: HashMap<PathBuf, NodeId> = HashMap::new();
    path_map.insert(root_path.to_path_buf(), root_id);

    for listing in listings {
        let Some(parent_id) = path_map.remove(&listing.path) else {
            tracing::warn!(path = %listing.path.display(), "Listing without a parent node, skipped");
            continue;
        };

        for entry in listing.entries {
            let is_dir = entry.is_dir;
            let child_path = is_dir.then(|| listing.path.join(&entry.name));
            let id = tree.add_child(
                parent_id,
                FileNode::new(entry.name, entry.ino, entry.size, entry.mtime, is_dir),
            );
            if let Some(child_path) = child_path {
                path_map.insert(child_path, id);
            }
        }
    }

    tree.aggregate_sizes();
    tree
}
