//! Tree cache file
//!
//! A tree is stored as a flat array of fixed-size records in which every link
//! is a 1-based index into the same array (0 = no link, slot 0 is left zeroed).
//! Indices are handed out in post-order: children in sibling order, then their
//! parent, so the root always occupies the last slot.
//!
//! Records only hold entry names. The root's name is the path it was scanned
//! as, which can be longer than a record allows, so it is stored after the
//! header and the root record's own name is left empty.
//!
//! File layout, host byte order:
//!
//! ```text
//! ┌──────────────────────────── CacheHeader (40 bytes) ───────────────────────────┐
//! │ magic "RDUCACHE" │ version u32 │ record_size u32 │ node_count u64 │           │
//! │ root_index u64 │ root_path_len u64                                            │
//! └────────────────────────────────────────────────────────────────────────────────┘
//! ┌──────────── root path, root_path_len bytes ────────────┐
//! ┌──────────── NodeRecord × (node_count + 1), 320 bytes each ────────────┐
//! │ slot 0 (zero) │ slot 1 │ ... │ slot node_count (root)                 │
//! └────────────────────────────────────────────────────────────────────────┘
//! ```

use std::ffi::OsStr;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::mem::size_of;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use bytemuck::{Pod, Zeroable};
use tracing::debug;

use super::arena::{FileNode, FileTree, NodeId};
use crate::error::{CacheError, CacheResult};

/// First bytes of every cache file
pub const CACHE_MAGIC: [u8; 8] = *b"RDUCACHE";

/// Bumped whenever the record layout changes
pub const CACHE_VERSION: u32 = 2;

/// Longest name a record can hold
pub const MAX_NAME_LEN: usize = 255;

const NAME_FIELD_LEN: usize = MAX_NAME_LEN + 1;
const FLAG_DIR: u32 = 1;

/// Header written in front of the record array
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct CacheHeader {
    pub magic: [u8; 8],
    pub version: u32,
    pub record_size: u32,
    /// Number of nodes, excluding the reserved slot 0
    pub node_count: u64,
    /// Slot holding the root
    pub root_index: u64,
    /// Bytes of root path following the header
    pub root_path_len: u64,
}

/// One linearized node
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeRecord {
    /// Raw name bytes, NUL padded
    pub name: [u8; NAME_FIELD_LEN],
    pub inode: u64,
    pub size: u64,
    pub total_size: u64,
    pub mtime: i64,
    pub depth: u32,
    pub name_len: u32,
    pub parent: u32,
    pub first_child: u32,
    pub last_child: u32,
    pub next_sibling: u32,
    pub prev_sibling: u32,
    pub flags: u32,
}

impl NodeRecord {
    /// Name bytes without padding
    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..(self.name_len as usize).min(MAX_NAME_LEN)]
    }

    pub fn is_dir(&self) -> bool {
        self.flags & FLAG_DIR != 0
    }

    fn links(&self) -> [u32; 5] {
        [
            self.parent,
            self.first_child,
            self.last_child,
            self.next_sibling,
            self.prev_sibling,
        ]
    }
}

/// Flatten `tree` into a record array of `count_nodes(root) + 1` slots.
///
/// The root record is written without a name.
pub fn linearize(tree: &FileTree) -> CacheResult<Vec<NodeRecord>> {
    let root = tree.root().ok_or(CacheError::Empty)?;
    let order = tree.post_order(root);
    if order.len() >= u32::MAX as usize {
        return Err(CacheError::TooManyNodes { count: order.len() });
    }

    // Arena position → slot
    let mut slot_of = vec![0u32; tree.len()];
    for (i, id) in order.iter().enumerate() {
        slot_of[id.index()] = i as u32 + 1;
    }
    let link = |l: Option<NodeId>| l.map_or(0, |id| slot_of[id.index()]);

    let mut records = vec![NodeRecord::zeroed(); order.len() + 1];
    for (i, &id) in order.iter().enumerate() {
        let node = tree.node(id);
        let name = if id == root { &[][..] } else { node.name.as_bytes() };
        if name.len() > MAX_NAME_LEN {
            return Err(CacheError::NameTooLong {
                name: node.name.to_string_lossy().into_owned(),
                len: name.len(),
                max: MAX_NAME_LEN,
            });
        }

        let record = &mut records[i + 1];
        record.name[..name.len()].copy_from_slice(name);
        record.name_len = name.len() as u32;
        record.inode = node.inode;
        record.size = node.size;
        record.total_size = node.total_size;
        record.mtime = node.mtime;
        record.depth = node.depth;
        record.flags = if node.is_dir { FLAG_DIR } else { 0 };
        record.parent = link(node.parent);
        record.first_child = link(node.first_child);
        record.last_child = link(node.last_child);
        record.next_sibling = link(node.next_sibling);
        record.prev_sibling = link(node.prev_sibling);
    }

    Ok(records)
}

/// Rebuild a tree from a record array. Slot `k` becomes `NodeId(k - 1)`.
/// The root comes back with the (empty) name its record holds.
///
/// Every link is checked before anything is built, so a damaged array gives
/// an error rather than a tree that cannot be walked.
pub fn delinearize(records: &[NodeRecord]) -> CacheResult<FileTree> {
    if records.len() < 2 {
        return Err(CacheError::Empty);
    }
    validate(records)?;

    let to_id = |slot: u32| slot.checked_sub(1).map(NodeId);
    let nodes: Vec<FileNode> = records[1..]
        .iter()
        .map(|r| FileNode {
            name: OsStr::from_bytes(r.name_bytes()).to_os_string(),
            inode: r.inode,
            size: r.size,
            total_size: r.total_size,
            depth: r.depth,
            mtime: r.mtime,
            is_dir: r.is_dir(),
            parent: to_id(r.parent),
            first_child: to_id(r.first_child),
            last_child: to_id(r.last_child),
            next_sibling: to_id(r.next_sibling),
            prev_sibling: to_id(r.prev_sibling),
        })
        .collect();

    let root_slot = records
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, r)| r.parent == 0 && r.prev_sibling == 0)
        .map_or(records.len() - 1, |(slot, _)| slot);

    Ok(FileTree::from_parts(nodes, NodeId(root_slot as u32 - 1)))
}

fn validate(records: &[NodeRecord]) -> CacheResult<()> {
    let len = records.len();
    let inconsistent = |record: usize, reason: &'static str| CacheError::Inconsistent { record, reason };

    for (slot, record) in records.iter().enumerate().skip(1) {
        if let Some(&index) = record.links().iter().find(|&&l| l as usize >= len) {
            return Err(CacheError::DanglingIndex { record: slot, index, len });
        }
        if record.name_len as usize > MAX_NAME_LEN {
            return Err(CacheError::NameTooLong {
                name: String::from_utf8_lossy(&record.name).into_owned(),
                len: record.name_len as usize,
                max: MAX_NAME_LEN,
            });
        }
    }

    for (slot, record) in records.iter().enumerate().skip(1) {
        let this = slot as u32;
        let at = |index: u32| &records[index as usize];

        if (record.first_child == 0) != (record.last_child == 0) {
            return Err(inconsistent(slot, "only one of first and last child is set"));
        }
        if record.parent != 0 && record.depth != at(record.parent).depth.wrapping_add(1) {
            return Err(inconsistent(slot, "depth is not one below the parent"));
        }
        if record.first_child != 0 {
            let first = at(record.first_child);
            if first.parent != this || first.prev_sibling != 0 {
                return Err(inconsistent(slot, "first child does not point back"));
            }
            let last = at(record.last_child);
            if last.parent != this || last.next_sibling != 0 {
                return Err(inconsistent(slot, "last child does not point back"));
            }
        }
        if record.next_sibling != 0 {
            let next = at(record.next_sibling);
            if next.prev_sibling != this || next.parent != record.parent {
                return Err(inconsistent(slot, "next sibling does not point back"));
            }
        }
        if record.prev_sibling != 0 {
            let prev = at(record.prev_sibling);
            if prev.next_sibling != this || prev.parent != record.parent {
                return Err(inconsistent(slot, "previous sibling does not point back"));
            }
        }
    }

    Ok(())
}

/// Write `tree` to `path`
pub fn save(tree: &FileTree, path: &Path) -> CacheResult<()> {
    let records = linearize(tree)?;
    let root_path = tree
        .root()
        .map_or(&[][..], |root| tree.node(root).name.as_bytes());
    let header = CacheHeader {
        magic: CACHE_MAGIC,
        version: CACHE_VERSION,
        record_size: size_of::<NodeRecord>() as u32,
        node_count: records.len() as u64 - 1,
        root_index: records.len() as u64 - 1,
        root_path_len: root_path.len() as u64,
    };

    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(bytemuck::bytes_of(&header)).map_err(io_err)?;
    writer.write_all(root_path).map_err(io_err)?;
    writer
        .write_all(bytemuck::cast_slice(&records))
        .map_err(io_err)?;
    writer.flush().map_err(io_err)?;

    debug!(path = %path.display(), nodes = header.node_count, "Cache saved");
    Ok(())
}

/// Read a tree saved by `save`
pub fn load(path: &Path) -> CacheResult<FileTree> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(io_err)?;
    let file_len = file.metadata().map_err(io_err)?.len();
    let mut reader = BufReader::new(file);

    let header_len = size_of::<CacheHeader>() as u64;
    if file_len < header_len {
        return Err(CacheError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    let mut header = CacheHeader::zeroed();
    reader
        .read_exact(bytemuck::bytes_of_mut(&mut header))
        .map_err(io_err)?;

    if header.magic != CACHE_MAGIC {
        return Err(CacheError::BadMagic {
            path: path.to_path_buf(),
        });
    }
    if header.version != CACHE_VERSION {
        return Err(CacheError::UnsupportedVersion {
            found: header.version,
            expected: CACHE_VERSION,
        });
    }
    let record_size = size_of::<NodeRecord>() as u32;
    if header.record_size != record_size {
        return Err(CacheError::RecordSizeMismatch {
            found: header.record_size,
            expected: record_size,
        });
    }
    if header.node_count == 0 {
        return Err(CacheError::Empty);
    }

    let expected = header
        .node_count
        .checked_add(1)
        .and_then(|slots| slots.checked_mul(record_size as u64))
        .and_then(|bytes| bytes.checked_add(header_len))
        .and_then(|bytes| bytes.checked_add(header.root_path_len));
    if expected != Some(file_len) {
        return Err(CacheError::LengthMismatch {
            expected: expected.unwrap_or(u64::MAX),
            found: file_len,
        });
    }
    if header.node_count >= u32::MAX as u64 {
        return Err(CacheError::TooManyNodes {
            count: header.node_count as usize,
        });
    }

    let slots = header.node_count as usize + 1;
    if header.root_index == 0 || header.root_index >= slots as u64 {
        return Err(CacheError::DanglingIndex {
            record: 0,
            index: header.root_index as u32,
            len: slots,
        });
    }

    let mut root_path = vec![0u8; header.root_path_len as usize];
    reader.read_exact(&mut root_path).map_err(io_err)?;
    if root_path.is_empty() {
        return Err(CacheError::Inconsistent {
            record: header.root_index as usize,
            reason: "root path is empty",
        });
    }

    let mut records = vec![NodeRecord::zeroed(); slots];
    reader
        .read_exact(bytemuck::cast_slice_mut(&mut records))
        .map_err(io_err)?;

    let mut tree = delinearize(&records)?;
    let root = match tree.root() {
        Some(root) if root.0 as u64 + 1 == header.root_index => root,
        _ => {
            return Err(CacheError::Inconsistent {
                record: header.root_index as usize,
                reason: "header names a different root",
            })
        }
    };
    tree.node_mut(root).name = OsStr::from_bytes(&root_path).to_os_string();

    debug!(path = %path.display(), nodes = header.node_count, "Cache loaded");
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;

    fn sample() -> FileTree {
        // root(1) -> [a(2) -> [x(4), y(5)], b(3)]
        let mut tree = FileTree::new(FileNode::new("/r", 1, 4096, 10, true));
        let root = tree.root().unwrap();
        let a = tree.add_child(root, FileNode::new("a", 2, 4096, 11, true));
        tree.add_child(root, FileNode::new("b", 3, 100, 12, false));
        tree.add_child(a, FileNode::new("x", 4, 10, 13, false));
        tree.add_child(a, FileNode::new("y", 5, 20, 14, false));
        tree.aggregate_sizes();
        tree
    }

    type Shape = (OsString, u64, u64, u64, u32, i64, bool, [Option<usize>; 5]);

    /// Nodes in post-order with links expressed as post-order positions
    fn shape(tree: &FileTree) -> Vec<Shape> {
        let order = tree.post_order(tree.root().unwrap());
        let pos = |l: Option<NodeId>| l.map(|id| order.iter().position(|&o| o == id).unwrap());
        order
            .iter()
            .map(|&id| {
                let n = tree.node(id);
                (
                    n.name.clone(),
                    n.inode,
                    n.size,
                    n.total_size,
                    n.depth,
                    n.mtime,
                    n.is_dir,
                    [
                        pos(n.parent),
                        pos(n.first_child),
                        pos(n.last_child),
                        pos(n.next_sibling),
                        pos(n.prev_sibling),
                    ],
                )
            })
            .collect()
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(size_of::<CacheHeader>(), 40);
        assert_eq!(size_of::<NodeRecord>(), 320);
    }

    #[test]
    fn test_linearize_indices() {
        let records = linearize(&sample()).unwrap();
        assert_eq!(records.len(), 6);
        assert_eq!(records[0], NodeRecord::zeroed());

        let names: Vec<&[u8]> = records[1..].iter().map(|r| r.name_bytes()).collect();
        assert_eq!(names, vec![&b"x"[..], b"y", b"a", b"b", b""]);

        // x=1 y=2 a=3 b=4 root=5
        let root = &records[5];
        assert_eq!((root.parent, root.first_child, root.last_child), (0, 3, 4));
        assert_eq!(root.total_size, 4096 + 4096 + 100 + 10 + 20);
        let a = &records[3];
        assert_eq!((a.parent, a.first_child, a.last_child), (5, 1, 2));
        assert_eq!((a.next_sibling, a.prev_sibling), (4, 0));
        assert!(a.is_dir());
        let y = &records[2];
        assert_eq!((y.parent, y.prev_sibling, y.next_sibling), (3, 1, 0));
        assert_eq!(y.depth, 2);
        assert!(!y.is_dir());
    }

    #[test]
    fn test_delinearize_restores_tree() {
        let tree = sample();
        let mut loaded = delinearize(&linearize(&tree).unwrap()).unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.root(), Some(NodeId(4)));
        assert_eq!(loaded.node(NodeId(4)).name, "");
        loaded.node_mut(NodeId(4)).name = "/r".into();
        assert_eq!(shape(&loaded), shape(&tree));
    }

    #[test]
    fn test_save_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tree.rdu");
        let tree = sample();

        save(&tree, &path).unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 40 + 2 + 6 * 320);

        let loaded = load(&path).unwrap();
        assert_eq!(shape(&loaded), shape(&tree));
    }

    #[test]
    fn test_single_node() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("single.rdu");
        let tree = FileTree::new(FileNode::new("lonely.txt", 9, 512, 0, false));
        assert_eq!(linearize(&tree).unwrap().len(), 2);

        save(&tree, &path).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.node(loaded.root().unwrap()).name, "lonely.txt");
    }

    #[test]
    fn test_root_path_longer_than_a_record_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("deep.rdu");
        let root_name = format!("/{}", ["segment"; 60].join("/"));
        assert!(root_name.len() > MAX_NAME_LEN);

        let mut tree = FileTree::new(FileNode::new(root_name.as_str(), 1, 4096, 0, true));
        let root = tree.root().unwrap();
        tree.add_child(root, FileNode::new("f", 2, 512, 0, false));
        tree.aggregate_sizes();

        save(&tree, &path).unwrap();
        let loaded = load(&path).unwrap();
        let root = loaded.root().unwrap();
        assert_eq!(loaded.node(root).name, root_name.as_str());
        assert_eq!(loaded.node(root).total_size, 4096 + 512);
        assert_eq!(loaded.path_of(NodeId(0)), Path::new(&root_name).join("f"));
    }

    #[test]
    fn test_empty_tree() {
        let mut tree = sample();
        tree.free_subtree(tree.root().unwrap());
        assert!(matches!(linearize(&tree), Err(CacheError::Empty)));
        assert!(matches!(delinearize(&[NodeRecord::zeroed()]), Err(CacheError::Empty)));
    }

    #[test]
    fn test_name_too_long() {
        let long = "n".repeat(300);
        let mut tree = FileTree::new(FileNode::new("/r", 1, 0, 0, true));
        let root = tree.root().unwrap();
        tree.add_child(root, FileNode::new(long, 2, 0, 0, false));
        assert!(matches!(
            linearize(&tree),
            Err(CacheError::NameTooLong { len: 300, .. })
        ));
    }

    #[test]
    fn test_damaged_records() {
        let records = linearize(&sample()).unwrap();

        let mut dangling = records.clone();
        dangling[1].parent = 17;
        assert!(matches!(
            delinearize(&dangling),
            Err(CacheError::DanglingIndex { record: 1, index: 17, .. })
        ));

        let mut asymmetric = records.clone();
        asymmetric[3].next_sibling = 2;
        assert!(matches!(
            delinearize(&asymmetric),
            Err(CacheError::Inconsistent { record: 3, .. })
        ));

        let mut half_linked = records;
        half_linked[5].last_child = 0;
        assert!(matches!(
            delinearize(&half_linked),
            Err(CacheError::Inconsistent { record: 5, .. })
        ));
    }

    #[test]
    fn test_load_rejects_bad_files() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tree.rdu");
        save(&sample(), &path).unwrap();
        let bytes = std::fs::read(&path).unwrap();

        let truncated = tmp.path().join("truncated.rdu");
        std::fs::write(&truncated, &bytes[..bytes.len() - 100]).unwrap();
        assert!(matches!(
            load(&truncated),
            Err(CacheError::LengthMismatch { .. })
        ));

        let foreign = tmp.path().join("foreign.rdu");
        std::fs::write(&foreign, b"this is not a cache file, just some text").unwrap();
        assert!(matches!(load(&foreign), Err(CacheError::BadMagic { .. })));

        let tiny = tmp.path().join("tiny.rdu");
        std::fs::write(&tiny, b"RDU").unwrap();
        assert!(matches!(load(&tiny), Err(CacheError::BadMagic { .. })));

        let mut future = bytes.clone();
        future[8..12].copy_from_slice(&99u32.to_ne_bytes());
        let versioned = tmp.path().join("future.rdu");
        std::fs::write(&versioned, &future).unwrap();
        assert!(matches!(
            load(&versioned),
            Err(CacheError::UnsupportedVersion { found: 99, .. })
        ));

        assert!(matches!(
            load(&tmp.path().join("missing.rdu")),
            Err(CacheError::Io { .. })
        ));
    }
}
