use std::ffi::OsString;
use std::path::PathBuf;

/// Index into the arena `Vec<FileNode>`. u32 keeps nodes small and matches the
/// width of the cache record links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A single node in the file tree, stored in a flat arena.
///
/// Children form a doubly linked sibling list hanging off `first_child` /
/// `last_child`, so appending a child and unlinking any node are O(1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Entry name (the root holds the path it was scanned as)
    pub name: OsString,
    /// Inode number
    pub inode: u64,
    /// Own allocated size in bytes
    pub size: u64,
    /// Own size plus everything below
    pub total_size: u64,
    /// Depth in the tree (root = 0)
    pub depth: u32,
    /// Modification time, seconds since the epoch
    pub mtime: i64,
    /// Whether this node is a directory
    pub is_dir: bool,
    pub parent: Option<NodeId>,
    pub first_child: Option<NodeId>,
    pub last_child: Option<NodeId>,
    pub next_sibling: Option<NodeId>,
    pub prev_sibling: Option<NodeId>,
}

impl FileNode {
    /// Create an unlinked node
    pub fn new(name: impl Into<OsString>, inode: u64, size: u64, mtime: i64, is_dir: bool) -> Self {
        Self {
            name: name.into(),
            inode,
            size,
            total_size: size,
            depth: 0,
            mtime,
            is_dir,
            parent: None,
            first_child: None,
            last_child: None,
            next_sibling: None,
            prev_sibling: None,
        }
    }
}

/// The file tree stored as a flat arena of nodes.
#[derive(Debug, Clone, Default)]
pub struct FileTree {
    nodes: Vec<FileNode>,
    root: Option<NodeId>,
}

impl FileTree {
    /// Create a tree holding only `root`.
    pub fn new(mut root: FileNode) -> Self {
        root.depth = 0;
        root.parent = None;
        root.first_child = None;
        root.last_child = None;
        root.next_sibling = None;
        root.prev_sibling = None;
        FileTree {
            nodes: vec![root],
            root: Some(NodeId(0)),
        }
    }

    /// Adopt already linked nodes (used when loading a cache).
    pub(crate) fn from_parts(nodes: Vec<FileNode>, root: NodeId) -> Self {
        FileTree {
            nodes,
            root: Some(root),
        }
    }

    /// Root node, `None` once the root was freed.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Get a node by ID.
    pub fn node(&self, id: NodeId) -> &FileNode {
        &self.nodes[id.index()]
    }

    /// Get a mutable node by ID.
    pub fn node_mut(&mut self, id: NodeId) -> &mut FileNode {
        &mut self.nodes[id.index()]
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append `node` at the tail of `parent`'s children. Returns the new ID.
    pub fn add_child(&mut self, parent: NodeId, mut node: FileNode) -> NodeId {
        let new_id = NodeId(self.nodes.len() as u32);
        let previous_tail = self.nodes[parent.index()].last_child;

        node.parent = Some(parent);
        node.depth = self.nodes[parent.index()].depth + 1;
        node.prev_sibling = previous_tail;
        node.next_sibling = None;
        node.first_child = None;
        node.last_child = None;

        match previous_tail {
            Some(tail) => self.nodes[tail.index()].next_sibling = Some(new_id),
            None => self.nodes[parent.index()].first_child = Some(new_id),
        }
        self.nodes[parent.index()].last_child = Some(new_id);

        self.nodes.push(node);
        new_id
    }

    /// Iterate over children of a node.
    pub fn children(&self, parent: NodeId) -> ChildIter<'_> {
        ChildIter {
            tree: self,
            current: self.nodes[parent.index()].first_child,
        }
    }

    /// Nodes reachable from `id` through first-child descent and next-sibling
    /// traversal. This includes the siblings to the right of `id` and their
    /// subtrees.
    pub fn count_nodes(&self, id: NodeId) -> usize {
        let mut count = 0;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            count += 1;
            let node = self.node(current);
            stack.extend(node.next_sibling);
            stack.extend(node.first_child);
        }
        count
    }

    /// Depth-first search for `inode` among `id` and its descendants, children
    /// before siblings. Ancestors and siblings of `id` are never visited.
    pub fn find(&self, id: NodeId, inode: u64) -> Option<NodeId> {
        if self.node(id).inode == inode {
            return Some(id);
        }
        let mut stack: Vec<NodeId> = self.node(id).first_child.into_iter().collect();
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if node.inode == inode {
                return Some(current);
            }
            stack.extend(node.next_sibling);
            stack.extend(node.first_child);
        }
        None
    }

    /// `id` and its descendants, parents before children
    pub fn pre_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            let mut child = self.node(current).last_child;
            while let Some(c) = child {
                stack.push(c);
                child = self.node(c).prev_sibling;
            }
        }
        order
    }

    /// `id` and its descendants, children (in sibling order) before their
    /// parent. This is the order cache indices are assigned in.
    pub fn post_order(&self, id: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![(id, false)];
        while let Some((current, expanded)) = stack.pop() {
            if expanded {
                order.push(current);
                continue;
            }
            stack.push((current, true));
            let mut child = self.node(current).last_child;
            while let Some(c) = child {
                stack.push((c, false));
                child = self.node(c).prev_sibling;
            }
        }
        order
    }

    /// Recompute every `total_size` bottom-up.
    pub fn aggregate_sizes(&mut self) {
        let Some(root) = self.root else {
            return;
        };
        let order = self.pre_order(root);
        for &id in &order {
            let node = self.node_mut(id);
            node.total_size = node.size;
        }
        for &id in order.iter().rev() {
            let (total, parent) = {
                let node = self.node(id);
                (node.total_size, node.parent)
            };
            if let Some(parent) = parent {
                self.node_mut(parent).total_size += total;
            }
        }
    }

    /// Full path of a node, starting with the root's name
    pub fn path_of(&self, id: NodeId) -> PathBuf {
        let mut names = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c);
            names.push(&node.name);
            current = node.parent;
        }
        names.iter().rev().collect()
    }

    /// Remove `id`, every sibling to its right, and all of their descendants.
    /// The left neighbour (or the parent, when `id` was the first child) ends
    /// up as the tail of the sibling list. Remaining nodes are compacted, so
    /// other `NodeId`s held by the caller are invalidated. Freeing the root
    /// empties the tree.
    pub fn free_subtree(&mut self, id: NodeId) {
        if Some(id) == self.root {
            self.nodes.clear();
            self.root = None;
            return;
        }

        let (parent, prev) = {
            let node = self.node(id);
            (node.parent, node.prev_sibling)
        };
        match prev {
            Some(prev) => self.node_mut(prev).next_sibling = None,
            None => {
                if let Some(parent) = parent {
                    self.node_mut(parent).first_child = None;
                }
            }
        }
        if let Some(parent) = parent {
            self.node_mut(parent).last_child = prev;
        }

        let mut removed = vec![false; self.nodes.len()];
        let mut sibling = Some(id);
        while let Some(current) = sibling {
            sibling = self.node(current).next_sibling;
            for doomed in self.pre_order(current) {
                removed[doomed.index()] = true;
            }
        }

        let mut remap: Vec<Option<NodeId>> = Vec::with_capacity(self.nodes.len());
        let mut next_index = 0u32;
        for &gone in &removed {
            if gone {
                remap.push(None);
            } else {
                remap.push(Some(NodeId(next_index)));
                next_index += 1;
            }
        }

        let mut index = 0;
        self.nodes.retain(|_| {
            let keep = !removed[index];
            index += 1;
            keep
        });

        let relink = |link: Option<NodeId>| link.and_then(|l| remap[l.index()]);
        for node in &mut self.nodes {
            node.parent = relink(node.parent);
            node.first_child = relink(node.first_child);
            node.last_child = relink(node.last_child);
            node.next_sibling = relink(node.next_sibling);
            node.prev_sibling = relink(node.prev_sibling);
        }
        self.root = self.root.and_then(|r| remap[r.index()]);
    }
}

/// Iterator over the children of a node.
pub struct ChildIter<'a> {
    tree: &'a FileTree,
    current: Option<NodeId>,
}

impl<'a> Iterator for ChildIter<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.current?;
        self.current = self.tree.nodes[id.index()].next_sibling;
        Some(id)
    }
}
