//! In-memory tree materialisation (component G, §4.6): a consumer/error
//! handler pair installed on top of the traversal engine (§4.1), building a
//! node tree instead of streaming to the caller.
//!
//! Children are kept in insertion order without pulling in a new ordered-map
//! dependency: a `Vec<(String, FileTreeNode)>` alongside a `HashMap<String,
//! usize>` index, the same two-structure shape the extractor registry
//! (`extractor/mod.rs`) uses for its extension lookup.

use std::collections::HashMap;
use std::path::Path;

use crate::attributes::Attributes;
use crate::engine::{self, WalkOptions};
use crate::errors::{WalkError, WalkErrorCode, WalkResult};

/// One node of the materialised tree. `attributes` is absent for
/// placeholder nodes created while walking down to a deeper descendant
/// before that descendant's own ancestor entry has been visited.
pub struct FileTreeNode {
    name: String,
    path: String,
    attributes: Option<Attributes>,
    children: Vec<(String, FileTreeNode)>,
    child_index: HashMap<String, usize>,
}

impl FileTreeNode {
    fn placeholder(name: String, path: String) -> Self {
        Self { name, path, attributes: None, children: Vec::new(), child_index: HashMap::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        self.attributes.as_ref()
    }

    pub fn children(&self) -> impl Iterator<Item = &FileTreeNode> {
        self.children.iter().map(|(_, node)| node)
    }

    pub fn child(&self, name: &str) -> Option<&FileTreeNode> {
        self.child_index.get(name).map(|&i| &self.children[i].1)
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut FileTreeNode> {
        let index = *self.child_index.get(name)?;
        Some(&mut self.children[index].1)
    }

    /// Finds or creates the placeholder child named `name`; errors if a
    /// child already exists under that name with attributes assigned AND a
    /// caller tries to re-create it as a fresh node (callers instead use
    /// `child_mut`/`child` to detect the existing one first).
    fn ensure_child(&mut self, name: &str, child_path: &str) -> &mut FileTreeNode {
        if let Some(&index) = self.child_index.get(name) {
            return &mut self.children[index].1;
        }
        let index = self.children.len();
        self.children.push((name.to_string(), FileTreeNode::placeholder(name.to_string(), child_path.to_string())));
        self.child_index.insert(name.to_string(), index);
        &mut self.children[index].1
    }
}

/// `(display_path, message, cause, node snapshot at the time of the error)`.
pub struct TreeError {
    pub display_path: String,
    pub message: String,
    pub cause: Option<WalkError>,
    pub existing_node_attributes: Option<Attributes>,
}

/// Walks `root` under `options`, materialising every kept entry into a node
/// tree rather than streaming to a caller-supplied consumer.
pub fn make_tree(root: &Path, options: &WalkOptions) -> WalkResult<(FileTreeNode, Vec<TreeError>)> {
    let root_name = root.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tree_root = std::cell::RefCell::new(FileTreeNode::placeholder(root_name, String::new()));
    let errors = std::cell::RefCell::new(Vec::new());
    let root_display_path = engine::normalize_to_display(root);

    let result = engine::walk(
        root,
        options,
        &mut |display_path, supplier, attributes| {
            // The tree only stores attributes, so the stream itself is
            // never read — matching §3's "input_supplier... valid only
            // during the consumer invocation" without over-reading it.
            let _ = supplier;

            let relative =
                display_path.strip_prefix(root_display_path.as_str()).unwrap_or(display_path).trim_start_matches('/').to_string();

            let mut tree_root = tree_root.borrow_mut();
            if relative.is_empty() {
                tree_root.attributes = Some(attributes.copy());
                return Ok(());
            }

            let mut node = &mut *tree_root;
            let mut accumulated = String::new();
            let components: Vec<&str> = relative.split('/').collect();
            for (i, component) in components.iter().enumerate() {
                if !accumulated.is_empty() {
                    accumulated.push('/');
                }
                accumulated.push_str(component);
                node = node.ensure_child(component, &accumulated);
                if i == components.len() - 1 {
                    if node.attributes.is_some() {
                        return Err(WalkError::new(
                            WalkErrorCode::DuplicateChild,
                            format!("path already present in tree: {display_path}"),
                        ));
                    }
                    node.attributes = Some(attributes.copy());
                }
            }
            Ok(())
        },
        &mut |display_path, attributes, message, cause| {
            let _ = attributes;
            let existing_node_attributes = {
                let tree_root = tree_root.borrow();
                find_node(&tree_root, display_path, root_display_path.as_str()).and_then(|n| n.attributes.clone())
            };
            errors.borrow_mut().push(TreeError {
                display_path: display_path.to_string(),
                message: message.to_string(),
                cause,
                existing_node_attributes,
            });
            Ok(())
        },
    );

    result.map(|()| (tree_root.into_inner(), errors.into_inner()))
}

fn find_node<'a>(root: &'a FileTreeNode, display_path: &str, root_display_path: &str) -> Option<&'a FileTreeNode> {
    let relative = display_path.strip_prefix(root_display_path)?.trim_start_matches('/');
    if relative.is_empty() {
        return Some(root);
    }
    let mut node = root;
    for component in relative.split('/') {
        node = node.child(component)?;
    }
    Some(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static SEQ: AtomicU64 = AtomicU64::new(0);

    fn uniq_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let seq = SEQ.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("walktree-tree-{name}-{nanos}-{seq}"))
    }

    #[test]
    fn make_tree_mirrors_the_directory_structure() {
        let root = uniq_path("mirrors");
        fs::create_dir_all(root.join("d1")).unwrap();
        fs::write(root.join("top.txt"), b"hi").unwrap();
        fs::write(root.join("d1/nested.txt"), b"there").unwrap();

        let options = WalkOptions::default();
        let (tree, errors) = make_tree(&root, &options).unwrap();
        let _ = fs::remove_dir_all(&root);

        assert!(errors.is_empty());
        assert!(tree.child("top.txt").is_some());
        let d1 = tree.child("d1").expect("d1 present");
        assert!(d1.child("nested.txt").is_some());
    }

    #[test]
    fn placeholder_nodes_are_completed_once_their_own_entry_is_visited() {
        let root = uniq_path("placeholder");
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("a/b/leaf.txt"), b"x").unwrap();

        let options = WalkOptions::default();
        let (tree, _errors) = make_tree(&root, &options).unwrap();
        let _ = fs::remove_dir_all(&root);

        let a = tree.child("a").expect("a present");
        assert!(a.attributes().is_some(), "directory entries are visited and get real attributes");
        let b = a.child("b").expect("b present");
        assert!(b.child("leaf.txt").is_some());
    }

    #[test]
    fn make_tree_is_correct_when_the_root_entry_itself_is_filtered_out() {
        // root's own match_path is "" and never matches an include glob, so
        // the consumer is never invoked for root itself; the root's display
        // path must still come from `root`, not from the first entry seen.
        let root = uniq_path("include-filtered-root");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub/keep.txt"), b"x").unwrap();
        fs::write(root.join("sub/skip.md"), b"x").unwrap();

        let mut options = WalkOptions::default();
        options.include.add("*.txt".to_string()).unwrap();

        let (tree, errors) = make_tree(&root, &options).unwrap();
        let _ = fs::remove_dir_all(&root);

        assert!(errors.is_empty());
        assert!(tree.attributes().is_none(), "root itself was never emitted by the walk");
        let sub = tree.child("sub").expect("sub present");
        assert!(sub.child("keep.txt").is_some());
        assert!(sub.child("skip.md").is_none());
    }
}
