use std::fs::{self, Metadata};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use kernel::{NodeKind, TreeNode};

use crate::assembler::PARTIAL_PREFIX;
use crate::metadata::MetadataRegistry;
use crate::paths;

struct Node {
    item: TreeNode,
    children: Vec<usize>,
}

/// Listing held as an arena: nodes addressed by index with parent to child
/// edges only.
#[derive(Default)]
pub struct Tree {
    nodes: Vec<Node>,
    roots: Vec<usize>,
}

impl Tree {
    fn push(&mut self, item: TreeNode, children: Vec<usize>) -> usize {
        self.nodes.push(Node { item, children });
        self.nodes.len() - 1
    }

    /// Keeps entries whose name contains `term`, ignoring case, plus the
    /// directories leading to them. Directories without a match inside keep
    /// only their own name match. An empty term keeps everything.
    pub fn filter(&mut self, term: &str) {
        if term.is_empty() {
            return;
        }
        let needle = term.to_lowercase();
        let roots = std::mem::take(&mut self.roots);
        let mut kept = Vec::with_capacity(roots.len());
        for root in roots {
            if self.retain(root, &needle) {
                kept.push(root);
            }
        }
        self.roots = kept;
    }

    fn retain(&mut self, index: usize, needle: &str) -> bool {
        let matches = self.nodes[index].item.name.to_lowercase().contains(needle);
        if self.nodes[index].item.kind == NodeKind::File {
            return matches;
        }

        let children = std::mem::take(&mut self.nodes[index].children);
        let mut kept = Vec::with_capacity(children.len());
        for child in children {
            if self.retain(child, needle) {
                kept.push(child);
            }
        }
        let keep = matches || !kept.is_empty();
        self.nodes[index].children = kept;
        keep
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Nested form of the listing.
    #[must_use]
    pub fn into_nodes(self) -> Vec<TreeNode> {
        self.roots.iter().map(|&i| self.materialize(i)).collect()
    }

    fn materialize(&self, index: usize) -> TreeNode {
        let node = &self.nodes[index];
        let mut item = node.item.clone();
        if item.kind == NodeKind::Directory {
            item.children = Some(node.children.iter().map(|&c| self.materialize(c)).collect());
        }
        item
    }
}

/// Builds listings from the live file tree, registering files the registry
/// does not know yet.
pub struct TreeBuilder<'a> {
    root: &'a Path,
    registry: &'a MetadataRegistry,
}

impl<'a> TreeBuilder<'a> {
    #[must_use]
    pub fn new(root: &'a Path, registry: &'a MetadataRegistry) -> Self {
        Self { root, registry }
    }

    /// Full tree below `folder`, a path relative to the storage root.
    /// A folder that does not exist lists as empty.
    #[must_use]
    pub fn list(&self, folder: &Path) -> Tree {
        let mut tree = Tree::default();
        let start = self.root.join(folder);
        if start.is_dir() {
            tree.roots = self.scan(&mut tree, &start);
        }
        tree
    }

    fn scan(&self, tree: &mut Tree, dir: &Path) -> Vec<usize> {
        let mut entries = match read_entries(dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!("failed to scan directory {}: {e}", dir.display());
                return Vec::new();
            }
        };
        entries.sort_by(|a, b| {
            b.meta
                .is_dir()
                .cmp(&a.meta.is_dir())
                .then_with(|| a.name.cmp(&b.name))
        });

        let mut indices = Vec::with_capacity(entries.len());
        for entry in entries {
            let index = if entry.meta.is_dir() {
                self.directory_node(tree, entry)
            } else {
                self.file_node(tree, entry)
            };
            indices.push(index);
        }
        indices
    }

    fn directory_node(&self, tree: &mut Tree, entry: Entry) -> usize {
        let children = self.scan(tree, &entry.path);
        let size = children.iter().map(|&c| tree.nodes[c].item.size).sum();
        let path = paths::relative_to(self.root, &entry.path);
        let upload_time = entry
            .meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let item = TreeNode {
            id: format!("dir-{path}"),
            name: entry.name,
            path,
            kind: NodeKind::Directory,
            size,
            upload_time,
            download_count: None,
            hash: None,
            children: None,
        };
        tree.push(item, children)
    }

    fn file_node(&self, tree: &mut Tree, entry: Entry) -> usize {
        let record = self
            .registry
            .register_if_absent(&entry.path, &entry.name, entry.meta.len());

        let item = TreeNode {
            id: record.id,
            name: entry.name,
            path: record.relative_path,
            kind: NodeKind::File,
            size: record.size,
            upload_time: record.created_at,
            download_count: Some(record.download_count),
            hash: record.content_fingerprint,
            children: None,
        };
        tree.push(item, Vec::new())
    }
}

struct Entry {
    name: String,
    path: PathBuf,
    meta: Metadata,
}

fn read_entries(dir: &Path) -> std::io::Result<Vec<Entry>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping entry in {}: {e}", dir.display());
                continue;
            }
        };
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(PARTIAL_PREFIX) {
            continue;
        }
        let path = entry.path();
        // links may point outside the upload directory
        if entry.file_type().is_ok_and(|t| t.is_symlink()) {
            tracing::debug!("skipping link {}", path.display());
            continue;
        }
        let meta = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("skipping {}: {e}", path.display());
                continue;
            }
        };
        entries.push(Entry { name, path, meta });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Fixture {
        dir: tempfile::TempDir,
        root: PathBuf,
        registry: MetadataRegistry,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        fs::create_dir_all(root.join("docs/reports")).unwrap();
        fs::create_dir_all(root.join("music")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::write(root.join("docs/Report-2024.pdf"), vec![0; 30]).unwrap();
        fs::write(root.join("docs/reports/q1.txt"), vec![0; 12]).unwrap();
        fs::write(root.join("music/song.mp3"), vec![0; 100]).unwrap();
        fs::write(root.join("readme.md"), vec![0; 5]).unwrap();
        let registry = MetadataRegistry::open(dir.path().join("file-info.json"), &root).unwrap();
        Fixture {
            dir,
            root,
            registry,
        }
    }

    fn names(nodes: &[TreeNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.name.as_str()).collect()
    }

    fn find<'a>(nodes: &'a [TreeNode], name: &str) -> &'a TreeNode {
        nodes.iter().find(|n| n.name == name).unwrap()
    }

    #[test]
    fn list_orders_directories_first_and_sums_sizes() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let nodes = builder.list(Path::new("")).into_nodes();

        // Assert
        assert_eq!(names(&nodes), vec!["docs", "empty", "music", "readme.md"]);
        let docs = find(&nodes, "docs");
        assert_eq!(docs.kind, NodeKind::Directory);
        assert_eq!(docs.size, 42);
        assert_eq!(docs.id, "dir-docs");
        let reports = find(docs.children.as_ref().unwrap(), "reports");
        assert_eq!(reports.path, "docs/reports");
        assert_eq!(reports.size, 12);
        assert_eq!(find(&nodes, "empty").size, 0);
    }

    #[test]
    fn list_registers_untracked_files_once() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let first = builder.list(Path::new("")).into_nodes();
        let second = builder.list(Path::new("")).into_nodes();

        // Assert
        assert_eq!(f.registry.all().len(), 4);
        let readme = find(&first, "readme.md");
        assert_eq!(readme.id, find(&second, "readme.md").id);
        assert_eq!(readme.hash, None);
        assert_eq!(readme.download_count, Some(0));
        let record = f.registry.find_by_id(&readme.id).unwrap();
        assert_eq!(record.content_fingerprint, None);
    }

    #[test]
    fn list_keeps_fingerprint_of_uploaded_file() {
        // Arrange
        let f = fixture();
        let path = f.root.join("readme.md");
        let uploaded = f.registry.upsert(&path, "README.md", 5, Some("h1".to_owned()));
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let nodes = builder.list(Path::new("")).into_nodes();

        // Assert
        let readme = find(&nodes, "readme.md");
        assert_eq!(readme.id, uploaded.id);
        assert_eq!(readme.hash.as_deref(), Some("h1"));
        assert_eq!(readme.upload_time, uploaded.created_at);
        assert_eq!(f.registry.find_by_path(&path).unwrap(), uploaded);
    }

    #[cfg(unix)]
    #[test]
    fn list_skips_symlinks() {
        // Arrange
        let f = fixture();
        let outside = f.dir.path().join("secret.txt");
        fs::write(&outside, b"outside").unwrap();
        std::os::unix::fs::symlink(&outside, f.root.join("link.txt")).unwrap();
        std::os::unix::fs::symlink(f.dir.path(), f.root.join("link-dir")).unwrap();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let nodes = builder.list(Path::new("")).into_nodes();

        // Assert
        assert_eq!(names(&nodes), vec!["docs", "empty", "music", "readme.md"]);
        assert!(f.registry.find_by_path(&f.root.join("link.txt")).is_none());
        assert_eq!(f.registry.all().len(), 4);
    }

    #[test]
    fn list_subfolder() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let nodes = builder.list(Path::new("docs")).into_nodes();

        // Assert
        assert_eq!(names(&nodes), vec!["reports", "Report-2024.pdf"]);
        assert_eq!(find(&nodes, "Report-2024.pdf").path, "docs/Report-2024.pdf");
    }

    #[test]
    fn list_missing_folder_is_empty() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let tree = builder.list(Path::new("nowhere"));

        // Assert
        assert!(tree.is_empty());
    }

    #[test]
    fn list_skips_partial_merge_files() {
        // Arrange
        let f = fixture();
        fs::write(f.root.join(format!("{PARTIAL_PREFIX}abc")), b"half").unwrap();
        let builder = TreeBuilder::new(&f.root, &f.registry);

        // Act
        let nodes = builder.list(Path::new("")).into_nodes();

        // Assert
        assert_eq!(nodes.len(), 4);
    }

    #[rstest]
    #[case("REPORT", vec!["docs"])]
    #[case("song", vec!["music"])]
    #[case("zzz", vec![])]
    #[case("", vec!["docs", "empty", "music", "readme.md"])]
    #[case("empty", vec!["empty"])]
    #[trace]
    fn filter_keeps_matching_branches(#[case] term: &str, #[case] expected: Vec<&str>) {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);
        let mut tree = builder.list(Path::new(""));

        // Act
        tree.filter(term);

        // Assert
        let nodes = tree.into_nodes();
        assert_eq!(names(&nodes), expected);
    }

    #[test]
    fn filter_prunes_children_depth_first() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);
        let mut tree = builder.list(Path::new(""));

        // Act
        tree.filter("q1");

        // Assert
        let nodes = tree.into_nodes();
        let docs = find(&nodes, "docs");
        let children = docs.children.as_ref().unwrap();
        assert_eq!(names(children), vec!["reports"]);
        assert_eq!(names(children[0].children.as_ref().unwrap()), vec!["q1.txt"]);
    }

    #[test]
    fn matching_directory_drops_non_matching_children() {
        // Arrange
        let f = fixture();
        let builder = TreeBuilder::new(&f.root, &f.registry);
        let mut tree = builder.list(Path::new(""));

        // Act
        tree.filter("music");

        // Assert
        let nodes = tree.into_nodes();
        assert_eq!(names(&nodes), vec!["music"]);
        assert!(nodes[0].children.as_ref().unwrap().is_empty());
    }
}
