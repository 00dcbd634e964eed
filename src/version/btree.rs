//! Copy-on-write B-tree of file metadata.
//!
//! Every level of a [`Version`](super::Version) keeps its files in one of
//! these trees. Cloning a tree is O(1): it bumps the logical reference count
//! of the root. Every mutation walks down through [`mut_node`], which copies
//! any node that is shared before touching it, so two trees that share
//! structure never observe each other's edits.
//!
//! Nodes live in `Arc`s, which own the memory, and additionally carry an
//! explicit logical reference count that tracks how many trees (or parent
//! nodes) hold them. Iterators keep `Arc`s to the nodes they walk without
//! taking logical references, so a held iterator keeps a stale node alive
//! but never blocks or observes a mutation.
//!
//! ```text
//!   tree A root (refs 2) <---- tree B (clone of A)
//!        /        \
//!   leaf (refs 1)  leaf (refs 1)
//!
//!   B.insert(x): B's root is copied (children now have refs 2), then the
//!   leaf that receives x is copied. A is untouched.
//! ```

use std::any::{Any, TypeId};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::types::FileNum;
use crate::util::comparator::Comparator;
use crate::version::file_metadata::{FileBacking, FileMetadata};
use crate::version::INVARIANTS;

const DEGREE: usize = 16;
const MAX_ITEMS: usize = 2 * DEGREE - 1;
const MIN_ITEMS: usize = DEGREE - 1;

/// Computes an aggregate value over the files of a level, cached per node.
///
/// Annotations are computed lazily: mutations only mark cached values stale
/// and the next read recomputes the touched subtrees. Annotators are
/// identified by their type, so each annotator type has one cache slot per
/// node.
pub trait Annotator: Send + Sync + 'static {
    /// The aggregate value.
    type Value: Clone + Send + Sync + 'static;

    /// The value of an empty level.
    fn zero(&self) -> Self::Value;

    /// Fold one file into `dst`. The flag reports whether the result may be
    /// cached; a file whose contribution can change over its lifetime must
    /// return false.
    fn accumulate(&self, f: &FileMetadata, dst: Self::Value) -> (Self::Value, bool);

    /// Combine a child subtree's value into `dst`.
    fn merge(&self, src: &Self::Value, dst: Self::Value) -> Self::Value;
}

struct AnnotationSlot {
    key: TypeId,
    value: Box<dyn Any + Send + Sync>,
    valid: bool,
}

/// Ordering of the files within one tree.
#[derive(Clone)]
pub(crate) enum BTreeCmp {
    /// L0: by sequence numbers, then file number.
    SeqNum,
    /// L1+: by smallest internal key.
    SmallestKey(Arc<dyn Comparator>),
    /// An explicit order, used to build deliberately malformed levels.
    SpecificOrder(Arc<HashMap<FileNum, usize>>),
}

impl BTreeCmp {
    pub(crate) fn specific_order(files: &[Arc<FileMetadata>]) -> Self {
        let order = files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.file_num, i))
            .collect();
        BTreeCmp::SpecificOrder(Arc::new(order))
    }

    pub(crate) fn compare(&self, a: &FileMetadata, b: &FileMetadata) -> Ordering {
        match self {
            BTreeCmp::SeqNum => a.cmp_seq_num(b),
            BTreeCmp::SmallestKey(cmp) => a.cmp_smallest_key(b, cmp.as_ref()),
            BTreeCmp::SpecificOrder(order) => match (order.get(&a.file_num), order.get(&b.file_num)) {
                (Some(ai), Some(bi)) => ai.cmp(bi),
                _ => panic!("specific-order comparison of unknown files"),
            },
        }
    }
}

pub(crate) struct Node {
    refs: AtomicI32,
    leaf: bool,
    /// Number of files in the subtree rooted here.
    subtree_count: usize,
    items: Vec<Arc<FileMetadata>>,
    /// `items.len() + 1` children for internal nodes, empty for leaves.
    children: Vec<Arc<Node>>,
    annot: Mutex<Vec<AnnotationSlot>>,
}

/// Obtain exclusive access to the node in `slot`, copying it first if it is
/// shared with another tree or pinned by an iterator.
fn mut_node(slot: &mut Arc<Node>) -> &mut Node {
    let exclusive =
        slot.refs.load(AtomicOrdering::Acquire) == 1 && Arc::get_mut(slot).is_some();
    if !exclusive {
        let copy = Arc::new(slot.clone_node());
        let old = std::mem::replace(slot, copy);
        // Another tree may release the old node concurrently, so the old
        // node's contents are released through the normal path.
        old.dec_ref(true, None);
    }
    match Arc::get_mut(slot) {
        Some(node) => {
            for a in node.annot.get_mut().iter_mut() {
                a.valid = false;
            }
            node
        }
        None => panic!("copied B-tree node is still shared"),
    }
}

impl Node {
    fn new_leaf() -> Self {
        Self {
            refs: AtomicI32::new(1),
            leaf: true,
            subtree_count: 0,
            items: Vec::with_capacity(MAX_ITEMS),
            children: Vec::new(),
            annot: Mutex::new(Vec::new()),
        }
    }

    fn new_internal() -> Self {
        Self {
            leaf: false,
            children: Vec::with_capacity(MAX_ITEMS + 1),
            ..Self::new_leaf()
        }
    }

    fn count(&self) -> usize {
        self.items.len()
    }

    fn inc_ref(&self) {
        self.refs.fetch_add(1, AtomicOrdering::AcqRel);
    }

    /// Release one logical reference. When the last one goes and
    /// `contents_too` is set, the node's files and children are released in
    /// turn. A file reaching zero references is only legal when `obsolete`
    /// is provided to collect it.
    fn dec_ref(&self, contents_too: bool, obsolete: Option<&mut Vec<Arc<FileBacking>>>) {
        let remaining = self.refs.fetch_sub(1, AtomicOrdering::AcqRel) - 1;
        if remaining > 0 {
            return;
        }
        if remaining < 0 {
            panic!("B-tree node refcount went negative");
        }
        if !contents_too {
            return;
        }
        let mut obsolete = obsolete;
        for f in &self.items {
            if f.release_ref() == 0 {
                match obsolete.as_deref_mut() {
                    Some(out) => {
                        if let Some(backing) = f.backing() {
                            out.push(backing.clone());
                        }
                    }
                    None => panic!(
                        "file metadata {} dereferenced to zero during tree mutation",
                        f.file_num
                    ),
                }
            }
        }
        for child in &self.children {
            child.dec_ref(true, obsolete.as_deref_mut());
        }
    }

    /// Copy this node with a single reference. The copy takes its own
    /// references on the files and children. Cached annotations are not
    /// copied.
    fn clone_node(&self) -> Node {
        for f in &self.items {
            f.add_ref();
        }
        for child in &self.children {
            child.inc_ref();
        }
        Node {
            refs: AtomicI32::new(1),
            leaf: self.leaf,
            subtree_count: self.subtree_count,
            items: self.items.clone(),
            children: self.children.clone(),
            annot: Mutex::new(Vec::new()),
        }
    }

    fn push_back(&mut self, item: Arc<FileMetadata>, child: Option<Arc<Node>>) {
        self.items.push(item);
        if let Some(c) = child {
            self.children.push(c);
        }
    }

    fn push_front(&mut self, item: Arc<FileMetadata>, child: Option<Arc<Node>>) {
        if let Some(c) = child {
            self.children.insert(0, c);
        }
        self.items.insert(0, item);
    }

    fn pop_back(&mut self) -> (Arc<FileMetadata>, Option<Arc<Node>>) {
        let item = match self.items.pop() {
            Some(item) => item,
            None => panic!("pop_back on empty B-tree node"),
        };
        let child = if self.leaf { None } else { self.children.pop() };
        (item, child)
    }

    fn pop_front(&mut self) -> (Arc<FileMetadata>, Option<Arc<Node>>) {
        let item = self.items.remove(0);
        let child = if self.leaf {
            None
        } else {
            Some(self.children.remove(0))
        };
        (item, child)
    }

    fn find(&self, cmp: &BTreeCmp, item: &FileMetadata) -> (usize, bool) {
        let (mut i, mut j) = (0, self.count());
        while i < j {
            let h = (i + j) / 2;
            match cmp.compare(item, &self.items[h]) {
                Ordering::Equal => return (h, true),
                Ordering::Greater => i = h + 1,
                Ordering::Less => j = h,
            }
        }
        (i, false)
    }

    /// Split the node at index `i`. The node keeps the items before `i`; the
    /// item at `i` is returned together with a new node holding everything
    /// after it. The caller adopts the separator item in the parent.
    fn split(&mut self, i: usize) -> (Arc<FileMetadata>, Node) {
        let mut next = if self.leaf {
            Node::new_leaf()
        } else {
            Node::new_internal()
        };
        next.items.extend(self.items.drain(i + 1..));
        let out = self.items.remove(i);
        if !self.leaf {
            next.children.extend(self.children.drain(i + 1..));
            let moved: usize = next.children.iter().map(|c| c.subtree_count).sum();
            self.subtree_count -= moved;
            next.subtree_count += moved;
        }
        self.subtree_count -= next.count() + 1;
        next.subtree_count += next.count();
        (out, next)
    }

    fn insert(&mut self, cmp: &BTreeCmp, item: Arc<FileMetadata>) -> Result<()> {
        let (mut i, found) = self.find(cmp, &item);
        if found {
            return Err(Error::KeyCollision {
                a: item.file_num,
                b: self.items[i].file_num,
            });
        }
        if self.leaf {
            self.items.insert(i, item);
            self.subtree_count += 1;
            return Ok(());
        }
        if self.children[i].count() >= MAX_ITEMS {
            let (split_item, split_node) = mut_node(&mut self.children[i]).split(MAX_ITEMS / 2);
            self.items.insert(i, split_item);
            self.children.insert(i + 1, Arc::new(split_node));
            match cmp.compare(&item, &self.items[i]) {
                Ordering::Less => {}
                Ordering::Greater => i += 1,
                Ordering::Equal => {
                    return Err(Error::KeyCollision {
                        a: item.file_num,
                        b: self.items[i].file_num,
                    })
                }
            }
        }
        mut_node(&mut self.children[i]).insert(cmp, item)?;
        self.subtree_count += 1;
        Ok(())
    }

    fn remove_max(&mut self) -> Option<Arc<FileMetadata>> {
        if self.leaf {
            let out = self.items.pop()?;
            self.subtree_count -= 1;
            return Some(out);
        }
        let last = self.count();
        if self.children[last].count() <= MIN_ITEMS {
            self.rebalance_or_merge(last);
            return self.remove_max();
        }
        let out = mut_node(&mut self.children[last]).remove_max()?;
        self.subtree_count -= 1;
        Some(out)
    }

    /// Remove `item` from this subtree. An item that compares equal but is
    /// a different file is left in place.
    fn remove(&mut self, cmp: &BTreeCmp, item: &FileMetadata) -> Option<Arc<FileMetadata>> {
        let (i, found) = self.find(cmp, item);
        if found && self.items[i].file_num != item.file_num {
            return None;
        }
        if self.leaf {
            if !found {
                return None;
            }
            let out = self.items.remove(i);
            self.subtree_count -= 1;
            return Some(out);
        }
        if self.children[i].count() <= MIN_ITEMS {
            // Child not large enough to remove from.
            self.rebalance_or_merge(i);
            return self.remove(cmp, item);
        }
        let child = mut_node(&mut self.children[i]);
        if found {
            // Replace the removed item with the max of its left subtree.
            let replacement = child.remove_max()?;
            let out = std::mem::replace(&mut self.items[i], replacement);
            self.subtree_count -= 1;
            return Some(out);
        }
        let out = child.remove(cmp, item);
        if out.is_some() {
            self.subtree_count -= 1;
        }
        out
    }

    /// Grow child `i` so an item can be removed from it while it stays at or
    /// above `MIN_ITEMS`: borrow from a sibling with slack, else merge.
    fn rebalance_or_merge(&mut self, i: usize) {
        if i > 0 && self.children[i - 1].count() > MIN_ITEMS {
            // Rotate right through the separator at i-1.
            let left = mut_node(&mut self.children[i - 1]);
            let (x, grand) = left.pop_back();
            let moved = grand.as_ref().map_or(0, |g| g.subtree_count);
            left.subtree_count -= 1 + moved;
            let y = std::mem::replace(&mut self.items[i - 1], x);
            let child = mut_node(&mut self.children[i]);
            child.push_front(y, grand);
            child.subtree_count += 1 + moved;
        } else if i < self.count() && self.children[i + 1].count() > MIN_ITEMS {
            // Rotate left through the separator at i.
            let right = mut_node(&mut self.children[i + 1]);
            let (x, grand) = right.pop_front();
            let moved = grand.as_ref().map_or(0, |g| g.subtree_count);
            right.subtree_count -= 1 + moved;
            let y = std::mem::replace(&mut self.items[i], x);
            let child = mut_node(&mut self.children[i]);
            child.push_back(y, grand);
            child.subtree_count += 1 + moved;
        } else {
            // Merge child i with its right sibling around their separator.
            let i = if i >= self.count() { self.count() - 1 } else { i };
            mut_node(&mut self.children[i]);
            // Make the sibling exclusive so its contents can be moved.
            mut_node(&mut self.children[i + 1]);
            let separator = self.items.remove(i);
            let sibling = self.children.remove(i + 1);
            let child = mut_node(&mut self.children[i]);
            child.items.push(separator);
            child.items.extend(sibling.items.iter().cloned());
            if !child.leaf {
                child.children.extend(sibling.children.iter().cloned());
            }
            child.subtree_count += sibling.subtree_count + 1;
            // The sibling's references now belong to `child`.
            sibling.dec_ref(false, None);
        }
    }

    fn invalidate_annotation(&self, key: TypeId) {
        {
            let mut annot = self.annot.lock();
            for a in annot.iter_mut().filter(|a| a.key == key) {
                a.valid = false;
            }
        }
        for child in &self.children {
            child.invalidate_annotation(key);
        }
    }

    fn annotation<A: Annotator>(&self, a: &A) -> (A::Value, bool) {
        let key = TypeId::of::<A>();
        {
            let annot = self.annot.lock();
            if let Some(slot) = annot.iter().find(|s| s.key == key && s.valid) {
                if let Some(v) = slot.value.downcast_ref::<A::Value>() {
                    return (v.clone(), true);
                }
            }
        }

        let mut v = a.zero();
        let mut valid = true;
        for i in 0..=self.count() {
            if !self.leaf {
                let (child_v, ok) = self.children[i].annotation(a);
                v = a.merge(&child_v, v);
                valid &= ok;
            }
            if i < self.count() {
                let (next, ok) = a.accumulate(&self.items[i], v);
                v = next;
                valid &= ok;
            }
        }

        let mut annot = self.annot.lock();
        let value: Box<dyn Any + Send + Sync> = Box::new(v.clone());
        match annot.iter_mut().find(|s| s.key == key) {
            Some(slot) => {
                slot.value = value;
                slot.valid = valid;
            }
            None => annot.push(AnnotationSlot { key, value, valid }),
        }
        (v, valid)
    }

    fn verify_invariants(&self) {
        let mut recomputed = self.count();
        if !self.leaf {
            if self.children.len() != self.count() + 1 {
                panic!(
                    "internal node has {} items but {} children",
                    self.count(),
                    self.children.len()
                );
            }
            for child in &self.children {
                child.verify_invariants();
                recomputed += child.subtree_count;
            }
        }
        if recomputed != self.subtree_count {
            panic!(
                "recomputed subtree count ({}) != subtree_count ({})",
                recomputed, self.subtree_count
            );
        }
    }

    fn write_newick(&self, out: &mut String) {
        if self.leaf {
            for (i, f) in self.items.iter().enumerate() {
                if i != 0 {
                    out.push(',');
                }
                out.push_str(&f.to_string());
            }
            return;
        }
        for i in 0..=self.count() {
            out.push('(');
            self.children[i].write_newick(out);
            out.push(')');
            if i < self.count() {
                out.push_str(&self.items[i].to_string());
            }
        }
    }
}

/// An ordered, copy-on-write set of files.
///
/// Writes must be serialized by the caller. Reads, including iteration, are
/// safe from any number of threads.
pub(crate) struct BTree {
    root: Option<Arc<Node>>,
    cmp: BTreeCmp,
}

impl BTree {
    pub(crate) fn new(cmp: BTreeCmp) -> Self {
        Self { root: None, cmp }
    }

    pub(crate) fn cmp(&self) -> &BTreeCmp {
        &self.cmp
    }

    pub(crate) fn set_cmp(&mut self, cmp: BTreeCmp) {
        self.cmp = cmp;
    }

    /// Drop the tree's reference to its root, releasing every file that no
    /// other tree holds. Returns the backings that became obsolete.
    pub(crate) fn release(&mut self) -> Vec<Arc<FileBacking>> {
        let mut obsolete = Vec::new();
        if let Some(root) = self.root.take() {
            root.dec_ref(true, Some(&mut obsolete));
        }
        obsolete
    }

    /// Like [`BTree::release`] for a tree that is reachable only through a
    /// shared reference. The tree must not be used again afterwards.
    pub(crate) fn release_shared(&self) -> Vec<Arc<FileBacking>> {
        let mut obsolete = Vec::new();
        if let Some(root) = &self.root {
            root.dec_ref(true, Some(&mut obsolete));
        }
        obsolete
    }

    /// Remove `item`. Returns `None` if the tree does not hold it, else
    /// whether the removal dropped the file's last reference.
    pub(crate) fn delete(&mut self, item: &FileMetadata) -> Option<bool> {
        let root = self.root.as_mut()?;
        if root.count() == 0 {
            return None;
        }
        let obsolete = mut_node(root)
            .remove(&self.cmp, item)
            .map(|out| out.release_ref() == 0);
        if INVARIANTS {
            root.verify_invariants();
        }
        if root.count() == 0 {
            if let Some(old) = self.root.take() {
                if !old.leaf {
                    self.root = Some(old.children[0].clone());
                }
                // The surviving child's reference moves to the tree.
                old.dec_ref(false, None);
            }
        }
        obsolete
    }

    /// Insert `item`, failing if an item comparing equal is present.
    pub(crate) fn insert(&mut self, item: Arc<FileMetadata>) -> Result<()> {
        let root = match self.root.take() {
            None => Arc::new(Node::new_leaf()),
            Some(mut root) if root.count() >= MAX_ITEMS => {
                let (split_item, split_node) = mut_node(&mut root).split(MAX_ITEMS / 2);
                let mut new_root = Node::new_internal();
                new_root.subtree_count = root.subtree_count + split_node.subtree_count + 1;
                new_root.items.push(split_item);
                new_root.children.push(root);
                new_root.children.push(Arc::new(split_node));
                Arc::new(new_root)
            }
            Some(root) => root,
        };
        let root = self.root.insert(root);
        item.add_ref();
        let result = mut_node(root).insert(&self.cmp, item.clone());
        if result.is_err() {
            item.release_ref();
        }
        if INVARIANTS {
            root.verify_invariants();
        }
        result
    }

    /// A new unpositioned iterator. It keeps reading the tree as of now even
    /// if the tree is modified later.
    pub(crate) fn iter(&self) -> Iter {
        Iter {
            root: self.root.clone(),
            n: self.root.clone(),
            pos: -1,
            stack: IterStack::default(),
        }
    }

    /// Number of files in the tree.
    pub(crate) fn count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.subtree_count)
    }

    pub(crate) fn annotation<A: Annotator>(&self, a: &A) -> (A::Value, bool) {
        match &self.root {
            Some(root) => root.annotation(a),
            None => (a.zero(), true),
        }
    }

    pub(crate) fn invalidate_annotation<A: Annotator>(&self, _a: &A) {
        if let Some(root) = &self.root {
            root.invalidate_annotation(TypeId::of::<A>());
        }
    }

    #[cfg(test)]
    fn root_refs(&self) -> i32 {
        self.root
            .as_ref()
            .map_or(0, |r| r.refs.load(AtomicOrdering::Acquire))
    }
}

impl Clone for BTree {
    /// O(1): shares every node with `self`.
    fn clone(&self) -> Self {
        if let Some(root) = &self.root {
            root.inc_ref();
        }
        Self {
            root: self.root.clone(),
            cmp: self.cmp.clone(),
        }
    }
}

impl fmt::Display for BTree {
    /// Newick-style rendering of the tree shape.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            Some(root) if root.subtree_count > 0 => {
                let mut s = String::new();
                root.write_newick(&mut s);
                f.write_str(&s)
            }
            _ => f.write_str(";"),
        }
    }
}

#[derive(Clone)]
struct IterFrame {
    n: Arc<Node>,
    pos: isize,
}

/// Ancestor stack of an iterator. Shallow trees stay inline.
#[derive(Clone)]
enum IterStack {
    Inline {
        frames: [Option<IterFrame>; 3],
        len: usize,
    },
    Spilled(Vec<IterFrame>),
}

impl Default for IterStack {
    fn default() -> Self {
        IterStack::Inline {
            frames: [None, None, None],
            len: 0,
        }
    }
}

impl IterStack {
    fn push(&mut self, f: IterFrame) {
        match self {
            IterStack::Spilled(s) => s.push(f),
            IterStack::Inline { frames, len } if *len == frames.len() => {
                let mut s: Vec<IterFrame> = Vec::with_capacity(2 * frames.len());
                s.extend(frames.iter_mut().filter_map(Option::take));
                s.push(f);
                *self = IterStack::Spilled(s);
            }
            IterStack::Inline { frames, len } => {
                frames[*len] = Some(f);
                *len += 1;
            }
        }
    }

    fn pop(&mut self) -> Option<IterFrame> {
        match self {
            IterStack::Spilled(s) => s.pop(),
            IterStack::Inline { len: 0, .. } => None,
            IterStack::Inline { frames, len } => {
                *len -= 1;
                frames[*len].take()
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            IterStack::Spilled(s) => s.len(),
            IterStack::Inline { len, .. } => *len,
        }
    }

    fn nth(&self, n: usize) -> Option<&IterFrame> {
        match self {
            IterStack::Spilled(s) => s.get(n),
            IterStack::Inline { frames, len } if n < *len => frames[n].as_ref(),
            IterStack::Inline { .. } => None,
        }
    }

    fn reset(&mut self) {
        match self {
            IterStack::Spilled(s) => s.clear(),
            IterStack::Inline { frames, len } => {
                for f in frames.iter_mut() {
                    *f = None;
                }
                *len = 0;
            }
        }
    }
}

/// Position within a [`BTree`]: the current node and index, plus the stack
/// of ancestors used to reach it. There are no parent pointers.
#[derive(Clone)]
pub(crate) struct Iter {
    root: Option<Arc<Node>>,
    /// Current node. `None` iff the tree is empty.
    n: Option<Arc<Node>>,
    pos: isize,
    stack: IterStack,
}

impl Iter {
    fn node(&self) -> &Node {
        match &self.n {
            Some(n) => n,
            None => panic!("B-tree iterator has no current node"),
        }
    }

    pub(crate) fn is_empty_tree(&self) -> bool {
        self.root.is_none()
    }

    /// Number of files in the whole tree the iterator walks.
    pub(crate) fn tree_count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.subtree_count)
    }

    fn reset(&mut self) {
        self.n = self.root.clone();
        self.pos = -1;
        self.stack.reset();
    }

    fn descend(&mut self, n: Arc<Node>, pos: isize) {
        let child = n.children[pos as usize].clone();
        self.stack.push(IterFrame { n, pos });
        self.n = Some(child);
        self.pos = 0;
    }

    fn ascend(&mut self) {
        if let Some(f) = self.stack.pop() {
            self.n = Some(f.n);
            self.pos = f.pos;
        }
    }

    fn current_arc(&self) -> Arc<Node> {
        match &self.n {
            Some(n) => n.clone(),
            None => panic!("B-tree iterator has no current node"),
        }
    }

    /// Position at the first file for which `f` returns true. The tree must be
    /// partitioned: false for a prefix, true for the rest.
    pub(crate) fn seek<F: FnMut(&FileMetadata) -> bool>(&mut self, mut f: F) {
        self.reset();
        if self.root.is_none() {
            return;
        }
        loop {
            let n = self.current_arc();
            let (mut j, mut k) = (0, n.count());
            while j < k {
                let h = (j + k) / 2;
                if !f(&n.items[h]) {
                    j = h + 1;
                } else {
                    k = h;
                }
            }
            self.pos = j as isize;
            if n.leaf {
                if j == n.count() {
                    self.next();
                }
                return;
            }
            self.descend(n, j as isize);
        }
    }

    pub(crate) fn first(&mut self) {
        self.reset();
        if self.root.is_none() {
            return;
        }
        while !self.node().leaf {
            let n = self.current_arc();
            self.descend(n, 0);
        }
        self.pos = 0;
    }

    pub(crate) fn last(&mut self) {
        self.reset();
        if self.root.is_none() {
            return;
        }
        while !self.node().leaf {
            let n = self.current_arc();
            let count = n.count() as isize;
            self.descend(n, count);
        }
        self.pos = self.node().count() as isize - 1;
    }

    pub(crate) fn next(&mut self) {
        if self.root.is_none() {
            return;
        }
        if self.node().leaf {
            let count = self.node().count() as isize;
            if self.pos < count {
                self.pos += 1;
            }
            if self.pos < count {
                return;
            }
            while self.stack.len() > 0 && self.pos >= self.node().count() as isize {
                self.ascend();
            }
            return;
        }
        let n = self.current_arc();
        self.descend(n, self.pos + 1);
        while !self.node().leaf {
            let n = self.current_arc();
            self.descend(n, 0);
        }
        self.pos = 0;
    }

    pub(crate) fn prev(&mut self) {
        if self.root.is_none() {
            return;
        }
        if self.node().leaf {
            self.pos -= 1;
            if self.pos >= 0 {
                return;
            }
            while self.stack.len() > 0 && self.pos < 0 {
                self.ascend();
                self.pos -= 1;
            }
            return;
        }
        let n = self.current_arc();
        self.descend(n, self.pos);
        while !self.node().leaf {
            let n = self.current_arc();
            let count = n.count() as isize;
            self.descend(n, count);
        }
        self.pos = self.node().count() as isize - 1;
    }

    /// Positioned past the last file of the current node.
    pub(crate) fn exhausted_forward(&self) -> bool {
        self.root.is_some() && self.pos >= self.node().count() as isize
    }

    /// Positioned before the first file of the current node.
    pub(crate) fn exhausted_backward(&self) -> bool {
        self.root.is_some() && self.pos < 0
    }

    pub(crate) fn valid(&self) -> bool {
        self.root.is_some() && self.pos >= 0 && (self.pos as usize) < self.node().count()
    }

    /// The file at the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub(crate) fn cur(&self) -> &Arc<FileMetadata> {
        if !self.valid() {
            panic!("B-tree cur() on invalid iterator");
        }
        &self.node().items[self.pos as usize]
    }

    /// Number of files strictly before the current position.
    pub(crate) fn count_left(&self) -> isize {
        if self.root.is_none() {
            return 0;
        }
        let mut count: isize = 0;
        let mut i = 0;
        while let Some(f) = self.stack.nth(i) {
            // Files and whole subtrees before the frame's position.
            count += f.pos;
            for j in 0..f.pos.max(0) as usize {
                count += f.n.children[j].subtree_count as isize;
            }
            i += 1;
        }
        count += self.pos;
        let n = self.node();
        if !n.leaf && self.pos >= 0 {
            // The item at pos sorts after the whole subtree at children[pos].
            for j in 0..=self.pos as usize {
                count += n.children[j].subtree_count as isize;
            }
        }
        count
    }
}

impl fmt::Debug for Iter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut i = 0;
        while let Some(frame) = self.stack.nth(i) {
            writeln!(
                f,
                "{:p}: {:02}/{:02}",
                Arc::as_ptr(&frame.n),
                frame.pos,
                frame.n.count()
            )?;
            i += 1;
        }
        match &self.n {
            Some(n) => write!(f, "{:p}: {:02}/{:02}", Arc::as_ptr(n), self.pos, n.count()),
            None => write!(f, "<nil>: {:02}", self.pos),
        }
    }
}

fn same_node(a: &Option<Arc<Node>>, b: &Option<Arc<Node>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Order two iterators over the same tree by their root-to-leaf paths.
///
/// An iterator whose stack is exhausted while the other still has a frame at
/// the same position is in the end sentinel state and sorts last.
///
/// # Panics
///
/// Panics if the iterators belong to different trees.
pub(crate) fn cmp_iter(a: &Iter, b: &Iter) -> Ordering {
    if !same_node(&a.root, &b.root) {
        panic!("compared iterators from different B-trees");
    }
    let (mut an, mut apos) = (a.n.clone(), a.pos);
    let (mut bn, mut bpos) = (b.n.clone(), b.pos);
    let mut aok;
    let mut bok;
    let mut i = 0;
    loop {
        let af = a.stack.nth(i);
        let bf = b.stack.nth(i);
        aok = af.is_some();
        bok = bf.is_some();
        match (af, bf) {
            (Some(af), Some(bf)) => {
                if !Arc::ptr_eq(&af.n, &bf.n) {
                    panic!("nonmatching nodes during B-tree iterator comparison");
                }
                match af.pos.cmp(&bf.pos) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            (af, bf) => {
                if let Some(af) = af {
                    an = Some(af.n.clone());
                    apos = af.pos;
                }
                if let Some(bf) = bf {
                    bn = Some(bf.n.clone());
                    bpos = bf.pos;
                }
                break;
            }
        }
        i += 1;
    }
    if !same_node(&an, &bn) {
        panic!("nonmatching nodes during B-tree iterator comparison");
    }
    match apos.cmp(&bpos) {
        Ordering::Equal => {
            if aok {
                // a sits in a child at this position; b is the end sentinel.
                Ordering::Less
            } else if bok {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        other => other,
    }
}
