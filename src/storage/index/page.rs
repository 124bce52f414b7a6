//! One fixed-size index page: an AVL tree of fixed-size node slots.
//!
//! ```text
//! | header (6 bytes) | first page (6 bytes, parents only) | node 1 | node 2 | ... free space |
//! ```
//!
//! The header packs `is_parent` (bit 0), `root` (bits 1..12), `count`
//! (bits 12..23), `free` (bits 23..34) and `node_alloc` (bits 34..45), all
//! little-endian. A node is three bytes of balance/left/right followed by the
//! key cells and, on parent pages, a 6-byte child page id. Byte 0 of a node
//! holds `balance + 1` in bits 0..2 and the high three bits of the left and
//! right node ids in bits 2..5 and 5..8; bytes 1 and 2 hold their low bytes.
//! Node id 0 means "no node"; freed nodes are chained through `left`.

use std::cmp::Ordering;

use crate::primitives::bytes::le;
use crate::types::{BurrowError, PageId, Result};

const NODE_OVERHEAD: usize = 3;
const FIXED_HEADER: usize = 6;
/// Bytes used to store a page id.
pub const PAGE_ID_SIZE: usize = 6;
/// Node ids are 11 bits wide.
pub const MAX_NODE_ID: usize = 2047;

const LEFT_HIGHER: i8 = -1;
const BALANCED: i8 = 0;
const RIGHT_HIGHER: i8 = 1;

const LEFT_MASK: u8 = 0b0001_1100;
const RIGHT_MASK: u8 = 0b1110_0000;

/// Comparator handed to the tree: ordering of the caller's target relative
/// to the key bytes of one node.
pub type KeyCmp<'a> = dyn FnMut(&[u8]) -> Result<Ordering> + 'a;

/// Leaf pages hold records, parent pages hold dividers pointing at children.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PageKind {
    /// Holds index records.
    Leaf,
    /// Holds divider records, each with a child page id.
    Parent,
}

impl PageKind {
    /// Reads the kind flag from the first header byte.
    pub fn of(data: &[u8]) -> PageKind {
        if data.first().copied().unwrap_or(0) & 1 == 0 {
            PageKind::Leaf
        } else {
            PageKind::Parent
        }
    }
}

/// Geometry of a page for a given key width.
#[derive(Copy, Clone, Debug)]
pub struct PageLayout {
    /// Total bytes per page.
    pub page_size: usize,
    /// Bytes of key cells per node.
    pub key_size: usize,
    /// Leaf or parent.
    pub kind: PageKind,
    /// Bytes before node 1.
    pub header_len: usize,
    /// Bytes per node slot.
    pub node_size: usize,
    /// Node slots that fit (capped at [`MAX_NODE_ID`]).
    pub max_node: u16,
}

impl PageLayout {
    /// Computes the layout, rejecting keys too wide to split sensibly.
    pub fn new(page_size: usize, key_size: usize, kind: PageKind) -> Result<Self> {
        let child = match kind {
            PageKind::Leaf => 0,
            PageKind::Parent => PAGE_ID_SIZE,
        };
        let header_len = FIXED_HEADER + child;
        let node_size = NODE_OVERHEAD + key_size + child;
        let max_node = (page_size.saturating_sub(header_len) / node_size).min(MAX_NODE_ID);
        if max_node < 4 {
            return Err(BurrowError::InvalidOwned(format!(
                "index key of {key_size} bytes does not fit a {page_size} byte page"
            )));
        }
        Ok(Self {
            page_size,
            key_size,
            kind,
            header_len,
            node_size,
            max_node: max_node as u16,
        })
    }

    /// Payload bytes per node (key cells plus child id on parents).
    pub fn payload_size(&self) -> usize {
        self.node_size - NODE_OVERHEAD
    }
}

/// In-memory image of one index page.
pub struct IndexPage {
    id: PageId,
    layout: PageLayout,
    data: Box<[u8]>,
    root: u16,
    count: u16,
    free: u16,
    node_alloc: u16,
    first_page: u64,
    saved: bool,
}

impl IndexPage {
    /// Creates an empty, unsaved page.
    pub fn new(id: PageId, layout: PageLayout) -> Self {
        Self {
            id,
            layout,
            data: vec![0u8; layout.page_size].into_boxed_slice(),
            root: 0,
            count: 0,
            free: 0,
            node_alloc: 0,
            first_page: 0,
            saved: false,
        }
    }

    /// Decodes a page read from disk and checks its node count.
    pub fn from_bytes(id: PageId, data: Box<[u8]>, layout: PageLayout) -> Result<Self> {
        if data.len() != layout.page_size {
            return Err(BurrowError::Corruption("index page has wrong size"));
        }
        let header = le::get_uint(&data, FIXED_HEADER);
        let field = |shift: u32| ((header >> shift) & 0x7ff) as u16;
        let first_page = match layout.kind {
            PageKind::Leaf => 0,
            PageKind::Parent => le::get_u48(&data[FIXED_HEADER..]),
        };
        let page = Self {
            id,
            layout,
            data,
            root: field(1),
            count: field(12),
            free: field(23),
            node_alloc: field(34),
            first_page,
            saved: true,
        };
        if page.node_alloc > layout.max_node
            || page.count > page.node_alloc
            || page.root > page.node_alloc
            || page.free > page.node_alloc
        {
            return Err(BurrowError::CorruptionOwned(format!(
                "index page {id} header out of range"
            )));
        }
        page.check()?;
        Ok(page)
    }

    /// Page id within the index file.
    pub fn id(&self) -> PageId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: PageId) {
        self.id = id;
        self.saved = false;
    }

    /// Leaf or parent.
    pub fn kind(&self) -> PageKind {
        self.layout.kind
    }

    /// Geometry of this page.
    pub fn layout(&self) -> &PageLayout {
        &self.layout
    }

    /// True for leaf pages.
    pub fn is_leaf(&self) -> bool {
        self.layout.kind == PageKind::Leaf
    }

    /// Number of live records.
    pub fn count(&self) -> usize {
        usize::from(self.count)
    }

    /// Root node id (0 when empty).
    pub fn root(&self) -> u16 {
        self.root
    }

    /// Child for keys below every divider (parent pages).
    pub fn first_page(&self) -> u64 {
        self.first_page
    }

    pub(crate) fn set_first_page(&mut self, page: u64) {
        self.first_page = page;
        self.saved = false;
    }

    /// True when the on-disk image is current.
    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub(crate) fn mark_saved(&mut self) {
        self.saved = true;
    }

    /// True when no slot is free and every slot has been handed out.
    pub fn is_full(&self) -> bool {
        self.free == 0 && self.node_alloc == self.layout.max_node
    }

    /// Bytes of the page actually in use.
    pub fn used_len(&self) -> usize {
        self.layout.header_len + usize::from(self.node_alloc) * self.layout.node_size
    }

    /// Writes the header and returns the full page image.
    pub fn encode(&mut self) -> &[u8] {
        let header = u64::from(self.layout.kind == PageKind::Parent)
            | (u64::from(self.root) << 1)
            | (u64::from(self.count) << 12)
            | (u64::from(self.free) << 23)
            | (u64::from(self.node_alloc) << 34);
        le::put_uint(&mut self.data, header, FIXED_HEADER);
        if self.layout.kind == PageKind::Parent {
            le::put_u48(&mut self.data[FIXED_HEADER..], self.first_page);
        }
        &self.data
    }

    fn off(&self, x: u16) -> usize {
        self.layout.header_len + (usize::from(x) - 1) * self.layout.node_size
    }

    fn balance(&self, x: u16) -> i8 {
        (self.data[self.off(x)] & 3) as i8 - 1
    }

    fn set_balance(&mut self, x: u16, balance: i8) {
        let off = self.off(x);
        self.data[off] = ((balance + 1) as u8) | (self.data[off] & 0xfc);
    }

    /// Left child node id.
    pub fn left(&self, x: u16) -> u16 {
        let off = self.off(x);
        u16::from(self.data[off + 1]) | (u16::from(self.data[off] & LEFT_MASK) << 6)
    }

    /// Right child node id.
    pub fn right(&self, x: u16) -> u16 {
        let off = self.off(x);
        u16::from(self.data[off + 2]) | (u16::from(self.data[off] & RIGHT_MASK) << 3)
    }

    fn set_left(&mut self, x: u16, y: u16) {
        let off = self.off(x);
        self.data[off + 1] = y as u8;
        self.data[off] = (self.data[off] & !LEFT_MASK) | (((y >> 6) as u8) & LEFT_MASK);
    }

    fn set_right(&mut self, x: u16, y: u16) {
        let off = self.off(x);
        self.data[off + 2] = y as u8;
        self.data[off] = (self.data[off] & !RIGHT_MASK) | (((y >> 3) as u8) & RIGHT_MASK);
    }

    /// Key cells plus (on parents) the child id of node `x`.
    pub fn payload(&self, x: u16) -> &[u8] {
        let start = self.off(x) + NODE_OVERHEAD;
        &self.data[start..start + self.layout.payload_size()]
    }

    /// Key cells of node `x`.
    pub fn key(&self, x: u16) -> &[u8] {
        let start = self.off(x) + NODE_OVERHEAD;
        &self.data[start..start + self.layout.key_size]
    }

    /// Child page of node `x` (parent pages).
    pub fn child(&self, x: u16) -> u64 {
        let start = self.off(x) + NODE_OVERHEAD + self.layout.key_size;
        le::get_u48(&self.data[start..])
    }

    fn set_payload(&mut self, x: u16, payload: &[u8]) {
        let start = self.off(x) + NODE_OVERHEAD;
        let n = self.layout.payload_size();
        self.data[start..start + n].copy_from_slice(&payload[..n]);
    }

    fn alloc_node(&mut self) -> u16 {
        self.count += 1;
        if self.free == 0 {
            self.node_alloc += 1;
            self.count
        } else {
            let x = self.free;
            self.free = self.left(x);
            x
        }
    }

    fn free_node(&mut self, x: u16) {
        self.set_left(x, self.free);
        self.free = x;
        self.count -= 1;
    }

    /// Inserts `payload` (key cells, plus child id on parents). Returns
    /// `false` if an equal key is already present. The page must not be full.
    pub fn insert(&mut self, payload: &[u8], cmp: &mut KeyCmp<'_>) -> Result<bool> {
        debug_assert!(!self.is_full(), "insert into full index page");
        let mut grew = false;
        let mut added = true;
        self.root = self.insert_at(self.root, payload, Some(cmp), &mut grew, &mut added)?;
        self.saved = false;
        Ok(added)
    }

    /// Inserts `payload` after every existing node (input must be pre-sorted).
    pub fn append(&mut self, payload: &[u8]) -> Result<()> {
        let mut grew = false;
        let mut added = true;
        self.root = self.insert_at(self.root, payload, None, &mut grew, &mut added)?;
        self.saved = false;
        Ok(())
    }

    fn insert_at(
        &mut self,
        x: u16,
        payload: &[u8],
        mut cmp: Option<&mut KeyCmp<'_>>,
        grew: &mut bool,
        added: &mut bool,
    ) -> Result<u16> {
        if x == 0 {
            let x = self.alloc_node();
            self.set_balance(x, BALANCED);
            self.set_left(x, 0);
            self.set_right(x, 0);
            self.set_payload(x, payload);
            *grew = true;
            return Ok(x);
        }
        let c = match cmp.as_mut() {
            Some(cmp) => cmp(self.key(x))?,
            None => Ordering::Greater,
        };
        match c {
            Ordering::Less => {
                let left = self.insert_at(self.left(x), payload, cmp, grew, added)?;
                self.set_left(x, left);
                if *grew {
                    match self.balance(x) {
                        BALANCED => self.set_balance(x, LEFT_HIGHER),
                        LEFT_HIGHER => {
                            *grew = false;
                            return Ok(self.rotate_right(x).0);
                        }
                        _ => {
                            *grew = false;
                            self.set_balance(x, BALANCED);
                        }
                    }
                }
            }
            Ordering::Greater => {
                let right = self.insert_at(self.right(x), payload, cmp, grew, added)?;
                self.set_right(x, right);
                if *grew {
                    match self.balance(x) {
                        BALANCED => self.set_balance(x, RIGHT_HIGHER),
                        RIGHT_HIGHER => {
                            *grew = false;
                            return Ok(self.rotate_left(x).0);
                        }
                        _ => {
                            *grew = false;
                            self.set_balance(x, BALANCED);
                        }
                    }
                }
            }
            Ordering::Equal => {
                *grew = false;
                *added = false;
            }
        }
        Ok(x)
    }

    /// Left subtree two levels higher than right. Returns the new subtree
    /// root and whether its height decreased.
    fn rotate_right(&mut self, x: u16) -> (u16, bool) {
        let z = self.left(x);
        let y = self.right(z);
        let zb = self.balance(z);
        if zb != RIGHT_HIGHER {
            self.set_right(z, x);
            self.set_left(x, y);
            if zb == BALANCED {
                self.set_balance(x, LEFT_HIGHER);
                self.set_balance(z, RIGHT_HIGHER);
                return (z, false);
            }
            self.set_balance(x, BALANCED);
            self.set_balance(z, BALANCED);
            return (z, true);
        }
        self.set_left(x, self.right(y));
        self.set_right(z, self.left(y));
        self.set_right(y, x);
        self.set_left(y, z);
        match self.balance(y) {
            LEFT_HIGHER => {
                self.set_balance(x, RIGHT_HIGHER);
                self.set_balance(z, BALANCED);
            }
            BALANCED => {
                self.set_balance(x, BALANCED);
                self.set_balance(z, BALANCED);
            }
            _ => {
                self.set_balance(x, BALANCED);
                self.set_balance(z, LEFT_HIGHER);
            }
        }
        self.set_balance(y, BALANCED);
        (y, true)
    }

    /// Mirror of [`rotate_right`](Self::rotate_right).
    fn rotate_left(&mut self, x: u16) -> (u16, bool) {
        let z = self.right(x);
        let y = self.left(z);
        let zb = self.balance(z);
        if zb != LEFT_HIGHER {
            self.set_left(z, x);
            self.set_right(x, y);
            if zb == BALANCED {
                self.set_balance(x, RIGHT_HIGHER);
                self.set_balance(z, LEFT_HIGHER);
                return (z, false);
            }
            self.set_balance(x, BALANCED);
            self.set_balance(z, BALANCED);
            return (z, true);
        }
        self.set_right(x, self.left(y));
        self.set_left(z, self.right(y));
        self.set_left(y, x);
        self.set_right(y, z);
        match self.balance(y) {
            RIGHT_HIGHER => {
                self.set_balance(x, LEFT_HIGHER);
                self.set_balance(z, BALANCED);
            }
            BALANCED => {
                self.set_balance(x, BALANCED);
                self.set_balance(z, BALANCED);
            }
            _ => {
                self.set_balance(x, BALANCED);
                self.set_balance(z, RIGHT_HIGHER);
            }
        }
        self.set_balance(y, BALANCED);
        (y, true)
    }

    /// Removes the node whose key compares equal. Returns whether one was found.
    pub fn remove(&mut self, cmp: &mut KeyCmp<'_>) -> Result<bool> {
        let mut shrunk = false;
        let mut found = false;
        self.root = self.remove_at(self.root, cmp, &mut shrunk, &mut found)?;
        if found {
            self.saved = false;
        }
        Ok(found)
    }

    fn remove_at(
        &mut self,
        x: u16,
        cmp: &mut KeyCmp<'_>,
        shrunk: &mut bool,
        found: &mut bool,
    ) -> Result<u16> {
        if x == 0 {
            *shrunk = false;
            return Ok(0);
        }
        match cmp(self.key(x))? {
            Ordering::Equal => {
                *found = true;
                let deleted = x;
                let replacement = if self.left(x) == 0 {
                    *shrunk = true;
                    self.right(x)
                } else if self.right(x) == 0 {
                    *shrunk = true;
                    self.left(x)
                } else {
                    let (right, least) = self.remove_least(self.right(deleted), shrunk);
                    let mut n = least;
                    self.set_left(n, self.left(deleted));
                    self.set_right(n, right);
                    self.set_balance(n, self.balance(deleted));
                    if *shrunk {
                        match self.balance(n) {
                            LEFT_HIGHER => {
                                let (r, decreased) = self.rotate_right(n);
                                n = r;
                                *shrunk = decreased;
                            }
                            RIGHT_HIGHER => self.set_balance(n, BALANCED),
                            _ => {
                                self.set_balance(n, LEFT_HIGHER);
                                *shrunk = false;
                            }
                        }
                    }
                    n
                };
                self.free_node(deleted);
                Ok(replacement)
            }
            Ordering::Less => {
                let left = self.remove_at(self.left(x), cmp, shrunk, found)?;
                self.set_left(x, left);
                Ok(self.rebalance_after_left_shrink(x, shrunk))
            }
            Ordering::Greater => {
                let right = self.remove_at(self.right(x), cmp, shrunk, found)?;
                self.set_right(x, right);
                if *shrunk {
                    match self.balance(x) {
                        LEFT_HIGHER => {
                            let (r, decreased) = self.rotate_right(x);
                            *shrunk = decreased;
                            return Ok(r);
                        }
                        RIGHT_HIGHER => self.set_balance(x, BALANCED),
                        _ => {
                            self.set_balance(x, LEFT_HIGHER);
                            *shrunk = false;
                        }
                    }
                }
                Ok(x)
            }
        }
    }

    fn rebalance_after_left_shrink(&mut self, x: u16, shrunk: &mut bool) -> u16 {
        if !*shrunk {
            return x;
        }
        match self.balance(x) {
            RIGHT_HIGHER => {
                let (r, decreased) = self.rotate_left(x);
                *shrunk = decreased;
                r
            }
            LEFT_HIGHER => {
                self.set_balance(x, BALANCED);
                x
            }
            _ => {
                self.set_balance(x, RIGHT_HIGHER);
                *shrunk = false;
                x
            }
        }
    }

    /// Detaches the smallest node of subtree `x`; returns (new subtree, that node).
    fn remove_least(&mut self, x: u16, shrunk: &mut bool) -> (u16, u16) {
        if self.left(x) == 0 {
            *shrunk = true;
            return (self.right(x), x);
        }
        let (left, least) = self.remove_least(self.left(x), shrunk);
        self.set_left(x, left);
        (self.rebalance_after_left_shrink(x, shrunk), least)
    }

    /// Node holding the greatest key `<=` the target, or 0 if there is none.
    pub fn find_split(&self, cmp: &mut KeyCmp<'_>) -> Result<u16> {
        let mut x = self.root;
        let mut result = 0;
        while x != 0 {
            match cmp(self.key(x))? {
                Ordering::Less => x = self.left(x),
                Ordering::Greater => {
                    result = x;
                    x = self.right(x);
                }
                Ordering::Equal => return Ok(x),
            }
        }
        Ok(result)
    }

    /// Node ids in key order.
    pub fn in_order(&self) -> Vec<u16> {
        let mut out = Vec::with_capacity(self.count());
        let mut stack = Vec::new();
        let mut x = self.root;
        while x != 0 || !stack.is_empty() {
            while x != 0 && stack.len() <= MAX_NODE_ID {
                stack.push(x);
                x = self.left(x);
            }
            let Some(top) = stack.pop() else { break };
            out.push(top);
            if out.len() > self.count() {
                break;
            }
            x = self.right(top);
        }
        out
    }

    /// Moves the first half of the records to `left`, the rest to `right`.
    /// Returns the divider's key cells and, on parents, its former child id.
    /// On leaves the divider is also kept in `right`.
    pub fn divide(&self, left: &mut IndexPage, right: &mut IndexPage) -> Result<(Vec<u8>, u64)> {
        let nodes = self.in_order();
        let half = nodes.len() / 2;
        let mut divider = (Vec::new(), 0);
        for (i, &x) in nodes.iter().enumerate() {
            match i.cmp(&half) {
                Ordering::Less => left.append(self.payload(x))?,
                Ordering::Equal => {
                    divider = (self.key(x).to_vec(), self.child_or_zero(x));
                    if self.is_leaf() {
                        right.append(self.payload(x))?;
                    }
                }
                Ordering::Greater => right.append(self.payload(x))?,
            }
        }
        Ok(divider)
    }

    fn child_or_zero(&self, x: u16) -> u64 {
        match self.layout.kind {
            PageKind::Leaf => 0,
            PageKind::Parent => self.child(x),
        }
    }

    /// Verifies that the reachable node count matches the header.
    pub fn check(&self) -> Result<()> {
        let reachable = self.in_order();
        if reachable.len() != self.count()
            || reachable.iter().any(|&x| x == 0 || x > self.node_alloc)
        {
            return Err(BurrowError::CorruptionOwned(format!(
                "index page {} node count mismatch",
                self.id
            )));
        }
        Ok(())
    }

    /// Verifies node counts and the AVL balance of every node.
    pub fn verify_balance(&self) -> Result<()> {
        self.check()?;
        self.height(self.root, 0).map(|_| ())
    }

    fn height(&self, x: u16, depth: usize) -> Result<i32> {
        if x == 0 {
            return Ok(0);
        }
        if depth > 32 {
            return Err(BurrowError::Corruption("index page tree too deep"));
        }
        let lh = self.height(self.left(x), depth + 1)?;
        let rh = self.height(self.right(x), depth + 1)?;
        if (lh - rh).abs() > 1 || i32::from(self.balance(x)) != rh - lh {
            return Err(BurrowError::CorruptionOwned(format!(
                "index page {} node {x} out of balance",
                self.id
            )));
        }
        Ok(1 + lh.max(rh))
    }
}
