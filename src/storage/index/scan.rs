//! Ordered traversal of an index starting from a seek position.

use std::cmp::Ordering;

use smallvec::SmallVec;

use crate::types::{BurrowError, PageId, Result, Value};

use super::page::IndexPage;
use super::{IndexFile, IndexRecord, RecordCodec};

const MAX_DEPTH: usize = 64;

/// Positions a scan within an index.
///
/// `position` returns the ordering of the scan's target relative to `rec`.
/// An ascending scan yields every record for which it returns `Less` or
/// `Equal`; a descending scan every record for which it returns `Greater`
/// or `Equal`. `Equal` additionally marks the record as the exact start.
pub trait Seek {
    /// Ordering of the target relative to `rec`.
    fn position(&self, rec: &IndexRecord) -> Ordering;

    /// Ends the scan once a yielded record satisfies this.
    fn stop(&self, _rec: &IndexRecord) -> bool {
        false
    }
}

impl<F> Seek for F
where
    F: Fn(&IndexRecord) -> Ordering,
{
    fn position(&self, rec: &IndexRecord) -> Ordering {
        self(rec)
    }
}

/// Seek that visits every record.
#[derive(Copy, Clone, Debug)]
pub struct Unbounded {
    desc: bool,
}

impl Unbounded {
    /// Full scan in the given direction.
    pub fn new(desc: bool) -> Self {
        Self { desc }
    }
}

impl Seek for Unbounded {
    fn position(&self, _rec: &IndexRecord) -> Ordering {
        if self.desc {
            Ordering::Greater
        } else {
            Ordering::Less
        }
    }
}

/// Relation between the records to visit and a key prefix.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SeekOp {
    /// Records whose prefix is below the key, greatest first.
    Less,
    /// Records whose prefix is at or below the key, greatest first.
    LessEqual,
    /// Records whose prefix equals the key.
    Equal,
    /// Records whose prefix is at or above the key.
    GreaterEqual,
    /// Records whose prefix is above the key.
    Greater,
}

impl SeekOp {
    /// Whether the scan for this operator runs in descending order.
    pub fn is_descending(self) -> bool {
        matches!(self, SeekOp::Less | SeekOp::LessEqual)
    }
}

/// [`Seek`] comparing a key prefix under a [`SeekOp`].
#[derive(Clone, Debug)]
pub struct KeySeek {
    op: SeekOp,
    key: SmallVec<[Value; 4]>,
}

impl KeySeek {
    /// Seeks `op` relative to `key`, which may be a prefix of the index key.
    pub fn new(op: SeekOp, key: impl IntoIterator<Item = Value>) -> Self {
        Self {
            op,
            key: key.into_iter().collect(),
        }
    }

    /// The seek operator.
    pub fn op(&self) -> SeekOp {
        self.op
    }

    fn prefix_cmp(&self, rec: &IndexRecord) -> Ordering {
        for (k, v) in self.key.iter().zip(rec.cols.iter()) {
            let c = k.compare(v);
            if c != Ordering::Equal {
                return c;
            }
        }
        Ordering::Equal
    }
}

impl Seek for KeySeek {
    fn position(&self, rec: &IndexRecord) -> Ordering {
        match self.prefix_cmp(rec) {
            Ordering::Equal => match self.op {
                SeekOp::Less | SeekOp::Equal | SeekOp::GreaterEqual => Ordering::Less,
                SeekOp::LessEqual | SeekOp::Greater => Ordering::Greater,
            },
            c => c,
        }
    }

    fn stop(&self, rec: &IndexRecord) -> bool {
        self.op == SeekOp::Equal && self.prefix_cmp(rec) != Ordering::Equal
    }
}

enum Frame {
    Leaf { page: PageId, stack: Vec<u16> },
    Parent { children: std::vec::IntoIter<u64> },
}

enum Step {
    Enter(PageId),
    Yield(PageId, u16),
    Pop,
}

/// Iterator over the records selected by a [`Seek`]. Borrows the index
/// mutably because pages are loaded lazily.
pub struct IndexScan<'a, S: Seek> {
    file: &'a mut IndexFile,
    seek: S,
    desc: bool,
    frames: Vec<Frame>,
    started: bool,
    primed: bool,
    done: bool,
}

impl<'a, S: Seek> IndexScan<'a, S> {
    pub(crate) fn new(file: &'a mut IndexFile, seek: S, desc: bool) -> Self {
        Self {
            file,
            seek,
            desc,
            frames: Vec::new(),
            started: false,
            primed: false,
            done: false,
        }
    }

    fn advance(&mut self) -> Result<Option<IndexRecord>> {
        if !self.started {
            self.started = true;
            self.enter(PageId::ROOT)?;
        }
        loop {
            let step = match self.frames.last_mut() {
                None => return Ok(None),
                Some(Frame::Parent { children }) => match children.next() {
                    Some(child) => Step::Enter(PageId(child)),
                    None => Step::Pop,
                },
                Some(Frame::Leaf { page, stack }) => match stack.pop() {
                    Some(x) => Step::Yield(*page, x),
                    None => Step::Pop,
                },
            };
            match step {
                Step::Pop => {
                    self.frames.pop();
                }
                Step::Enter(id) => self.enter(id)?,
                Step::Yield(id, x) => {
                    let rec = self.yield_node(id, x)?;
                    if self.seek.stop(&rec) {
                        return Ok(None);
                    }
                    return Ok(Some(rec));
                }
            }
        }
    }

    fn yield_node(&mut self, id: PageId, x: u16) -> Result<IndexRecord> {
        let IndexFile { cache, codec, .. } = &mut *self.file;
        let page = cache.get(id)?;
        let rec = codec.record(page, x)?;
        self.primed = true;
        let next = if self.desc { page.left(x) } else { page.right(x) };
        let mut pending = Vec::new();
        descend(page, codec, &self.seek, self.desc, true, next, &mut pending)?;
        if let Some(Frame::Leaf { stack, .. }) = self.frames.last_mut() {
            stack.extend(pending);
        }
        Ok(rec)
    }

    fn enter(&mut self, id: PageId) -> Result<()> {
        if self.frames.len() >= MAX_DEPTH {
            return Err(BurrowError::Corruption("index tree too deep"));
        }
        let IndexFile { cache, codec, .. } = &mut *self.file;
        let page = cache.get(id)?;
        if page.is_leaf() {
            let mut stack = Vec::new();
            descend(page, codec, &self.seek, self.desc, self.primed, page.root(), &mut stack)?;
            self.frames.push(Frame::Leaf { page: id, stack });
            return Ok(());
        }
        let nodes = page.in_order();
        let split = if self.primed {
            if self.desc {
                nodes.last().copied().unwrap_or(0)
            } else {
                0
            }
        } else {
            let seek = &self.seek;
            page.find_split(&mut |key| {
                let rec = IndexRecord {
                    cols: codec.decode(key)?,
                    child: 0,
                };
                Ok(seek.position(&rec))
            })?
        };
        let mut children = Vec::new();
        let at = nodes.iter().position(|&x| x == split);
        if self.desc {
            if let Some(at) = at {
                children.extend(nodes[..=at].iter().rev().map(|&x| page.child(x)));
            }
            children.push(page.first_page());
        } else {
            match at {
                Some(at) => {
                    children.push(page.child(split));
                    children.extend(nodes[at + 1..].iter().map(|&x| page.child(x)));
                }
                None => {
                    children.push(page.first_page());
                    children.extend(nodes.iter().map(|&x| page.child(x)));
                }
            }
        }
        self.frames.push(Frame::Parent {
            children: children.into_iter(),
        });
        Ok(())
    }
}

/// Pushes the nodes of the path from `x` towards the seek position that
/// qualify for the scan, nearest last.
fn descend<S: Seek>(
    page: &IndexPage,
    codec: &RecordCodec,
    seek: &S,
    desc: bool,
    primed: bool,
    mut x: u16,
    out: &mut Vec<u16>,
) -> Result<()> {
    let mut steps = 0;
    while x != 0 {
        steps += 1;
        if steps > 64 {
            return Err(BurrowError::Corruption("index page tree too deep"));
        }
        let c = if primed {
            if desc {
                Ordering::Greater
            } else {
                Ordering::Less
            }
        } else {
            seek.position(&codec.record(page, x)?)
        };
        match (desc, c) {
            (_, Ordering::Equal) => {
                out.push(x);
                break;
            }
            (false, Ordering::Less) | (true, Ordering::Greater) => {
                out.push(x);
                x = if desc { page.right(x) } else { page.left(x) };
            }
            (false, Ordering::Greater) => x = page.right(x),
            (true, Ordering::Less) => x = page.left(x),
        }
    }
    Ok(())
}

impl<S: Seek> Iterator for IndexScan<'_, S> {
    type Item = Result<IndexRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(rec)) => Some(Ok(rec)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
