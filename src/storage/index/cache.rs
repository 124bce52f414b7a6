use rustc_hash::FxHashMap;
use tracing::trace;

use crate::primitives::stream::BufferedStream;
use crate::types::{BurrowError, PageId, Result};

use super::page::{IndexPage, PageKind, PageLayout};

/// Pages of one index file, keyed by page id and loaded on first use.
/// Page 0 is always the root.
pub(crate) struct PageCache {
    pub(crate) stream: BufferedStream,
    pages: FxHashMap<u64, IndexPage>,
    page_alloc: u64,
    page_size: usize,
    leaf: PageLayout,
    parent: PageLayout,
    pub(crate) loaded: u64,
}

impl PageCache {
    pub(crate) fn new(stream: BufferedStream, page_size: usize, key_size: usize) -> Result<Self> {
        let mut cache = Self {
            stream,
            pages: FxHashMap::default(),
            page_alloc: 0,
            page_size,
            leaf: PageLayout::new(page_size, key_size, PageKind::Leaf)?,
            parent: PageLayout::new(page_size, key_size, PageKind::Parent)?,
            loaded: 0,
        };
        cache.reset();
        Ok(cache)
    }

    /// Forgets every cached page and re-derives the allocation counter from
    /// the stream length.
    pub(crate) fn reset(&mut self) {
        self.pages.clear();
        let len = self.stream.len();
        if len == 0 {
            self.page_alloc = 1;
            self.pages
                .insert(0, IndexPage::new(PageId::ROOT, self.leaf));
        } else {
            self.page_alloc = len.div_ceil(self.page_size as u64);
        }
    }

    pub(crate) fn layout(&self, kind: PageKind) -> PageLayout {
        match kind {
            PageKind::Leaf => self.leaf,
            PageKind::Parent => self.parent,
        }
    }

    pub(crate) fn page_count(&self) -> u64 {
        self.page_alloc
    }

    pub(crate) fn alloc(&mut self) -> PageId {
        let id = PageId(self.page_alloc);
        self.page_alloc += 1;
        id
    }

    pub(crate) fn get(&mut self, id: PageId) -> Result<&mut IndexPage> {
        if !self.pages.contains_key(&id.0) {
            let page = self.load(id)?;
            self.pages.insert(id.0, page);
        }
        self.pages
            .get_mut(&id.0)
            .ok_or(BurrowError::Corruption("index page missing from cache"))
    }

    fn load(&mut self, id: PageId) -> Result<IndexPage> {
        if id.0 >= self.page_alloc {
            return Err(BurrowError::CorruptionOwned(format!(
                "index page {id} beyond end of file ({} pages)",
                self.page_alloc
            )));
        }
        self.stream.seek(id.0 * self.page_size as u64);
        let data: Box<[u8]> = self.stream.fast_read(self.page_size)?.into_owned().into();
        let layout = self.layout(PageKind::of(&data));
        self.loaded += 1;
        trace!(page = id.0, "index.page.load");
        IndexPage::from_bytes(id, data, layout)
    }

    pub(crate) fn take(&mut self, id: PageId) -> Result<IndexPage> {
        self.get(id)?;
        self.pages
            .remove(&id.0)
            .ok_or(BurrowError::Corruption("index page missing from cache"))
    }

    pub(crate) fn put(&mut self, page: IndexPage) {
        self.pages.insert(page.id().0, page);
    }

    /// Writes every modified page into the stream. The last page is written
    /// only up to its used length so the file stays as short as possible.
    pub(crate) fn write_unsaved(&mut self) -> Result<usize> {
        let mut ids: Vec<u64> = self
            .pages
            .iter()
            .filter(|(_, page)| !page.is_saved())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        let last = self.page_alloc.saturating_sub(1);
        let Self {
            pages,
            stream,
            page_size,
            ..
        } = self;
        for id in &ids {
            let Some(page) = pages.get_mut(id) else {
                continue;
            };
            let len = if *id == last {
                page.used_len()
            } else {
                *page_size
            };
            let bytes = page.encode();
            stream.write_at(id * *page_size as u64, &bytes[..len])?;
            page.mark_saved();
        }
        Ok(ids.len())
    }

    pub(crate) fn clear(&mut self) {
        self.pages.clear();
    }
}
