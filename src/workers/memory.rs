use std::{convert::Infallible, time::Duration};

use anyhow::Context;
use tracing::{debug, info};

use crate::config::MemoryConfig;

use super::cursor::{ChurnCursor, Wrap};

/// The write cursor advances this many pages per copy, the read cursor one.
pub const WRITE_STRIDE_PAGES: usize = 5;

const FALLBACK_PAGE_SIZE: usize = 4096;

pub fn page_size() -> usize {
    // sysconf has no side effects and is always safe to call
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        FALLBACK_PAGE_SIZE
    }
}

/// Pages to allocate for `size` bytes: at least one, rounded up, and never a
/// multiple of the write stride, so the write cursor reaches every page.
fn buffer_pages(size: usize, page_size: usize) -> usize {
    let pages = size.div_ceil(page_size).max(1);
    if pages % WRITE_STRIDE_PAGES == 0 {
        pages + 1
    } else {
        pages
    }
}

/// Keeps a buffer resident and copies pages around inside it.
pub struct MemoryChurner {
    buffer: Vec<u8>,
    page_size: usize,
    read: ChurnCursor,
    write: ChurnCursor,
    sleep: Duration,
}

impl MemoryChurner {
    pub fn try_new(config: &MemoryConfig) -> anyhow::Result<Self> {
        Self::with_page_size(config, page_size())
    }

    pub fn with_page_size(config: &MemoryConfig, page_size: usize) -> anyhow::Result<Self> {
        let size = usize::try_from(config.size)
            .with_context(|| format!("Memory size {} exceeds address space", config.size))?;
        let len = buffer_pages(size, page_size) * page_size;

        info!("stirring {len} bytes...");
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(len)
            .with_context(|| format!("Allocate {len} bytes"))?;

        // a distinct pattern on every page forces the kernel to back it
        debug!("dirtying buffer...");
        buffer.extend((0..len).map(|offset| offset as u8));
        debug!("done");

        Ok(Self {
            buffer,
            page_size,
            read: ChurnCursor::new(page_size as u64, len as u64, Wrap::Carry),
            write: ChurnCursor::new(
                (page_size * WRITE_STRIDE_PAGES) as u64,
                len as u64,
                Wrap::Carry,
            ),
            sleep: Duration::from_micros(config.sleep_usec),
        })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn read_position(&self) -> usize {
        self.read.position() as usize
    }

    pub fn write_position(&self) -> usize {
        self.write.position() as usize
    }

    pub fn page(&self, offset: usize) -> &[u8] {
        &self.buffer[offset..offset + self.page_size]
    }

    /// Copies one page from the read to the write cursor and advances both.
    pub fn step(&mut self) {
        let src = self.read_position();
        let dst = self.write_position();
        self.buffer.copy_within(src..src + self.page_size, dst);

        if self.read.advance() {
            debug!("read position wrapped");
        }
        if self.write.advance() {
            debug!("write position wrapped");
        }
    }

    pub fn run(mut self) -> anyhow::Result<Infallible> {
        loop {
            self.step();
            std::thread::sleep(self.sleep);
        }
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;
    use crate::config::MemoryConfigBuilder;

    const PAGE: usize = 100;

    fn churner(size: u64) -> MemoryChurner {
        let config = MemoryConfigBuilder::default()
            .size(size)
            .sleep_usec(0)
            .build()
            .unwrap();
        MemoryChurner::with_page_size(&config, PAGE).unwrap()
    }

    #[test]
    fn buffer_is_page_aligned() {
        assert_eq!(buffer_pages(1, PAGE), 1);
        assert_eq!(buffer_pages(PAGE, PAGE), 1);
        assert_eq!(buffer_pages(PAGE + 1, PAGE), 2);
        assert_eq!(buffer_pages(12 * PAGE, PAGE), 12);
        assert_eq!(buffer_pages(10 * PAGE, PAGE), 11);
        assert_eq!(churner(1234).len(), 13 * PAGE);
    }

    #[test]
    fn buffer_is_dirtied() {
        let churner = churner(4 * PAGE as u64);
        let page = churner.page(PAGE);
        assert_eq!(page[0], PAGE as u8);
        assert_eq!(page[1], (PAGE + 1) as u8);
    }

    #[test]
    fn copies_from_read_to_write_cursor() {
        let mut churner = churner(12 * PAGE as u64);
        let second_page = churner.page(PAGE).to_vec();
        assert_ne!(churner.page(5 * PAGE), second_page.as_slice());

        churner.step(); // page 0 onto itself
        assert_eq!(churner.read_position(), PAGE);
        assert_eq!(churner.write_position(), 5 * PAGE);

        churner.step();
        assert_eq!(churner.page(5 * PAGE), second_page.as_slice());
    }

    #[test]
    fn cursors_wrap_independently() {
        let mut churner = churner(7 * PAGE as u64);
        let mut reads = Vec::new();
        let mut writes = Vec::new();
        for _ in 0..8 {
            reads.push(churner.read_position() / PAGE);
            writes.push(churner.write_position() / PAGE);
            churner.step();
        }
        assert_eq!(reads, vec![0, 1, 2, 3, 4, 5, 6, 0]);
        assert_eq!(writes, vec![0, 5, 3, 1, 6, 4, 2, 0]);
    }

    #[test]
    fn write_cursor_visits_every_page() {
        for pages in [1u64, 2, 3, 9, 10, 12, 25, 64] {
            let mut churner = churner(pages * PAGE as u64);
            let total = churner.len() / PAGE;

            let mut visited = HashSet::new();
            for _ in 0..total {
                let position = churner.write_position();
                assert_eq!(position % PAGE, 0);
                assert!(position + PAGE <= churner.len());
                visited.insert(position);
                churner.step();
            }
            assert_eq!(visited.len(), total, "{pages} pages");
        }
    }
}
