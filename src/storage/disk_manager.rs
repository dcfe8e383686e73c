//! Disk manager implementation.
//!
//! The disk manager reads and writes the pages of one table file and owns
//! its header and free list. It sits behind a trait so the buffer pool can
//! be exercised against other backends.

use crate::error::{Result, StorageError};
use crate::page::PageBuf;
use crate::storage::{free_run, FileHeader, FreePage};
use crate::types::{PageId, PAGE_SIZE};
use parking_lot::RwLock;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Trait for disk I/O operations on one table file
pub trait DiskManager: Send + Sync {
    /// Read a page from disk
    fn read_page(&self, page_id: PageId) -> Result<PageBuf>;

    /// Write a page to disk
    fn write_page(&self, page_id: PageId, data: &PageBuf) -> Result<()>;

    /// Pop a page off the free list, doubling the file when the list is empty
    fn allocate_page(&self) -> Result<PageId>;

    /// Push a page onto the free list
    fn deallocate_page(&self, page_id: PageId) -> Result<()>;

    /// Sync all data to disk
    fn sync(&self) -> Result<()>;

    /// Get the file header
    fn header(&self) -> FileHeader;

    /// Update the root page
    fn set_root_page(&self, page_id: PageId) -> Result<()>;

    /// Location of the backing file
    fn path(&self) -> &Path;
}

/// File-based disk manager implementation
pub struct DiskManagerImpl {
    path: PathBuf,
    /// The table file
    file: RwLock<File>,
    /// The file header (cached, written through on every change)
    header: RwLock<FileHeader>,
    /// Whether to sync on each write
    sync_on_write: bool,
}

impl DiskManagerImpl {
    /// Open a table file, creating it with `initial_pages` pages when missing
    pub fn open(path: &Path, sync_on_write: bool, initial_pages: u64) -> Result<Self> {
        let exists = path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let header = if exists && file.metadata()?.len() > 0 {
            let mut file_ref = &file;
            let mut buf = vec![0u8; PAGE_SIZE];
            file_ref.read_exact(&mut buf).map_err(|e| {
                StorageError::invalid_db(format!("{}: cannot read header: {}", path.display(), e))
            })?;
            FileHeader::read(&buf)?
        } else {
            let page_count = initial_pages.max(2);
            let header = FileHeader::new(page_count);
            let mut image = vec![0u8; PAGE_SIZE];
            header.write(&mut image);
            image.extend_from_slice(&free_run(1, page_count));

            let mut file_ref = &file;
            file_ref.seek(SeekFrom::Start(0))?;
            file_ref.write_all(&image)?;
            file_ref.sync_all()?;

            tracing::info!(path = %path.display(), pages = page_count, "created table file");
            header
        };

        Ok(Self {
            path: path.to_path_buf(),
            file: RwLock::new(file),
            header: RwLock::new(header),
            sync_on_write,
        })
    }

    fn check_data_page(&self, page_id: PageId, header: &FileHeader) -> Result<()> {
        if !page_id.is_some() {
            return Err(StorageError::invalid_operation(
                "header page is not a data page",
            ));
        }
        if page_id.value() >= header.page_count {
            return Err(StorageError::invalid_page(
                page_id,
                format!("beyond end of file ({} pages)", header.page_count),
            ));
        }
        Ok(())
    }

    fn read_raw(&self, page_id: PageId) -> Result<PageBuf> {
        let mut buf = PageBuf::new();
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.read_exact(buf.as_bytes_mut())?;
        Ok(buf)
    }

    fn write_raw(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(page_id.file_offset(PAGE_SIZE)))?;
        file.write_all(data)?;

        if self.sync_on_write {
            file.sync_data()?;
        }

        Ok(())
    }

    /// Flush the header to disk
    fn flush_header(&self, header: &FileHeader) -> Result<()> {
        let mut buf = vec![0u8; PAGE_SIZE];
        header.write(&mut buf);
        self.write_raw(PageId::HEADER, &buf)
    }

    /// Double the file, threading the new half onto the free list
    fn grow(&self, header: &mut FileHeader) -> Result<()> {
        let old_count = header.page_count;
        let new_count = old_count * 2;
        self.write_raw(PageId::new(old_count), &free_run(old_count, new_count))?;

        header.free_head = PageId::new(old_count);
        header.page_count = new_count;

        tracing::debug!(
            path = %self.path.display(),
            from = old_count,
            to = new_count,
            "grew table file"
        );
        Ok(())
    }
}

impl DiskManager for DiskManagerImpl {
    fn read_page(&self, page_id: PageId) -> Result<PageBuf> {
        let header = self.header.read();
        self.check_data_page(page_id, &header)?;
        drop(header);

        self.read_raw(page_id)
    }

    fn write_page(&self, page_id: PageId, data: &PageBuf) -> Result<()> {
        let header = self.header.read();
        self.check_data_page(page_id, &header)?;
        drop(header);

        self.write_raw(page_id, data.as_bytes())
    }

    fn allocate_page(&self) -> Result<PageId> {
        let mut header = self.header.write();
        let mut updated = *header;
        if !updated.free_head.is_some() {
            self.grow(&mut updated)?;
        }

        let page_id = updated.free_head;
        updated.free_head = FreePage::read(&self.read_raw(page_id)?).next;
        self.flush_header(&updated)?;
        *header = updated;

        tracing::trace!(page = %page_id, "allocated page");
        Ok(page_id)
    }

    fn deallocate_page(&self, page_id: PageId) -> Result<()> {
        let mut header = self.header.write();
        self.check_data_page(page_id, &header)?;

        let mut buf = PageBuf::new();
        FreePage {
            next: header.free_head,
        }
        .write(&mut buf);
        self.write_raw(page_id, buf.as_bytes())?;

        let mut updated = *header;
        updated.free_head = page_id;
        self.flush_header(&updated)?;
        *header = updated;

        tracing::trace!(page = %page_id, "freed page");
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let header = self.header.read();
        self.flush_header(&header)?;
        let file = self.file.write();
        file.sync_all()?;
        Ok(())
    }

    fn header(&self) -> FileHeader {
        *self.header.read()
    }

    fn set_root_page(&self, page_id: PageId) -> Result<()> {
        let mut header = self.header.write();
        let mut updated = *header;
        updated.root_page = page_id;
        self.flush_header(&updated)?;
        *header = updated;
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_table_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManagerImpl::open(&path, false, 2560)?;
        let header = dm.header();

        assert_eq!(header.page_count, 2560);
        assert_eq!(header.free_head, PageId::new(1));
        assert_eq!(header.root_page, PageId::NONE);
        assert_eq!(std::fs::metadata(&path)?.len(), 10 * 1024 * 1024);

        Ok(())
    }

    #[test]
    fn test_allocate_and_write_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManagerImpl::open(&path, false, 16)?;

        let page_id = dm.allocate_page()?;
        assert_eq!(page_id, PageId::new(1));
        assert_eq!(dm.header().free_head, PageId::new(2));

        let mut data = PageBuf::new();
        data[0..5].copy_from_slice(b"hello");
        dm.write_page(page_id, &data)?;

        let read_data = dm.read_page(page_id)?;
        assert_eq!(&read_data[0..5], b"hello");

        Ok(())
    }

    #[test]
    fn test_header_page_is_not_a_data_page() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("test.db"), false, 16)?;

        assert!(dm.read_page(PageId::HEADER).is_err());
        assert!(dm.write_page(PageId::HEADER, &PageBuf::new()).is_err());
        assert!(dm.read_page(PageId::new(16)).is_err());
        Ok(())
    }

    #[test]
    fn test_reopen_table_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let dm = DiskManagerImpl::open(&path, true, 16)?;
            let page_id = dm.allocate_page()?;
            let mut data = PageBuf::new();
            data[0..4].copy_from_slice(b"test");
            dm.write_page(page_id, &data)?;
            dm.set_root_page(page_id)?;
        }

        {
            let dm = DiskManagerImpl::open(&path, false, 16)?;
            let header = dm.header();
            assert_eq!(header.root_page, PageId::new(1));
            assert_eq!(header.free_head, PageId::new(2));

            let read_data = dm.read_page(PageId::new(1))?;
            assert_eq!(&read_data[0..4], b"test");
        }

        Ok(())
    }

    #[test]
    fn test_reopen_rejects_foreign_file() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.db");
        std::fs::write(&path, vec![0xABu8; PAGE_SIZE])?;

        assert!(matches!(
            DiskManagerImpl::open(&path, false, 16),
            Err(StorageError::InvalidDatabaseFile(_))
        ));
        Ok(())
    }

    #[test]
    fn test_free_list_is_lifo() -> Result<()> {
        let dir = tempdir().unwrap();
        let dm = DiskManagerImpl::open(&dir.path().join("test.db"), false, 16)?;

        let p1 = dm.allocate_page()?;
        let p2 = dm.allocate_page()?;
        let p3 = dm.allocate_page()?;
        assert_eq!((p1, p2, p3), (PageId::new(1), PageId::new(2), PageId::new(3)));

        dm.deallocate_page(p2)?;
        assert_eq!(dm.header().free_head, p2);

        assert_eq!(dm.allocate_page()?, p2);
        assert_eq!(dm.allocate_page()?, PageId::new(4));

        Ok(())
    }

    #[test]
    fn test_file_doubles_when_free_list_runs_out() -> Result<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let dm = DiskManagerImpl::open(&path, false, 4)?;

        let allocated: Vec<u64> = (0..5)
            .map(|_| dm.allocate_page().map(|p| p.value()))
            .collect::<Result<_>>()?;
        assert_eq!(allocated, vec![1, 2, 3, 4, 5]);

        let header = dm.header();
        assert_eq!(header.page_count, 8);
        assert_eq!(header.free_head, PageId::new(6));
        assert_eq!(std::fs::metadata(&path)?.len(), 8 * PAGE_SIZE as u64);

        Ok(())
    }
}
