//! Cursor-based pagination.

use crate::adapter::Adapter;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::query::cursor::Cursor;
use crate::query::descriptor::Query;
use crate::query::resultset::{batch_entries, batch_options, Entry};
use std::iter::FusedIterator;
use tracing::debug;

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    entries: Vec<Entry>,
    cursor: Option<Cursor>,
    has_more: bool,
}

impl Page {
    /// Returns the results on this page.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Consumes the page and returns its results.
    pub fn into_entries(self) -> Vec<Entry> {
        self.entries
    }

    /// Returns the keys on this page.
    pub fn keys(&self) -> Vec<Key> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    /// Returns the cursor that fetches the page after this one.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Returns the backend's continuation flag for this page.
    ///
    /// This is not a lookahead: the next page may turn out empty.
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    /// Returns the number of results on this page.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true for an empty page.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Query {
    /// Fetches one page of at most `page_size` results after `cursor`.
    ///
    /// Fetching is idempotent per cursor: calling again with the same
    /// cursor returns the same page when the data has not changed. The
    /// query's offset applies only when `cursor` is `None`, and its limit
    /// caps this page.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid descriptor or a zero page
    /// size, or any adapter error.
    pub fn fetch_page(
        &self,
        adapter: &dyn Adapter,
        page_size: usize,
        cursor: Option<&Cursor>,
    ) -> CoreResult<Page> {
        self.validate()?;
        if page_size == 0 {
            return Err(CoreError::invalid_argument("page size must be positive"));
        }
        let page_size = self.limit().map_or(page_size, |limit| limit.min(page_size));

        let mut entries = Vec::with_capacity(page_size);
        let mut cursor = cursor.cloned();
        let mut offset = if cursor.is_none() { self.offset() } else { 0 };
        let mut has_more = page_size > 0;

        while entries.len() < page_size && has_more {
            let wanted = page_size - entries.len();
            let options = batch_options(self, cursor.clone(), wanted, offset)?;
            let batch = adapter.run_query(self, &options)?;
            offset = 0;

            let (batch_entries, next_cursor, more) = batch_entries(batch)?;
            let stalled = batch_entries.is_empty() && next_cursor == cursor;
            entries.extend(batch_entries);
            has_more = more && next_cursor.is_some() && !stalled;
            if next_cursor.is_some() {
                cursor = next_cursor;
            }
        }

        debug!(kind = ?self.kind(), results = entries.len(), has_more, "fetched page");
        Ok(Page {
            entries,
            cursor,
            has_more,
        })
    }

    /// Returns a page sequence starting after `cursor`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an invalid descriptor or a zero page size.
    pub fn paginate<'a>(
        &self,
        adapter: &'a dyn Adapter,
        page_size: usize,
        cursor: Option<Cursor>,
    ) -> CoreResult<Pages<'a>> {
        self.validate()?;
        if page_size == 0 {
            return Err(CoreError::invalid_argument("page size must be positive"));
        }
        Ok(Pages {
            adapter,
            query: self.clone(),
            page_size,
            started: cursor.is_some(),
            cursor,
            has_more: true,
            remaining: self.limit(),
        })
    }
}

/// A sequence of pages over one query.
///
/// Each [`Pages::fetch_next_page`] call issues a fresh fetch from the last
/// page's cursor. [`Pages::has_more`] reports the backend's flag for the
/// last page fetched and starts out true. Iterating skips a trailing empty
/// page.
pub struct Pages<'a> {
    adapter: &'a dyn Adapter,
    query: Query,
    page_size: usize,
    cursor: Option<Cursor>,
    started: bool,
    has_more: bool,
    remaining: Option<usize>,
}

impl Pages<'_> {
    /// Returns true if another page may exist.
    pub fn has_more(&self) -> bool {
        self.has_more && self.remaining != Some(0)
    }

    /// Returns the cursor the next page will be fetched from.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Returns the page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Fetches the page after the last one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOperation` once no more pages exist, or any adapter
    /// error. A failed fetch leaves the cursor unchanged so it can be retried.
    pub fn fetch_next_page(&mut self) -> CoreResult<Page> {
        if !self.has_more() {
            return Err(CoreError::invalid_operation("no more pages"));
        }
        let query = match self.remaining {
            Some(remaining) => self.query.with_limit(remaining),
            None => self.query.clone(),
        };
        let query = if self.started { query.with_offset(0) } else { query };

        let page = query.fetch_page(self.adapter, self.page_size, self.cursor.as_ref())?;
        self.started = true;
        self.has_more = page.has_more();
        self.cursor = page.cursor().cloned();
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining = remaining.saturating_sub(page.len());
        }
        Ok(page)
    }
}

impl Iterator for Pages<'_> {
    type Item = CoreResult<Page>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.has_more() {
            return None;
        }
        match self.fetch_next_page() {
            Ok(page) if page.is_empty() && !page.has_more() => None,
            Ok(page) => Some(Ok(page)),
            Err(err) => {
                self.has_more = false;
                Some(Err(err))
            }
        }
    }
}

impl FusedIterator for Pages<'_> {}

impl std::fmt::Debug for Pages<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pages")
            .field("adapter", &self.adapter.name())
            .field("page_size", &self.page_size)
            .field("cursor", &self.cursor)
            .field("has_more", &self.has_more)
            .finish_non_exhaustive()
    }
}
