use super::scope::TransactionScope;
use super::source;
use crate::error::MigrationError;
use crate::models::VaultRecord;
use crate::store::Store;
use serde::Serialize;
use std::collections::VecDeque;

/// Where the cursor stands relative to the total frozen at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CursorPosition {
    /// 1-based; 0 until the first page is fetched.
    pub page_number: u64,
    pub within_page_index: usize,
    pub page_size: usize,
    pub total_count: u64,
}

impl CursorPosition {
    /// Logical position of the next record to deliver.
    pub fn logical(&self) -> u64 {
        self.within_page_index as u64 + self.page_number.saturating_sub(1) * self.page_size as u64
    }

    pub fn is_exhausted(&self) -> bool {
        self.logical() >= self.total_count
    }

    /// Query limit for `page_number`: a full page, or whatever is left of the
    /// frozen total.
    pub fn limit_for_page(&self, page_number: u64) -> usize {
        let before = page_number.saturating_sub(1) * self.page_size as u64;
        let remaining = self.total_count.saturating_sub(before);
        usize::try_from(remaining.min(self.page_size as u64)).unwrap_or(self.page_size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Init,
    Fetching,
    Delivering,
    Done,
}

/// One fetched page. Its records are a snapshot; linking happens out-of-band.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: u64,
    pub records: Vec<VaultRecord>,
}

/// Pull-based walk over undone vault states, one transaction per page.
///
/// The page transaction stays open while the page is being processed and is
/// committed and closed right before the next page is fetched, or when
/// `has_next` finds nothing left.
pub struct StateCursor<'s, S: Store> {
    store: &'s S,
    page_size: usize,
    total: u64,
    page_number: u64,
    index: usize,
    buffer: VecDeque<VaultRecord>,
    drained: bool,
    scope: Option<TransactionScope<S::Tx>>,
    state: CursorState,
}

impl<'s, S: Store> StateCursor<'s, S> {
    /// Count the undone states, then eagerly fetch the first page.
    pub fn open(store: &'s S, page_size: usize) -> Result<Self, MigrationError> {
        let total = source::count_undone(store).map_err(MigrationError::Count)?;

        let mut cursor = Self {
            store,
            page_size: page_size.max(1),
            total,
            page_number: 0,
            index: 0,
            buffer: VecDeque::new(),
            drained: false,
            scope: None,
            state: CursorState::Init,
        };

        log::info!(
            "{} vault states to migrate in pages of {}",
            total,
            cursor.page_size
        );

        if total == 0 {
            cursor.state = CursorState::Done;
            return Ok(cursor);
        }

        cursor.fetch_page()?;
        Ok(cursor)
    }

    pub fn cursor_position(&self) -> CursorPosition {
        CursorPosition {
            page_number: self.page_number,
            within_page_index: self.index,
            page_size: self.page_size,
            total_count: self.total,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    /// Pages fetched so far.
    pub fn pages_fetched(&self) -> u64 {
        self.page_number
    }

    /// Whether another record can be delivered. Returning `false` commits and
    /// closes the trailing page transaction.
    pub fn has_next(&mut self) -> bool {
        if self.state == CursorState::Done {
            return false;
        }

        let position = self.cursor_position();
        debug_assert!(position.logical() <= position.total_count);

        // A short page means the undone set ran dry before the frozen total was
        // reached; states were linked by someone else during the run.
        let drained = self.buffer.is_empty() && self.drained;
        let more = !position.is_exhausted() && !drained;

        if !more {
            self.finish();
        }
        more
    }

    /// Hand out the undelivered rest of the current page, fetching a new page
    /// first when the current one is used up.
    pub fn next_page(&mut self) -> Result<Option<Page>, MigrationError> {
        if !self.ensure_buffered()? {
            return Ok(None);
        }

        let records: Vec<VaultRecord> = self.buffer.drain(..).collect();
        self.index += records.len();
        Ok(Some(Page {
            number: self.page_number,
            records,
        }))
    }

    fn ensure_buffered(&mut self) -> Result<bool, MigrationError> {
        if !self.has_next() {
            return Ok(false);
        }

        if self.buffer.is_empty() {
            if let Err(err) = self.fetch_page() {
                self.state = CursorState::Done;
                return Err(err);
            }
            if self.buffer.is_empty() {
                self.finish();
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn fetch_page(&mut self) -> Result<(), MigrationError> {
        self.close_page_transaction();
        self.state = CursorState::Fetching;

        let page_number = self.page_number + 1;
        let limit = self.cursor_position().limit_for_page(page_number);

        let mut scope = TransactionScope::begin(self.store, format!("page {}", page_number))
            .map_err(|source| MigrationError::BeginPage {
                page: page_number,
                source,
            })?;

        let records = source::fetch_next_page(scope.transaction(), limit).map_err(|source| {
            MigrationError::FetchPage {
                page: page_number,
                source,
            }
        })?;

        log::debug!(
            "page {}: fetched {} of at most {} vault states",
            page_number,
            records.len(),
            limit
        );

        self.drained = records.len() < limit;
        self.page_number = page_number;
        self.index = 0;
        self.buffer = records.into();
        self.scope = Some(scope);
        self.state = CursorState::Delivering;
        Ok(())
    }

    fn close_page_transaction(&mut self) {
        if let Some(scope) = self.scope.take() {
            // A failed close is logged by the scope; the page was read-only.
            scope.complete();
        }
    }

    fn finish(&mut self) {
        self.close_page_transaction();
        if self.state != CursorState::Done {
            log::debug!(
                "cursor done after {} pages at position {} of {}",
                self.page_number,
                self.cursor_position().logical(),
                self.total
            );
        }
        self.state = CursorState::Done;
    }
}

impl<S: Store> Iterator for StateCursor<'_, S> {
    type Item = Result<VaultRecord, MigrationError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.ensure_buffered() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(err) => return Some(Err(err)),
        }

        let record = self.buffer.pop_front()?;
        self.index += 1;
        Some(Ok(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartyLink, Relevancy, StateRef, StateStatus};
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn store_with(count: usize) -> MemoryStore {
        MemoryStore::with_states((0..count).map(|i| VaultRecord {
            state_ref: StateRef::new(format!("tx{:04}", i), 0),
            contract_state_class_name: "test.Cash".to_string(),
            state_status: StateStatus::Unconsumed,
            relevancy_status: Relevancy::NotRelevant,
            recorded_timestamp: Utc::now(),
            contract_state: Vec::new(),
        }))
    }

    fn link(record: &VaultRecord) -> PartyLink {
        PartyLink {
            state_ref: record.state_ref.clone(),
            public_key_hash: vec![1],
            x500_name: None,
        }
    }

    #[test]
    fn test_position_arithmetic() {
        let position = CursorPosition {
            page_number: 3,
            within_page_index: 4,
            page_size: 10,
            total_count: 25,
        };
        assert_eq!(position.logical(), 24);
        assert!(!position.is_exhausted());
        assert_eq!(position.limit_for_page(1), 10);
        assert_eq!(position.limit_for_page(3), 5);
        assert_eq!(position.limit_for_page(4), 0);
    }

    #[test]
    fn test_empty_store_opens_no_page_transaction() {
        let store = MemoryStore::new();
        let mut cursor = StateCursor::open(&store, 10).unwrap();
        assert_eq!(cursor.state(), CursorState::Done);
        assert!(!cursor.has_next());
        assert_eq!(cursor.pages_fetched(), 0);

        let stats = store.stats();
        assert_eq!(stats.page_queries, 0);
        assert_eq!(stats.open_transactions, 0);
    }

    #[test]
    fn test_first_page_fetched_eagerly() {
        let store = store_with(5);
        let cursor = StateCursor::open(&store, 3).unwrap();
        assert_eq!(cursor.state(), CursorState::Delivering);
        assert_eq!(cursor.pages_fetched(), 1);
        assert_eq!(store.stats().open_transactions, 1);
    }

    #[test]
    fn test_iteration_without_linking_revisits_first_page_states() {
        // Nothing gets linked, so every fetch returns the same leading states
        // until the frozen total is reached.
        let store = store_with(5);
        let cursor = StateCursor::open(&store, 2).unwrap();
        let visited: Vec<String> = cursor
            .map(|record| record.unwrap().state_ref.txhash)
            .collect();
        assert_eq!(visited, vec!["tx0000", "tx0001", "tx0000", "tx0001", "tx0000"]);
        assert_eq!(store.stats().open_transactions, 0);
    }

    #[test]
    fn test_invariant_holds_while_linking_each_record() {
        let store = store_with(7);
        let mut cursor = StateCursor::open(&store, 3).unwrap();
        let mut seen = Vec::new();

        while cursor.has_next() {
            let position = cursor.cursor_position();
            assert!(position.logical() < position.total_count);
            let record = cursor.next().unwrap().unwrap();
            store.insert_link(link(&record));
            seen.push(record.state_ref.txhash);
        }

        let position = cursor.cursor_position();
        assert_eq!(position.logical(), position.total_count);
        assert_eq!(seen.len(), 7);
        assert_eq!(cursor.pages_fetched(), 3);
        assert_eq!(store.undone_count(), 0);
        assert_eq!(store.stats().open_transactions, 0);
    }

    #[test]
    fn test_last_page_is_clamped_to_frozen_total() {
        let store = store_with(5);
        let mut cursor = StateCursor::open(&store, 3).unwrap();

        let first = cursor.next_page().unwrap().unwrap();
        for record in &first.records {
            store.insert_link(link(record));
        }
        let second = cursor.next_page().unwrap().unwrap();
        assert_eq!(second.number, 2);
        assert_eq!(second.records.len(), 2);
        assert_eq!(cursor.cursor_position().logical(), 5);

        assert!(cursor.next_page().unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::Done);
    }

    #[test]
    fn test_short_page_ends_iteration_early() {
        let store = store_with(6);
        let mut cursor = StateCursor::open(&store, 4).unwrap();
        let first = cursor.next_page().unwrap().unwrap();
        assert_eq!(first.records.len(), 4);

        // Another writer links everything before the second fetch.
        for i in 0..6 {
            store.insert_link(PartyLink {
                state_ref: StateRef::new(format!("tx{:04}", i), 0),
                public_key_hash: vec![9],
                x500_name: None,
            });
        }

        assert!(cursor.next_page().unwrap().is_none());
        assert_eq!(cursor.state(), CursorState::Done);
        assert_eq!(store.stats().open_transactions, 0);
    }
}
