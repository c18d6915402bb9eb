// Lazy newest-first traversal of a cursor-paginated collection.

use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::debug;

use super::{Chronological, PageSource, ReconcileError};

/// Pulls items from a [`PageSource`] one page at a time, newest first.
///
/// The walk ends, without yielding the item and without fetching again, at
/// the first item created before `cutoff`. It also ends on an empty page or
/// once the source reports no further pages. Each walker is single use.
pub struct CollectionWalker<'a, S: ?Sized, T> {
    source: &'a S,
    cutoff: i64,
    buffer: VecDeque<T>,
    cursor: Option<String>,
    has_more: bool,
    started: bool,
    done: bool,
    last_created: Option<i64>,
    pages_fetched: usize,
    _item: PhantomData<fn() -> T>,
}

impl<'a, S, T> CollectionWalker<'a, S, T>
where
    S: PageSource<T> + ?Sized,
    T: Chronological + Send,
{
    /// Walk every item created at or after `cutoff` (epoch seconds).
    pub fn new(source: &'a S, cutoff: i64) -> Self {
        Self {
            source,
            cutoff,
            buffer: VecDeque::new(),
            cursor: None,
            has_more: true,
            started: false,
            done: false,
            last_created: None,
            pages_fetched: 0,
            _item: PhantomData,
        }
    }

    /// Walk the whole collection.
    pub fn unbounded(source: &'a S) -> Self {
        Self::new(source, i64::MIN)
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// Next item inside the window, or `None` once the walk is over.
    pub async fn next(&mut self) -> Result<Option<T>, ReconcileError> {
        loop {
            if self.done {
                return Ok(None);
            }

            if let Some(item) = self.buffer.pop_front() {
                let created = item.created_at();
                if let Some(previous) = self.last_created {
                    if created > previous {
                        self.done = true;
                        return Err(ReconcileError::OutOfOrder {
                            id: item.cursor().to_string(),
                            created,
                            previous,
                        });
                    }
                }
                self.last_created = Some(created);

                if created < self.cutoff {
                    debug!(
                        cursor = %item.cursor(),
                        created = created,
                        cutoff = self.cutoff,
                        pages_fetched = self.pages_fetched,
                        "walk crossed window cutoff"
                    );
                    self.finish();
                    return Ok(None);
                }
                return Ok(Some(item));
            }

            if self.started && !self.has_more {
                self.finish();
                return Ok(None);
            }

            self.fetch().await?;
        }
    }

    async fn fetch(&mut self) -> Result<(), ReconcileError> {
        let page = match self.source.fetch_page(self.cursor.as_deref()).await {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };
        self.started = true;
        self.pages_fetched += 1;

        debug!(
            cursor = self.cursor.as_deref().unwrap_or(""),
            items = page.items.len(),
            has_more = page.has_more,
            "fetched page"
        );

        match page.items.last() {
            Some(last) => {
                self.cursor = Some(last.cursor().to_string());
                self.has_more = page.has_more;
            }
            // An empty page has no cursor to continue from.
            None => self.has_more = false,
        }
        self.buffer.extend(page.items);
        Ok(())
    }

    fn finish(&mut self) {
        self.done = true;
        self.buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::fakes::{entry, FakePages};
    use crate::reconcile::model::LedgerEntry;

    async fn drain(walker: &mut CollectionWalker<'_, FakePages<LedgerEntry>, LedgerEntry>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(item) = walker.next().await.unwrap() {
            ids.push(item.id);
        }
        ids
    }

    #[tokio::test]
    async fn test_walks_pages_by_last_id() {
        let source = FakePages::new(vec![
            vec![entry("txn_5", 500, 1, 0, 1), entry("txn_4", 400, 1, 0, 1)],
            vec![entry("txn_3", 300, 1, 0, 1), entry("txn_2", 200, 1, 0, 1)],
            vec![entry("txn_1", 100, 1, 0, 1)],
        ]);
        let mut walker = CollectionWalker::unbounded(&source);

        let ids = drain(&mut walker).await;

        assert_eq!(ids, vec!["txn_5", "txn_4", "txn_3", "txn_2", "txn_1"]);
        assert_eq!(
            source.cursors(),
            vec![None, Some("txn_4".to_string()), Some("txn_2".to_string())]
        );
        assert_eq!(walker.pages_fetched(), 3);
    }

    #[tokio::test]
    async fn test_stops_at_cutoff_without_fetching_further() {
        let source = FakePages::new(vec![
            vec![entry("txn_5", 500, 1, 0, 1), entry("txn_4", 400, 1, 0, 1)],
            vec![entry("txn_3", 300, 1, 0, 1), entry("txn_2", 199, 1, 0, 1), entry("txn_1", 100, 1, 0, 1)],
            vec![entry("txn_0", 50, 1, 0, 1)],
        ]);
        let mut walker = CollectionWalker::new(&source, 200);

        let ids = drain(&mut walker).await;

        assert_eq!(ids, vec!["txn_5", "txn_4", "txn_3"]);
        assert_eq!(source.calls(), 2);
        // Exhausted walkers stay exhausted.
        assert!(walker.next().await.unwrap().is_none());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_item_at_cutoff_is_included() {
        let source = FakePages::new(vec![vec![entry("txn_2", 200, 1, 0, 1), entry("txn_1", 199, 1, 0, 1)]]);
        let mut walker = CollectionWalker::new(&source, 200);
        assert_eq!(drain(&mut walker).await, vec!["txn_2"]);
    }

    #[tokio::test]
    async fn test_empty_first_page() {
        let source = FakePages::<LedgerEntry>::new(vec![vec![]]).with_has_more(vec![true]);
        let mut walker = CollectionWalker::unbounded(&source);

        assert!(drain(&mut walker).await.is_empty());
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_has_more_false_ends_walk() {
        let source = FakePages::new(vec![
            vec![entry("txn_2", 200, 1, 0, 1)],
            vec![entry("txn_1", 100, 1, 0, 1)],
        ])
        .with_has_more(vec![false, false]);
        let mut walker = CollectionWalker::unbounded(&source);

        assert_eq!(drain(&mut walker).await, vec!["txn_2"]);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_equal_timestamps_are_in_order() {
        let source = FakePages::new(vec![
            vec![entry("txn_3", 300, 1, 0, 1), entry("txn_2", 300, 1, 0, 1)],
            vec![entry("txn_1", 300, 1, 0, 1)],
        ]);
        let mut walker = CollectionWalker::unbounded(&source);
        assert_eq!(drain(&mut walker).await.len(), 3);
    }

    #[tokio::test]
    async fn test_out_of_order_fails_loudly() {
        let source = FakePages::new(vec![
            vec![entry("txn_3", 300, 1, 0, 1)],
            vec![entry("txn_9", 900, 1, 0, 1)],
        ]);
        let mut walker: CollectionWalker<'_, _, LedgerEntry> = CollectionWalker::unbounded(&source);

        assert!(walker.next().await.unwrap().is_some());
        match walker.next().await {
            Err(ReconcileError::OutOfOrder { id, created, previous }) => {
                assert_eq!(id, "txn_9");
                assert_eq!(created, 900);
                assert_eq!(previous, 300);
            }
            other => panic!("expected out-of-order error, got {other:?}"),
        }
        assert!(walker.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let source = FakePages::new(vec![
            vec![entry("txn_2", 200, 1, 0, 1)],
            vec![entry("txn_1", 100, 1, 0, 1)],
        ])
        .failing_at(1);
        let mut walker: CollectionWalker<'_, _, LedgerEntry> = CollectionWalker::unbounded(&source);

        assert!(walker.next().await.unwrap().is_some());
        assert!(matches!(walker.next().await, Err(ReconcileError::Remote(_))));
    }
}
