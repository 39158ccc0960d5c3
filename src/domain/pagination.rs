//! Page-numbered list payloads.
//!
//! Lists grow append-only while the user scrolls forward. A full refetch
//! starts over from page 1 and drops every later page, since the server may
//! have shifted items across page boundaries in the meantime.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub current_page: u32,
    pub has_next: bool,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, current_page: u32, has_next: bool, total: u64) -> Self {
        Self {
            items,
            current_page,
            has_next,
            total,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaginationError {
    #[error("expected page {expected}, received page {received}")]
    OutOfOrder { expected: u32, received: u32 },
    #[error("list has no page after {last}")]
    Exhausted { last: u32 },
    #[error("received an empty page batch")]
    Empty,
}

/// Ordered pages of one list query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PagedList<T> {
    pages: Vec<Page<T>>,
}

impl<T: Clone> PagedList<T> {
    /// Start a list from its first page.
    pub fn first(page: Page<T>) -> Self {
        Self { pages: vec![page] }
    }

    pub fn pages(&self) -> &[Page<T>] {
        &self.pages
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|page| page.items.iter())
    }

    pub fn last_page(&self) -> Option<&Page<T>> {
        self.pages.last()
    }

    /// Page number the next forward fetch should request, if any.
    pub fn next_page_number(&self) -> Option<u32> {
        self.last_page()
            .filter(|page| page.has_next)
            .and_then(|page| page.current_page.checked_add(1))
    }

    /// Append the next page during forward pagination.
    pub fn append(&self, page: Page<T>) -> Result<Self, PaginationError> {
        let Some(last) = self.last_page() else {
            return Ok(Self::first(page));
        };
        if !last.has_next {
            return Err(PaginationError::Exhausted {
                last: last.current_page,
            });
        }
        let Some(expected) = last.current_page.checked_add(1) else {
            return Err(PaginationError::Exhausted {
                last: last.current_page,
            });
        };
        if page.current_page != expected {
            return Err(PaginationError::OutOfOrder {
                expected,
                received: page.current_page,
            });
        }
        let mut pages = self.pages.clone();
        pages.push(page);
        Ok(Self { pages })
    }

    /// Append every page of `other` in order.
    pub fn extend(&self, other: PagedList<T>) -> Result<Self, PaginationError> {
        if other.pages.is_empty() {
            return Err(PaginationError::Empty);
        }
        let mut list = self.clone();
        for page in other.pages {
            list = list.append(page)?;
        }
        Ok(list)
    }

    /// Rewrite matching items in place, keeping every item on its page.
    ///
    /// Returns `None` when `f` matched nothing.
    pub fn map_items<F>(&self, mut f: F) -> Option<Self>
    where
        F: FnMut(&T) -> Option<T>,
    {
        let mut changed = false;
        let pages = self
            .pages
            .iter()
            .map(|page| Page {
                items: page
                    .items
                    .iter()
                    .map(|item| match f(item) {
                        Some(updated) => {
                            changed = true;
                            updated
                        }
                        None => item.clone(),
                    })
                    .collect(),
                current_page: page.current_page,
                has_next: page.has_next,
                total: page.total,
            })
            .collect();

        changed.then_some(Self { pages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(items: &[u32], current_page: u32, has_next: bool) -> Page<u32> {
        Page::new(items.to_vec(), current_page, has_next, 9)
    }

    #[test]
    fn append_requires_the_following_page() {
        let list = PagedList::first(page(&[1, 2, 3], 1, true));

        let err = list.append(page(&[7, 8, 9], 3, false)).unwrap_err();
        assert_eq!(
            err,
            PaginationError::OutOfOrder {
                expected: 2,
                received: 3
            }
        );

        let list = list.append(page(&[4, 5, 6], 2, true)).expect("page 2");
        assert_eq!(list.page_count(), 2);
        assert_eq!(list.next_page_number(), Some(3));
    }

    #[test]
    fn append_after_last_page_is_rejected() {
        let list = PagedList::first(page(&[1], 1, false));
        assert_eq!(list.next_page_number(), None);
        assert!(matches!(
            list.append(page(&[2], 2, false)),
            Err(PaginationError::Exhausted { last: 1 })
        ));
    }

    #[test]
    fn page_number_at_the_numeric_limit_is_exhausted() {
        let list = PagedList::first(page(&[1], u32::MAX, true));
        assert_eq!(list.next_page_number(), None);
        assert!(matches!(
            list.append(page(&[2], u32::MAX, false)),
            Err(PaginationError::Exhausted { last: u32::MAX })
        ));
    }

    #[test]
    fn map_items_keeps_page_boundaries() {
        let list = PagedList::first(page(&[1, 2, 3], 1, true))
            .append(page(&[4, 5, 6], 2, true))
            .and_then(|list| list.append(page(&[7, 8, 9], 3, false)))
            .expect("three pages");

        let updated = list
            .map_items(|item| (*item == 5).then_some(50))
            .expect("item 5 present");

        assert_eq!(updated.pages()[0].items, vec![1, 2, 3]);
        assert_eq!(updated.pages()[1].items, vec![4, 50, 6]);
        assert_eq!(updated.pages()[2].items, vec![7, 8, 9]);
        assert_eq!(updated.items().count(), 9);
    }

    #[test]
    fn map_items_without_match_returns_none() {
        let list = PagedList::first(page(&[1, 2], 1, false));
        assert!(list.map_items(|item| (*item == 99).then_some(0)).is_none());
    }

    #[test]
    fn extend_appends_in_order() {
        let list = PagedList::first(page(&[1], 1, true));
        let next = PagedList::first(page(&[2], 2, false));
        let merged = list.extend(next).expect("extend");
        assert_eq!(merged.items().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert!(matches!(
            merged.extend(PagedList { pages: Vec::new() }),
            Err(PaginationError::Empty)
        ));
    }
}
