//! Offset pagination shared by every list operation

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: usize = 20;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Requested window; `page` is 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: usize,
    pub limit: usize,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PageRequest {
    /// Clamp raw query values into a valid window
    pub fn new(page: Option<usize>, limit: Option<usize>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        }
    }

    fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.limit)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl<T> Page<T> {
    /// Cut one window out of an already ordered list
    pub fn slice(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len();
        let offset = request.offset();
        let items: Vec<T> = all.into_iter().skip(offset).take(request.limit).collect();
        let has_more = offset.saturating_add(items.len()) < total;
        Self {
            items,
            page: request.page,
            limit: request.limit,
            has_more,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            limit: self.limit,
            has_more: self.has_more,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_clamps() {
        let req = PageRequest::new(Some(0), Some(1000));
        assert_eq!(req.page, 1);
        assert_eq!(req.limit, MAX_PAGE_LIMIT);

        let req = PageRequest::new(None, Some(0));
        assert_eq!(req.limit, 1);
    }

    #[test]
    fn test_slice_has_more() {
        let all: Vec<u32> = (0..45).collect();

        let first = Page::slice(all.clone(), PageRequest::new(Some(1), Some(20)));
        assert_eq!(first.items.len(), 20);
        assert!(first.has_more);

        let last = Page::slice(all.clone(), PageRequest::new(Some(3), Some(20)));
        assert_eq!(last.items, (40..45).collect::<Vec<_>>());
        assert!(!last.has_more);

        let beyond = Page::slice(all, PageRequest::new(Some(9), Some(20)));
        assert!(beyond.items.is_empty());
        assert!(!beyond.has_more);
    }
}
