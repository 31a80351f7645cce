use serde::{Deserialize, Serialize};

/// Default page size for inbox listings.
pub const INBOX_PAGE_SIZE: u32 = 20;
/// Default page size for conversation history.
pub const HISTORY_PAGE_SIZE: u32 = 50;
/// Hard ceiling on any page size.
pub const MAX_PAGE_SIZE: u32 = 100;

/// A normalized 1-based page request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub page_size: u32,
}

impl PageRequest {
    /// Normalize raw query values: a page below 1 becomes 1, a missing or
    /// zero size becomes `default_size`, sizes above the ceiling are clamped.
    pub fn new(page: Option<u32>, page_size: Option<u32>, default_size: u32) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = match page_size {
            None | Some(0) => default_size,
            Some(n) => n.min(MAX_PAGE_SIZE),
        };
        Self { page, page_size }
    }

    pub fn inbox(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self::new(page, page_size, INBOX_PAGE_SIZE)
    }

    pub fn history(page: Option<u32>, page_size: Option<u32>) -> Self {
        Self::new(page, page_size, HISTORY_PAGE_SIZE)
    }

    pub fn limit(&self) -> u32 {
        self.page_size
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.page_size)
    }
}

/// Pagination metadata echoed back to clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

/// One page of results plus the total across all pages.
#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    pub fn empty(request: PageRequest) -> Self {
        Self {
            items: Vec::new(),
            total: 0,
            request,
        }
    }

    pub fn meta(&self) -> PageMeta {
        PageMeta {
            total: self.total,
            page: self.request.page,
            page_size: self.request.page_size,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            request: self.request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_per_endpoint() {
        assert_eq!(PageRequest::inbox(None, None), PageRequest { page: 1, page_size: 20 });
        assert_eq!(PageRequest::history(None, None), PageRequest { page: 1, page_size: 50 });
    }

    #[test]
    fn zero_values_normalized() {
        let req = PageRequest::inbox(Some(0), Some(0));
        assert_eq!(req.page, 1);
        assert_eq!(req.page_size, INBOX_PAGE_SIZE);
    }

    #[test]
    fn page_size_clamped() {
        let req = PageRequest::history(Some(2), Some(10_000));
        assert_eq!(req.page_size, MAX_PAGE_SIZE);
        assert_eq!(req.offset(), 100);
    }

    #[test]
    fn offset_is_zero_based() {
        let req = PageRequest::new(Some(3), Some(7), 20);
        assert_eq!(req.limit(), 7);
        assert_eq!(req.offset(), 14);
    }

    #[test]
    fn empty_page_meta() {
        let page: Page<u8> = Page::empty(PageRequest::inbox(None, None));
        let meta = serde_json::to_value(page.meta()).unwrap();
        assert_eq!(meta, serde_json::json!({"total": 0, "page": 1, "page_size": 20}));
    }
}
