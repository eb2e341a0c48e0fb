//! Page cursor carried through one fetch call

/// Position of a fetch within an upstream's page sequence.
///
/// `page_index` is zero-based and counts pages advanced so far. Upstreams
/// number pages from 1, so the page to request is `page_number()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub page_index: u32,
    pub page_size: u32,
    pub max_page: u32,
}

impl PageCursor {
    pub fn new(page_size: u32, max_page: u32) -> Self {
        Self {
            page_index: 0,
            page_size,
            max_page,
        }
    }

    /// One-based page number for the upstream request.
    pub fn page_number(&self) -> u32 {
        self.page_index + 1
    }

    /// True once `max_page` pages have been advanced.
    pub fn is_exhausted(&self) -> bool {
        self.page_index >= self.max_page
    }

    pub fn advance(&mut self) {
        self.page_index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_counts_pages_from_one_upstream() {
        let mut cursor = PageCursor::new(10, 3);
        assert_eq!(cursor.page_number(), 1);
        cursor.advance();
        cursor.advance();
        assert_eq!(cursor.page_number(), 3);
        assert!(!cursor.is_exhausted(), "page 3 of 3 is still allowed");
        cursor.advance();
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn zero_max_page_is_exhausted_immediately() {
        assert!(PageCursor::new(10, 0).is_exhausted());
    }
}
