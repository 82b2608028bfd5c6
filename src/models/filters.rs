use super::enums::{DocumentStatus, DocumentType};

/// Largest page size the listing query will honour.
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Listing filter over documents, joined with their extraction type.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    pub doc_type: Option<DocumentType>,
    pub status: Option<DocumentStatus>,
    pub order: SortOrder,
    /// 1-based page index.
    pub page: u32,
    pub limit: u32,
}

impl Default for DocumentFilter {
    fn default() -> Self {
        Self {
            doc_type: None,
            status: None,
            order: SortOrder::Desc,
            page: 1,
            limit: 20,
        }
    }
}

impl DocumentFilter {
    /// Clamp page and limit into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.limit = self.limit.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn offset(&self) -> u32 {
        (self.page.saturating_sub(1)).saturating_mul(self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_clamps_limit_and_page() {
        let filter = DocumentFilter {
            page: 0,
            limit: 500,
            ..Default::default()
        }
        .normalized();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);
    }

    #[test]
    fn offset_follows_page() {
        let filter = DocumentFilter {
            page: 3,
            limit: 10,
            ..Default::default()
        };
        assert_eq!(filter.offset(), 20);
    }
}
