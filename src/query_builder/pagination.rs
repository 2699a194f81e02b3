/// LIMIT/OFFSET window for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Pagination {
    /// Create pagination with only limit
    pub fn limit_only(limit: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: None,
        }
    }

    /// Create pagination with only offset
    pub fn offset_only(offset: u64) -> Self {
        Self {
            limit: None,
            offset: Some(offset),
        }
    }

    /// Create pagination with both limit and offset
    pub fn limit_offset(limit: u64, offset: u64) -> Self {
        Self {
            limit: Some(limit),
            offset: Some(offset),
        }
    }

    /// Convert to SQL string
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        sql
    }

    /// Apply the window to an already ordered slice of items
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let offset = self.offset.unwrap_or(0) as usize;
        let iter = items.into_iter().skip(offset);
        match self.limit {
            Some(limit) => iter.take(limit as usize).collect(),
            None => iter.collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_only() {
        let pagination = Pagination::limit_only(5);
        assert_eq!(pagination.to_sql(), " LIMIT 5");
    }

    #[test]
    fn test_offset_only() {
        let pagination = Pagination::offset_only(15);
        assert_eq!(pagination.to_sql(), " OFFSET 15");
    }

    #[test]
    fn test_limit_offset() {
        let pagination = Pagination::limit_offset(1, 100);
        assert_eq!(pagination.to_sql(), " LIMIT 1 OFFSET 100");
    }

    #[test]
    fn test_apply_window() {
        let pagination = Pagination::limit_offset(2, 1);
        assert_eq!(pagination.apply(vec![1, 2, 3, 4]), vec![2, 3]);
        assert_eq!(Pagination::offset_only(10).apply(vec![1, 2]), Vec::<i32>::new());
    }
}
