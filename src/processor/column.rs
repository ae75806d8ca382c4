use crate::processor::ColumnType;

#[derive(Debug, Clone)]
pub enum Column {
    Int64(Vec<Vec<i64>>),
    Float64(Vec<Vec<f64>>),
    Str(Vec<Vec<(usize, usize)>>), // Absolute offsets into the dataset buffer
}

impl Column {
    pub fn new(column_type: ColumnType) -> Self {
        match column_type {
            ColumnType::Int64 => Column::Int64(Vec::new()),
            ColumnType::Float64 => Column::Float64(Vec::new()),
            ColumnType::Str => Column::Str(Vec::new()),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Column::Int64(_) => ColumnType::Int64,
            Column::Float64(_) => ColumnType::Float64,
            Column::Str(_) => ColumnType::Str,
        }
    }

    // Random access; None on type mismatch or out of range
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        match self {
            Column::Int64(chunks) => locate(chunks, idx).copied(),
            _ => None,
        }
    }

    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        match self {
            Column::Float64(chunks) => locate(chunks, idx).copied(),
            _ => None,
        }
    }

    pub fn get_str(&self, idx: usize) -> Option<(usize, usize)> {
        match self {
            Column::Str(chunks) => locate(chunks, idx).copied(),
            _ => None,
        }
    }

    pub fn total_len(&self) -> usize {
        match self {
            Column::Int64(chunks) => chunks.iter().map(|c| c.len()).sum(),
            Column::Float64(chunks) => chunks.iter().map(|c| c.len()).sum(),
            Column::Str(chunks) => chunks.iter().map(|c| c.len()).sum(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        match self {
            Column::Int64(chunks) => chunks.len(),
            Column::Float64(chunks) => chunks.len(),
            Column::Str(chunks) => chunks.len(),
        }
    }

    /// Merge all parse batches into a single chunk so random access is O(1).
    pub fn flatten_in_place(&mut self) {
        match self {
            Column::Int64(chunks) => flatten_chunks(chunks),
            Column::Float64(chunks) => flatten_chunks(chunks),
            Column::Str(chunks) => flatten_chunks(chunks),
        }
    }
}

/// Sorted ids of the rows whose cell is null. Null cells still occupy a
/// placeholder slot in the column so row ids stay aligned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NullMask {
    rows: Vec<usize>,
}

impl NullMask {
    pub fn is_null(&self, row: usize) -> bool {
        !self.rows.is_empty() && self.rows.binary_search(&row).is_ok()
    }

    pub fn null_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Appends batch-local row ids shifted by `offset`. Batches must arrive in
    /// row order.
    pub fn extend_shifted(&mut self, rows: &[usize], offset: usize) {
        self.rows.extend(rows.iter().map(|r| r + offset));
    }
}

fn locate<T>(chunks: &[Vec<T>], idx: usize) -> Option<&T> {
    let mut remaining = idx;
    for chunk in chunks {
        if remaining < chunk.len() {
            return chunk.get(remaining);
        }
        remaining -= chunk.len();
    }
    None
}

fn flatten_chunks<T>(chunks: &mut Vec<Vec<T>>) {
    chunks.retain(|c| !c.is_empty());
    if chunks.len() <= 1 {
        return; // Already flat
    }

    // Take ownership of chunks, leaving empty vec
    let mut owned_chunks = std::mem::take(chunks);

    // Use the first chunk as the base (it's already allocated)
    let mut flattened = owned_chunks.remove(0);

    let total: usize = owned_chunks.iter().map(|c| c.len()).sum();
    flattened.reserve(total);

    for chunk in owned_chunks {
        flattened.extend(chunk);
    }

    chunks.push(flattened);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_access_across_chunks() {
        let col = Column::Int64(vec![vec![1, 2], vec![], vec![3, 4, 5]]);
        assert_eq!(col.get_i64(0), Some(1));
        assert_eq!(col.get_i64(2), Some(3));
        assert_eq!(col.get_i64(4), Some(5));
        assert_eq!(col.get_i64(5), None);
        assert_eq!(col.get_f64(0), None);
        assert_eq!(col.total_len(), 5);
    }

    #[test]
    fn test_flatten_preserves_order() {
        let mut col = Column::Str(vec![vec![(0, 1)], vec![(2, 4), (5, 6)], vec![]]);
        col.flatten_in_place();
        assert_eq!(col.chunk_count(), 1);
        assert_eq!(col.get_str(0), Some((0, 1)));
        assert_eq!(col.get_str(1), Some((2, 4)));
        assert_eq!(col.get_str(2), Some((5, 6)));
    }

    #[test]
    fn test_null_mask_shifted_batches() {
        let mut mask = NullMask::default();
        assert!(!mask.is_null(0));
        mask.extend_shifted(&[1], 0);
        mask.extend_shifted(&[0, 2], 10);
        assert_eq!(mask.null_count(), 3);
        assert!(mask.is_null(1));
        assert!(mask.is_null(10));
        assert!(mask.is_null(12));
        assert!(!mask.is_null(2));
    }

    #[test]
    fn test_new_matches_type() {
        assert_eq!(Column::new(ColumnType::Float64).column_type(), ColumnType::Float64);
        assert_eq!(Column::new(ColumnType::Str).total_len(), 0);
    }
}
