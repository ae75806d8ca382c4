use lru::LruCache;
use tracing::debug;

use crate::helpers::set_helpers::intersect_sorted_vecs;
use crate::processor::dataset::{Dataset, DatasetVersion};
use crate::processor::{CountRule, FilterPredicate, GroupCount, ProcessorError, Value};
use std::cell::{Cell, RefCell};
use std::num::NonZeroUsize;
use std::rc::Rc;

pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Full shape of a query; two queries with equal shapes over the same dataset
/// version always produce equal results.
#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub struct QueryShape {
    pub filters: Vec<(String, FilterPredicate)>,
    pub group_by: Vec<String>,
    pub count: CountRule,
    pub distinct: Option<String>,
}

#[derive(Debug, Hash, Eq, PartialEq, Clone)]
pub enum QueryKey {
    Filter {
        column: String,
        predicate: FilterPredicate,
    },
    Query(QueryShape),
}

#[derive(Debug, Clone)]
pub enum OperationResult {
    Filter(Vec<usize>),
    Query(QueryResult),
}

/// LRU of query results stamped with the dataset version that produced them.
///
/// Touching the cache with a different version drops every entry first; the
/// cache is never partially invalidated.
#[derive(Debug)]
pub struct QueryCache {
    version: Cell<Option<DatasetVersion>>,
    cache: RefCell<LruCache<QueryKey, OperationResult>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            version: Cell::new(None),
            cache: RefCell::new(LruCache::new(capacity)),
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    fn sync_version(&self, version: DatasetVersion) {
        if self.version.get() == Some(version) {
            return;
        }
        let mut cache = self.cache.borrow_mut();
        if !cache.is_empty() {
            debug!(
                entries = cache.len(),
                new_version = %version,
                "dataset version changed, dropping cached queries"
            );
        }
        cache.clear();
        self.version.set(Some(version));
    }

    pub fn get(&self, version: DatasetVersion, key: &QueryKey) -> Option<OperationResult> {
        self.sync_version(version);
        let found = self.cache.borrow_mut().get(key).cloned();
        match found {
            Some(_) => self.hits.set(self.hits.get() + 1),
            None => self.misses.set(self.misses.get() + 1),
        }
        found
    }

    pub fn put(&self, version: DatasetVersion, key: QueryKey, value: OperationResult) {
        self.sync_version(version);
        self.cache.borrow_mut().put(key, value);
    }

    /// Version the current entries belong to, if any query has run.
    pub fn version(&self) -> Option<DatasetVersion> {
        self.version.get()
    }

    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
        self.version.set(None);
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Query results
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Count over all filtered rows
    Count(u64),
    /// Sorted distinct values of one column
    Distinct(Vec<Value>),
    /// Grouped counts, ascending by key
    Groups(Vec<GroupCount>),
}

/// Query builder combining exact-match filters, grouping and a counting rule
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    dataset: Rc<Dataset>,
    cache: Option<Rc<QueryCache>>,
    filters: Vec<(String, FilterPredicate)>,
    group_by_columns: Vec<String>,
    count: CountRule,
    distinct: Option<String>,
}

impl QueryBuilder {
    pub fn new(dataset: Rc<Dataset>, cache: Option<Rc<QueryCache>>) -> Self {
        Self {
            dataset,
            cache,
            filters: Vec::new(),
            group_by_columns: Vec::new(),
            count: CountRule::Rows,
            distinct: None,
        }
    }

    /// Add a filter condition
    pub fn filter(mut self, column: &str, predicate: FilterPredicate) -> Self {
        self.filters.push((column.to_string(), predicate));
        self
    }

    /// Add multiple filter conditions
    pub fn filters(mut self, filters: Vec<(&str, FilterPredicate)>) -> Self {
        for (col, pred) in filters {
            self.filters.push((col.to_string(), pred));
        }
        self
    }

    /// Add a single group-by column
    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by_columns.push(column.to_string());
        self
    }

    /// Add multiple group-by columns
    pub fn group_by_multi(mut self, columns: Vec<&str>) -> Self {
        for col in columns {
            self.group_by_columns.push(col.to_string());
        }
        self
    }

    /// Count every matching row (the default)
    pub fn count_rows(mut self) -> Self {
        self.count = CountRule::Rows;
        self
    }

    /// Count rows whose `column` is not null
    pub fn count_non_null(mut self, column: &str) -> Self {
        self.count = CountRule::NonNull(column.to_string());
        self
    }

    /// Count distinct non-null values of `column` instead of rows
    pub fn count_distinct(mut self, column: &str) -> Self {
        self.count = CountRule::Distinct(column.to_string());
        self
    }

    /// Return the sorted distinct values of `column` instead of counts
    pub fn distinct(mut self, column: &str) -> Self {
        self.distinct = Some(column.to_string());
        self
    }

    /// Disable caching
    pub fn no_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    fn shape(&self) -> QueryShape {
        QueryShape {
            filters: self.filters.clone(),
            group_by: self.group_by_columns.clone(),
            count: self.count.clone(),
            distinct: self.distinct.clone(),
        }
    }

    /// Execute the query
    pub fn execute(self) -> Result<QueryResult, ProcessorError> {
        let version = self.dataset.version();
        let key = QueryKey::Query(self.shape());

        if let Some(cache) = &self.cache {
            if let Some(OperationResult::Query(result)) = cache.get(version, &key) {
                debug!(query = ?key, "query served from cache");
                return Ok(result);
            }
        }

        let filtered_rows = self.apply_filters()?;
        let rows = filtered_rows.as_deref();

        let result = match (self.distinct.as_deref(), self.group_by_columns.len()) {
            (Some(column), 0) => QueryResult::Distinct(self.dataset.distinct(column, rows)?),
            (Some(_), _) => {
                return Err(ProcessorError::Parse(
                    "Distinct selection cannot be combined with grouping".into(),
                ));
            }
            (None, 0) => QueryResult::Count(
                self.dataset
                    .group_count(&[], &self.count, rows)?
                    .iter()
                    .map(|g| g.count)
                    .sum(),
            ),
            (None, _) => QueryResult::Groups(self.dataset.group_count(
                &self.group_by_columns,
                &self.count,
                rows,
            )?),
        };

        debug!(
            query = ?key,
            matched_rows = rows.map_or(self.dataset.row_count(), <[usize]>::len),
            "query executed"
        );

        if let Some(cache) = &self.cache {
            cache.put(version, key, OperationResult::Query(result.clone()));
        }
        Ok(result)
    }

    /// Apply all filters and return filtered row indices; `None` means no filter
    fn apply_filters(&self) -> Result<Option<Vec<usize>>, ProcessorError> {
        let version = self.dataset.version();
        let mut filtered_rows: Option<Vec<usize>> = None;

        for (column, predicate) in &self.filters {
            if filtered_rows.as_ref().is_some_and(Vec::is_empty) {
                break;
            }

            let current_filter = match &self.cache {
                Some(lru) => {
                    let key = QueryKey::Filter {
                        column: column.to_string(),
                        predicate: predicate.clone(),
                    };
                    if let Some(OperationResult::Filter(result)) = lru.get(version, &key) {
                        result
                    } else {
                        let result = self.dataset.filter(column, predicate)?;
                        lru.put(version, key, OperationResult::Filter(result.clone()));
                        result
                    }
                }
                None => self.dataset.filter(column, predicate)?,
            };

            filtered_rows = Some(match filtered_rows {
                None => current_filter,
                Some(existing) => intersect_sorted_vecs(existing, current_filter),
            });
        }

        Ok(filtered_rows)
    }
}

impl Dataset {
    pub fn query(self: &Rc<Self>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), None)
    }

    pub fn query_with_cache(self: &Rc<Self>, cache: &Rc<QueryCache>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), Some(cache.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::dataset::{DatasetLocation, LoadOptions};

    const CSV: &str = "hh_id,state,district,year\n\
                       1,Bihar,Patna,2020\n\
                       2,Bihar,Gaya,2020\n\
                       1,Bihar,Patna,2021\n\
                       3,Goa,Panaji,2020\n";

    fn make_dataset(csv: &str) -> Rc<Dataset> {
        Rc::new(
            Dataset::from_bytes(
                DatasetLocation::parse("fixture.csv"),
                csv.as_bytes().to_vec(),
                &LoadOptions::default(),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_filters_are_intersected() {
        let dataset = make_dataset(CSV);
        let result = dataset
            .query()
            .filter("state", FilterPredicate::Equals(Value::from("Bihar")))
            .filter("year", FilterPredicate::Equals(Value::Int(2020)))
            .execute()
            .unwrap();
        assert_eq!(result, QueryResult::Count(2));
    }

    #[test]
    fn test_distinct_with_filter() {
        let dataset = make_dataset(CSV);
        let result = dataset
            .query()
            .filter("state", FilterPredicate::Equals(Value::from("Bihar")))
            .distinct("district")
            .execute()
            .unwrap();
        assert_eq!(
            result,
            QueryResult::Distinct(vec![Value::from("Gaya"), Value::from("Patna")])
        );
    }

    #[test]
    fn test_grouped_distinct_count() {
        let dataset = make_dataset(CSV);
        let result = dataset
            .query()
            .group_by_multi(vec!["state", "district"])
            .count_distinct("hh_id")
            .execute()
            .unwrap();
        let QueryResult::Groups(groups) = result else {
            panic!("Expected grouped result");
        };
        assert_eq!(groups.len(), 3);
        assert_eq!(
            groups[1],
            GroupCount {
                key: vec![Value::from("Bihar"), Value::from("Patna")],
                count: 1,
            }
        );
    }

    #[test]
    fn test_count_non_null_skips_missing_ids() {
        let dataset = make_dataset("hh_id,state\n1,Bihar\n,Bihar\n2,Goa\n");
        let rows = dataset
            .query()
            .filter("state", FilterPredicate::Equals(Value::from("Bihar")))
            .count_rows()
            .execute()
            .unwrap();
        assert_eq!(rows, QueryResult::Count(2));

        let non_null = dataset
            .query()
            .filter("state", FilterPredicate::Equals(Value::from("Bihar")))
            .count_non_null("hh_id")
            .execute()
            .unwrap();
        assert_eq!(non_null, QueryResult::Count(1));
    }

    #[test]
    fn test_no_match_yields_empty_groups() {
        let dataset = make_dataset(CSV);
        let result = dataset
            .query()
            .filter("state", FilterPredicate::Equals(Value::from("Kerala")))
            .filter("year", FilterPredicate::Equals(Value::Int(2020)))
            .group_by("district")
            .execute()
            .unwrap();
        assert_eq!(result, QueryResult::Groups(Vec::new()));
    }

    #[test]
    fn test_distinct_with_grouping_is_rejected() {
        let dataset = make_dataset(CSV);
        let result = dataset.query().group_by("state").distinct("district").execute();
        assert!(matches!(result, Err(ProcessorError::Parse(_))));
    }

    #[test]
    fn test_cached_query() {
        let dataset = make_dataset(CSV);
        let cache = Rc::new(QueryCache::new());

        let first = dataset
            .query_with_cache(&cache)
            .group_by("state")
            .execute()
            .unwrap();
        let second = dataset
            .query_with_cache(&cache)
            .group_by("state")
            .execute()
            .unwrap(); // from cache
        assert_eq!(first, second);
        assert_eq!(cache.hits(), 1);
        assert_eq!(cache.version(), Some(dataset.version()));
    }

    #[test]
    fn test_version_change_invalidates_whole_cache() {
        let cache = Rc::new(QueryCache::new());
        let old = make_dataset(CSV);
        let count = |dataset: &Rc<Dataset>| {
            dataset
                .query_with_cache(&cache)
                .filter("state", FilterPredicate::Equals(Value::from("Bihar")))
                .execute()
                .unwrap()
        };

        assert_eq!(count(&old), QueryResult::Count(3));
        assert_eq!(cache.len(), 2); // filter row set + query result

        let new = make_dataset("hh_id,state,district,year\n7,Bihar,Patna,2022\n");
        assert_eq!(count(&new), QueryResult::Count(1));
        assert_eq!(cache.version(), Some(new.version()));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let dataset = make_dataset(CSV);
        let cache = Rc::new(QueryCache::with_capacity(1));
        for state in ["Bihar", "Goa"] {
            dataset
                .query_with_cache(&cache)
                .distinct("district")
                .filter("state", FilterPredicate::Equals(Value::from(state)))
                .execute()
                .unwrap();
        }
        assert_eq!(cache.len(), 1);
    }
}
