use arrow2::{
    array::{Array, Float64Array, Int64Array, MutableUtf8Array, Utf8Array},
    chunk::Chunk,
    datatypes::{DataType, Field, Schema},
};
use bytes::Bytes;
use memmap2::Mmap;
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    fmt,
    fs::File,
    io::Read,
    path::PathBuf,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, info};

use crate::{
    helpers::hash_helpers::stable_hash_with,
    processor::{
        ColumnType, CountRule, FilterPredicate, GroupCount, ParseSummary, ProcessorError, Value,
        column::{Column, NullMask},
        loader::{LoadedTable, TypeHints, parse_csv, parse_parquet},
    },
};

/// Where a dataset lives: a local path or an `http(s)` URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DatasetLocation {
    Local(PathBuf),
    Remote(String),
}

impl DatasetLocation {
    pub fn parse(location: &str) -> Self {
        let trimmed = location.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            DatasetLocation::Remote(trimmed.to_string())
        } else {
            DatasetLocation::Local(PathBuf::from(trimmed))
        }
    }

    pub fn format(&self) -> DatasetFormat {
        let name = match self {
            DatasetLocation::Local(path) => path.to_string_lossy().into_owned(),
            DatasetLocation::Remote(url) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
        };
        if name.to_ascii_lowercase().ends_with(".parquet") {
            DatasetFormat::Parquet
        } else {
            DatasetFormat::Csv
        }
    }
}

impl FromStr for DatasetLocation {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(DatasetLocation::parse(s))
    }
}

impl fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetLocation::Local(path) => write!(f, "{}", path.display()),
            DatasetLocation::Remote(url) => f.write_str(url),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetFormat {
    Csv,
    Parquet,
}

/// Content fingerprint of an opened dataset. Identical bytes at the same
/// location always produce the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatasetVersion(u64);

impl DatasetVersion {
    fn fingerprint(location: &DatasetLocation, raw: &[u8]) -> Self {
        DatasetVersion(stable_hash_with(|hasher| {
            use std::hash::Hash;
            location.hash(hasher);
            raw.len().hash(hasher);
            raw.hash(hasher);
        }))
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Knobs for [`Dataset::open`].
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Overall timeout for fetching a remote dataset.
    pub fetch_timeout: Duration,
    /// Column types forced by name instead of inferred.
    pub type_hints: TypeHints,
    /// Columns to decode; `None` decodes every column in the file.
    pub columns: Option<Vec<String>>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            type_hints: TypeHints::new(),
            columns: None,
        }
    }
}

#[derive(Debug)]
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(mmap) => &mmap[..],
            Backing::Owned(bytes) => bytes,
        }
    }
}

/// Hashable borrowed view of one cell, used while grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum KeyRef<'a> {
    Int(i64),
    Float(u64),
    Str(&'a [u8]),
    Null,
}

impl KeyRef<'_> {
    fn to_value(self) -> Value {
        match self {
            KeyRef::Int(v) => Value::Int(v),
            KeyRef::Float(bits) => Value::Float(f64::from_bits(bits)),
            KeyRef::Str(bytes) => Value::Str(String::from_utf8_lossy(bytes).into_owned()),
            KeyRef::Null => Value::Null,
        }
    }
}

#[derive(Debug, Default)]
struct GroupAcc<'a> {
    rows: u64,
    distinct: HashSet<KeyRef<'a>>,
}

/// Read-only columnar table with exact-match filtering, distinct scans and
/// grouped counting executed against the stored columns.
#[derive(Debug)]
pub struct Dataset {
    location: DatasetLocation,
    version: DatasetVersion,
    buffer: Backing, // owns the bytes string columns point into
    columns: Vec<Column>,
    nulls: Vec<NullMask>,
    headers: Vec<String>,
    row_count: usize,
    summary: ParseSummary,
}

impl Dataset {
    /// Opens and decodes the dataset at `location`.
    ///
    /// Local CSV files are memory mapped; parquet files and remote locations
    /// are read fully into memory first.
    ///
    /// # Errors
    /// Returns a [`ProcessorError`] if the file cannot be read or fetched, or
    /// if it cannot be decoded in the format implied by its extension.
    pub fn open(location: DatasetLocation, options: &LoadOptions) -> Result<Self, ProcessorError> {
        let raw = match &location {
            DatasetLocation::Local(path) => {
                let file = File::open(path)?;
                if location.format() == DatasetFormat::Csv && file.metadata()?.len() > 0 {
                    // The file is treated as immutable while the dataset is alive.
                    Backing::Mapped(unsafe { Mmap::map(&file)? })
                } else {
                    let mut bytes = Vec::new();
                    (&file).read_to_end(&mut bytes)?;
                    Backing::Owned(bytes)
                }
            }
            DatasetLocation::Remote(url) => {
                Backing::Owned(fetch_remote(url, options.fetch_timeout)?)
            }
        };
        Self::from_backing(location, raw, options)
    }

    /// Decodes a dataset already held in memory. `location` only labels the
    /// dataset and selects the format by extension.
    pub fn from_bytes(
        location: DatasetLocation,
        bytes: Vec<u8>,
        options: &LoadOptions,
    ) -> Result<Self, ProcessorError> {
        Self::from_backing(location, Backing::Owned(bytes), options)
    }

    fn from_backing(
        location: DatasetLocation,
        raw: Backing,
        options: &LoadOptions,
    ) -> Result<Self, ProcessorError> {
        let started = Instant::now();
        let version = DatasetVersion::fingerprint(&location, raw.as_bytes());

        let projection = options.columns.as_deref();
        let (buffer, table): (Backing, LoadedTable) = match location.format() {
            DatasetFormat::Csv => {
                let table = parse_csv(raw.as_bytes(), &options.type_hints, projection)?;
                (raw, table)
            }
            DatasetFormat::Parquet => {
                let bytes = match raw {
                    Backing::Owned(bytes) => Bytes::from(bytes),
                    Backing::Mapped(mmap) => Bytes::copy_from_slice(&mmap[..]),
                };
                let (arena, table) = parse_parquet(bytes, &options.type_hints, projection)?;
                (Backing::Owned(arena), table)
            }
        };

        let LoadedTable {
            headers,
            columns,
            nulls,
            summary,
        } = table;
        let row_count = summary.rows_processed;

        info!(
            location = %location,
            version = %version,
            rows = row_count,
            columns = headers.len(),
            skipped = summary.errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "dataset opened"
        );

        Ok(Dataset {
            location,
            version,
            buffer,
            columns,
            nulls,
            headers,
            row_count,
            summary,
        })
    }

    pub fn location(&self) -> &DatasetLocation {
        &self.location
    }

    pub fn version(&self) -> DatasetVersion {
        self.version
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn parse_summary(&self) -> &ParseSummary {
        &self.summary
    }

    pub fn column_type(&self, col_name: &str) -> Result<ColumnType, ProcessorError> {
        Ok(self.get_col(col_name)?.column_type())
    }

    pub fn get_col(&self, col_name: &str) -> Result<&Column, ProcessorError> {
        Ok(self.col_with_nulls(col_name)?.0)
    }

    /// Number of null cells in `col_name`.
    pub fn null_count(&self, col_name: &str) -> Result<usize, ProcessorError> {
        Ok(self.col_with_nulls(col_name)?.1.null_count())
    }

    fn col_with_nulls(&self, col_name: &str) -> Result<(&Column, &NullMask), ProcessorError> {
        let missing = || ProcessorError::MissingColumn(col_name.to_string());
        let col_pos = self
            .headers
            .iter()
            .position(|cn| cn == col_name)
            .ok_or_else(missing)?;

        match (self.columns.get(col_pos), self.nulls.get(col_pos)) {
            (Some(col), Some(mask)) => Ok((col, mask)),
            _ => Err(missing()),
        }
    }

    /// Helper to slice the backing buffer for given offsets
    pub fn slice_bytes(&self, start: usize, end: usize) -> Result<&[u8], ProcessorError> {
        let buf = self.buffer.as_bytes();

        if end > buf.len() || start > end {
            return Err(ProcessorError::Parse("Invalid byte range".into()));
        }

        Ok(&buf[start..end])
    }

    fn key_at(
        &self,
        (col, mask): (&Column, &NullMask),
        row: usize,
    ) -> Result<KeyRef<'_>, ProcessorError> {
        if mask.is_null(row) {
            return Ok(KeyRef::Null);
        }
        let key = match col {
            Column::Int64(_) => col.get_i64(row).map(KeyRef::Int),
            Column::Float64(_) => col.get_f64(row).map(|v| KeyRef::Float(v.to_bits())),
            Column::Str(_) => match col.get_str(row) {
                Some((s, e)) => Some(KeyRef::Str(self.slice_bytes(s, e)?)),
                None => None,
            },
        };
        key.ok_or_else(|| ProcessorError::Parse(format!("Row {row} out of range")))
    }

    fn for_each_row(
        &self,
        rows: Option<&[usize]>,
        mut f: impl FnMut(usize) -> Result<(), ProcessorError>,
    ) -> Result<(), ProcessorError> {
        match rows {
            Some(rows) => rows.iter().try_for_each(|&row| f(row)),
            None => (0..self.row_count).try_for_each(f),
        }
    }

    /// Returns the ids of rows whose `column` satisfies `predicate`, ascending.
    /// Null cells never match.
    pub fn filter(
        &self,
        column: &str,
        predicate: &FilterPredicate,
    ) -> Result<Vec<usize>, ProcessorError> {
        let (col, mask) = self.col_with_nulls(column)?;
        let mut rows = self.filter_values(col, column, predicate)?;
        if !mask.is_empty() {
            rows.retain(|&row| !mask.is_null(row));
        }
        Ok(rows)
    }

    fn filter_values(
        &self,
        col: &Column,
        column: &str,
        predicate: &FilterPredicate,
    ) -> Result<Vec<usize>, ProcessorError> {
        let FilterPredicate::Equals(target) = predicate;

        match (col, target) {
            (Column::Int64(chunks), Value::Int(t)) => Ok(chunks
                .iter()
                .flatten()
                .enumerate()
                .filter(|(_, v)| *v == t)
                .map(|(i, _)| i)
                .collect()),

            (Column::Float64(chunks), Value::Float(t)) => Ok(chunks
                .iter()
                .flatten()
                .enumerate()
                .filter(|(_, v)| v.to_bits() == t.to_bits())
                .map(|(i, _)| i)
                .collect()),

            (Column::Str(chunks), Value::Str(t)) => {
                let mut out = Vec::new();
                for (i, &(s, e)) in chunks.iter().flatten().enumerate() {
                    if self.slice_bytes(s, e)? == t.as_bytes() {
                        out.push(i);
                    }
                }
                Ok(out)
            }

            _ => Err(ProcessorError::Parse(format!(
                "Predicate {predicate:?} not supported on {:?} column '{column}'",
                col.column_type()
            ))),
        }
    }

    /// Distinct non-null values of `column` over `rows` (all rows when `None`),
    /// ascending.
    pub fn distinct(
        &self,
        column: &str,
        rows: Option<&[usize]>,
    ) -> Result<Vec<Value>, ProcessorError> {
        let col = self.col_with_nulls(column)?;
        let mut seen: HashSet<KeyRef<'_>> = HashSet::new();
        self.for_each_row(rows, |row| {
            match self.key_at(col, row)? {
                KeyRef::Null => {}
                key => {
                    seen.insert(key);
                }
            }
            Ok(())
        })?;

        let mut values: Vec<Value> = seen.into_iter().map(KeyRef::to_value).collect();
        values.sort();
        Ok(values)
    }

    /// Groups `rows` by the tuple of `group_cols` and counts each group with
    /// `rule`. Null group cells form their own [`Value::Null`] key. Groups are
    /// returned in ascending key order; a group whose count is zero is still
    /// returned.
    pub fn group_count(
        &self,
        group_cols: &[String],
        rule: &CountRule,
        rows: Option<&[usize]>,
    ) -> Result<Vec<GroupCount>, ProcessorError> {
        let cols: Vec<(&Column, &NullMask)> = group_cols
            .iter()
            .map(|name| self.col_with_nulls(name))
            .collect::<Result<_, _>>()?;
        let counted_col = match rule {
            CountRule::Rows => None,
            CountRule::NonNull(name) | CountRule::Distinct(name) => {
                Some(self.col_with_nulls(name)?)
            }
        };
        let distinct = matches!(rule, CountRule::Distinct(_));

        let mut groups: HashMap<Vec<KeyRef<'_>>, GroupAcc<'_>> = HashMap::new();

        self.for_each_row(rows, |row| {
            let key = cols
                .iter()
                .map(|col| self.key_at(*col, row))
                .collect::<Result<Vec<_>, _>>()?;
            let acc = groups.entry(key).or_default();
            match counted_col.map(|col| self.key_at(col, row)).transpose()? {
                None => acc.rows += 1,
                Some(KeyRef::Null) => {}
                Some(value) if distinct => {
                    acc.distinct.insert(value);
                }
                Some(_) => acc.rows += 1,
            }
            Ok(())
        })?;

        let mut out: Vec<GroupCount> = groups
            .into_iter()
            .map(|(key, acc)| GroupCount {
                key: key.into_iter().map(KeyRef::to_value).collect(),
                count: if distinct {
                    acc.distinct.len() as u64
                } else {
                    acc.rows
                },
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));

        debug!(
            group_cols = ?group_cols,
            rule = ?rule,
            groups = out.len(),
            "group count executed"
        );
        Ok(out)
    }

    /// Exports the stored table as an arrow2 chunk. Columns holding nulls are
    /// exported as nullable fields with a validity bitmap.
    pub fn to_arrow(&self) -> Result<(Schema, Chunk<Arc<dyn Array>>), ProcessorError> {
        let fields: Vec<Field> = self
            .headers
            .iter()
            .zip(self.columns.iter().zip(&self.nulls))
            .map(|(h, (col, mask))| {
                let dtype = match col {
                    Column::Int64(_) => DataType::Int64,
                    Column::Float64(_) => DataType::Float64,
                    Column::Str(_) => DataType::Utf8,
                };
                Field::new(h, dtype, !mask.is_empty())
            })
            .collect();

        let schema = Schema::from(fields);

        let pairs: Vec<(&Column, &NullMask)> = self.columns.iter().zip(&self.nulls).collect();
        let arrays: Vec<Arc<dyn Array>> = pairs
            .par_iter()
            .map(|&(col, mask)| -> Result<Arc<dyn Array>, ProcessorError> {
                match col {
                    Column::Int64(chunks) if mask.is_empty() => {
                        let arrow_array =
                            Int64Array::from_vec(chunks.iter().flatten().copied().collect());
                        Ok(Arc::new(arrow_array) as Arc<dyn Array>)
                    }
                    Column::Int64(chunks) => {
                        let values: Vec<Option<i64>> = chunks
                            .iter()
                            .flatten()
                            .enumerate()
                            .map(|(row, v)| (!mask.is_null(row)).then_some(*v))
                            .collect();
                        Ok(Arc::new(Int64Array::from(values)) as Arc<dyn Array>)
                    }
                    Column::Float64(chunks) if mask.is_empty() => {
                        let arrow_array =
                            Float64Array::from_vec(chunks.iter().flatten().copied().collect());
                        Ok(Arc::new(arrow_array) as Arc<dyn Array>)
                    }
                    Column::Float64(chunks) => {
                        let values: Vec<Option<f64>> = chunks
                            .iter()
                            .flatten()
                            .enumerate()
                            .map(|(row, v)| (!mask.is_null(row)).then_some(*v))
                            .collect();
                        Ok(Arc::new(Float64Array::from(values)) as Arc<dyn Array>)
                    }
                    Column::Str(chunks) => {
                        let mut arr = MutableUtf8Array::<i32>::with_capacity(col.total_len());
                        for (row, &(start, end)) in chunks.iter().flatten().enumerate() {
                            if mask.is_null(row) {
                                arr.push::<&str>(None);
                                continue;
                            }
                            let bytes = self.slice_bytes(start, end)?;
                            arr.push(Some(String::from_utf8_lossy(bytes)));
                        }
                        let array: Utf8Array<i32> = arr.into();
                        Ok(Arc::new(array) as Arc<dyn Array>)
                    }
                }
            })
            .collect::<Result<_, _>>()?;

        Ok((schema, Chunk::new(arrays)))
    }
}

fn fetch_remote(url: &str, timeout: Duration) -> Result<Vec<u8>, ProcessorError> {
    let agent: ureq::Agent = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into();

    let body = agent
        .get(url)
        .call()
        .map_err(|e| ProcessorError::Fetch(format!("HTTP request to {url} failed: {e}")))?
        .into_body();

    let mut data = Vec::new();
    body.into_reader().read_to_end(&mut data)?;
    debug!(url, bytes = data.len(), "remote dataset fetched");
    Ok(data)
}
