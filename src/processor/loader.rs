//! Decoders that turn raw dataset bytes into chunked columns.
//!
//! CSV input is split into newline-aligned chunks parsed in parallel; string
//! fields are stored as byte offsets into the caller's buffer. Parquet input is
//! decoded row by row and its string fields are copied into an arena whose
//! offsets the columns point at.
//!
//! Both decoders can be restricted to a set of column names; other columns are
//! never parsed. Empty CSV fields and parquet nulls become null cells.

use bytes::Bytes;
use memchr::memchr_iter;
use parquet::basic::{ConvertedType, LogicalType, Type as PhysicalType};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use parquet::schema::types::{Type, TypePtr};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::processor::{
    ColumnType, ParseError, ParseSummary, ProcessorError,
    column::{Column, NullMask},
};

/// Column types forced by name; unnamed columns are inferred.
pub type TypeHints = HashMap<String, ColumnType>;

// Lines scanned for a non-empty value when inferring a CSV column type.
const INFERENCE_LINES: usize = 1000;

#[derive(Debug)]
pub struct LoadedTable {
    pub headers: Vec<String>,
    pub columns: Vec<Column>,
    pub nulls: Vec<NullMask>,
    pub summary: ParseSummary,
}

impl LoadedTable {
    pub fn row_count(&self) -> usize {
        self.summary.rows_processed
    }
}

#[derive(Debug, Clone, Copy)]
enum Cell {
    Int(i64),
    Float(f64),
    Str(usize, usize),
    Null,
}

/// Per-column value buffers for one parse batch. Only the vector matching the
/// column's type is ever filled.
#[derive(Debug)]
struct ColumnBuffers {
    schema: Vec<ColumnType>,
    ints: Vec<Vec<i64>>,
    floats: Vec<Vec<f64>>,
    strs: Vec<Vec<(usize, usize)>>,
    nulls: Vec<Vec<usize>>,
    rows: usize,
}

impl ColumnBuffers {
    fn with_capacity(schema: &[ColumnType], estimated_rows: usize) -> Self {
        let sized = |wanted: ColumnType, actual: ColumnType| {
            if wanted == actual { estimated_rows } else { 0 }
        };
        ColumnBuffers {
            schema: schema.to_vec(),
            ints: schema
                .iter()
                .map(|t| Vec::with_capacity(sized(ColumnType::Int64, *t)))
                .collect(),
            floats: schema
                .iter()
                .map(|t| Vec::with_capacity(sized(ColumnType::Float64, *t)))
                .collect(),
            strs: schema
                .iter()
                .map(|t| Vec::with_capacity(sized(ColumnType::Str, *t)))
                .collect(),
            nulls: vec![Vec::new(); schema.len()],
            rows: 0,
        }
    }

    fn commit(&mut self, cells: &[Cell]) {
        for (col_idx, cell) in cells.iter().enumerate() {
            match *cell {
                Cell::Int(v) => self.ints[col_idx].push(v),
                Cell::Float(v) => self.floats[col_idx].push(v),
                Cell::Str(s, e) => self.strs[col_idx].push((s, e)),
                Cell::Null => {
                    self.nulls[col_idx].push(self.rows);
                    match self.schema[col_idx] {
                        ColumnType::Int64 => self.ints[col_idx].push(0),
                        ColumnType::Float64 => self.floats[col_idx].push(0.0),
                        ColumnType::Str => self.strs[col_idx].push((0, 0)),
                    }
                }
            }
        }
        self.rows += 1;
    }

    /// Moves the batch into `columns`; `row_offset` is the number of rows
    /// already drained from earlier batches.
    fn drain_into(&mut self, columns: &mut [Column], nulls: &mut [NullMask], row_offset: usize) {
        for (col_idx, column) in columns.iter_mut().enumerate() {
            match column {
                Column::Int64(chunks) => chunks.push(std::mem::take(&mut self.ints[col_idx])),
                Column::Float64(chunks) => chunks.push(std::mem::take(&mut self.floats[col_idx])),
                Column::Str(chunks) => chunks.push(std::mem::take(&mut self.strs[col_idx])),
            }
            nulls[col_idx].extend_shifted(&self.nulls[col_idx], row_offset);
            self.nulls[col_idx].clear();
        }
    }
}

#[derive(Debug)]
struct BatchResult {
    buffers: ColumnBuffers,
    errors: Vec<ParseError>,
}

fn empty_columns(schema: &[ColumnType]) -> (Vec<Column>, Vec<NullMask>) {
    (
        schema.iter().map(|t| Column::new(*t)).collect(),
        vec![NullMask::default(); schema.len()],
    )
}

fn is_selected(columns: Option<&[String]>, name: &str) -> bool {
    columns.is_none_or(|cols| cols.iter().any(|c| c == name))
}

fn log_rejected(errors: &[ParseError]) {
    for err in errors {
        warn!(
            position = err.position,
            column = %err.column,
            value = %err.value,
            error = err.error.as_deref().unwrap_or(""),
            "skipping malformed row"
        );
    }
}

/// Field layout of a CSV file: which fields are kept and where they go.
struct CsvLayout {
    field_count: usize,
    // Output column of each field, `None` for fields that are not decoded
    slots: Vec<Option<usize>>,
    schema: Vec<ColumnType>,
    headers: Vec<String>,
}

/// Parses a CSV buffer with a header line, keeping only `columns` when given.
///
/// String columns are stored as absolute offsets into `buf`, so the caller must
/// keep `buf` alive for as long as the returned columns are used.
pub fn parse_csv(
    buf: &[u8],
    hints: &TypeHints,
    columns: Option<&[String]>,
) -> Result<LoadedTable, ProcessorError> {
    if buf.is_empty() {
        return Err(ProcessorError::Parse("Missing header line".into()));
    }

    let header_end = buf.iter().position(|&b| b == b'\n').unwrap_or(buf.len());
    let all_headers: Vec<String> = strip_cr(&buf[..header_end])
        .split(|&b| b == b',')
        .map(|s| String::from_utf8_lossy(s).trim().to_string())
        .collect();

    let data_start = (header_end + 1).min(buf.len());
    let data = &buf[data_start..];

    let mut headers = Vec::new();
    let slots: Vec<Option<usize>> = all_headers
        .iter()
        .map(|h| {
            is_selected(columns, h).then(|| {
                headers.push(h.clone());
                headers.len() - 1
            })
        })
        .collect();
    let schema = infer_schema(data, all_headers.len(), &slots, &headers, hints);
    let layout = CsvLayout {
        field_count: all_headers.len(),
        slots,
        schema,
        headers,
    };

    let num_threads = rayon::current_num_threads().max(1);
    let chunks = find_chunk_boundaries(data, num_threads);

    // Estimate rows per chunk for preallocation
    let estimated_rows_per_chunk = {
        let avg_line_len = data
            .split(|&b| b == b'\n')
            .find(|line| !line.is_empty())
            .map_or(1, |l| l.len() + 1);
        (data.len() / num_threads / avg_line_len) + 1000
    };

    let batch_results: Vec<BatchResult> = chunks
        .par_iter()
        .map(|(start, end)| {
            parse_chunk(
                &data[*start..*end],
                &layout,
                estimated_rows_per_chunk,
                data_start + start, // Absolute offset in buffer
            )
        })
        .collect();

    let (mut columns, mut nulls) = empty_columns(&layout.schema);
    let mut total_rows = 0;
    let mut all_errors = Vec::new();

    for mut batch in batch_results {
        all_errors.append(&mut batch.errors);
        batch.buffers.drain_into(&mut columns, &mut nulls, total_rows);
        total_rows += batch.buffers.rows;
    }

    for column in &mut columns {
        column.flatten_in_place();
    }
    log_rejected(&all_errors);

    Ok(LoadedTable {
        headers: layout.headers,
        columns,
        nulls,
        summary: ParseSummary {
            rows_processed: total_rows,
            errors: all_errors,
        },
    })
}

fn strip_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn infer_field_type(field: &[u8]) -> ColumnType {
    if atoi_simd::parse::<i64>(field).is_ok() {
        ColumnType::Int64
    } else if fast_float::parse::<f64, _>(field).is_ok() {
        ColumnType::Float64
    } else {
        ColumnType::Str
    }
}

/// Types of the kept columns: hints first, then the first non-empty value
/// among well-formed lines. Columns with no such value are strings.
fn infer_schema(
    data: &[u8],
    field_count: usize,
    slots: &[Option<usize>],
    headers: &[String],
    hints: &TypeHints,
) -> Vec<ColumnType> {
    let mut inferred: Vec<Option<ColumnType>> =
        headers.iter().map(|h| hints.get(h).copied()).collect();

    let lines = data
        .split(|&b| b == b'\n')
        .map(strip_cr)
        .filter(|line| !line.is_empty())
        .take(INFERENCE_LINES);

    for line in lines {
        if inferred.iter().all(Option::is_some) {
            break;
        }
        let fields: Vec<&[u8]> = line.split(|&b| b == b',').collect();
        if fields.len() != field_count {
            continue;
        }
        for (field, slot) in fields.iter().zip(slots) {
            if let Some(col) = *slot {
                if inferred[col].is_none() && !field.is_empty() {
                    inferred[col] = Some(infer_field_type(field));
                }
            }
        }
    }

    inferred
        .into_iter()
        .map(|t| t.unwrap_or(ColumnType::Str))
        .collect()
}

fn find_chunk_boundaries(data: &[u8], num_chunks: usize) -> Vec<(usize, usize)> {
    if data.is_empty() {
        return vec![];
    }

    let chunk_size = data.len() / num_chunks;
    let mut boundaries = Vec::with_capacity(num_chunks);
    let mut start = 0;

    for i in 0..num_chunks - 1 {
        let mut end = ((i + 1) * chunk_size).max(start);

        // Find next newline
        while end < data.len() && data[end] != b'\n' {
            end += 1;
        }

        if end < data.len() {
            end += 1; // Include the newline
        }

        if start < end {
            boundaries.push((start, end));
        }
        start = end;
    }

    // Last chunk gets everything remaining
    if start < data.len() {
        boundaries.push((start, data.len()));
    }

    boundaries
}

fn parse_chunk(
    chunk: &[u8],
    layout: &CsvLayout,
    estimated_rows: usize,
    chunk_offset: usize, // Absolute offset of this chunk in the buffer
) -> BatchResult {
    let mut buffers = ColumnBuffers::with_capacity(&layout.schema, estimated_rows);
    let mut errors = Vec::new();
    let mut fields: Vec<(usize, usize)> = Vec::with_capacity(layout.field_count);
    let mut cells: Vec<Cell> = Vec::with_capacity(layout.schema.len());

    // The final line may lack its newline
    let tail = (!chunk.is_empty() && !chunk.ends_with(b"\n")).then_some(chunk.len());

    let mut start = 0;
    for line_end in memchr_iter(b'\n', chunk).chain(tail) {
        let line_start = start;
        let line = strip_cr(&chunk[line_start..line_end]);
        start = line_end + 1;

        if line.is_empty() {
            continue;
        }

        let absolute_line_offset = chunk_offset + line_start;

        // Split line into (start, end) ranges relative to the line
        fields.clear();
        let mut field_start = 0;
        for comma_pos in memchr_iter(b',', line) {
            fields.push((field_start, comma_pos));
            field_start = comma_pos + 1;
        }
        fields.push((field_start, line.len()));

        if fields.len() != layout.field_count {
            errors.push(ParseError {
                position: absolute_line_offset,
                column: String::new(),
                value: format!("Expected {} fields, got {}", layout.field_count, fields.len()),
                error: None,
            });
            continue;
        }

        cells.clear();
        let mut rejected = None;
        for (&(fs, fe), slot) in fields.iter().zip(&layout.slots) {
            let Some(col) = *slot else {
                continue;
            };
            let raw = &line[fs..fe];
            let cell = if raw.is_empty() {
                Ok(Cell::Null)
            } else {
                match layout.schema[col] {
                    ColumnType::Int64 => atoi_simd::parse::<i64>(raw)
                        .map(Cell::Int)
                        .map_err(|e| e.to_string()),
                    ColumnType::Float64 => fast_float::parse::<f64, _>(raw)
                        .map(Cell::Float)
                        .map_err(|e| e.to_string()),
                    ColumnType::Str => Ok(Cell::Str(
                        absolute_line_offset + fs,
                        absolute_line_offset + fe,
                    )),
                }
            };
            match cell {
                Ok(cell) => cells.push(cell),
                Err(e) => {
                    rejected = Some(ParseError {
                        position: absolute_line_offset,
                        column: layout.headers[col].clone(),
                        value: String::from_utf8_lossy(raw).to_string(),
                        error: Some(e),
                    });
                    break;
                }
            }
        }

        match rejected {
            Some(err) => errors.push(err),
            None => buffers.commit(&cells),
        }
    }

    BatchResult { buffers, errors }
}

/// Decodes a parquet file held in memory, reading only `columns` when given.
///
/// Column types come from the file schema unless hinted. Returns the string
/// arena together with the table; string columns hold offsets into that arena.
pub fn parse_parquet(
    bytes: Bytes,
    hints: &TypeHints,
    columns: Option<&[String]>,
) -> Result<(Vec<u8>, LoadedTable), ProcessorError> {
    let reader = SerializedFileReader::new(bytes)?;
    let root = reader.metadata().file_metadata().schema();
    let fields: Vec<TypePtr> = root
        .get_fields()
        .iter()
        .filter(|f| is_selected(columns, f.name()))
        .cloned()
        .collect();
    let headers: Vec<String> = fields.iter().map(|f| f.name().to_string()).collect();
    let schema: Vec<ColumnType> = fields
        .iter()
        .map(|f| {
            hints
                .get(f.name())
                .copied()
                .unwrap_or_else(|| parquet_column_type(f))
        })
        .collect();
    let num_cols = headers.len();
    let total_rows = usize::try_from(reader.metadata().file_metadata().num_rows()).unwrap_or(0);

    let mut arena: Vec<u8> = Vec::new();
    let mut buffers = ColumnBuffers::with_capacity(&schema, total_rows);
    let mut cells: Vec<Cell> = Vec::with_capacity(num_cols);
    let mut errors = Vec::new();

    if num_cols > 0 {
        let projection = match columns {
            Some(_) => Some(
                Type::group_type_builder(root.name())
                    .with_fields(fields.clone())
                    .build()?,
            ),
            None => None,
        };

        for (ordinal, row) in reader.get_row_iter(projection)?.enumerate() {
            let row = row?;

            cells.clear();
            let mut rejected = None;
            for (col_idx, (_, field)) in row.get_column_iter().enumerate().take(num_cols) {
                match cell_from_field(field, schema[col_idx], &mut arena) {
                    Some(cell) => cells.push(cell),
                    None => {
                        rejected = Some(ParseError {
                            position: ordinal,
                            column: headers[col_idx].clone(),
                            value: field.to_string(),
                            error: Some(format!("cannot read as {:?}", schema[col_idx])),
                        });
                        break;
                    }
                }
            }

            match rejected {
                Some(err) => errors.push(err),
                None if cells.len() == num_cols => buffers.commit(&cells),
                None => errors.push(ParseError {
                    position: ordinal,
                    column: String::new(),
                    value: format!("Expected {} fields, got {}", num_cols, cells.len()),
                    error: None,
                }),
            }
        }
    }

    let row_count = buffers.rows;
    let (mut table_columns, mut nulls) = empty_columns(&schema);
    buffers.drain_into(&mut table_columns, &mut nulls, 0);
    for column in &mut table_columns {
        column.flatten_in_place();
    }
    log_rejected(&errors);
    debug!(
        columns = ?headers,
        rows = row_count,
        arena_bytes = arena.len(),
        "parquet decoded"
    );

    Ok((
        arena,
        LoadedTable {
            headers,
            columns: table_columns,
            nulls,
            summary: ParseSummary {
                rows_processed: row_count,
                errors,
            },
        },
    ))
}

/// Storage type for a parquet column. Integer physical types without a
/// non-integer logical annotation (dates, decimals, times) map to `Int64`.
fn parquet_column_type(field: &Type) -> ColumnType {
    if !field.is_primitive() {
        return ColumnType::Str;
    }
    let info = field.get_basic_info();
    let plain_integer = matches!(info.logical_type(), None | Some(LogicalType::Integer { .. }))
        && matches!(
            info.converted_type(),
            ConvertedType::NONE
                | ConvertedType::INT_8
                | ConvertedType::INT_16
                | ConvertedType::INT_32
                | ConvertedType::INT_64
                | ConvertedType::UINT_8
                | ConvertedType::UINT_16
                | ConvertedType::UINT_32
                | ConvertedType::UINT_64
        );
    match field.get_physical_type() {
        PhysicalType::INT32 | PhysicalType::INT64 if plain_integer => ColumnType::Int64,
        PhysicalType::FLOAT | PhysicalType::DOUBLE => ColumnType::Float64,
        _ => ColumnType::Str,
    }
}

fn field_to_i64(field: &Field) -> Option<i64> {
    match field {
        Field::Byte(v) => Some(i64::from(*v)),
        Field::Short(v) => Some(i64::from(*v)),
        Field::Int(v) => Some(i64::from(*v)),
        Field::Long(v) => Some(*v),
        Field::UByte(v) => Some(i64::from(*v)),
        Field::UShort(v) => Some(i64::from(*v)),
        Field::UInt(v) => Some(i64::from(*v)),
        Field::ULong(v) => i64::try_from(*v).ok(),
        // Integer columns written through a float dtype
        Field::Double(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
        Field::Str(s) => atoi_simd::parse::<i64>(s.trim().as_bytes()).ok(),
        _ => None,
    }
}

/// Converts one parquet field; `None` when a non-null value cannot be stored
/// as `column_type`.
fn cell_from_field(field: &Field, column_type: ColumnType, arena: &mut Vec<u8>) -> Option<Cell> {
    if matches!(field, Field::Null) {
        return Some(Cell::Null);
    }
    match column_type {
        ColumnType::Int64 => field_to_i64(field).map(Cell::Int),
        ColumnType::Float64 => match field {
            Field::Float(v) => Some(Cell::Float(f64::from(*v))),
            Field::Double(v) => Some(Cell::Float(*v)),
            Field::Str(s) => fast_float::parse::<f64, _>(s.trim()).ok().map(Cell::Float),
            other => field_to_i64(other).map(|v| Cell::Float(v as f64)),
        },
        ColumnType::Str => {
            let start = arena.len();
            match field {
                Field::Str(s) => arena.extend_from_slice(s.as_bytes()),
                other => arena.extend_from_slice(other.to_string().as_bytes()),
            }
            Some(Cell::Str(start, arena.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(pairs: &[(&str, ColumnType)]) -> TypeHints {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn str_at<'a>(buf: &'a [u8], column: &Column, row: usize) -> &'a str {
        let (s, e) = column.get_str(row).unwrap();
        std::str::from_utf8(&buf[s..e]).unwrap()
    }

    #[test]
    fn test_infers_types_from_first_row() {
        let csv = b"id,score,name\n1,2.5,alpha\n2,3.5,beta\n";
        let table = parse_csv(csv, &TypeHints::new(), None).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.columns[0].column_type(), ColumnType::Int64);
        assert_eq!(table.columns[1].column_type(), ColumnType::Float64);
        assert_eq!(table.columns[2].column_type(), ColumnType::Str);
        assert_eq!(str_at(csv, &table.columns[2], 1), "beta");
    }

    #[test]
    fn test_hints_override_inference() {
        let csv = b"district,year\n101,2020\nNorth,2021\n";
        let table = parse_csv(csv, &hints(&[("district", ColumnType::Str)]), None).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(str_at(csv, &table.columns[0], 1), "North");
        assert_eq!(table.columns[1].get_i64(1), Some(2021));
    }

    #[test]
    fn test_crlf_and_missing_trailing_newline() {
        let csv = b"id,name\r\n1,a\r\n2,b";
        let table = parse_csv(csv, &TypeHints::new(), None).unwrap();
        assert_eq!(table.headers, vec!["id", "name"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(str_at(csv, &table.columns[1], 0), "a");
        assert_eq!(str_at(csv, &table.columns[1], 1), "b");
    }

    #[test]
    fn test_malformed_rows_are_skipped_without_misaligning_columns() {
        let csv = b"id,year,name\n1,2020,a\n2,oops,b\n3,2021\n4,2022,d\n";
        let table = parse_csv(csv, &TypeHints::new(), None).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.summary.errors.len(), 2);
        assert_eq!(table.columns[0].get_i64(1), Some(4));
        assert_eq!(table.columns[1].get_i64(1), Some(2022));
        assert_eq!(str_at(csv, &table.columns[2], 1), "d");
        assert!(table.summary.errors.iter().any(|e| e.column == "year"));
    }

    #[test]
    fn test_header_only_uses_hints() {
        let csv = b"hh_id,date_year\n";
        let table = parse_csv(csv, &hints(&[("date_year", ColumnType::Int64)]), None).unwrap();
        assert_eq!(table.row_count(), 0);
        assert_eq!(table.columns[0].column_type(), ColumnType::Str);
        assert_eq!(table.columns[1].column_type(), ColumnType::Int64);
    }

    #[test]
    fn test_empty_buffer_is_an_error() {
        assert!(matches!(
            parse_csv(b"", &TypeHints::new(), None),
            Err(ProcessorError::Parse(_))
        ));
    }

    #[test]
    fn test_chunk_boundaries_cover_all_lines() {
        let data = b"a\nbb\nccc\ndddd\n";
        let bounds = find_chunk_boundaries(data, 3);
        assert_eq!(bounds.first().map(|b| b.0), Some(0));
        assert_eq!(bounds.last().map(|b| b.1), Some(data.len()));
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
            assert_eq!(data[pair[0].1 - 1], b'\n');
        }
    }

    #[test]
    fn test_field_conversions() {
        assert_eq!(field_to_i64(&Field::Int(2020)), Some(2020));
        assert_eq!(field_to_i64(&Field::Double(3.0)), Some(3));
        assert_eq!(field_to_i64(&Field::Double(3.5)), None);
        assert_eq!(field_to_i64(&Field::Str("12".into())), Some(12));

        let mut arena = Vec::new();
        let cell = cell_from_field(&Field::Str("Bihar".into()), ColumnType::Str, &mut arena);
        assert!(matches!(cell, Some(Cell::Str(0, 5))));
        assert_eq!(&arena[..], b"Bihar");
        assert!(matches!(
            cell_from_field(&Field::Null, ColumnType::Str, &mut arena),
            Some(Cell::Null)
        ));
        assert!(matches!(
            cell_from_field(&Field::Null, ColumnType::Int64, &mut arena),
            Some(Cell::Null)
        ));
        assert!(cell_from_field(&Field::Str("n/a".into()), ColumnType::Int64, &mut arena).is_none());
    }

    #[test]
    fn test_malformed_first_row_does_not_fail_load() {
        let csv = b"id,year,name\n1,2020\n2,2021,b\n3,2022,c\n";
        let table = parse_csv(csv, &TypeHints::new(), None).unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.summary.errors.len(), 1);
        assert_eq!(table.columns[1].column_type(), ColumnType::Int64);
        assert_eq!(table.columns[1].get_i64(0), Some(2021));
        assert_eq!(str_at(csv, &table.columns[2], 1), "c");
    }

    #[test]
    fn test_empty_fields_are_null() {
        let csv = b"id,year,name\n1,,a\n,2021,\n3,2022,c\n";
        let table = parse_csv(csv, &TypeHints::new(), None).unwrap();
        assert_eq!(table.row_count(), 3);
        assert!(table.summary.errors.is_empty());
        // Type comes from the first non-empty value
        assert_eq!(table.columns[1].column_type(), ColumnType::Int64);
        assert!(table.nulls[1].is_null(0));
        assert!(table.nulls[0].is_null(1));
        assert!(table.nulls[2].is_null(1));
        assert!(!table.nulls[2].is_null(2));
        assert_eq!(table.columns[1].get_i64(2), Some(2022));
    }

    #[test]
    fn test_unselected_columns_are_not_parsed() {
        // `weight` is garbage on the second row but is never decoded
        let csv = b"id,weight,name\n1,0.5,a\n2,heavy,b\n";
        let keep = vec!["id".to_string(), "name".to_string()];
        let table = parse_csv(csv, &TypeHints::new(), Some(&keep)).unwrap();
        assert_eq!(table.headers, vec!["id", "name"]);
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.row_count(), 2);
        assert_eq!(str_at(csv, &table.columns[1], 1), "b");
    }

    fn optional_parquet(rows: &[(i64, Option<&str>, Option<&str>)]) -> Bytes {
        use parquet::data_type::{ByteArray, ByteArrayType, Int64Type};
        use parquet::file::properties::WriterProperties;
        use parquet::file::writer::SerializedFileWriter;
        use parquet::schema::parser::parse_message_type;
        use std::sync::Arc;

        let schema = Arc::new(
            parse_message_type(
                "message panel {
                    REQUIRED INT64 hh_id;
                    OPTIONAL BINARY caste (UTF8);
                    OPTIONAL BINARY income_band (UTF8);
                }",
            )
            .unwrap(),
        );
        let mut out = Vec::new();
        let mut writer = SerializedFileWriter::new(
            &mut out,
            schema,
            Arc::new(WriterProperties::builder().build()),
        )
        .unwrap();
        let mut row_group = writer.next_row_group().unwrap();

        let mut col = row_group.next_column().unwrap().unwrap();
        let ids: Vec<i64> = rows.iter().map(|r| r.0).collect();
        col.typed::<Int64Type>().write_batch(&ids, None, None).unwrap();
        col.close().unwrap();

        let castes: Vec<Option<&str>> = rows.iter().map(|r| r.1).collect();
        let bands: Vec<Option<&str>> = rows.iter().map(|r| r.2).collect();
        for cells in [castes, bands] {
            let mut col = row_group.next_column().unwrap().unwrap();
            let levels: Vec<i16> = cells.iter().map(|c| i16::from(c.is_some())).collect();
            let values: Vec<ByteArray> = cells.iter().flatten().map(|v| ByteArray::from(*v)).collect();
            col.typed::<ByteArrayType>()
                .write_batch(&values, Some(&levels), None)
                .unwrap();
            col.close().unwrap();
        }
        row_group.close().unwrap();
        writer.close().unwrap();
        Bytes::from(out)
    }

    #[test]
    fn test_parquet_null_cells_keep_the_row() {
        let bytes = optional_parquet(&[
            (1, Some("C1"), Some("low")),
            (2, Some("C1"), Some("mid")),
            (3, Some("C2"), None),
            (4, None, Some("low")),
        ]);
        let (_, table) = parse_parquet(bytes, &TypeHints::new(), None).unwrap();
        assert_eq!(table.row_count(), 4);
        assert!(table.summary.errors.is_empty());
        assert_eq!(table.columns[0].column_type(), ColumnType::Int64);
        assert!(table.nulls[2].is_null(2));
        assert!(table.nulls[1].is_null(3));
        assert_eq!(table.nulls[0].null_count(), 0);
    }

    #[test]
    fn test_parquet_projection_skips_other_columns() {
        let bytes = optional_parquet(&[(1, Some("C1"), Some("low")), (2, Some("C2"), None)]);
        let keep = vec!["caste".to_string(), "hh_id".to_string()];
        let (arena, table) = parse_parquet(bytes, &TypeHints::new(), Some(&keep)).unwrap();
        assert_eq!(table.headers, vec!["hh_id", "caste"]);
        assert_eq!(table.row_count(), 2);
        assert_eq!(&arena[..], b"C1C2");
        assert_eq!(table.columns[0].get_i64(1), Some(2));
    }
}
