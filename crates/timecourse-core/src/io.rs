//! Delimited-file loading and TSV writing for [`TimeSeriesTable`]s.
//!
//! Loading goes through `arrow-csv`: the schema is inferred from the file,
//! every column is cast to `Float64`, and cells that do not parse as numbers
//! (for example `n/a`) become missing values. Channel names are trimmed and
//! `.` is normalised to `-`, so `Left.Amygdala` and `Left-Amygdala` name the
//! same ROI. A leading index column is dropped; the table's timepoint index
//! is always regenerated from row order.
//!
//! Writing produces a tab-delimited file with a header row and no index
//! column. Missing values are written as empty cells.

use std::{
    fs::File,
    io::Seek,
    path::Path,
    sync::Arc,
};

use arrow::{
    array::{ArrayRef, AsArray, Float64Array, RecordBatch},
    compute::cast,
    datatypes::{DataType, Field, Float64Type, Schema},
    error::ArrowError,
};
use arrow_csv::{ReaderBuilder, WriterBuilder, reader::Format};
use snafu::prelude::*;
use tracing::debug;

use crate::table::{Channel, TableError, TimeSeriesTable};

/// Errors from loading or writing table files.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TableIoError {
    /// The input file could not be opened or rewound.
    #[snafu(display("Failed to read table file {path}"))]
    ReadFile {
        /// File being read.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The output file could not be created.
    #[snafu(display("Failed to create output file {path}"))]
    CreateFile {
        /// File being written.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Arrow failed to infer, parse, cast or serialize the table.
    #[snafu(display("Malformed table in {path}: {source}"))]
    Arrow {
        /// File being read or written.
        path: String,
        /// Underlying Arrow error.
        source: ArrowError,
    },

    /// The file holds no data columns once the index column is dropped.
    #[snafu(display(
        "Table file {path} has no data columns. \
         Check that it is non-empty and uses the expected delimiter."
    ))]
    NoColumns {
        /// File being read.
        path: String,
    },

    /// The loaded columns do not form a valid table (for example, two
    /// headers that collide after `.` → `-` normalisation).
    #[snafu(display("Invalid table in {path}: {source}"))]
    InvalidTable {
        /// File being read.
        path: String,
        /// Underlying table validation error.
        source: TableError,
    },
}

/// Options controlling how a delimited file is read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Field delimiter (`b','` for CSV).
    pub delimiter: u8,
    /// Header names recognised as an index column when they head the
    /// first column. Empty headers and pandas-style `Unnamed: 0` are always
    /// treated as an index.
    pub index_columns: Vec<String>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            index_columns: vec!["timepoint".to_string(), "index".to_string()],
        }
    }
}

impl LoadOptions {
    fn is_index_header(&self, name: &str) -> bool {
        let name = name.trim();
        name.is_empty()
            || name.starts_with("Unnamed:")
            || self.index_columns.iter().any(|c| c == name)
    }
}

/// Normalise a raw header into a channel name.
pub fn normalize_channel_name(raw: &str) -> String {
    raw.trim().replace('.', "-")
}

fn column_values(column: &ArrayRef) -> Result<Vec<Option<f64>>, ArrowError> {
    let as_f64 = cast(column, &DataType::Float64)?;
    Ok(as_f64.as_primitive::<Float64Type>().iter().collect())
}

/// Load a delimited file into a [`TimeSeriesTable`].
pub fn load_table(path: &Path, opts: &LoadOptions) -> Result<TimeSeriesTable, TableIoError> {
    let path_str = path.display().to_string();
    let mut file = File::open(path).context(ReadFileSnafu { path: &path_str })?;

    let format = Format::default()
        .with_header(true)
        .with_delimiter(opts.delimiter);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .context(ArrowSnafu { path: &path_str })?;
    file.rewind().context(ReadFileSnafu { path: &path_str })?;

    let skip_first = schema
        .fields()
        .first()
        .is_some_and(|f| opts.is_index_header(f.name()));
    let data_cols: Vec<usize> = (usize::from(skip_first)..schema.fields().len()).collect();
    ensure!(!data_cols.is_empty(), NoColumnsSnafu { path: &path_str });

    let names: Vec<String> = data_cols
        .iter()
        .map(|&i| normalize_channel_name(schema.field(i).name()))
        .collect();
    debug!(
        path = %path_str,
        columns = names.len(),
        dropped_index = skip_first,
        "inferred table schema"
    );

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)
        .context(ArrowSnafu { path: &path_str })?;

    let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); data_cols.len()];
    for batch in reader {
        let batch = batch.context(ArrowSnafu { path: &path_str })?;
        for (slot, &col) in values.iter_mut().zip(&data_cols) {
            let chunk =
                column_values(batch.column(col)).context(ArrowSnafu { path: &path_str })?;
            slot.extend(chunk);
        }
    }

    let channels = names
        .into_iter()
        .zip(values)
        .map(|(name, v)| Channel::new(name, v))
        .collect();

    TimeSeriesTable::new(channels).context(InvalidTableSnafu { path: &path_str })
}

/// Write `table` as a tab-delimited file with a header row and no index
/// column.
pub fn write_table(table: &TimeSeriesTable, path: &Path) -> Result<(), TableIoError> {
    let path_str = path.display().to_string();

    let fields: Vec<Field> = table
        .channels()
        .iter()
        .map(|c| Field::new(c.name(), DataType::Float64, true))
        .collect();
    let columns: Vec<ArrayRef> = table
        .channels()
        .iter()
        .map(|c| Arc::new(Float64Array::from(c.values().to_vec())) as ArrayRef)
        .collect();

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
        .context(ArrowSnafu { path: &path_str })?;

    let file = File::create(path).context(CreateFileSnafu { path: &path_str })?;
    let mut writer = WriterBuilder::new()
        .with_header(true)
        .with_delimiter(b'\t')
        .build(file);
    writer
        .write(&batch)
        .context(ArrowSnafu { path: &path_str })?;

    debug!(path = %path_str, rows = batch.num_rows(), "wrote table");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn normalizes_names_and_drops_pandas_index() {
        let tmp = TempDir::new().unwrap();
        let path = write(
            &tmp,
            "in.csv",
            ",Left.Amygdala,Right.Amygdala\n0,1.5,2\n1,2.5,4\n",
        );

        let t = load_table(&path, &LoadOptions::default()).unwrap();
        assert_eq!(
            t.channel_names().collect::<Vec<_>>(),
            vec!["Left-Amygdala", "Right-Amygdala"]
        );
        assert_eq!(t.n_timepoints(), 2);
        assert_eq!(
            t.channel("Right-Amygdala").unwrap().values(),
            &[Some(2.0), Some(4.0)]
        );
    }

    #[test]
    fn drops_named_index_columns() {
        let tmp = TempDir::new().unwrap();
        for header in ["timepoint", "index", "Unnamed: 0"] {
            let path = write(&tmp, "in.csv", &format!("{header},a,b\n0,1,2\n1,3,4\n"));
            let t = load_table(&path, &LoadOptions::default()).unwrap();
            assert_eq!(t.channel_names().collect::<Vec<_>>(), vec!["a", "b"], "{header}");
        }
    }

    #[test]
    fn custom_index_columns_replace_defaults() {
        let tmp = TempDir::new().unwrap();
        let opts = LoadOptions {
            index_columns: vec!["volume".to_string()],
            ..LoadOptions::default()
        };

        let path = write(&tmp, "volume.csv", "volume,a\n0,1\n1,2\n");
        let t = load_table(&path, &opts).unwrap();
        assert_eq!(t.channel_names().collect::<Vec<_>>(), vec!["a"]);

        let path = write(&tmp, "timepoint.csv", "timepoint,a\n0,1\n1,2\n");
        let t = load_table(&path, &opts).unwrap();
        assert_eq!(t.channel_names().collect::<Vec<_>>(), vec!["timepoint", "a"]);
    }

    #[test]
    fn keeps_first_column_when_not_an_index() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "in.csv", "a,b\n1,2\n3,4\n");
        let t = load_table(&path, &LoadOptions::default()).unwrap();
        assert_eq!(t.n_channels(), 2);
    }

    #[test]
    fn unparseable_cells_become_missing() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "in.csv", "a,b\n1,n/a\n,2\n3,4\n");
        let t = load_table(&path, &LoadOptions::default()).unwrap();
        assert_eq!(t.channel("a").unwrap().values(), &[Some(1.0), None, Some(3.0)]);
        assert_eq!(t.channel("b").unwrap().values(), &[None, Some(2.0), Some(4.0)]);
    }

    #[test]
    fn colliding_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "in.csv", "a.b,a-b\n1,2\n");
        let err = load_table(&path, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, TableIoError::InvalidTable { .. }));
    }

    #[test]
    fn empty_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = write(&tmp, "in.csv", "");
        assert!(load_table(&path, &LoadOptions::default()).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_table(Path::new("/nonexistent/in.csv"), &LoadOptions::default())
            .unwrap_err();
        assert!(matches!(err, TableIoError::ReadFile { .. }));
    }

    #[test]
    fn writes_tsv_without_index() {
        let tmp = TempDir::new().unwrap();
        let table = TimeSeriesTable::new(vec![
            Channel::from_values("a", &[1.0, 1.5]),
            Channel::new("b", vec![Some(2.0), None]),
        ])
        .unwrap();

        let out = tmp.path().join("out.tsv");
        write_table(&table, &out).unwrap();

        let text = std::fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "a\tb");
        assert_eq!(lines.len(), 3);
        assert!(lines[2].ends_with('\t'));
        assert!(!text.contains('"'));

        let back = load_table(
            &out,
            &LoadOptions {
                delimiter: b'\t',
                ..LoadOptions::default()
            },
        )
        .unwrap();
        assert_eq!(back, table);
    }
}
