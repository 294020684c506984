use std::fs::{self, File};
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Error};
use parquet::basic::{LogicalType, Repetition, Type as PhysicalType};
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::writer::SerializedFileWriter;
use parquet::record::{Field, RecordWriter};
use parquet::schema::types::Type;

/// Row cap for the human-readable CSV sample written next to each table
pub const SAMPLE_ROWS: usize = 200;

pub fn utf8_field(name: &str) -> Arc<Type> {
    Arc::new(
        Type::primitive_type_builder(name, PhysicalType::BYTE_ARRAY)
            .with_repetition(Repetition::REQUIRED)
            .with_logical_type(Some(LogicalType::String))
            .build()
            .unwrap(),
    )
}

pub fn double_field(name: &str) -> Arc<Type> {
    Arc::new(
        Type::primitive_type_builder(name, PhysicalType::DOUBLE)
            .with_repetition(Repetition::REQUIRED)
            .build()
            .unwrap(),
    )
}

pub fn optional_double_field(name: &str) -> Arc<Type> {
    Arc::new(
        Type::primitive_type_builder(name, PhysicalType::DOUBLE)
            .with_repetition(Repetition::OPTIONAL)
            .build()
            .unwrap(),
    )
}

/// Write rows to a parquet file as a single row group.
///
/// An empty slice still produces a valid file carrying the schema, so an
/// empty partition stays readable downstream.
pub fn write_parquet<T>(rows: &[T], schema: Type, path: &Path) -> Result<(), Error>
where
    for<'a> &'a [T]: RecordWriter<T>,
{
    let file = File::create(path)
        .map_err(|e| anyhow!("failed to create parquet file {}: {}", path.display(), e))?;
    let props = WriterProperties::builder().build();
    let mut writer = SerializedFileWriter::new(file, Arc::new(schema), Arc::new(props))
        .map_err(|e| anyhow!("failed to create parquet writer: {}", e))?;

    if !rows.is_empty() {
        let mut row_group = writer
            .next_row_group()
            .map_err(|e| anyhow!("failed to create row group: {}", e))?;
        rows.write_to_row_group(&mut row_group)
            .map_err(|e| anyhow!("failed to write rows: {}", e))?;
        row_group
            .close()
            .map_err(|e| anyhow!("failed to close row group: {}", e))?;
    }

    writer
        .close()
        .map_err(|e| anyhow!("failed to close parquet writer: {}", e))?;
    Ok(())
}

/// Column names present in a parquet file's schema
pub fn file_columns(path: &Path) -> Result<Vec<String>, Error> {
    let file = File::open(path)
        .map_err(|e| anyhow!("failed to open parquet file {}: {}", path.display(), e))?;
    let reader = SerializedFileReader::new(file)
        .map_err(|e| anyhow!("failed to read parquet file {}: {}", path.display(), e))?;
    let schema = reader.metadata().file_metadata().schema_descr();
    Ok(schema
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect())
}

/// Write the first [`SAMPLE_ROWS`] rows as a CSV sample for quick inspection
pub fn write_csv_sample<I>(path: &Path, header: &str, lines: I) -> Result<(), Error>
where
    I: IntoIterator<Item = String>,
{
    let mut content = String::new();
    content.push_str(header);
    content.push('\n');
    for line in lines.into_iter().take(SAMPLE_ROWS) {
        content.push_str(&line);
        content.push('\n');
    }
    fs::write(path, content)
        .map_err(|e| anyhow!("failed to write csv sample {}: {}", path.display(), e))
}

pub fn field_str(field: &Field) -> Option<String> {
    match field {
        Field::Str(value) => Some(value.clone()),
        _ => None,
    }
}

pub fn field_f64(field: &Field) -> Option<f64> {
    match field {
        Field::Double(value) => Some(*value),
        Field::Float(value) => Some(f64::from(*value)),
        _ => None,
    }
}

pub fn csv_opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
