use super::{DataSink, FeatureRecord};
use anyhow::{Context, Result};
use arrow_array::{ArrayRef, BinaryArray, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use geo_types::Geometry;
use geozero::{CoordDimensions, ToWkb};
use parquet::arrow::ArrowWriter;
use parquet::file::metadata::KeyValue;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const BATCH_SIZE: usize = 10_000;

/// GeoParquet 1.0 output: WKB `geometry` plus `id` and `type` columns.
pub struct GeoParquetSink {
    writer: Option<ArrowWriter<File>>,
    schema: Arc<Schema>,
    geometry_buf: Vec<Vec<u8>>,
    id_buf: Vec<i64>,
    type_buf: Vec<String>,
}

impl GeoParquetSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create geoparquet file {:?}", path.as_ref()))?;

        let schema = Arc::new(Schema::new(vec![
            Field::new("geometry", DataType::Binary, false),
            Field::new("id", DataType::Int64, false),
            Field::new("type", DataType::Utf8, false),
        ]));

        let geo_metadata = serde_json::json!({
            "version": "1.0.0",
            "primary_column": "geometry",
            "columns": {
                "geometry": {
                    "encoding": "WKB",
                    "geometry_types": ["MultiPolygon"],
                    "crs": "EPSG:4326"
                }
            }
        })
        .to_string();

        let kv_metadata = vec![KeyValue::new("geo".to_string(), Some(geo_metadata))];
        let props = WriterProperties::builder()
            .set_key_value_metadata(Some(kv_metadata))
            .build();

        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;

        Ok(Self {
            writer: Some(writer),
            schema,
            geometry_buf: Vec::new(),
            id_buf: Vec::new(),
            type_buf: Vec::new(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        if self.geometry_buf.is_empty() {
            return Ok(());
        }

        let arrays: Vec<ArrayRef> = vec![
            Arc::new(BinaryArray::from_iter_values(self.geometry_buf.drain(..))),
            Arc::new(Int64Array::from(std::mem::take(&mut self.id_buf))),
            Arc::new(StringArray::from_iter_values(self.type_buf.drain(..))),
        ];
        let batch = RecordBatch::try_new(self.schema.clone(), arrays)?;

        if let Some(writer) = self.writer.as_mut() {
            writer.write(&batch)?;
        }
        Ok(())
    }
}

impl DataSink for GeoParquetSink {
    fn add_feature(&mut self, feature: FeatureRecord) -> Result<()> {
        let wkb = Geometry::MultiPolygon(feature.geometry)
            .to_wkb(CoordDimensions::xy())
            .context("Failed to convert geometry to WKB")?;

        self.geometry_buf.push(wkb);
        self.id_buf.push(feature.id);
        self.type_buf.push(feature.label);

        if self.geometry_buf.len() >= BATCH_SIZE {
            self.flush()?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.flush()?;
        if let Some(writer) = self.writer.take() {
            writer.close()?;
        }
        Ok(())
    }
}
