use super::{DataSink, FeatureRecord};
use anyhow::{Context, Result};
use geojson::GeoJson;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Newline-delimited GeoJSON, one feature per line.
pub struct GeoJsonlSink {
    writer: BufWriter<Box<dyn Write>>,
}

impl GeoJsonlSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create GeoJSONL file {:?}", path.as_ref()))?;
        Ok(Self {
            writer: BufWriter::new(Box::new(file)),
        })
    }

    pub fn stdout() -> Result<Self> {
        Ok(Self {
            writer: BufWriter::new(Box::new(std::io::stdout())),
        })
    }
}

impl DataSink for GeoJsonlSink {
    fn add_feature(&mut self, feature: FeatureRecord) -> Result<()> {
        let geojson = GeoJson::Feature(feature.to_geojson());
        serde_json::to_writer(&mut self.writer, &geojson)?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::square_record;
    use tempfile::NamedTempFile;

    #[test]
    fn writes_one_feature_per_line() {
        let temp_file = NamedTempFile::with_suffix(".geojsonl").unwrap();
        let mut sink = GeoJsonlSink::new(temp_file.path()).unwrap();

        sink.add_feature(square_record(8, "scree", 0.0, -80.0)).unwrap();
        sink.add_feature(square_record(15, "glacier", 2.0, -80.0)).unwrap();
        sink.finish().unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["properties"]["id"], 8);
        assert_eq!(lines[1]["properties"]["type"], "glacier");
        assert_eq!(lines[1]["geometry"]["type"], "MultiPolygon");
    }

    #[test]
    fn empty_output_is_empty_file() {
        let temp_file = NamedTempFile::with_suffix(".geojsonl").unwrap();
        let mut sink = GeoJsonlSink::new(temp_file.path()).unwrap();
        sink.finish().unwrap();

        assert!(std::fs::read_to_string(temp_file.path()).unwrap().is_empty());
    }
}
