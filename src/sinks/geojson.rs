use super::{DataSink, FeatureRecord};
use anyhow::{Context, Result};
use geojson::GeoJson;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub struct GeoJsonSink {
    writer: BufWriter<File>,
    first_feature: bool,
}

impl GeoJsonSink {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create GeoJSON file {:?}", path.as_ref()))?;
        let mut writer = BufWriter::new(file);

        // Features are streamed between this header and the footer in finish()
        writeln!(writer, "{{")?;
        writeln!(writer, "  \"type\": \"FeatureCollection\",")?;
        writeln!(writer, "  \"features\": [")?;

        Ok(Self {
            writer,
            first_feature: true,
        })
    }
}

impl DataSink for GeoJsonSink {
    fn add_feature(&mut self, feature: FeatureRecord) -> Result<()> {
        if !self.first_feature {
            writeln!(self.writer, ",")?;
        }
        self.first_feature = false;

        let geojson = GeoJson::Feature(feature.to_geojson());
        serde_json::to_writer(&mut self.writer, &geojson)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        writeln!(self.writer)?;
        writeln!(self.writer, "  ]")?;
        writeln!(self.writer, "}}")?;
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::square_record;
    use tempfile::NamedTempFile;

    fn read_collection(path: &Path) -> serde_json::Value {
        let content = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&content).unwrap()
    }

    #[test]
    fn writes_empty_feature_collection() {
        let temp_file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(temp_file.path()).unwrap();
        sink.finish().unwrap();

        let parsed = read_collection(temp_file.path());
        assert_eq!(parsed["type"], "FeatureCollection");
        assert!(parsed["features"].as_array().unwrap().is_empty());
    }

    #[test]
    fn writes_multiple_features_with_commas() {
        let temp_file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(temp_file.path()).unwrap();

        sink.add_feature(square_record(2, "scree", 0.0, -80.0)).unwrap();
        sink.add_feature(square_record(3, "glacier", 5.0, -80.0)).unwrap();
        sink.add_feature(square_record(4, "bare_rock", 10.0, -80.0)).unwrap();
        sink.finish().unwrap();

        let parsed = read_collection(temp_file.path());
        assert_eq!(parsed["features"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn feature_carries_id_and_type() {
        let temp_file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(temp_file.path()).unwrap();

        sink.add_feature(square_record(-11, "glacier", 0.0, -80.0)).unwrap();
        sink.finish().unwrap();

        let parsed = read_collection(temp_file.path());
        let feature = &parsed["features"][0];
        assert_eq!(feature["type"], "Feature");
        assert_eq!(feature["properties"]["id"], -11);
        assert_eq!(feature["properties"]["type"], "glacier");
        assert_eq!(feature["properties"].as_object().unwrap().len(), 2);
    }

    #[test]
    fn geometry_is_a_multipolygon() {
        let temp_file = NamedTempFile::with_suffix(".geojson").unwrap();
        let mut sink = GeoJsonSink::new(temp_file.path()).unwrap();

        sink.add_feature(square_record(2, "scree", 160.5, -77.5)).unwrap();
        sink.finish().unwrap();

        let parsed = read_collection(temp_file.path());
        let geometry = &parsed["features"][0]["geometry"];
        assert_eq!(geometry["type"], "MultiPolygon");

        let first = &geometry["coordinates"][0][0][0];
        assert!((first[0].as_f64().unwrap() - 160.5).abs() < 1e-10);
        assert!((first[1].as_f64().unwrap() + 77.5).abs() < 1e-10);
    }
}
