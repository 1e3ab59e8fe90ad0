use anyhow::Result;
use geo_types::MultiPolygon;
use serde_json::{Map, Value};

pub mod geojson;
pub mod geojsonl;
pub mod geoparquet;
pub mod gpkg;

pub use self::geojson::GeoJsonSink;
pub use self::geojsonl::GeoJsonlSink;
pub use self::geoparquet::GeoParquetSink;
pub use self::gpkg::GeoPackageSink;

/// Name of the output layer (GeoPackage table name).
pub const LAYER_NAME: &str = "noice";

/// Width of the `type` attribute; longer labels are cut to fit.
pub const TYPE_FIELD_WIDTH: usize = 30;

/// One accepted area as it is written to the output.
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRecord {
    /// Area id (see `Provenance::area_id`)
    pub id: i64,
    /// Value of the `natural` tag
    pub label: String,
    pub geometry: MultiPolygon<f64>,
}

impl FeatureRecord {
    /// Attributes as GeoJSON properties.
    pub fn properties(&self) -> Map<String, Value> {
        let mut properties = Map::new();
        properties.insert("id".to_string(), Value::from(self.id));
        properties.insert("type".to_string(), Value::String(self.label.clone()));
        properties
    }

    pub fn to_geojson(&self) -> ::geojson::Feature {
        ::geojson::Feature {
            bbox: None,
            geometry: Some(::geojson::Geometry::new(::geojson::Value::from(&self.geometry))),
            id: None,
            properties: Some(self.properties()),
            foreign_members: None,
        }
    }
}

pub trait DataSink {
    fn add_feature(&mut self, feature: FeatureRecord) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
}
