//! GeoPackage output through SQLite.
//!
//! The whole layer is written inside one transaction that is committed by
//! [`DataSink::finish`]. Geometries are stored as GeoPackage binary: a `GP`
//! header with the SRS id and an xy envelope, followed by little-endian WKB.

use super::{DataSink, FeatureRecord, LAYER_NAME, TYPE_FIELD_WIDTH};
use anyhow::{Context, Result};
use geo::BoundingRect;
use geo_types::{Geometry, MultiPolygon, Rect};
use geozero::{CoordDimensions, ToWkb};
use rusqlite::{Connection, params};
use std::path::Path;

/// "GPKG" as a big-endian integer.
const APPLICATION_ID: i32 = 0x4750_4B47;
const USER_VERSION: i32 = 10200;
const WGS84_SRS_ID: i32 = 4326;

const WGS84_DEFINITION: &str = r#"GEOGCS["WGS 84",DATUM["WGS_1984",SPHEROID["WGS 84",6378137,298.257223563,AUTHORITY["EPSG","7030"]],AUTHORITY["EPSG","6326"]],PRIMEM["Greenwich",0,AUTHORITY["EPSG","8901"]],UNIT["degree",0.0174532925199433,AUTHORITY["EPSG","9122"]],AXIS["Latitude",NORTH],AXIS["Longitude",EAST],AUTHORITY["EPSG","4326"]]"#;

const METADATA_SCHEMA: &str = "
CREATE TABLE gpkg_spatial_ref_sys (
    srs_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL PRIMARY KEY,
    organization TEXT NOT NULL,
    organization_coordsys_id INTEGER NOT NULL,
    definition TEXT NOT NULL,
    description TEXT
);
CREATE TABLE gpkg_contents (
    table_name TEXT NOT NULL PRIMARY KEY,
    data_type TEXT NOT NULL,
    identifier TEXT UNIQUE,
    description TEXT DEFAULT '',
    last_change DATETIME NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    min_x DOUBLE,
    min_y DOUBLE,
    max_x DOUBLE,
    max_y DOUBLE,
    srs_id INTEGER,
    CONSTRAINT fk_gc_r_srs_id FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
CREATE TABLE gpkg_geometry_columns (
    table_name TEXT NOT NULL,
    column_name TEXT NOT NULL,
    geometry_type_name TEXT NOT NULL,
    srs_id INTEGER NOT NULL,
    z TINYINT NOT NULL,
    m TINYINT NOT NULL,
    CONSTRAINT pk_geom_cols PRIMARY KEY (table_name, column_name),
    CONSTRAINT fk_gc_tn FOREIGN KEY (table_name) REFERENCES gpkg_contents(table_name),
    CONSTRAINT fk_gc_srs FOREIGN KEY (srs_id) REFERENCES gpkg_spatial_ref_sys(srs_id)
);
INSERT INTO gpkg_spatial_ref_sys VALUES
    ('Undefined cartesian SRS', -1, 'NONE', -1, 'undefined', 'undefined cartesian coordinate reference system'),
    ('Undefined geographic SRS', 0, 'NONE', 0, 'undefined', 'undefined geographic coordinate reference system');
";

pub struct GeoPackageSink {
    conn: Connection,
    insert_sql: String,
    extent: Option<Rect<f64>>,
    finished: bool,
}

impl GeoPackageSink {
    /// Create the database at `path`, replacing any existing file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)
                .with_context(|| format!("Sink: Failed to remove existing dataset {:?}", path))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Sink: Failed to create GeoPackage {:?}", path))?;
        conn.execute_batch(&format!(
            "PRAGMA application_id = {APPLICATION_ID};
             PRAGMA user_version = {USER_VERSION};
             PRAGMA synchronous = OFF;"
        ))
        .context("Sink: Failed to set GeoPackage pragmas")?;

        create_schema(&conn).context("Sink: Failed to create GeoPackage layer")?;
        conn.execute_batch("BEGIN")
            .context("Sink: Failed to start transaction")?;

        Ok(Self {
            conn,
            insert_sql: format!("INSERT INTO \"{LAYER_NAME}\" (geom, id, type) VALUES (?1, ?2, ?3)"),
            extent: None,
            finished: false,
        })
    }

    fn grow_extent(&mut self, geometry: &MultiPolygon<f64>) {
        let Some(rect) = geometry.bounding_rect() else {
            return;
        };
        self.extent = Some(match self.extent {
            None => rect,
            Some(extent) => Rect::new(
                (extent.min().x.min(rect.min().x), extent.min().y.min(rect.min().y)),
                (extent.max().x.max(rect.max().x), extent.max().y.max(rect.max().y)),
            ),
        });
    }
}

fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(METADATA_SCHEMA)?;
    conn.execute(
        "INSERT INTO gpkg_spatial_ref_sys VALUES ('WGS 84 geodetic', ?1, 'EPSG', ?1, ?2, 'longitude/latitude coordinates in decimal degrees on the WGS 84 spheroid')",
        params![WGS84_SRS_ID, WGS84_DEFINITION],
    )?;
    conn.execute_batch(&format!(
        "CREATE TABLE \"{LAYER_NAME}\" (
            fid INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
            geom MULTIPOLYGON,
            id INTEGER,
            type TEXT({TYPE_FIELD_WIDTH})
        );"
    ))?;
    conn.execute(
        "INSERT INTO gpkg_contents (table_name, data_type, identifier, srs_id) VALUES (?1, 'features', ?1, ?2)",
        params![LAYER_NAME, WGS84_SRS_ID],
    )?;
    conn.execute(
        "INSERT INTO gpkg_geometry_columns VALUES (?1, 'geom', 'MULTIPOLYGON', ?2, 0, 0)",
        params![LAYER_NAME, WGS84_SRS_ID],
    )?;
    Ok(())
}

/// Encode a multipolygon as a GeoPackage geometry blob with an xy
/// envelope, or none for an empty geometry.
pub fn encode_geometry(geometry: &MultiPolygon<f64>) -> Result<Vec<u8>> {
    let envelope = geometry
        .bounding_rect()
        .map(|rect| vec![rect.min().x, rect.max().x, rect.min().y, rect.max().y])
        .unwrap_or_default();
    Geometry::MultiPolygon(geometry.clone())
        .to_gpkg_wkb(CoordDimensions::xy(), Some(WGS84_SRS_ID), envelope)
        .context("Failed to convert geometry to GeoPackage WKB")
}

impl DataSink for GeoPackageSink {
    fn add_feature(&mut self, feature: FeatureRecord) -> Result<()> {
        let blob = encode_geometry(&feature.geometry)?;
        self.grow_extent(&feature.geometry);

        let mut insert = self
            .conn
            .prepare_cached(&self.insert_sql)
            .context("Sink: Failed to prepare feature insert")?;
        insert
            .execute(params![blob, feature.id, feature.label])
            .context("Sink: Failed to create feature")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(extent) = self.extent {
            self.conn
                .execute(
                    "UPDATE gpkg_contents SET min_x = ?1, min_y = ?2, max_x = ?3, max_y = ?4 WHERE table_name = ?5",
                    params![
                        extent.min().x,
                        extent.min().y,
                        extent.max().x,
                        extent.max().y,
                        LAYER_NAME
                    ],
                )
                .context("Sink: Failed to record layer extent")?;
        }
        self.conn
            .execute_batch("COMMIT")
            .context("Sink: Failed to commit GeoPackage")?;
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::testing::square_record;
    use tempfile::TempDir;

    fn open(path: &Path) -> Connection {
        Connection::open(path).unwrap()
    }

    #[test]
    fn creates_geopackage_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.gpkg");
        let mut sink = GeoPackageSink::new(&path).unwrap();
        sink.finish().unwrap();

        let conn = open(&path);
        let application_id: i32 = conn
            .query_row("PRAGMA application_id", [], |row| row.get(0))
            .unwrap();
        assert_eq!(application_id, APPLICATION_ID);

        let srs: Vec<i64> = conn
            .prepare("SELECT srs_id FROM gpkg_spatial_ref_sys ORDER BY srs_id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|row| row.unwrap())
            .collect();
        assert_eq!(srs, vec![-1, 0, 4326]);

        let (table, geometry_type): (String, String) = conn
            .query_row(
                "SELECT table_name, geometry_type_name FROM gpkg_geometry_columns",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(table, "noice");
        assert_eq!(geometry_type, "MULTIPOLYGON");
    }

    #[test]
    fn writes_features_and_extent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.gpkg");
        let mut sink = GeoPackageSink::new(&path).unwrap();

        sink.add_feature(square_record(8, "scree", 10.0, -80.0)).unwrap();
        sink.add_feature(square_record(15, "glacier", -5.0, -75.0)).unwrap();
        sink.finish().unwrap();

        let conn = open(&path);
        let rows: Vec<(i64, String)> = conn
            .prepare("SELECT id, type FROM noice ORDER BY fid")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .map(|row| row.unwrap())
            .collect();
        assert_eq!(rows, vec![(8, "scree".to_string()), (15, "glacier".to_string())]);

        let extent: (f64, f64, f64, f64) = conn
            .query_row(
                "SELECT min_x, min_y, max_x, max_y FROM gpkg_contents WHERE table_name = 'noice'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(extent, (-5.0, -80.0, 11.0, -74.0));
    }

    #[test]
    fn geometry_blob_has_geopackage_header() {
        let record = square_record(2, "scree", 1.0, 2.0);
        let blob = encode_geometry(&record.geometry).unwrap();

        assert_eq!(&blob[..2], b"GP");
        assert_eq!(blob[2], 0);
        assert_eq!(blob[3], 0b0000_0011);
        assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 4326);

        let envelope: Vec<f64> = blob[8..40]
            .chunks(8)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(envelope, vec![1.0, 2.0, 2.0, 3.0]);

        // WKB: little-endian MultiPolygon
        assert_eq!(&blob[40..45], &[1, 6, 0, 0, 0]);
    }

    #[test]
    fn empty_geometry_blob_has_no_envelope() {
        let blob = encode_geometry(&MultiPolygon::<f64>::new(Vec::new())).unwrap();

        assert_eq!(&blob[..2], b"GP");
        assert_eq!(blob[3], 0b0000_0001);
        assert_eq!(i32::from_le_bytes(blob[4..8].try_into().unwrap()), 4326);
        assert_eq!(&blob[8..13], &[1, 6, 0, 0, 0]);
    }

    #[test]
    fn replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.gpkg");
        std::fs::write(&path, b"not a database").unwrap();

        let mut sink = GeoPackageSink::new(&path).unwrap();
        sink.add_feature(square_record(2, "scree", 0.0, 0.0)).unwrap();
        sink.finish().unwrap();

        let count: i64 = open(&path)
            .query_row("SELECT COUNT(*) FROM noice", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn empty_layer_has_no_extent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.gpkg");
        let mut sink = GeoPackageSink::new(&path).unwrap();
        sink.finish().unwrap();

        let min_x: Option<f64> = open(&path)
            .query_row("SELECT min_x FROM gpkg_contents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(min_x, None);
    }
}
