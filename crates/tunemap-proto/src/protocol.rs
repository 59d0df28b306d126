use serde::{Deserialize, Deserializer, Serialize};

/// Prefix of synthetic, client-only locality ids.  Ghost localities exist only
/// to keep the current track alive when fresh server data no longer has it;
/// they are never sent to the server and never parsed as numeric ids.
pub const GHOST_PREFIX: &str = "ghost-";

pub fn is_ghost_id(locality_id: &str) -> bool {
    locality_id.starts_with(GHOST_PREFIX)
}

// ── geo ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Plain Euclidean distance in degrees.  Only used to decide whether the
    /// user moved far enough to warrant a refresh, so no great-circle math.
    pub fn displacement(&self, other: &Coordinates) -> f64 {
        (self.latitude - other.latitude).hypot(self.longitude - other.longitude)
    }
}

/// Axis-aligned lat/lon rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportBounds {
    pub north: f64,
    pub east: f64,
    pub south: f64,
    pub west: f64,
}

impl ViewportBounds {
    /// True when the two rectangles share a region of non-zero area.
    pub fn intersects(&self, other: &ViewportBounds) -> bool {
        self.south < other.north
            && other.south < self.north
            && self.west < other.east
            && other.west < self.east
    }
}

/// Map camera region: a centre plus the visible span in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub latitude: f64,
    pub longitude: f64,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Region {
    pub fn centered(at: Coordinates, latitude_delta: f64, longitude_delta: f64) -> Self {
        Self {
            latitude: at.latitude,
            longitude: at.longitude,
            latitude_delta,
            longitude_delta,
        }
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn bounds(&self) -> ViewportBounds {
        ViewportBounds {
            north: self.latitude + self.latitude_delta / 2.0,
            east: self.longitude + self.longitude_delta / 2.0,
            south: self.latitude - self.latitude_delta / 2.0,
            west: self.longitude - self.longitude_delta / 2.0,
        }
    }

    /// Web-map style zoom level derived from the longitude span:
    /// `round(log2(360 / longitude_delta))`.
    pub fn zoom_level(&self) -> i32 {
        let delta = self.longitude_delta.max(f64::EPSILON);
        (360.0 / delta).log2().round() as i32
    }

    /// Same camera within `tolerance` degrees on every component.
    pub fn approx_eq(&self, other: &Region, tolerance: f64) -> bool {
        (self.latitude - other.latitude).abs() <= tolerance
            && (self.longitude - other.longitude).abs() <= tolerance
            && (self.latitude_delta - other.latitude_delta).abs() <= tolerance
            && (self.longitude_delta - other.longitude_delta).abs() <= tolerance
    }
}

// ── tracks & localities ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Cover {
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub medium: Option<String>,
    #[serde(default)]
    pub large: String,
}

impl Cover {
    /// Largest available artwork url.
    pub fn best(&self) -> Option<&str> {
        if !self.large.is_empty() {
            return Some(&self.large);
        }
        self.medium.as_deref().or(self.small.as_deref())
    }
}

/// A track as served for playback.  `track_id` is unique only within the
/// locality that owns it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Track {
    #[serde(deserialize_with = "id_string")]
    pub track_id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub cover: Cover,
    #[serde(default)]
    pub preview_url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Locality {
    #[serde(deserialize_with = "id_string")]
    pub locality_id: String,
    pub name: String,
    #[serde(default)]
    pub tracks: Vec<Track>,
}

impl Locality {
    /// Wrap a single track in a synthetic locality.  `tag` only has to be
    /// unique among ghosts alive at the same time (there is at most one).
    pub fn ghost(track: Track, tag: impl std::fmt::Display) -> Self {
        Self {
            locality_id: format!("{GHOST_PREFIX}{tag}"),
            name: "Now playing".to_string(),
            tracks: vec![track],
        }
    }

    pub fn is_ghost(&self) -> bool {
        is_ghost_id(&self.locality_id)
    }
}

/// A track as listed on a locality's detail view, with its vote tally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalityTrack {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub locality_id: String,
    pub track: Track,
    #[serde(default)]
    pub total_votes: i64,
    #[serde(default)]
    pub user_vote: i8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Clear,
    Down,
}

impl Vote {
    pub fn value(self) -> i8 {
        match self {
            Vote::Up => 1,
            Vote::Clear => 0,
            Vote::Down => -1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteBody {
    pub vote_value: i8,
}

// ── map features ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureProperties {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub track_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type", default = "point_kind")]
    pub kind: String,
    /// GeoJSON order: `[longitude, latitude]`.
    pub coordinates: [f64; 2],
}

/// A GeoJSON point feature: one map pin per locality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointFeature {
    #[serde(rename = "type", default = "feature_kind")]
    pub kind: String,
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub properties: FeatureProperties,
    pub geometry: PointGeometry,
}

impl PointFeature {
    pub fn new(id: impl Into<String>, name: impl Into<String>, at: Coordinates) -> Self {
        Self {
            kind: feature_kind(),
            id: id.into(),
            properties: FeatureProperties {
                name: name.into(),
                track_count: None,
            },
            geometry: PointGeometry {
                kind: point_kind(),
                coordinates: [at.longitude, at.latitude],
            },
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.geometry.coordinates[1], self.geometry.coordinates[0])
    }

    /// Identity used when merging overlapping grid fetches.
    pub fn dedup_key(&self) -> String {
        let [lon, lat] = self.geometry.coordinates;
        format!("{}@{},{}", self.id, lat, lon)
    }
}

fn feature_kind() -> String {
    "Feature".to_string()
}

fn point_kind() -> String {
    "Point".to_string()
}

/// The server is not consistent about id types; accept numbers or strings and
/// keep them as strings everywhere client-side.
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(n) => n.to_string(),
        RawId::Float(f) => f.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_ids_become_strings() {
        let raw = r#"[{
            "locality_id": 12,
            "name": "Harbour",
            "tracks": [{
                "track_id": 7,
                "name": "Tide",
                "artists": ["A", "B"],
                "cover": { "large": "https://img/l.jpg" },
                "preview_url": "https://p/7.mp3"
            }]
        }]"#;
        let localities: Vec<Locality> = serde_json::from_str(raw).unwrap();
        assert_eq!(localities[0].locality_id, "12");
        assert_eq!(localities[0].tracks[0].track_id, "7");
        assert_eq!(localities[0].tracks[0].cover.best(), Some("https://img/l.jpg"));
    }

    #[test]
    fn test_point_feature_geojson() {
        let raw = r#"{
            "type": "Feature",
            "id": "3",
            "properties": { "name": "Park", "track_count": 4 },
            "geometry": { "type": "Point", "coordinates": [13.4, 52.5] }
        }"#;
        let feature: PointFeature = serde_json::from_str(raw).unwrap();
        assert_eq!(feature.coordinates(), Coordinates::new(52.5, 13.4));
        assert_eq!(feature.properties.track_count, Some(4));
        assert_eq!(feature.dedup_key(), "3@52.5,13.4");
    }

    #[test]
    fn test_region_bounds_and_zoom() {
        let region = Region::centered(Coordinates::new(10.0, 20.0), 2.0, 4.0);
        let b = region.bounds();
        assert_eq!((b.north, b.south, b.east, b.west), (11.0, 9.0, 22.0, 18.0));

        let world = Region::centered(Coordinates::default(), 90.0, 180.0);
        assert_eq!(world.zoom_level(), 1);
        let city = Region::centered(Coordinates::default(), 0.1, 360.0 / 4096.0);
        assert_eq!(city.zoom_level(), 12);
    }

    #[test]
    fn test_ghost_locality() {
        let track = Track {
            track_id: "1".into(),
            name: "x".into(),
            ..Default::default()
        };
        let ghost = Locality::ghost(track, 42);
        assert_eq!(ghost.locality_id, "ghost-42");
        assert!(ghost.is_ghost());
        assert!(!is_ghost_id("42"));
    }

    #[test]
    fn test_bounds_touching_edges_do_not_intersect() {
        let a = ViewportBounds { north: 1.0, east: 1.0, south: 0.0, west: 0.0 };
        let b = ViewportBounds { north: 2.0, east: 1.0, south: 1.0, west: 0.0 };
        assert!(!a.intersects(&b));
        let c = ViewportBounds { north: 1.5, east: 0.5, south: 0.5, west: -0.5 };
        assert!(a.intersects(&c));
    }
}
