//! Reverse geocoding for the map's area label.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;
use tunemap_proto::config::GeocoderConfig;
use tunemap_proto::protocol::Coordinates;

use crate::error::GeocodeError;

/// Label shown when nothing better is known.
pub const FALLBACK_AREA_NAME: &str = "Earth";

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Place-name candidates for `at`, most specific first.  May be empty.
    async fn reverse(&self, at: Coordinates) -> Result<Vec<String>, GeocodeError>;
}

/// Best label for `at`.  Never fails: errors are logged as warnings and fall
/// back to [`FALLBACK_AREA_NAME`].
pub async fn area_name(geocoder: &dyn Geocoder, at: Coordinates) -> String {
    match geocoder.reverse(at).await {
        Ok(candidates) => candidates
            .into_iter()
            .find(|c| !c.trim().is_empty())
            .unwrap_or_else(|| FALLBACK_AREA_NAME.to_string()),
        Err(e) => {
            warn!("geocode: reverse lookup for {:?} failed: {}", at, e);
            FALLBACK_AREA_NAME.to_string()
        }
    }
}

// ── Nominatim ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    neighbourhood: Option<String>,
    suburb: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    #[serde(default)]
    address: NominatimAddress,
}

impl NominatimAddress {
    fn candidates(self) -> Vec<String> {
        [
            self.neighbourhood,
            self.suburb,
            self.city,
            self.town,
            self.village,
            self.county,
            self.state,
            self.country,
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// OpenStreetMap Nominatim `/reverse` endpoint.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self, GeocodeError> {
        // Nominatim's usage policy requires an identifying user agent
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn reverse(&self, at: Coordinates) -> Result<Vec<String>, GeocodeError> {
        let response = self
            .client
            .get(format!("{}/reverse", self.base_url))
            .query(&[
                ("format", "jsonv2".to_string()),
                ("zoom", "14".to_string()),
                ("lat", at.latitude.to_string()),
                ("lon", at.longitude.to_string()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GeocodeError::Status(response.status().as_u16()));
        }
        let body: NominatimReverse = response.json().await?;
        Ok(body.address.candidates())
    }
}
