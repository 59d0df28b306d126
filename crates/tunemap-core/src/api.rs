//! Locality REST API client.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Url};
use std::time::Duration;
use tracing::debug;
use tunemap_proto::config::ApiConfig;
use tunemap_proto::protocol::{
    Coordinates, Locality, LocalityTrack, PointFeature, ViewportBounds, Vote, VoteBody,
};

use crate::error::ApiError;

/// The two reads the core engines depend on.
#[async_trait]
pub trait LocalityApi: Send + Sync {
    /// Map pins inside `bounds`.
    async fn localities_in_bounds(&self, bounds: ViewportBounds)
        -> Result<Vec<PointFeature>, ApiError>;

    /// Localities (with their playable tracks) within `radius_km` of `at`.
    async fn localities_with_tracks(
        &self,
        at: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Locality>, ApiError>;
}

pub struct HttpLocalityApi {
    client: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl HttpLocalityApi {
    pub fn new(config: &ApiConfig) -> Result<Self, ApiError> {
        // a trailing slash makes `join` append to the base path instead of replacing it
        let mut raw = config.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base_url = Url::parse(&raw).map_err(|e| ApiError::BaseUrl(format!("{raw}: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            token: config.token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::BaseUrl(format!("{path}: {e}")))?;
        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    async fn send(builder: RequestBuilder) -> Result<reqwest::Response, ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                status: status.as_u16(),
                url: response.url().to_string(),
            });
        }
        Ok(response)
    }

    /// Tracks listed on a locality's detail view, with vote tallies.
    pub async fn locality_tracks(&self, locality_id: &str) -> Result<Vec<LocalityTrack>, ApiError> {
        let builder = self.request(Method::GET, &format!("localities/{locality_id}/tracks"))?;
        Ok(Self::send(builder).await?.json().await?)
    }

    /// Attach a Spotify track to a locality.
    pub async fn add_track(&self, locality_id: &str, spotify_track_id: &str) -> Result<(), ApiError> {
        let builder = self.request(
            Method::PUT,
            &format!("localities/{locality_id}/tracks/{spotify_track_id}"),
        )?;
        Self::send(builder).await?;
        Ok(())
    }

    pub async fn vote(&self, locality_track_id: &str, vote: Vote) -> Result<(), ApiError> {
        let builder = self
            .request(Method::PATCH, &format!("locality-tracks/{locality_track_id}/vote"))?
            .json(&VoteBody {
                vote_value: vote.value(),
            });
        Self::send(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl LocalityApi for HttpLocalityApi {
    async fn localities_in_bounds(
        &self,
        bounds: ViewportBounds,
    ) -> Result<Vec<PointFeature>, ApiError> {
        debug!("api: localities in {:?}", bounds);
        let builder = self.request(Method::GET, "localities")?.query(&[
            ("north", bounds.north),
            ("east", bounds.east),
            ("south", bounds.south),
            ("west", bounds.west),
        ]);
        Ok(Self::send(builder).await?.json().await?)
    }

    async fn localities_with_tracks(
        &self,
        at: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<Locality>, ApiError> {
        debug!("api: localities with tracks near {:?} r={}km", at, radius_km);
        let builder = self.request(Method::GET, "localities/tracks")?.query(&[
            ("latitude", at.latitude),
            ("longitude", at.longitude),
            ("radius", radius_km),
        ]);
        Ok(Self::send(builder).await?.json().await?)
    }
}
