use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeocodeError {
    #[error(
        "No matching location found. Please enter a valid postal code, or manually enter values for latitude and longitude."
    )]
    NoMatch,
    /// The reason is logged, not shown to clients.
    #[error("Location services are unavailable. Please manually enter values for latitude and longitude.")]
    Unavailable(String),
}

impl From<reqwest::Error> for GeocodeError {
    fn from(err: reqwest::Error) -> Self {
        GeocodeError::Unavailable(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub long: f64,
}

#[derive(Debug, Deserialize)]
struct PlacesResponse {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    /// `[longitude, latitude]`
    center: [f64; 2],
}

/// Forward geocoding through the Mapbox places API.
#[derive(Clone)]
pub struct MapboxGeocoder {
    client: reqwest::Client,
    base_url: Arc<Url>,
    api_key: Option<String>,
}

impl MapboxGeocoder {
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: Arc::new(base_url),
            api_key,
        }
    }

    /// Postal codes are looked up within Canada.
    pub async fn locate_postal_code(&self, postal_code: &str) -> Result<Coordinates, GeocodeError> {
        self.geocode(&format!("{}, Canada", postal_code.trim())).await
    }

    pub async fn geocode(&self, query: &str) -> Result<Coordinates, GeocodeError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(GeocodeError::Unavailable("no geocoder api key configured".into()));
        };
        let url = self.places_url(query, api_key)?;
        debug!(%query, "geocoding");

        let response = self.client.get(url.as_str()).send().await?.error_for_status()?;
        let places: PlacesResponse = response.json().await?;
        let feature = places.features.first().ok_or(GeocodeError::NoMatch)?;
        let [long, lat] = feature.center;
        Ok(Coordinates { lat, long })
    }

    fn places_url(&self, query: &str, api_key: &str) -> Result<Url, GeocodeError> {
        let mut url = (*self.base_url).clone();
        url.path_segments_mut()
            .map_err(|()| GeocodeError::Unavailable("geocoder base url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["geocoding", "v5", "mapbox.places", &format!("{query}.json")]);
        url.query_pairs_mut()
            .append_pair("access_token", api_key)
            .append_pair("limit", "1");
        Ok(url)
    }
}
