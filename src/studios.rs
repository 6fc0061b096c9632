//! Studios, location search and class search.

use std::cmp::Ordering;

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::geocoding::{Coordinates, MapboxGeocoder};
use crate::models::{Amenity, Class, Studio, StudioId};
use crate::store::Tables;
use crate::validation::{
    parse_clock_bound, validate_coordinates, validate_phone_number, validate_postal_code,
};

const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewStudio {
    pub name: String,
    pub address: String,
    pub postal_code: String,
    pub phone_num: String,
    /// Looked up from the postal code when either coordinate is missing.
    pub lat: Option<f64>,
    pub long: Option<f64>,
    #[serde(default)]
    pub amenities: Vec<Amenity>,
}

impl NewStudio {
    fn coordinates(&self) -> Option<Coordinates> {
        Some(Coordinates {
            lat: self.lat?,
            long: self.long?,
        })
    }
}

/// Uses the supplied coordinates, or geocodes the postal code.
pub async fn resolve_location(
    geocoder: &MapboxGeocoder,
    studio: &NewStudio,
) -> Result<Coordinates, BookingError> {
    if let Some(coordinates) = studio.coordinates() {
        return Ok(coordinates);
    }
    let postal_code = validate_postal_code(&studio.postal_code)?;
    Ok(geocoder.locate_postal_code(&postal_code).await?)
}

pub fn create_studio(
    tables: &mut Tables,
    studio: NewStudio,
    location: Coordinates,
) -> Result<Studio, BookingError> {
    if studio.name.trim().is_empty() {
        return Err(BookingError::Validation("name must not be empty".into()));
    }
    let postal_code = validate_postal_code(&studio.postal_code)?;
    let phone_num = validate_phone_number(&studio.phone_num)?;
    let (lat, long) = validate_coordinates(location.lat, location.long)?;
    let mut amenities = Vec::with_capacity(studio.amenities.len());
    for amenity in studio.amenities {
        let kind = amenity.kind.trim();
        if kind.is_empty() {
            return Err(BookingError::Validation("amenity type must not be empty".into()));
        }
        amenities.push(Amenity {
            kind: kind.to_string(),
            quantity: amenity.quantity,
        });
    }

    let studio = tables.insert_studio(Studio {
        id: 0,
        name: studio.name,
        address: studio.address,
        postal_code,
        phone_num,
        lat,
        long,
        amenities,
    });
    info!(studio_id = studio.id, lat, long, "studio created");
    Ok(studio)
}

/// Great-circle distance in kilometres.
pub fn distance_km(from: Coordinates, to: Coordinates) -> f64 {
    let (lat1, lat2) = (from.lat.to_radians(), to.lat.to_radians());
    let delta_long = (to.long - from.long).to_radians();
    let cosine = lat1.cos() * lat2.cos() * delta_long.cos() + lat1.sin() * lat2.sin();
    EARTH_RADIUS_KM * cosine.clamp(-1.0, 1.0).acos()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct NearbyStudio {
    #[serde(flatten)]
    pub studio: Studio,
    pub distance_km: f64,
}

/// All studios, closest first.
pub fn nearby(tables: &Tables, origin: Coordinates) -> Vec<NearbyStudio> {
    let mut studios: Vec<NearbyStudio> = tables
        .studios()
        .map(|studio| NearbyStudio {
            distance_km: distance_km(
                origin,
                Coordinates {
                    lat: studio.lat,
                    long: studio.long,
                },
            ),
            studio: studio.clone(),
        })
        .collect();
    studios.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then(a.studio.id.cmp(&b.studio.id))
    });
    studios
}

/// Studio filters. Each list matches when any entry equals the studio's
/// value, ignoring case; an empty list matches every studio.
#[derive(Debug, Clone, Default)]
pub struct StudioSearch {
    /// Case-insensitive substring of the studio name.
    pub name: Option<String>,
    /// Amenity types.
    pub amenities: Vec<String>,
    /// Names of classes held at the studio.
    pub classes: Vec<String>,
    /// Coaches teaching at the studio.
    pub coaches: Vec<String>,
}

fn any_equal_ignore_case(wanted: &[String], mut values: impl Iterator<Item = String>) -> bool {
    wanted.is_empty()
        || values.any(|value| {
            let value = value.to_lowercase();
            wanted.iter().any(|w| w.to_lowercase() == value)
        })
}

/// Studios matching every given filter, ordered by name.
pub fn search_studios(tables: &Tables, search: &StudioSearch) -> Vec<Studio> {
    let mut studios: Vec<Studio> = tables
        .studios()
        .filter(|studio| {
            search
                .name
                .as_deref()
                .is_none_or(|name| contains_ignore_case(&studio.name, name))
        })
        .filter(|studio| {
            any_equal_ignore_case(
                &search.amenities,
                studio.amenities.iter().map(|amenity| amenity.kind.clone()),
            )
        })
        .filter(|studio| {
            any_equal_ignore_case(
                &search.classes,
                tables.classes_of_studio(studio.id).map(|class| class.name.clone()),
            )
        })
        .filter(|studio| {
            any_equal_ignore_case(
                &search.coaches,
                tables.classes_of_studio(studio.id).map(|class| class.coach.clone()),
            )
        })
        .cloned()
        .collect();
    studios.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    studios
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassSearch {
    /// Case-insensitive substring of the class name.
    pub name: Option<String>,
    /// Case-insensitive substring of the coach name.
    pub coach: Option<String>,
    /// `HH:MM`; classes starting at or after it.
    pub after: Option<String>,
    /// `HH:MM`; classes ending at or before it.
    pub before: Option<String>,
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Classes of a studio matching every given filter, ordered by name.
pub fn search_classes(
    tables: &Tables,
    studio_id: StudioId,
    search: &ClassSearch,
) -> Result<Vec<Class>, BookingError> {
    tables.studio(studio_id)?;
    let after = search
        .after
        .as_deref()
        .map(|value| parse_clock_bound(value, NaiveTime::MIN));
    let before = search.before.as_deref().map(|value| {
        parse_clock_bound(value, NaiveTime::from_hms_opt(23, 59, 0).unwrap_or(NaiveTime::MIN))
    });

    let mut classes: Vec<Class> = tables
        .classes_of_studio(studio_id)
        .filter(|class| {
            search
                .name
                .as_deref()
                .is_none_or(|name| contains_ignore_case(&class.name, name))
        })
        .filter(|class| {
            search
                .coach
                .as_deref()
                .is_none_or(|coach| contains_ignore_case(&class.coach, coach))
        })
        .filter(|class| after.is_none_or(|after| class.start_time >= after))
        .filter(|class| before.is_none_or(|before| class.end_time <= before))
        .cloned()
        .collect();
    classes.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
    Ok(classes)
}
