//! Best-effort reverse geocoding.
//!
//! Chat-bridge summaries mention the nearest place name when one can be
//! found. Lookups go to a Nominatim-compatible `/reverse` endpoint over
//! HTTP via `reqwest`. Any failure is logged at `warn` and the place name
//! is simply left out; it never fails the summary.

use std::time::Duration;

use skyrelay_core::config::GeocodingConfig;
use tracing::warn;

/// Errors from a single reverse-geocoding call.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// The HTTP request could not be completed.
    #[error("geocoder request failed: {0}")]
    Request(String),

    /// The service answered with a non-success status.
    #[error("geocoder returned {0}")]
    Status(u16),

    /// The answer carried no usable place name (e.g. open ocean).
    #[error("no place name at this position")]
    NoPlace,
}

/// A reverse geocoder, or none.
///
/// Uses enum dispatch rather than a trait object because the lookup is an
/// async method.
#[derive(Debug, Clone)]
pub enum Geocoder {
    /// A Nominatim-compatible HTTP service.
    Nominatim(NominatimGeocoder),
    /// Lookups disabled; every position has no place name.
    Disabled,
}

impl Geocoder {
    /// Build the geocoder described by `config`.
    ///
    /// Falls back to [`Geocoder::Disabled`] if lookups are turned off or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &GeocodingConfig) -> Self {
        if !config.enabled {
            return Self::Disabled;
        }
        match NominatimGeocoder::new(config) {
            Ok(geocoder) => Self::Nominatim(geocoder),
            Err(e) => {
                warn!(error = %e, "Geocoder unavailable, place names disabled");
                Self::Disabled
            }
        }
    }

    /// Nearest place name for a position, if one can be found.
    pub async fn place_name(&self, latitude: f64, longitude: f64) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::Nominatim(geocoder) => match geocoder.reverse(latitude, longitude).await {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(latitude, longitude, error = %e, "Reverse geocoding failed");
                    None
                }
            },
        }
    }

    /// Human-readable name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Nominatim(_) => "nominatim",
            Self::Disabled => "disabled",
        }
    }
}

/// Client for a Nominatim-compatible `/reverse` endpoint.
#[derive(Debug, Clone)]
pub struct NominatimGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl NominatimGeocoder {
    /// Create a client with the configured user agent and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError::Request`] if the HTTP client cannot be built.
    pub fn new(config: &GeocodingConfig) -> Result<Self, GeocodeError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GeocodeError::Request(format!("client build failed: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        })
    }

    /// Look up the place nearest to a position.
    ///
    /// # Errors
    ///
    /// Returns [`GeocodeError`] if the call fails or names no place.
    pub async fn reverse(&self, latitude: f64, longitude: f64) -> Result<String, GeocodeError> {
        let url = format!("{}/reverse", self.base_url);
        let lat = format!("{latitude:.6}");
        let lon = format!("{longitude:.6}");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("format", "jsonv2"),
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("zoom", "10"),
            ])
            .send()
            .await
            .map_err(|e| GeocodeError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GeocodeError::Request(format!("response parse failed: {e}")))?;

        extract_place_name(&json).ok_or(GeocodeError::NoPlace)
    }
}

/// Pick a short place name out of a Nominatim `jsonv2` answer.
///
/// Prefers `"<locality>, <country>"` from the address block, falling back
/// to the full `display_name`.
fn extract_place_name(json: &serde_json::Value) -> Option<String> {
    let address = json.get("address");
    let field = |name: &str| {
        address
            .and_then(|a| a.get(name))
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
    };

    let locality = ["city", "town", "village", "municipality", "county", "state"]
        .into_iter()
        .find_map(&field);

    match (locality, field("country")) {
        (Some(place), Some(country)) => Some(format!("{place}, {country}")),
        (Some(place), None) => Some(place.to_owned()),
        _ => json
            .get("display_name")
            .and_then(serde_json::Value::as_str)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_locality_and_country() {
        let json = serde_json::json!({
            "display_name": "Hounslow, Greater London, England, United Kingdom",
            "address": {"town": "Hounslow", "country": "United Kingdom"}
        });
        assert_eq!(
            extract_place_name(&json).as_deref(),
            Some("Hounslow, United Kingdom")
        );
    }

    #[test]
    fn falls_back_to_display_name() {
        let json = serde_json::json!({"display_name": "North Atlantic Ocean"});
        assert_eq!(
            extract_place_name(&json).as_deref(),
            Some("North Atlantic Ocean")
        );
    }

    #[test]
    fn error_answer_has_no_place() {
        let json = serde_json::json!({"error": "Unable to geocode"});
        assert_eq!(extract_place_name(&json), None);
    }

    #[tokio::test]
    async fn disabled_geocoder_names_nothing() {
        let geocoder = Geocoder::from_config(&GeocodingConfig::default());
        assert_eq!(geocoder.name(), "disabled");
        assert_eq!(geocoder.place_name(51.47, -0.45).await, None);
    }

    #[tokio::test]
    async fn unreachable_service_degrades_to_none() {
        let config = GeocodingConfig {
            enabled: true,
            base_url: String::from("http://127.0.0.1:9"),
            timeout_ms: 200,
            ..GeocodingConfig::default()
        };
        let geocoder = Geocoder::from_config(&config);
        assert_eq!(geocoder.name(), "nominatim");
        assert_eq!(geocoder.place_name(0.0, 0.0).await, None);
    }
}
