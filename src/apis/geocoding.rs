use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::config::GeocoderConfig;
use crate::constants::GEOCODE_STATUS_OK;
use crate::error::{GeocoderError, Result};
use crate::types::{GeocodeResult, GeocodedLocation};

/// Address-to-coordinate lookup, one address per call.
///
/// `Ok(GeocodeResult::Rejected)` is the provider declining the address and is
/// recoverable. `Err` means the call itself failed (network, HTTP status,
/// unparseable body) and ends the geocoding loop.
pub trait Geocoder {
    fn geocode(&self, full_address: &str, api_key: &str) -> Result<GeocodeResult>;
}

/// Client for the Google Geocoding JSON API
pub struct GoogleGeocoder {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl GoogleGeocoder {
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

impl Geocoder for GoogleGeocoder {
    #[instrument(skip(self, api_key))]
    fn geocode(&self, full_address: &str, api_key: &str) -> Result<GeocodeResult> {
        let body = self
            .client
            .get(&self.endpoint)
            .query(&[("address", full_address), ("key", api_key)])
            .send()?
            .error_for_status()?
            .text()?;
        debug!("Geocoding response received ({} bytes)", body.len());
        parse_response(&body)
    }
}

#[derive(Debug, Deserialize)]
struct RawResponse {
    status: String,
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    formatted_address: String,
    geometry: ApiGeometry,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct ApiGeometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    #[serde(default)]
    types: Vec<String>,
    short_name: String,
}

/// Interpret a Geocoding API response body.
///
/// Only the literal `OK` status is a success. Anything else (including
/// `ZERO_RESULTS`, `OVER_QUERY_LIMIT`, `REQUEST_DENIED`) is a rejection. A
/// body that is not JSON, has no status, or claims success without a usable
/// first result is malformed.
pub fn parse_response(body: &str) -> Result<GeocodeResult> {
    let raw: RawResponse = serde_json::from_str(body)
        .map_err(|e| GeocoderError::MalformedResponse(format!("unparseable body: {}", e)))?;

    if raw.status != GEOCODE_STATUS_OK {
        if let Some(message) = &raw.error_message {
            debug!("Provider status {} with message: {}", raw.status, message);
        }
        return Ok(GeocodeResult::Rejected { status: raw.status });
    }

    let first = raw.results.into_iter().next().ok_or_else(|| {
        GeocoderError::MalformedResponse("status OK but results array is empty".to_string())
    })?;
    let result: ApiResult = serde_json::from_value(first)
        .map_err(|e| GeocoderError::MalformedResponse(format!("first result: {}", e)))?;

    let normalized_zip = compose_zip(&result.address_components);

    Ok(GeocodeResult::Success(GeocodedLocation {
        lat: result.geometry.location.lat,
        lon: result.geometry.location.lng,
        normalized_address: result.formatted_address,
        normalized_zip,
    }))
}

/// `postal_code` alone, or `postal_code-postal_code_suffix` when both are present
fn compose_zip(components: &[AddressComponent]) -> String {
    let first_of = |kind: &str| {
        components
            .iter()
            .find(|c| c.types.iter().any(|t| t == kind))
            .map(|c| c.short_name.trim())
            .filter(|s| !s.is_empty())
    };

    match (first_of("postal_code"), first_of("postal_code_suffix")) {
        (Some(zip), Some(suffix)) => format!("{}-{}", zip, suffix),
        (Some(zip), None) => zip.to_string(),
        (None, _) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    fn success_body(components: serde_json::Value) -> String {
        json!({
            "status": "OK",
            "results": [{
                "formatted_address": "100 N Main St, Chicago, IL 60601, USA",
                "geometry": { "location": { "lat": 41.88, "lng": -87.63 } },
                "address_components": components,
            }]
        })
        .to_string()
    }

    #[test]
    fn test_success_with_zip_plus_four() {
        let body = success_body(json!([
            { "types": ["street_number"], "short_name": "100" },
            { "types": ["postal_code"], "short_name": "60601" },
            { "types": ["postal_code_suffix"], "short_name": "1234" },
        ]));
        match parse_response(&body).unwrap() {
            GeocodeResult::Success(loc) => {
                assert_eq!(loc.lat, 41.88);
                assert_eq!(loc.lon, -87.63);
                assert_eq!(loc.normalized_zip, "60601-1234");
                assert_eq!(loc.normalized_address, "100 N Main St, Chicago, IL 60601, USA");
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_success_without_suffix_keeps_plain_zip() {
        let body = success_body(json!([{ "types": ["postal_code"], "short_name": "60601" }]));
        let GeocodeResult::Success(loc) = parse_response(&body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(loc.normalized_zip, "60601");
    }

    #[test]
    fn test_success_without_postal_code() {
        let body = success_body(json!([{ "types": ["locality", "political"], "short_name": "Chicago" }]));
        let GeocodeResult::Success(loc) = parse_response(&body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(loc.normalized_zip, "");
    }

    #[test]
    fn test_first_postal_component_wins() {
        let body = success_body(json!([
            { "types": ["postal_code"], "short_name": "60601" },
            { "types": ["postal_code"], "short_name": "60602" },
            { "types": ["postal_code_suffix"], "short_name": "1234" },
            { "types": ["postal_code_suffix"], "short_name": "9999" },
        ]));
        let GeocodeResult::Success(loc) = parse_response(&body).unwrap() else {
            panic!("expected success");
        };
        assert_eq!(loc.normalized_zip, "60601-1234");
    }

    #[test]
    fn test_zero_results_is_rejection() {
        let body = json!({ "status": "ZERO_RESULTS", "results": [] }).to_string();
        assert_eq!(
            parse_response(&body).unwrap(),
            GeocodeResult::Rejected { status: "ZERO_RESULTS".into() }
        );
    }

    #[test]
    fn test_request_denied_is_rejection() {
        let body = json!({
            "status": "REQUEST_DENIED",
            "error_message": "The provided API key is invalid.",
            "results": []
        })
        .to_string();
        assert!(!parse_response(&body).unwrap().is_success());
    }

    #[test]
    fn test_lowercase_ok_is_not_success() {
        let body = json!({ "status": "ok", "results": [] }).to_string();
        assert!(matches!(parse_response(&body).unwrap(), GeocodeResult::Rejected { .. }));
    }

    #[test]
    fn test_html_body_is_malformed() {
        let err = parse_response("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(err.is_transport());
    }

    #[test]
    fn test_ok_without_results_is_malformed() {
        let body = json!({ "status": "OK", "results": [] }).to_string();
        assert!(matches!(parse_response(&body), Err(GeocoderError::MalformedResponse(_))));
    }

    #[test]
    fn test_ok_without_geometry_is_malformed() {
        let body = json!({
            "status": "OK",
            "results": [{ "formatted_address": "somewhere" }]
        })
        .to_string();
        assert!(parse_response(&body).unwrap_err().is_transport());
    }

    /// Answers exactly one HTTP request with the given status and body, returning the raw request
    fn serve_once(status: &'static str, body: String) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).unwrap();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{}/maps/api/geocode/json", addr), handle)
    }

    fn client_for(endpoint: String) -> GoogleGeocoder {
        GoogleGeocoder::new(&GeocoderConfig {
            endpoint,
            timeout_seconds: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_client_sends_address_and_key_as_query() {
        let body = success_body(json!([{ "types": ["postal_code"], "short_name": "60601" }]));
        let (endpoint, server) = serve_once("200 OK", body);

        let result = client_for(endpoint)
            .geocode("100 Main St, Chicago, IL 60601, USA", "secret-key")
            .unwrap();
        let request = server.join().unwrap();

        let request_line = request.lines().next().unwrap();
        assert!(request_line.starts_with("GET /maps/api/geocode/json?"), "{request_line}");
        assert!(request_line.contains("address=100+Main+St%2C+Chicago%2C+IL+60601%2C+USA"));
        assert!(request_line.contains("key=secret-key"));
        assert!(result.is_success());
    }

    #[test]
    fn test_client_reports_provider_status_as_rejection() {
        let body = json!({ "status": "ZERO_RESULTS", "results": [] }).to_string();
        let (endpoint, server) = serve_once("200 OK", body);

        let result = client_for(endpoint).geocode("nowhere", "secret-key").unwrap();
        server.join().unwrap();

        assert_eq!(result, GeocodeResult::Rejected { status: "ZERO_RESULTS".into() });
    }

    #[test]
    fn test_client_http_error_status_is_fatal() {
        let (endpoint, server) = serve_once("500 Internal Server Error", "{}".to_string());

        let err = client_for(endpoint).geocode("100 Main St", "secret-key").unwrap_err();
        server.join().unwrap();

        assert!(matches!(err, GeocoderError::Http(_)), "got {err:?}");
        assert!(err.is_transport());
    }
}
