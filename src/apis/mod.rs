pub mod geocoding;

pub use geocoding::{Geocoder, GoogleGeocoder};
