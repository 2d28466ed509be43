use maxminddb::{MaxMindDBError, Reader};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum GeoIpError {
    #[error("Failed to open GeoIP database: {0}")]
    DatabaseOpenError(#[source] MaxMindDBError),
    #[error("{0:?} is not a valid IP address")]
    InvalidAddress(String),
    #[error("{0} is a loopback address")]
    LoopbackAddress(IpAddr),
    #[error("no GeoIP entry for {0}")]
    NotFound(IpAddr),
    #[error("GeoIP lookup failed: {0}")]
    LookupError(#[source] MaxMindDBError),
}

/// Localized names (locale code -> name) of the city and country an address resolves to.
/// Either map may be empty when the database has no such entry for the address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationNames {
    pub city: HashMap<String, String>,
    pub country: HashMap<String, String>,
}

// Only the names are decoded out of a City record, the rest of the entry is skipped.
#[derive(Deserialize, Debug, Default)]
struct CityRecord {
    city: Option<NamedPlace>,
    country: Option<NamedPlace>,
}

#[derive(Deserialize, Debug, Default)]
struct NamedPlace {
    #[serde(default)]
    names: HashMap<String, String>,
}

impl From<CityRecord> for LocationNames {
    fn from(record: CityRecord) -> Self {
        LocationNames {
            city: record.city.map(|c| c.names).unwrap_or_default(),
            country: record.country.map(|c| c.names).unwrap_or_default(),
        }
    }
}

pub struct GeoIpClient {
    reader: Reader<Vec<u8>>,
}

impl GeoIpClient {
    /// Opens a GeoIP2/GeoLite2 City database.
    /// Returns an error if the database can't be loaded.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, GeoIpError> {
        let db_path = db_path.as_ref();
        debug!("Attempting to open GeoIP database at: {:?}", db_path);

        let reader = Reader::open_readfile(db_path).map_err(GeoIpError::DatabaseOpenError)?;
        info!(
            database_type = %reader.metadata.database_type,
            "Successfully opened GeoIP database"
        );

        Ok(GeoIpClient { reader })
    }

    /// Returns the localized city and country names for the given ip address.
    pub fn lookup_names(&self, ip: &str) -> Result<LocationNames, GeoIpError> {
        let ip = parse_ip(ip)?;

        match self.reader.lookup::<CityRecord>(ip) {
            Ok(record) => Ok(record.into()),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Err(GeoIpError::NotFound(ip)),
            Err(e) => Err(GeoIpError::LookupError(e)),
        }
    }
}

/// Parses a textual address, rejecting loopback addresses which are never in the database.
pub fn parse_ip(ip: &str) -> Result<IpAddr, GeoIpError> {
    let res = IpAddr::from_str(ip.trim()).map_err(|_| GeoIpError::InvalidAddress(ip.to_owned()))?;

    if res.is_loopback() {
        Err(GeoIpError::LoopbackAddress(res))
    } else {
        Ok(res)
    }
}
