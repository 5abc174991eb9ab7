//! Relation handshake records exchanged between sites
//!
//! The inter-site transport carries flat string key/value pairs. This module
//! gives those pairs a typed shape and encodes the completeness rule: a
//! receiving site only acts once every required field has arrived, so a pass
//! with partial inbound data defers instead of erroring.

use std::collections::BTreeMap;

use crate::admin::{SyncFlowType, UserCreds};
use crate::Result;

/// Wire key for the realm name
pub const REALM: &str = "realm";
/// Wire key for the zonegroup name
pub const ZONEGROUP: &str = "zonegroup";
/// Wire key for the primary gateway URL
pub const URL: &str = "url";
/// Wire key for the sync user access key
pub const ACCESS_KEY: &str = "access_key";
/// Wire key for the sync user secret key
pub const SECRET: &str = "secret";
/// Wire key for the secondary zone name
pub const ZONE: &str = "zone";
/// Wire key for the requested sync flow type
pub const SYNC_POLICY_FLOW_TYPE: &str = "sync_policy_flow_type";
/// Wire key for the secondary zone's storage tier
pub const ZONE_TIER_TYPE: &str = "zone_tier_type";
/// Wire key for a provisioned gateway user id
pub const UID: &str = "uid";

fn non_empty(map: &BTreeMap<String, String>, key: &str) -> Option<String> {
    map.get(key).filter(|v| !v.is_empty()).cloned()
}

/// Complete record published by a primary site
///
/// A secondary site may only pull the realm and create its zone once all of
/// these fields have arrived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PrimaryRecord {
    /// Realm name the primary created
    pub realm: String,
    /// Zonegroup name the primary created
    pub zonegroup: String,
    /// URL of the primary gateway to pull the realm from
    pub url: String,
    /// Credentials of the multisite system user
    pub creds: UserCreds,
}

impl PrimaryRecord {
    /// Parse inbound relation data; None while any required field is missing
    pub fn from_map(map: &BTreeMap<String, String>) -> Option<Self> {
        Some(Self {
            realm: non_empty(map, REALM)?,
            zonegroup: non_empty(map, ZONEGROUP)?,
            url: non_empty(map, URL)?,
            creds: UserCreds::new(non_empty(map, ACCESS_KEY)?, non_empty(map, SECRET)?),
        })
    }
}

/// Build the key/value pairs a primary site publishes.
///
/// Published on every pass, even before the system user exists; credentials
/// are added once known, which is what completes the record for the peer.
pub fn primary_advert(
    realm: &str,
    zonegroup: &str,
    url: &str,
    creds: Option<&UserCreds>,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(REALM.to_string(), realm.to_string());
    map.insert(ZONEGROUP.to_string(), zonegroup.to_string());
    map.insert(URL.to_string(), url.to_string());
    if let Some(creds) = creds {
        map.insert(ACCESS_KEY.to_string(), creds.access_key.clone());
        map.insert(SECRET.to_string(), creds.secret_key.clone());
    }
    map
}

/// Complete record published back by a secondary site
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecondaryRecord {
    /// Zone name the secondary created
    pub zone: String,
    /// Sync flow direction the secondary requests
    pub flow_type: SyncFlowType,
    /// Storage tier of the secondary zone, when declared
    pub zone_tier_type: Option<String>,
}

impl SecondaryRecord {
    /// Parse inbound relation data; Ok(None) while required fields are
    /// missing, Err on a malformed flow type.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Option<Self>> {
        let (Some(zone), Some(flow)) = (
            non_empty(map, ZONE),
            non_empty(map, SYNC_POLICY_FLOW_TYPE),
        ) else {
            return Ok(None);
        };

        Ok(Some(Self {
            zone,
            flow_type: flow.parse()?,
            zone_tier_type: non_empty(map, ZONE_TIER_TYPE),
        }))
    }
}

/// Build the key/value pairs a secondary site publishes.
///
/// The flow type goes out as soon as inbound data is complete; the zone name
/// and tier follow once the zone exists.
pub fn secondary_advert(
    zone: Option<&str>,
    flow_type: SyncFlowType,
    zone_tier_type: Option<&str>,
) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert(SYNC_POLICY_FLOW_TYPE.to_string(), flow_type.to_string());
    if let Some(zone) = zone {
        map.insert(ZONE.to_string(), zone.to_string());
    }
    if let Some(tier) = zone_tier_type {
        map.insert(ZONE_TIER_TYPE.to_string(), tier.to_string());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_primary_map() -> BTreeMap<String, String> {
        primary_advert(
            "replicated",
            "rgw-east",
            "http://east.example.com:80",
            Some(&UserCreds::new("AK", "SK")),
        )
    }

    #[test]
    fn primary_record_requires_every_field() {
        let map = complete_primary_map();
        let record = PrimaryRecord::from_map(&map).unwrap();
        assert_eq!(record.realm, "replicated");
        assert_eq!(record.creds.access_key, "AK");

        for key in [REALM, ZONEGROUP, URL, ACCESS_KEY, SECRET] {
            let mut partial = complete_primary_map();
            partial.remove(key);
            assert!(
                PrimaryRecord::from_map(&partial).is_none(),
                "record parsed without {}",
                key
            );
        }
    }

    #[test]
    fn empty_values_count_as_missing() {
        let mut map = complete_primary_map();
        map.insert(SECRET.to_string(), String::new());
        assert!(PrimaryRecord::from_map(&map).is_none());
    }

    #[test]
    fn primary_advert_omits_unknown_creds() {
        let map = primary_advert("replicated", "rgw-east", "http://east", None);
        assert!(!map.contains_key(ACCESS_KEY));
        assert!(!map.contains_key(SECRET));
        assert_eq!(map.get(URL).map(String::as_str), Some("http://east"));
    }

    #[test]
    fn secondary_record_defers_until_complete() {
        let map = secondary_advert(None, SyncFlowType::Symmetrical, None);
        assert_eq!(SecondaryRecord::from_map(&map).unwrap(), None);

        let map = secondary_advert(Some("west-1"), SyncFlowType::Symmetrical, Some("cloud"));
        let record = SecondaryRecord::from_map(&map).unwrap().unwrap();
        assert_eq!(record.zone, "west-1");
        assert_eq!(record.flow_type, SyncFlowType::Symmetrical);
        assert_eq!(record.zone_tier_type.as_deref(), Some("cloud"));
    }

    #[test]
    fn malformed_flow_type_is_an_error_not_a_deferral() {
        let mut map = secondary_advert(Some("west-1"), SyncFlowType::Symmetrical, None);
        map.insert(SYNC_POLICY_FLOW_TYPE.to_string(), "sideways".to_string());
        assert!(SecondaryRecord::from_map(&map).is_err());
    }
}
