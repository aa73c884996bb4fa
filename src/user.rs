//! User records as stored under `users/{uid}`.
//!
//! The core never writes profile fields; it reads records, filters copies
//! of them and maintains the `location`/`geohash` pair.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::location::GeoPoint;

/// Collection holding one record per user.
pub const USERS_COLLECTION: &str = "users";

/// Per-user privacy preferences, stored as `privacySettings`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools)]
pub struct PrivacySettings {
    /// Lets trackers see the mobile number.
    pub share_mobile_number: bool,
    /// Lists the user in proximity results.
    pub share_location: bool,
    /// Accepts incoming friend requests.
    pub allow_friend_requests: bool,
    /// Accepts incoming tracker requests.
    pub allow_tracker_requests: bool,
    /// Shows online status to others.
    pub show_online_status: bool,
    /// Accepts SOS alerts from trackers.
    #[serde(rename = "allowSOSAlerts")]
    pub allow_sos_alerts: bool,
}

impl PrivacySettings {
    /// Reads settings from a stored `privacySettings` object.
    ///
    /// Keys that are missing or not booleans keep their default. Returns
    /// `None` when `value` is not an object.
    #[must_use]
    pub fn from_value_lenient(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut settings = Self::default();
        let flags: [(&str, &mut bool); 6] = [
            ("shareMobileNumber", &mut settings.share_mobile_number),
            ("shareLocation", &mut settings.share_location),
            ("allowFriendRequests", &mut settings.allow_friend_requests),
            ("allowTrackerRequests", &mut settings.allow_tracker_requests),
            ("showOnlineStatus", &mut settings.show_online_status),
            ("allowSOSAlerts", &mut settings.allow_sos_alerts),
        ];
        for (key, flag) in flags {
            if let Some(stored) = object.get(key).and_then(Value::as_bool) {
                *flag = stored;
            }
        }
        Some(settings)
    }
}

impl Default for PrivacySettings {
    fn default() -> Self {
        Self {
            share_mobile_number: false, // Opt-in only
            share_location: true,
            allow_friend_requests: true,
            allow_tracker_requests: true,
            show_online_status: true,
            allow_sos_alerts: true,
        }
    }
}

/// Record fields that are redacted unless the viewer holds the matching
/// capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatedField {
    /// `photoURL`
    PhotoUrl,
    /// `driverName`
    DriverName,
    /// `vehicleName`
    VehicleName,
    /// `vehicleNumber`
    VehicleNumber,
    /// `phone`
    Phone,
    /// `location`
    Location,
    /// `geohash` (encodes the location)
    Geohash,
}

impl GatedField {
    /// Every gated field.
    pub const ALL: [Self; 7] = [
        Self::PhotoUrl,
        Self::DriverName,
        Self::VehicleName,
        Self::VehicleNumber,
        Self::Phone,
        Self::Location,
        Self::Geohash,
    ];

    /// Returns the field name used in stored records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PhotoUrl => "photoURL",
            Self::DriverName => "driverName",
            Self::VehicleName => "vehicleName",
            Self::VehicleNumber => "vehicleNumber",
            Self::Phone => "phone",
            Self::Location => "location",
            Self::Geohash => "geohash",
        }
    }
}

/// A user's profile and location record.
///
/// Known fields are typed; anything else is kept verbatim in `extra` and
/// passes through filtering untouched.
///
/// Decoding never fails on a field of the wrong type. Such a field is read
/// as absent and dropped, so a malformed gated value cannot reach `extra`
/// and bypass redaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    /// Driver display name.
    pub driver_name: Option<String>,
    /// Vehicle make/model.
    pub vehicle_name: Option<String>,
    /// Registration plate.
    pub vehicle_number: Option<String>,
    /// Mobile number (E.164).
    pub phone: Option<String>,
    /// Profile photo URL.
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    /// Last known position.
    pub location: Option<GeoPoint>,
    /// Geohash of `location`.
    pub geohash: Option<String>,
    /// Privacy preferences; defaults apply when absent.
    pub privacy_settings: Option<PrivacySettings>,
    /// Fields the core does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for UserRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Map::<String, Value>::deserialize(deserializer).map(Self::from_fields)
    }
}

impl UserRecord {
    /// Builds a record from stored fields, tolerating unexpected types.
    ///
    /// Known fields of the wrong type are discarded with a debug log.
    /// `privacySettings` is read with [`PrivacySettings::from_value_lenient`].
    #[must_use]
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let mut text = |field: GatedField| take_typed::<String>(&mut fields, field.as_str());
        let driver_name = text(GatedField::DriverName);
        let vehicle_name = text(GatedField::VehicleName);
        let vehicle_number = text(GatedField::VehicleNumber);
        let phone = text(GatedField::Phone);
        let photo_url = text(GatedField::PhotoUrl);
        let geohash = text(GatedField::Geohash);
        let location = take_typed::<GeoPoint>(&mut fields, GatedField::Location.as_str());
        let privacy_settings = fields
            .remove("privacySettings")
            .and_then(|value| PrivacySettings::from_value_lenient(&value));

        Self {
            driver_name,
            vehicle_name,
            vehicle_number,
            phone,
            photo_url,
            location,
            geohash,
            privacy_settings,
            extra: fields,
        }
    }

    /// Returns the effective privacy settings.
    #[must_use]
    pub fn privacy(&self) -> PrivacySettings {
        self.privacy_settings.unwrap_or_default()
    }

    /// Returns whether the gated field holds a value.
    #[must_use]
    pub const fn has(&self, field: GatedField) -> bool {
        match field {
            GatedField::PhotoUrl => self.photo_url.is_some(),
            GatedField::DriverName => self.driver_name.is_some(),
            GatedField::VehicleName => self.vehicle_name.is_some(),
            GatedField::VehicleNumber => self.vehicle_number.is_some(),
            GatedField::Phone => self.phone.is_some(),
            GatedField::Location => self.location.is_some(),
            GatedField::Geohash => self.geohash.is_some(),
        }
    }

    /// Clears the gated field.
    pub fn clear(&mut self, field: GatedField) {
        match field {
            GatedField::PhotoUrl => self.photo_url = None,
            GatedField::DriverName => self.driver_name = None,
            GatedField::VehicleName => self.vehicle_name = None,
            GatedField::VehicleNumber => self.vehicle_number = None,
            GatedField::Phone => self.phone = None,
            GatedField::Location => self.location = None,
            GatedField::Geohash => self.geohash = None,
        }
    }
}

/// Removes `key` and decodes it, treating null or mistyped values as absent.
fn take_typed<T: serde::de::DeserializeOwned>(
    fields: &mut Map<String, Value>,
    key: &str,
) -> Option<T> {
    match fields.remove(key)? {
        Value::Null => None,
        value => match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(err) => {
                tracing::debug!(field = key, error = %err, "ignoring mistyped user field");
                None
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn full_record() -> UserRecord {
        serde_json::from_value(json!({
            "driverName": "Ravi",
            "vehicleName": "Royal Enfield",
            "vehicleNumber": "KA01AB1234",
            "phone": "+919800000000",
            "photoURL": "https://example.com/ravi.jpg",
            "location": {"latitude": 12.97, "longitude": 77.59},
            "geohash": "tdr1y",
            "createdAt": 1_700_000_000_000_i64,
        }))
        .unwrap()
    }

    #[test]
    fn deserializes_known_and_extra_fields() {
        let record = full_record();
        assert_eq!(record.driver_name.as_deref(), Some("Ravi"));
        assert_eq!(record.photo_url.as_deref(), Some("https://example.com/ravi.jpg"));
        assert_eq!(record.location.unwrap().latitude, 12.97);
        assert_eq!(record.extra["createdAt"], json!(1_700_000_000_000_i64));
        assert!(!record.extra.contains_key("driverName"));
    }

    #[test]
    fn missing_fields_deserialize_as_none() {
        let record: UserRecord = serde_json::from_value(json!({})).unwrap();
        for field in GatedField::ALL {
            assert!(!record.has(field));
        }
        assert_eq!(record.privacy(), PrivacySettings::default());
    }

    #[test]
    fn cleared_fields_serialize_as_null() {
        let mut record = full_record();
        record.clear(GatedField::PhotoUrl);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["photoURL"], Value::Null);
        assert_eq!(json["createdAt"], json!(1_700_000_000_000_i64));
    }

    #[test]
    fn clear_affects_only_named_field() {
        for field in GatedField::ALL {
            let mut record = full_record();
            record.clear(field);
            for other in GatedField::ALL {
                assert_eq!(record.has(other), other != field);
            }
        }
    }

    #[test]
    fn privacy_settings_defaults() {
        let settings = PrivacySettings::default();
        assert!(!settings.share_mobile_number);
        assert!(settings.share_location);
        assert!(settings.allow_friend_requests);
        assert!(settings.allow_tracker_requests);
        assert!(settings.show_online_status);
        assert!(settings.allow_sos_alerts);
    }

    #[test]
    fn privacy_settings_partial_json() {
        let settings: PrivacySettings =
            serde_json::from_value(json!({"shareMobileNumber": true, "allowSOSAlerts": false}))
                .unwrap();
        assert!(settings.share_mobile_number);
        assert!(!settings.allow_sos_alerts);
        assert!(settings.share_location);
    }

    #[test]
    fn mistyped_fields_are_dropped_not_fatal() {
        let record: UserRecord = serde_json::from_value(json!({
            "driverName": "Ravi",
            "vehicleNumber": 1234,
            "phone": 5_551_234,
            "location": {"latitude": 12.97, "longitude": 77.59},
            "privacySettings": {"shareLocation": "yes", "shareMobileNumber": true},
            "createdAt": 1,
        }))
        .unwrap();

        assert_eq!(record.driver_name.as_deref(), Some("Ravi"));
        assert!(record.vehicle_number.is_none());
        assert!(record.phone.is_none());
        assert!(record.location.is_some());
        assert!(!record.extra.contains_key("vehicleNumber"));
        assert!(!record.extra.contains_key("phone"));
        assert_eq!(record.extra["createdAt"], json!(1));

        let privacy = record.privacy();
        assert!(privacy.share_mobile_number);
        assert!(privacy.share_location);
    }

    #[test]
    fn mistyped_location_and_privacy_fall_back() {
        let record = UserRecord::from_fields(
            json!({"location": "somewhere", "privacySettings": [true], "geohash": null})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert!(record.location.is_none());
        assert!(record.geohash.is_none());
        assert!(record.privacy_settings.is_none());
        assert!(record.extra.is_empty());
    }

    #[test]
    fn non_object_record_is_rejected() {
        assert!(serde_json::from_value::<UserRecord>(json!([1, 2])).is_err());
    }

    #[test]
    fn gated_field_names() {
        assert_eq!(GatedField::PhotoUrl.as_str(), "photoURL");
        assert_eq!(GatedField::Geohash.as_str(), "geohash");
    }
}
