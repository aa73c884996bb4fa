//! Tier-to-capability table and record filtering.
//!
//! Everything here is pure: no I/O, no state. [`permissions_for`] is the
//! fixed table; [`permissions_for_viewer`] additionally applies the target's
//! mobile-number opt-in; [`filter_record`] redacts a copy of a record.

use serde::{Deserialize, Serialize};

use super::types::UserCategory;
use crate::user::{GatedField, PrivacySettings, UserRecord};

/// A single visibility or feature flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// See the profile at all.
    SeeProfile,
    /// See the profile photo.
    SeePhoto,
    /// See the driver name.
    SeeDriverName,
    /// See the vehicle make/model.
    SeeVehicleName,
    /// See the registration plate.
    SeeVehicleNumber,
    /// See the mobile number.
    SeeMobileNumber,
    /// See the current location.
    SeeLocation,
    /// See the live route.
    SeeLiveRoute,
    /// Start a chat.
    Chat,
    /// Add to a group.
    AddToGroup,
    /// Track the route.
    TrackRoute,
    /// Follow the ride.
    FollowRide,
    /// Receive SOS alerts from the user.
    ReceiveSos,
    /// Send SOS alerts to the user.
    SendSos,
}

impl Capability {
    /// Every capability.
    pub const ALL: [Self; 14] = [
        Self::SeeProfile,
        Self::SeePhoto,
        Self::SeeDriverName,
        Self::SeeVehicleName,
        Self::SeeVehicleNumber,
        Self::SeeMobileNumber,
        Self::SeeLocation,
        Self::SeeLiveRoute,
        Self::Chat,
        Self::AddToGroup,
        Self::TrackRoute,
        Self::FollowRide,
        Self::ReceiveSos,
        Self::SendSos,
    ];
}

/// Capability flags a viewer holds over one target user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::struct_excessive_bools)]
pub struct PermissionSet {
    /// See the profile at all.
    pub can_see_profile: bool,
    /// See the profile photo.
    pub can_see_photo: bool,
    /// See the driver name.
    pub can_see_driver_name: bool,
    /// See the vehicle make/model.
    pub can_see_vehicle_name: bool,
    /// See the registration plate.
    pub can_see_vehicle_number: bool,
    /// See the mobile number.
    pub can_see_mobile_number: bool,
    /// See the current location.
    pub can_see_location: bool,
    /// See the live route.
    pub can_see_live_route: bool,
    /// Start a chat.
    pub can_chat: bool,
    /// Add to a group.
    pub can_add_to_group: bool,
    /// Track the route.
    pub can_track_route: bool,
    /// Follow the ride.
    pub can_follow_ride: bool,
    /// Receive SOS alerts.
    pub can_receive_sos: bool,
    /// Send SOS alerts.
    pub can_send_sos: bool,
}

impl PermissionSet {
    /// Returns whether the set grants `capability`.
    #[must_use]
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::SeeProfile => self.can_see_profile,
            Capability::SeePhoto => self.can_see_photo,
            Capability::SeeDriverName => self.can_see_driver_name,
            Capability::SeeVehicleName => self.can_see_vehicle_name,
            Capability::SeeVehicleNumber => self.can_see_vehicle_number,
            Capability::SeeMobileNumber => self.can_see_mobile_number,
            Capability::SeeLocation => self.can_see_location,
            Capability::SeeLiveRoute => self.can_see_live_route,
            Capability::Chat => self.can_chat,
            Capability::AddToGroup => self.can_add_to_group,
            Capability::TrackRoute => self.can_track_route,
            Capability::FollowRide => self.can_follow_ride,
            Capability::ReceiveSos => self.can_receive_sos,
            Capability::SendSos => self.can_send_sos,
        }
    }
}

const STRANGER: PermissionSet = PermissionSet {
    can_see_profile: false,
    can_see_photo: false,
    can_see_driver_name: false,
    can_see_vehicle_name: true,
    can_see_vehicle_number: true,
    can_see_mobile_number: false,
    can_see_location: false,
    can_see_live_route: false,
    can_chat: false,
    can_add_to_group: false,
    can_track_route: false,
    can_follow_ride: false,
    can_receive_sos: false,
    can_send_sos: false,
};

const FRIEND: PermissionSet = PermissionSet {
    can_see_profile: true,
    can_see_photo: true,
    can_see_driver_name: true,
    can_see_vehicle_name: true,
    can_see_vehicle_number: false,
    can_see_mobile_number: false,
    can_see_location: false,
    can_see_live_route: false,
    can_chat: true,
    can_add_to_group: true,
    can_track_route: false,
    can_follow_ride: false,
    can_receive_sos: false,
    can_send_sos: false,
};

// Mobile number stays off here; only the target's opt-in turns it on.
const TRACKER: PermissionSet = PermissionSet {
    can_see_profile: true,
    can_see_photo: true,
    can_see_driver_name: true,
    can_see_vehicle_name: true,
    can_see_vehicle_number: true,
    can_see_mobile_number: false,
    can_see_location: true,
    can_see_live_route: true,
    can_chat: true,
    can_add_to_group: true,
    can_track_route: true,
    can_follow_ride: true,
    can_receive_sos: true,
    can_send_sos: true,
};

/// Returns the fixed permission set for a tier.
///
/// # Examples
///
/// ```
/// use convoy_core::access::{permissions_for, Capability, UserCategory};
///
/// let stranger = permissions_for(UserCategory::Stranger);
/// assert!(stranger.allows(Capability::SeeVehicleNumber));
/// assert!(!stranger.allows(Capability::SeePhoto));
/// ```
#[must_use]
pub const fn permissions_for(category: UserCategory) -> PermissionSet {
    match category {
        UserCategory::Stranger => STRANGER,
        UserCategory::Friend => FRIEND,
        UserCategory::Tracker => TRACKER,
    }
}

/// Returns the permission set for a viewer of `category` looking at a user
/// with the given privacy settings.
///
/// The mobile number is visible only to trackers, and only if the target
/// opted in with `share_mobile_number`.
#[must_use]
pub const fn permissions_for_viewer(
    category: UserCategory,
    target_privacy: &PrivacySettings,
) -> PermissionSet {
    let mut permissions = permissions_for(category);
    permissions.can_see_mobile_number = matches!(category, UserCategory::Tracker)
        && target_privacy.share_mobile_number;
    permissions
}

/// Capability required to see a gated record field.
#[must_use]
pub const fn capability_for(field: GatedField) -> Capability {
    match field {
        GatedField::PhotoUrl => Capability::SeePhoto,
        GatedField::DriverName => Capability::SeeDriverName,
        GatedField::VehicleName => Capability::SeeVehicleName,
        GatedField::VehicleNumber => Capability::SeeVehicleNumber,
        GatedField::Phone => Capability::SeeMobileNumber,
        GatedField::Location | GatedField::Geohash => Capability::SeeLocation,
    }
}

/// Returns a copy of `record` with every gated field the permissions do
/// not allow cleared. Fields the core does not know pass through.
#[must_use]
pub fn filter_record(record: &UserRecord, permissions: &PermissionSet) -> UserRecord {
    let mut filtered = record.clone();
    for field in GatedField::ALL {
        if !permissions.allows(capability_for(field)) {
            filtered.clear(field);
        }
    }
    filtered
}
