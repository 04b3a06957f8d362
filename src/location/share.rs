//! Human-shareable renderings of a fix.

use chrono::{DateTime, Local};

use crate::constants::ROUTE_LINK_BASE;
use crate::models::LocationSample;
use crate::utils::format_timestamp;

/// Text for sharing the current position with someone.
pub fn share_message(sample: &LocationSample, at: &DateTime<Local>) -> String {
    format!(
        "My current location: {}\nShared at: {}",
        sample.map_link(),
        format_timestamp(at)
    )
}

/// Walking directions from the fix to a free-text destination.
pub fn route_link(sample: &LocationSample, destination: &str) -> String {
    format!(
        "{}&origin={},{}&destination={}&travelmode=walking",
        ROUTE_LINK_BASE,
        sample.latitude,
        sample.longitude,
        urlencoding::encode(destination)
    )
}
