//! Destination lookup and shipping fee tiers.

use crate::{config::ShippingConfig, errors::ServiceError};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShippingZone {
    DhakaCity,
    DhakaOutside,
    OtherDistrict,
}

const DHAKA_CITY: ShippingZone = ShippingZone::DhakaCity;
const DHAKA_OUTSIDE: ShippingZone = ShippingZone::DhakaOutside;
const OTHER: ShippingZone = ShippingZone::OtherDistrict;

type DistrictTable = HashMap<&'static str, HashMap<&'static str, ShippingZone>>;

const DISTRICTS: &[(&str, &[(&str, ShippingZone)])] = &[
    (
        "Dhaka",
        &[
            ("Dhanmondi", DHAKA_CITY),
            ("Gulshan", DHAKA_CITY),
            ("Mirpur", DHAKA_CITY),
            ("Mohammadpur", DHAKA_CITY),
            ("Motijheel", DHAKA_CITY),
            ("Uttara", DHAKA_CITY),
            ("Tejgaon", DHAKA_CITY),
            ("Ramna", DHAKA_CITY),
            ("Khilgaon", DHAKA_CITY),
            ("Badda", DHAKA_CITY),
            ("Lalbagh", DHAKA_CITY),
            ("Kotwali", DHAKA_CITY),
            ("Pallabi", DHAKA_CITY),
            ("Cantonment", DHAKA_CITY),
            ("Savar", DHAKA_OUTSIDE),
            ("Keraniganj", DHAKA_OUTSIDE),
            ("Dhamrai", DHAKA_OUTSIDE),
            ("Dohar", DHAKA_OUTSIDE),
            ("Nawabganj", DHAKA_OUTSIDE),
        ],
    ),
    (
        "Gazipur",
        &[
            ("Gazipur Sadar", DHAKA_OUTSIDE),
            ("Kaliakair", DHAKA_OUTSIDE),
            ("Kaliganj", DHAKA_OUTSIDE),
            ("Kapasia", DHAKA_OUTSIDE),
            ("Sreepur", DHAKA_OUTSIDE),
        ],
    ),
    (
        "Narayanganj",
        &[
            ("Narayanganj Sadar", DHAKA_OUTSIDE),
            ("Araihazar", DHAKA_OUTSIDE),
            ("Bandar", DHAKA_OUTSIDE),
            ("Rupganj", DHAKA_OUTSIDE),
            ("Sonargaon", DHAKA_OUTSIDE),
        ],
    ),
    (
        "Chattogram",
        &[
            ("Chattogram Sadar", OTHER),
            ("Hathazari", OTHER),
            ("Patiya", OTHER),
            ("Sitakunda", OTHER),
            ("Raozan", OTHER),
        ],
    ),
    (
        "Sylhet",
        &[
            ("Sylhet Sadar", OTHER),
            ("Beanibazar", OTHER),
            ("Golapganj", OTHER),
            ("Companiganj", OTHER),
        ],
    ),
    (
        "Rajshahi",
        &[
            ("Rajshahi Sadar", OTHER),
            ("Paba", OTHER),
            ("Godagari", OTHER),
            ("Bagha", OTHER),
        ],
    ),
    (
        "Khulna",
        &[
            ("Khulna Sadar", OTHER),
            ("Dumuria", OTHER),
            ("Batiaghata", OTHER),
            ("Rupsha", OTHER),
        ],
    ),
    (
        "Barishal",
        &[
            ("Barishal Sadar", OTHER),
            ("Bakerganj", OTHER),
            ("Banaripara", OTHER),
        ],
    ),
    (
        "Rangpur",
        &[
            ("Rangpur Sadar", OTHER),
            ("Badarganj", OTHER),
            ("Mithapukur", OTHER),
        ],
    ),
    (
        "Mymensingh",
        &[
            ("Mymensingh Sadar", OTHER),
            ("Muktagachha", OTHER),
            ("Trishal", OTHER),
        ],
    ),
];

static DESTINATIONS: Lazy<DistrictTable> = Lazy::new(|| {
    DISTRICTS
        .iter()
        .map(|(district, upazilas)| (*district, upazilas.iter().copied().collect()))
        .collect()
});

/// Delivery address as submitted at checkout
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct ShippingAddress {
    #[validate(length(min = 1, max = 120))]
    pub full_name: String,
    #[validate(length(min = 6, max = 20))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub address_line: String,
    pub district: Option<String>,
    pub upazila: Option<String>,
    pub postal_code: Option<String>,
}

/// Outcome of a destination lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// District or upazila not supplied yet
    Incomplete,
    /// Upazila found in the reference table
    Resolved(ShippingZone),
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolves district then upazila against the reference table.
///
/// Names must match exactly after trimming.
pub fn lookup_destination(
    district: Option<&str>,
    upazila: Option<&str>,
) -> Result<Destination, ServiceError> {
    let (Some(district), Some(upazila)) = (present(district), present(upazila)) else {
        return Ok(Destination::Incomplete);
    };

    let upazilas = DESTINATIONS.get(district).ok_or_else(|| {
        ServiceError::InvalidDestination(format!("Unknown district '{}'", district))
    })?;
    let zone = upazilas.get(upazila).ok_or_else(|| {
        ServiceError::InvalidDestination(format!(
            "Unknown upazila '{}' in district '{}'",
            upazila, district
        ))
    })?;

    Ok(Destination::Resolved(*zone))
}

/// Flat rate for a zone
pub fn zone_rate(config: &ShippingConfig, zone: ShippingZone) -> Decimal {
    match zone {
        ShippingZone::DhakaCity => config.dhaka_city_rate,
        ShippingZone::DhakaOutside => config.dhaka_outside_rate,
        ShippingZone::OtherDistrict => config.other_district_rate,
    }
}

/// Shipping fee for a post-discount merchandise amount.
pub fn shipping_fee(
    config: &ShippingConfig,
    post_discount_subtotal: Decimal,
    zone: ShippingZone,
    free_shipping: bool,
) -> Decimal {
    if free_shipping || post_discount_subtotal >= config.free_threshold {
        Decimal::ZERO
    } else if post_discount_subtotal >= config.reduced_threshold {
        config.reduced_rate
    } else {
        zone_rate(config, zone)
    }
}
