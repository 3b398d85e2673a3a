use crate::domain::model::LotId;
use crate::utils::error::{ParkingError, Result};
use chrono::NaiveDate;

pub const REPORT_DATE_FORMAT: &str = "%Y-%m-%d";

pub trait Validate {
    fn validate(&self) -> Result<()>;
}

pub fn validate_path(field_name: &str, path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(ParkingError::bad_input(field_name, "path cannot be empty"));
    }

    if path.contains('\0') {
        return Err(ParkingError::bad_input(field_name, "path contains null bytes"));
    }

    Ok(())
}

pub fn validate_non_empty_string(field_name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ParkingError::bad_input(
            field_name,
            "value cannot be empty or whitespace-only",
        ));
    }
    Ok(())
}

pub fn validate_range<T: PartialOrd + std::fmt::Display + Copy>(
    field_name: &str,
    value: T,
    min: T,
    max: T,
) -> Result<()> {
    if value < min || value > max {
        return Err(ParkingError::bad_input(
            field_name,
            format!("{} is not between {} and {}", value, min, max),
        ));
    }
    Ok(())
}

/// Trimmed, non-empty lot name.
pub fn validate_lot_name(name: &str) -> Result<String> {
    validate_non_empty_string("parking lot name", name)?;
    Ok(name.trim().to_string())
}

/// Trimmed, non-empty registration number. Case is preserved.
pub fn validate_registration(registration_number: &str) -> Result<String> {
    validate_non_empty_string("registration number", registration_number)?;
    Ok(registration_number.trim().to_string())
}

/// Slot counts arrive signed from the command line; negatives are rejected
/// here rather than wrapping.
pub fn validate_slot_count(value: i64, max: u32) -> Result<u32> {
    validate_range("desired slot count", value, 0, i64::from(max))?;
    u32::try_from(value).map_err(|_| ParkingError::bad_input("desired slot count", value.to_string()))
}

pub fn parse_report_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), REPORT_DATE_FORMAT).map_err(|e| {
        ParkingError::bad_input("date", format!("'{}' is not a YYYY-MM-DD date: {}", value, e))
    })
}

pub fn parse_lot_id(value: &str) -> Result<LotId> {
    LotId::parse(value)
}
