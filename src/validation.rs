use chrono::{NaiveDate, NaiveTime};

use crate::error::BookingError;

pub fn validate_time_range(start: NaiveTime, end: NaiveTime) -> Result<(), BookingError> {
    if start < end {
        Ok(())
    } else {
        Err(BookingError::Validation(
            "End time is not after start time".into(),
        ))
    }
}

pub fn validate_capacity(value: u32) -> Result<u32, BookingError> {
    if value > 0 {
        Ok(value)
    } else {
        Err(BookingError::Validation("capacity must be positive".into()))
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, BookingError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        BookingError::Validation("Date is badly formatted (expected YYYY-MM-DD).".into())
    })
}

/// `range` query parameter: a day count, or `all` for an unbounded window.
pub fn parse_range(value: Option<&str>, default_days: u32) -> Result<Option<u32>, BookingError> {
    match value.map(str::trim) {
        None | Some("") => Ok(Some(default_days)),
        Some("all") => Ok(None),
        Some(days) => days
            .parse::<u32>()
            .map(Some)
            .map_err(|_| BookingError::Validation("range must be a number of days or `all`".into())),
    }
}

pub fn validate_page(limit: usize, page: usize) -> Result<(usize, usize), BookingError> {
    if limit == 0 {
        return Err(BookingError::Validation("limit must be at least 1".into()));
    }
    if page == 0 {
        return Err(BookingError::Validation("page must be at least 1".into()));
    }
    Ok((limit, page))
}

/// `HH:MM` bound used by class search. Malformed input falls back.
pub fn parse_clock_bound(value: &str, fallback: NaiveTime) -> NaiveTime {
    NaiveTime::parse_from_str(value, "%H:%M").unwrap_or(fallback)
}

pub fn validate_coordinates(lat: f64, long: f64) -> Result<(f64, f64), BookingError> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(BookingError::Validation(
            "Latitude is not between -90 and 90 degrees".into(),
        ));
    }
    if !(-180.0..=180.0).contains(&long) {
        return Err(BookingError::Validation(
            "Longitude is not between -180 and 180 degrees".into(),
        ));
    }
    Ok((lat, long))
}

/// Canadian postal code, `A0A 0A0`. Returns it normalised to `A0A0A0`.
pub fn validate_postal_code(value: &str) -> Result<String, BookingError> {
    let code: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if code.chars().count() != 6 {
        return Err(BookingError::Validation(
            "Postal code must have six characters (expected: 'A0A 0A0')".into(),
        ));
    }
    for (i, c) in code.chars().enumerate() {
        if i % 2 == 0 && !c.is_ascii_alphabetic() {
            return Err(BookingError::Validation(
                "Postal code contains a letter in unexpected position (expected: 'A0A 0A0')".into(),
            ));
        }
        if i % 2 == 1 && !c.is_ascii_digit() {
            return Err(BookingError::Validation(
                "Postal code contains a number in unexpected position (expected: 'A0A 0A0')".into(),
            ));
        }
    }
    Ok(code)
}

/// North American number: ten digits, optionally prefixed by country code 1.
pub fn validate_phone_number(value: &str) -> Result<String, BookingError> {
    let digits: String = value.chars().filter(char::is_ascii_digit).collect();
    let national = match digits.len() {
        10 => digits.as_str(),
        11 if digits.starts_with('1') => &digits[1..],
        _ => {
            return Err(BookingError::Validation(
                "Phone number is not a valid Canadian number".into(),
            ));
        }
    };
    let symbols_ok = value
        .chars()
        .all(|c| c.is_ascii_digit() || " +-().".contains(c));
    // area code and exchange never start with 0 or 1
    if !symbols_ok || national.starts_with(['0', '1']) || national[3..].starts_with(['0', '1']) {
        return Err(BookingError::Validation(
            "Phone number is not a valid Canadian number".into(),
        ));
    }
    Ok(national.to_string())
}
