use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ScraperError;

/// Column names of a raw inmate data snapshot, in file order.
pub const RAW_INMATE_DATA_HEADER: [&str; 13] = [
    "Booking_Id",
    "Booking_Date",
    "Inmate_Hash",
    "Gender",
    "Race",
    "Height",
    "Weight",
    "Age_At_Booking",
    "Housing_Location",
    "Charges",
    "Bail_Amount",
    "Court_Date",
    "Court_Location",
];

/// Today's date in the jail's local calendar.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn yesterday() -> NaiveDate {
    today() - Duration::days(1)
}

// ---------------------------------------------------------------------------
// JailId
// ---------------------------------------------------------------------------

/// A booking identifier: booking date as `%Y-%m%d` followed by a zero-padded
/// per-day sequence number, e.g. `2026-1017001`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JailId {
    booking_date: NaiveDate,
    sequence: u32,
}

impl JailId {
    pub fn new(booking_date: NaiveDate, sequence: u32) -> Self {
        Self {
            booking_date,
            sequence,
        }
    }

    pub fn booking_date(&self) -> NaiveDate {
        self.booking_date
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Extract just the booking date from an ID string, if it has one.
    pub fn date_of(raw: &str) -> Option<NaiveDate> {
        raw.parse::<JailId>().ok().map(|id| id.booking_date)
    }
}

impl fmt::Display for JailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}{:02}{:03}",
            self.booking_date.year(),
            self.booking_date.month(),
            self.booking_date.day(),
            self.sequence
        )
    }
}

impl FromStr for JailId {
    type Err = ScraperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ScraperError::InvalidJailId(s.to_string());

        // YYYY-MMDD plus at least three sequence digits
        if !s.is_ascii() || s.len() < 12 || s.as_bytes()[4] != b'-' {
            return Err(invalid());
        }
        let digits = |range: std::ops::Range<usize>| -> Result<u32, ScraperError> {
            let part = &s[range];
            if !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse().map_err(|_| invalid())
        };

        let year = digits(0..4)?;
        let month = digits(5..7)?;
        let day = digits(7..9)?;
        let sequence = digits(9..s.len())?;

        let booking_date =
            NaiveDate::from_ymd_opt(year as i32, month, day).ok_or_else(invalid)?;
        Ok(Self::new(booking_date, sequence))
    }
}

impl TryFrom<String> for JailId {
    type Error = ScraperError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<JailId> for String {
    fn from(id: JailId) -> Self {
        id.to_string()
    }
}

// ---------------------------------------------------------------------------
// InmateRecord
// ---------------------------------------------------------------------------

/// One scraped inmate, normalized to the strings written into a raw data
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InmateRecord {
    pub jail_id: String,
    pub booking_date: String,
    pub hash_id: String,
    pub gender: String,
    pub race: String,
    pub height: String,
    pub weight: String,
    pub age_at_booking: String,
    pub housing_location: String,
    pub charges: String,
    pub bail_amount: String,
    pub next_court_date: String,
    pub court_house_location: String,
}

impl InmateRecord {
    /// Field values in `RAW_INMATE_DATA_HEADER` order.
    pub fn fields(&self) -> [&str; 13] {
        [
            &self.jail_id,
            &self.booking_date,
            &self.hash_id,
            &self.gender,
            &self.race,
            &self.height,
            &self.weight,
            &self.age_at_booking,
            &self.housing_location,
            &self.charges,
            &self.bail_amount,
            &self.next_court_date,
            &self.court_house_location,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jail_id_formats_date_and_padded_sequence() {
        let id = JailId::new(NaiveDate::from_ymd_opt(2026, 3, 7).unwrap(), 4);
        assert_eq!(id.to_string(), "2026-0307004");
    }

    #[test]
    fn jail_id_parses_back_to_date_and_sequence() {
        let id: JailId = "2013-1231027".parse().unwrap();
        assert_eq!(id.booking_date(), NaiveDate::from_ymd_opt(2013, 12, 31).unwrap());
        assert_eq!(id.sequence(), 27);
        assert_eq!(id.to_string(), "2013-1231027");
    }

    #[test]
    fn jail_id_accepts_four_digit_sequences() {
        let id: JailId = "2013-01011001".parse().unwrap();
        assert_eq!(id.sequence(), 1001);
    }

    #[test]
    fn jail_id_rejects_garbage() {
        for raw in ["", "2013-0101", "2013/0101001", "2013-1301001", "abcd-0101001", "2013-01é1001"] {
            assert!(raw.parse::<JailId>().is_err(), "{raw} should not parse");
        }
        assert_eq!(JailId::date_of("7"), None);
    }

    #[test]
    fn record_fields_follow_header_order() {
        let record = InmateRecord {
            jail_id: "id".into(),
            court_house_location: "court".into(),
            ..Default::default()
        };
        let fields = record.fields();
        assert_eq!(fields.len(), RAW_INMATE_DATA_HEADER.len());
        assert_eq!(fields[0], "id");
        assert_eq!(fields[12], "court");
    }
}
