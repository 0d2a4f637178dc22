//! Parser for the records array clients stream to the collector.
//!
//! Each record is one line of comma separated fields:
//!
//! ```text
//! timestamp,h,k,phi,reserved,del_t
//! ```
//!
//! Only `del_t` (field 5, the time delay between the two microphones) is
//! used by the calibration; the rest is opaque. Clients may append extra
//! fields.

use nom::{
    bytes::complete::take_till,
    character::complete::char,
    combinator::all_consuming,
    multi::separated_list1,
    number::complete::double,
    Finish, IResult,
};

use std::{fmt, str::FromStr};

/// Index of the delay field within a record.
pub const DELAY_FIELD: usize = 5;

/// One parsed record from an array client.
#[derive(Debug, Clone, PartialEq)]
pub struct DelayRecord {
    /// Client timestamp, passed through untouched
    pub timestamp: String,
    /// Time difference of arrival between the array's two microphones, in seconds
    pub delay: f64,
    /// Number of fields the record had
    pub field_count: usize,
}

/// Why a line could not be turned into a [DelayRecord].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordParseError {
    /// Fewer than `DELAY_FIELD + 1` fields
    TooFewFields(usize),
    /// The delay field is not a float
    BadDelay(String),
}

impl fmt::Display for RecordParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordParseError::TooFewFields(n) => {
                write!(f, "expected at least {} fields, got {}", DELAY_FIELD + 1, n)
            }
            RecordParseError::BadDelay(field) => write!(f, "delay field {:?} is not a number", field),
        }
    }
}

impl std::error::Error for RecordParseError {}

fn parse_fields(s: &str) -> IResult<&str, Vec<&str>> {
    separated_list1(char(','), take_till(|c| c == ','))(s)
}

fn parse_delay(s: &str) -> IResult<&str, f64> {
    all_consuming(double)(s)
}

impl FromStr for DelayRecord {
    type Err = RecordParseError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let line = s.trim();
        let fields = match parse_fields(line).finish() {
            Ok((_remaining, fields)) => fields,
            Err(_) => return Err(RecordParseError::TooFewFields(0)),
        };

        if fields.len() <= DELAY_FIELD {
            return Err(RecordParseError::TooFewFields(fields.len()));
        }

        let delay_field = fields[DELAY_FIELD].trim();
        let delay = match parse_delay(delay_field).finish() {
            Ok((_, delay)) => delay,
            Err(_) => return Err(RecordParseError::BadDelay(delay_field.to_owned())),
        };

        Ok(DelayRecord {
            timestamp: fields[0].trim().to_owned(),
            delay,
            field_count: fields.len(),
        })
    }
}

/// Parse every line that holds a usable delay, silently dropping the rest.
pub fn valid_delays<'a>(lines: impl IntoIterator<Item = &'a String>) -> Vec<f64> {
    lines
        .into_iter()
        .filter_map(|line| line.parse::<DelayRecord>().ok())
        .map(|record| record.delay)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_1() {
        let s = "1718000000.125,0.5,-1.25,0.33,0,0.0000875";
        let record: DelayRecord = s.parse().unwrap();

        assert_eq!(
            record,
            DelayRecord {
                timestamp: "1718000000.125".to_owned(),
                delay: 0.0000875,
                field_count: 6,
            }
        );
    }

    #[test]
    fn test_2() {
        // trailing carriage return and extra fields are tolerated
        let s = "15892,1,2,3,4,-1.5e-4,extra\r";
        let record: DelayRecord = s.parse().unwrap();
        assert_eq!(record.delay, -1.5e-4);
        assert_eq!(record.field_count, 7);
    }

    #[test]
    fn garbage_line() {
        assert_eq!(
            "garbage,line".parse::<DelayRecord>(),
            Err(RecordParseError::TooFewFields(2))
        );
    }

    #[test]
    fn non_numeric_delay() {
        assert_eq!(
            "1,2,3,4,5,abc".parse::<DelayRecord>(),
            Err(RecordParseError::BadDelay("abc".to_owned()))
        );
        assert_eq!(
            "1,2,3,4,5,".parse::<DelayRecord>(),
            Err(RecordParseError::BadDelay("".to_owned()))
        );
        assert!("1,2,3,4,5,0.1x".parse::<DelayRecord>().is_err());
    }

    #[test]
    fn empty_fields_still_count() {
        let record: DelayRecord = ",,,,,0.25".parse().unwrap();
        assert_eq!(record.delay, 0.25);
        assert_eq!(record.timestamp, "");
    }

    #[test]
    fn only_valid_delays_survive() {
        let lines = vec![
            "t,0,0,0,0,0.001".to_owned(),
            "garbage,line".to_owned(),
            "".to_owned(),
            "t,0,0,0,0,-0.002".to_owned(),
        ];
        assert_eq!(valid_delays(&lines), vec![0.001, -0.002]);
    }
}
