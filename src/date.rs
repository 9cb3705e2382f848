//! Incomplete dates: a datetime where any subset of the year, month, day,
//!  hour, minute and second segments is defined.
//!
//! The textual form always carries all six segments, with undefined ones
//!  written as `x`s: `xxxx-05-xxTxx:xx:xx` is "some day in May".

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Segment {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
}

impl Segment {
    pub const ALL: [Segment; 6] = [
        Segment::Year,
        Segment::Month,
        Segment::Day,
        Segment::Hour,
        Segment::Minute,
        Segment::Second,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn width(self) -> usize {
        if self == Segment::Year { 4 } else { 2 }
    }

    /// `TO_CHAR` pattern
    pub fn pg_pattern(self) -> &'static str {
        match self {
            Segment::Year => "YYYY",
            Segment::Month => "MM",
            Segment::Day => "DD",
            Segment::Hour => "HH24",
            Segment::Minute => "MI",
            Segment::Second => "SS",
        }
    }

    /// `STRFTIME` pattern
    pub fn sqlite_pattern(self) -> &'static str {
        match self {
            Segment::Year => "%Y",
            Segment::Month => "%m",
            Segment::Day => "%d",
            Segment::Hour => "%H",
            Segment::Minute => "%M",
            Segment::Second => "%S",
        }
    }
}

/// A set of defined segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Segments(u8);

impl Segments {
    pub const ALL: Segments = Segments(0b11_1111);

    pub fn contains(self, segment: Segment) -> bool {
        self.0 & (1 << segment.index()) != 0
    }

    pub fn insert(&mut self, segment: Segment) {
        self.0 |= 1 << segment.index();
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(self) -> impl Iterator<Item = Segment> {
        Segment::ALL.into_iter().filter(move |s| self.contains(*s))
    }

    /// The defined segments form one unbroken run, e.g. month+day but not
    ///  year+day. Only contiguous segment sets order meaningfully.
    pub fn is_contiguous(self) -> bool {
        if self.is_empty() {
            return false;
        }
        let shifted = self.0 >> self.0.trailing_zeros();
        shifted & (shifted + 1) == 0
    }

    /// Concatenated `TO_CHAR` pattern, e.g. `MMDD`
    pub fn pg_format(self) -> String {
        self.iter().map(Segment::pg_pattern).collect()
    }

    /// Concatenated `STRFTIME` pattern, e.g. `%m%d`
    pub fn sqlite_format(self) -> String {
        self.iter().map(Segment::sqlite_pattern).collect()
    }
}

impl fmt::Display for Segments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in self.iter() {
            if !first {
                f.write_str("+")?;
            }
            first = false;
            write!(f, "{segment}")?;
        }
        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid date `{0}`: expected YYYY-MM-DD[THH:MM:SS] with undefined segments written as x")]
pub struct ParseError(pub String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IncompleteDate {
    values: [Option<u32>; 6],
}

impl IncompleteDate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a segment, returning `None` if the result is no longer a possible
    ///  date (month 13, February 30th, hour 24...).
    pub fn with(mut self, segment: Segment, value: u32) -> Option<Self> {
        self.values[segment.index()] = Some(value);
        self.is_valid().then_some(self)
    }

    pub fn get(&self, segment: Segment) -> Option<u32> {
        self.values[segment.index()]
    }

    pub fn segments(&self) -> Segments {
        let mut segments = Segments::default();
        for segment in Segment::ALL {
            if self.get(segment).is_some() {
                segments.insert(segment);
            }
        }
        segments
    }

    pub fn is_complete(&self) -> bool {
        self.segments() == Segments::ALL
    }

    /// The defined segments zero-padded and concatenated: the value compared
    ///  against a column formatted with [Segments::pg_format] or
    ///  [Segments::sqlite_format].
    pub fn segment_string(&self) -> String {
        Segment::ALL
            .into_iter()
            .filter_map(|s| self.get(s).map(|v| format!("{v:0width$}", width = s.width())))
            .collect()
    }

    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let [year, month, day, hour, minute, second] = self.values;
        let date = NaiveDate::from_ymd_opt(i32::try_from(year?).ok()?, month?, day?)?;
        let time = NaiveTime::from_hms_opt(hour?, minute?, second?)?;
        Some(date.and_time(time))
    }

    fn is_valid(&self) -> bool {
        let [year, month, day, hour, minute, second] = self.values;
        if year.is_some_and(|y| y > 9999) {
            return false;
        }
        let date_ok = match (month, day) {
            // Without a year, Feb 29th is possible, so check against a leap year
            (Some(m), Some(d)) => {
                let y = year.and_then(|y| i32::try_from(y).ok()).unwrap_or(2000);
                NaiveDate::from_ymd_opt(y, m, d).is_some()
            }
            (Some(m), None) => (1..=12).contains(&m),
            (None, Some(d)) => (1..=31).contains(&d),
            (None, None) => true,
        };
        date_ok
            && NaiveTime::from_hms_opt(hour.unwrap_or(0), minute.unwrap_or(0), second.unwrap_or(0)).is_some()
    }
}

impl From<NaiveDateTime> for IncompleteDate {
    fn from(value: NaiveDateTime) -> Self {
        Self {
            values: [
                u32::try_from(value.year()).ok(),
                Some(value.month()),
                Some(value.day()),
                Some(value.hour()),
                Some(value.minute()),
                Some(value.second()),
            ],
        }
    }
}

impl fmt::Display for IncompleteDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (segment, separator) in Segment::ALL.into_iter().zip(["", "-", "-", "T", ":", ":"]) {
            f.write_str(separator)?;
            match self.get(segment) {
                Some(v) => write!(f, "{v:0width$}", width = segment.width())?,
                None => f.write_str(&"x".repeat(segment.width()))?,
            }
        }
        Ok(())
    }
}

impl FromStr for IncompleteDate {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseError(s.to_string());
        if !s.is_ascii() {
            return Err(err());
        }
        let bytes = s.as_bytes();
        // Separator positions of the full form; a bare date stops after the day.
        let expected: &[(usize, &[u8])] = match bytes.len() {
            10 => &[(4, b"-"), (7, b"-")],
            19 => &[(4, b"-"), (7, b"-"), (10, b"T "), (13, b":"), (16, b":")],
            _ => return Err(err()),
        };
        for &(at, allowed) in expected {
            if !allowed.contains(&bytes[at]) {
                return Err(err());
            }
        }

        let mut date = IncompleteDate::new();
        let mut start = 0;
        for segment in Segment::ALL.into_iter().take(expected.len() + 1) {
            let field = &s[start..start + segment.width()];
            start += segment.width() + 1;
            if field.bytes().all(|b| b == b'x' || b == b'X') {
                continue;
            }
            if !field.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err());
            }
            let value = field.parse().map_err(|_| err())?;
            date = date.with(segment, value).ok_or_else(err)?;
        }
        if date.segments().is_empty() {
            return Err(err());
        }
        Ok(date)
    }
}
