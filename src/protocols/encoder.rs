// SPDX-License-Identifier: GPL-3.0-only
//! Wire value encoding for the MFD clock, date and brightness commands
//!
//! Everything here is pure: host time and resolved preferences go in, 16-bit
//! command payloads come out.

/// Template used whenever the configured one is missing or not 6 characters
pub const DEFAULT_DATE_FORMAT: &str = "ddmmyy";

/// Default (and maximum) brightness for both the MFD and the LEDs
pub const DEFAULT_BRIGHTNESS: u16 = 128;

/// Highest brightness value the device accepts
pub const MAX_BRIGHTNESS: u16 = 128;

/// Bit 15 of the clock payload selects 24-hour display
const CLOCK_24H_FLAG: u16 = 1 << 15;

/// One 2-character slot of a date template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateField {
    Day,
    Month,
    Year,
    /// Anything that is not `dd`, `mm` or `yy`; encodes as 0
    Blank,
}

impl DateField {
    fn parse(token: &[char]) -> Self {
        let token: String = token.iter().collect::<String>().to_ascii_lowercase();
        match token.as_str() {
            "dd" => DateField::Day,
            "mm" => DateField::Month,
            "yy" => DateField::Year,
            _ => DateField::Blank,
        }
    }

    fn value(self, day: u8, month: u8, year: u16) -> u16 {
        match self {
            DateField::Day => u16::from(day),
            DateField::Month => u16::from(month),
            DateField::Year => year,
            DateField::Blank => 0,
        }
    }
}

/// A parsed date template: three fields shown left to right on the MFD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateTemplate([DateField; 3]);

impl DateTemplate {
    /// Parse a template such as `"ddmmyy"` or `"YYmmDD"`
    ///
    /// A missing template, or one that is not exactly 6 characters long,
    /// falls back to [`DEFAULT_DATE_FORMAT`].
    pub fn parse(template: Option<&str>) -> Self {
        let chars: Vec<char> = match template {
            Some(t) if t.chars().count() == 6 => t.chars().collect(),
            _ => DEFAULT_DATE_FORMAT.chars().collect(),
        };

        Self([
            DateField::parse(&chars[0..2]),
            DateField::parse(&chars[2..4]),
            DateField::parse(&chars[4..6]),
        ])
    }

    pub fn fields(&self) -> [DateField; 3] {
        self.0
    }
}

impl Default for DateTemplate {
    fn default() -> Self {
        Self::parse(None)
    }
}

/// Encode the primary clock payload
///
/// Low byte is the minute, high byte the hour, bit 15 set for 24-hour mode.
pub fn encode_time(hour: u8, minute: u8, clock_is_24_hour: bool) -> u16 {
    let mut value = u16::from(minute) | (u16::from(hour) << 8);
    if clock_is_24_hour {
        value |= CLOCK_24H_FLAG;
    } else {
        value &= !CLOCK_24H_FLAG;
    }
    value
}

/// Encode the date payloads for a template
///
/// Returns `(day_month, year)`. The first template field lands in the low
/// byte of `day_month` and the second in its high byte; the third field is
/// sent unpacked as `year`. Years are full width (2024, not 24), so a year in
/// either of the first two slots keeps only the byte that fits.
pub fn encode_day_month(template: Option<&str>, day: u8, month: u8, year: u16) -> (u16, u16) {
    encode_date(&DateTemplate::parse(template), day, month, year)
}

/// Same as [`encode_day_month`] for an already parsed template
pub fn encode_date(template: &DateTemplate, day: u8, month: u8, year: u16) -> (u16, u16) {
    let [first, second, third] = template.fields().map(|field| field.value(day, month, year));

    let day_month = (first & 0x00ff) | (second << 8);
    (day_month, third)
}

/// Clamp a raw brightness preference to the device range
///
/// Values outside 0..=128, and missing values, resolve to `default`.
pub fn clamp_brightness(raw: Option<i64>, default: u16) -> u16 {
    match raw {
        Some(value) if (0..=i64::from(MAX_BRIGHTNESS)).contains(&value) => value as u16,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: [(&str, DateField); 3] = [
        ("dd", DateField::Day),
        ("mm", DateField::Month),
        ("yy", DateField::Year),
    ];

    #[test]
    fn test_time_24_hour() {
        let value = encode_time(14, 5, true);
        assert_eq!(value & 0x00ff, 5);
        assert_eq!((value >> 8) & 0x7f, 14);
        assert_ne!(value & CLOCK_24H_FLAG, 0);
    }

    #[test]
    fn test_time_decodes_for_every_minute() {
        for hour in 0..24u8 {
            for minute in 0..60u8 {
                for is_24 in [true, false] {
                    let value = encode_time(hour, minute, is_24);
                    assert_eq!(value & CLOCK_24H_FLAG != 0, is_24);
                    assert_eq!((value & 0x00ff) as u8, minute);
                    assert_eq!(((value >> 8) & 0x7f) as u8, hour);
                }
            }
        }
    }

    #[test]
    fn test_day_month_default_template() {
        let (day_month, year) = encode_day_month(Some("ddmmyy"), 3, 3, 2024);
        assert_eq!(day_month & 0x00ff, 3);
        assert_eq!(day_month >> 8, 3);
        assert_eq!(year, 2024);
    }

    #[test]
    fn test_day_month_year_first() {
        let (day_month, year) = encode_day_month(Some("yymmdd"), 3, 3, 2024);
        assert_eq!(day_month & 0x00ff, 2024 & 0x00ff);
        assert_eq!(day_month >> 8, 3);
        assert_eq!(year, 3);
    }

    #[test]
    fn test_template_is_case_insensitive() {
        assert_eq!(
            encode_day_month(Some("DDmMYy"), 19, 10, 2026),
            encode_day_month(Some("ddmmyy"), 19, 10, 2026)
        );
    }

    #[test]
    fn test_every_token_arrangement() {
        let (day, month, year) = (27u8, 11u8, 2031u16);
        let expected = |field: DateField| match field {
            DateField::Day => u16::from(day),
            DateField::Month => u16::from(month),
            DateField::Year => year,
            DateField::Blank => 0,
        };

        for a in TOKENS {
            for b in TOKENS {
                for c in TOKENS {
                    let template = format!("{}{}{}", a.0, b.0, c.0);
                    let (day_month, third) = encode_day_month(Some(template.as_str()), day, month, year);
                    assert_eq!(day_month & 0x00ff, expected(a.1) & 0x00ff, "{template}");
                    assert_eq!(day_month >> 8, expected(b.1) & 0x00ff, "{template}");
                    assert_eq!(third, expected(c.1), "{template}");
                }
            }
        }
    }

    #[test]
    fn test_unknown_tokens_encode_as_zero() {
        let (day_month, year) = encode_day_month(Some("ddxx??"), 9, 4, 2025);
        assert_eq!(day_month, 9);
        assert_eq!(year, 0);

        let template = DateTemplate::parse(Some("d-mmyy"));
        assert_eq!(
            template.fields(),
            [DateField::Blank, DateField::Month, DateField::Year]
        );
    }

    #[test]
    fn test_bad_length_falls_back_to_default() {
        let expected = encode_day_month(Some(DEFAULT_DATE_FORMAT), 1, 12, 2030);
        for template in [None, Some(""), Some("ddmm"), Some("ddmmyyyy"), Some("yymmdd ")] {
            assert_eq!(encode_day_month(template, 1, 12, 2030), expected, "{template:?}");
        }
    }

    #[test]
    fn test_template_length_counts_characters() {
        // Six characters, more than six bytes
        let template = DateTemplate::parse(Some("ddmmé!"));
        assert_eq!(
            template.fields(),
            [DateField::Day, DateField::Month, DateField::Blank]
        );
    }

    #[test]
    fn test_clamp_brightness_in_range() {
        for raw in 0..=128i64 {
            assert_eq!(clamp_brightness(Some(raw), DEFAULT_BRIGHTNESS), raw as u16);
        }
    }

    #[test]
    fn test_clamp_brightness_out_of_range() {
        for raw in [-1i64, -128, 129, 200, 65_536, i64::MIN, i64::MAX] {
            assert_eq!(clamp_brightness(Some(raw), DEFAULT_BRIGHTNESS), 128);
        }
        assert_eq!(clamp_brightness(None, DEFAULT_BRIGHTNESS), 128);
    }
}
