//! Ceremony countdown and calendar export.

use super::navigation::{Destination, encode_component};
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::Serialize;

const ICS_STAMP: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone)]
pub struct Ceremony {
    pub groom: String,
    pub bride: String,
    pub starts_at: DateTime<FixedOffset>,
    pub duration: TimeDelta,
    pub venue: String,
    pub hall: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Countdown {
    Upcoming {
        days: i64,
        hours: i64,
        minutes: i64,
        seconds: i64,
        /// D-day count in calendar days, 0 on the ceremony day itself.
        days_until: i64,
    },
    Passed {
        days_passed: i64,
    },
}

impl Ceremony {
    pub fn ends_at(&self) -> DateTime<FixedOffset> {
        self.starts_at + self.duration
    }

    /// Venue with the hall appended when one is set.
    pub fn venue_label(&self) -> String {
        match self.hall.as_deref().map(str::trim) {
            Some(hall) if !hall.is_empty() => format!("{} {}", self.venue, hall),
            _ => self.venue.clone(),
        }
    }

    pub fn location(&self) -> String {
        format!("{}, {}", self.venue_label(), self.address)
    }

    pub fn destination(&self) -> Destination {
        Destination {
            venue: self.venue.clone(),
            address: self.address.clone(),
        }
    }

    pub fn title(&self) -> String {
        format!("{} & {} Wedding", self.groom, self.bride)
    }

    fn description(&self) -> String {
        format!(
            "You are invited to the wedding of {} and {}.\n\nVenue: {}\nAddress: {}",
            self.groom,
            self.bride,
            self.venue_label(),
            self.address
        )
    }

    /// Time left until the ceremony starts, or whole calendar days since it,
    /// counted in the ceremony's own timezone.
    pub fn countdown(&self, now: DateTime<Utc>) -> Countdown {
        let today = now.with_timezone(self.starts_at.offset()).date_naive();
        let remaining = self.starts_at.with_timezone(&Utc) - now;
        if remaining > TimeDelta::zero() {
            let total = remaining.num_seconds();
            return Countdown::Upcoming {
                days: total / 86_400,
                hours: total % 86_400 / 3_600,
                minutes: total % 3_600 / 60,
                seconds: total % 60,
                days_until: (self.starts_at.date_naive() - today).num_days().max(0),
            };
        }

        let days_passed = (today - self.starts_at.date_naive()).num_days();
        Countdown::Passed {
            days_passed: days_passed.max(0),
        }
    }

    /// iCalendar document with a reminder one day before.
    pub fn ics(&self) -> String {
        let start = self.starts_at.with_timezone(&Utc).format(ICS_STAMP).to_string();
        let end = self.ends_at().with_timezone(&Utc).format(ICS_STAMP).to_string();
        let uid = format!(
            "{}-{:x}@wedding-invitation",
            start,
            md5::compute(self.title().as_bytes())
        );

        [
            "BEGIN:VCALENDAR".to_string(),
            "VERSION:2.0".to_string(),
            "PRODID:-//Wedding Invitation//Calendar//EN".to_string(),
            "CALSCALE:GREGORIAN".to_string(),
            "METHOD:PUBLISH".to_string(),
            "BEGIN:VEVENT".to_string(),
            format!("UID:{}", uid),
            format!("DTSTAMP:{}", start),
            format!("DTSTART:{}", start),
            format!("DTEND:{}", end),
            format!("SUMMARY:{}", escape_ics_text(&self.title())),
            format!("DESCRIPTION:{}", escape_ics_text(&self.description())),
            format!("LOCATION:{}", escape_ics_text(&self.location())),
            "STATUS:CONFIRMED".to_string(),
            "SEQUENCE:0".to_string(),
            "BEGIN:VALARM".to_string(),
            "TRIGGER:-P1D".to_string(),
            "ACTION:DISPLAY".to_string(),
            format!("DESCRIPTION:{}", escape_ics_text("The wedding is tomorrow")),
            "END:VALARM".to_string(),
            "END:VEVENT".to_string(),
            "END:VCALENDAR".to_string(),
        ]
        .join("\r\n")
            + "\r\n"
    }

    pub fn google_calendar_link(&self) -> String {
        let start = self.starts_at.with_timezone(&Utc).format(ICS_STAMP);
        let end = self.ends_at().with_timezone(&Utc).format(ICS_STAMP);
        format!(
            "https://calendar.google.com/calendar/render?action=TEMPLATE&text={}&dates={}/{}&details={}&location={}&add=1440",
            encode_component(&self.title()),
            start,
            end,
            encode_component(&self.description()),
            encode_component(&self.location())
        )
    }
}

/// RFC 5545 TEXT escaping.
fn escape_ics_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            ';' => out.push_str("\\;"),
            ',' => out.push_str("\\,"),
            '\n' => out.push_str("\\n"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ceremony() -> Ceremony {
        Ceremony {
            groom: "Taehoon".into(),
            bride: "Hyewon".into(),
            starts_at: DateTime::parse_from_rfc3339("2025-12-20T16:20:00+09:00").unwrap(),
            duration: TimeDelta::hours(2),
            venue: "Queenbell Hotel".into(),
            hall: Some("Queens Garden Hall".into()),
            address: "200 Dongchon-ro, Dong-gu, Daegu".into(),
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn upcoming_splits_remaining_time() {
        // 1 day, 2 hours, 3 minutes, 4 seconds before 07:20 UTC.
        let now = utc("2025-12-19T05:16:56Z");
        assert_eq!(
            ceremony().countdown(now),
            Countdown::Upcoming {
                days: 1,
                hours: 2,
                minutes: 3,
                seconds: 4,
                days_until: 1
            }
        );
    }

    #[test]
    fn days_until_counts_calendar_days_in_ceremony_timezone() {
        let c = ceremony();
        let d_day = |now: &str| match c.countdown(utc(now)) {
            Countdown::Upcoming { days_until, .. } => days_until,
            other => panic!("expected upcoming, got {:?}", other),
        };
        // 21:00 KST on the 10th.
        assert_eq!(d_day("2025-12-10T12:00:00Z"), 10);
        // 23:59 KST the day before: under a day left, still D-1.
        assert_eq!(d_day("2025-12-19T14:59:00Z"), 1);
        // 00:30 KST on the day, UTC still on the 19th.
        assert_eq!(d_day("2025-12-19T15:30:00Z"), 0);
    }

    #[test]
    fn passed_counts_calendar_days_in_ceremony_timezone() {
        let c = ceremony();
        assert_eq!(
            c.countdown(utc("2025-12-20T07:20:00Z")),
            Countdown::Passed { days_passed: 0 }
        );
        // 23:30 KST on the same day.
        assert_eq!(
            c.countdown(utc("2025-12-20T14:30:00Z")),
            Countdown::Passed { days_passed: 0 }
        );
        // 00:30 KST the next day, although UTC is still the 20th.
        assert_eq!(
            c.countdown(utc("2025-12-20T15:30:00Z")),
            Countdown::Passed { days_passed: 1 }
        );
        assert_eq!(
            c.countdown(utc("2026-01-19T03:00:00Z")),
            Countdown::Passed { days_passed: 30 }
        );
    }

    #[test]
    fn ics_has_event_window_and_escaped_text() {
        let ics = ceremony().ics();
        assert!(ics.starts_with("BEGIN:VCALENDAR\r\n"));
        assert!(ics.ends_with("END:VCALENDAR\r\n"));
        assert!(ics.contains("DTSTART:20251220T072000Z\r\n"));
        assert!(ics.contains("DTEND:20251220T092000Z\r\n"));
        assert!(ics.contains("LOCATION:Queenbell Hotel Queens Garden Hall\\, 200 Dongchon-ro\\, Dong-gu\\, Daegu"));
        assert!(ics.contains("TRIGGER:-P1D"));
        assert!(!ics.contains("\n\n"));
    }

    #[test]
    fn google_link_is_encoded() {
        let link = ceremony().google_calendar_link();
        assert!(link.starts_with("https://calendar.google.com/calendar/render?action=TEMPLATE&text=Taehoon%20%26%20Hyewon%20Wedding"));
        assert!(link.contains("&dates=20251220T072000Z/20251220T092000Z&"));
        assert!(link.ends_with("&add=1440"));
        assert!(!link.contains(' '));
    }

    #[test]
    fn venue_label_skips_blank_hall() {
        let mut c = ceremony();
        c.hall = Some("  ".into());
        assert_eq!(c.venue_label(), "Queenbell Hotel");
    }
}
