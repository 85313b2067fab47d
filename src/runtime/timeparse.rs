//! Natural-language time expressions
//!
//! Resolves phrases like "tomorrow 3pm", "in 1 hour 30 minutes", "friday
//! evening" or "oct 20 at 5" against a reference time. Ambiguous phrases
//! resolve forward: a weekday, a calendar day without a year or a bare time
//! of day means the next occurrence, never one in the past.

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Weekday,
};

/// Natural-language date parser collaborator
pub trait DateParser: Send + Sync {
    /// Resolve `text` relative to `reference`, or `None` if it is not understood
    fn parse(&self, text: &str, reference: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>>;
}

/// Forward-biased parser for a small English grammar
#[derive(Debug, Clone, Copy, Default)]
pub struct NaturalDateParser;

#[derive(Debug, Clone, Copy, PartialEq)]
enum DayAnchor {
    Today,
    Tomorrow,
    Weekday(Weekday),
    /// "next week", "next month"
    Date(NaiveDate),
    /// "october 20", "20th of oct 2027"
    MonthDay { month: u32, day: u32, year: Option<i32> },
}

/// Default clock time for phrases without one
#[derive(Debug, Clone, Copy, PartialEq)]
enum PartOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl PartOfDay {
    fn parse(token: &str) -> Option<Self> {
        let part = match token {
            "morning" => Self::Morning,
            "afternoon" => Self::Afternoon,
            "evening" => Self::Evening,
            "night" => Self::Night,
            _ => return None,
        };
        Some(part)
    }

    fn default_time(self) -> Option<NaiveTime> {
        let hour = match self {
            Self::Morning => 6,
            Self::Afternoon => 15,
            Self::Evening => 20,
            Self::Night => 22,
        };
        NaiveTime::from_hms_opt(hour, 0, 0)
    }

    fn is_after_noon(self) -> bool {
        self != Self::Morning
    }
}

impl DateParser for NaturalDateParser {
    fn parse(&self, text: &str, reference: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let normalized = text.trim().to_lowercase();
        if normalized.is_empty() {
            return None;
        }
        if let Some(absolute) = parse_absolute(&normalized, reference) {
            return Some(absolute);
        }

        let tokens: Vec<&str> = normalized
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();

        if let Some(offset) = parse_offset(&tokens) {
            return reference.checked_add_signed(offset);
        }
        Phrase::collect(&tokens, reference.date_naive())?.resolve(reference)
    }
}

/// The pieces of a day-and-time phrase; each may be given at most once
#[derive(Debug, Default)]
struct Phrase {
    day: Option<DayAnchor>,
    time: Option<NaiveTime>,
    /// Hour without am/pm ("at 5", "5 o'clock")
    bare_hour: Option<u32>,
    part: Option<PartOfDay>,
}

impl Phrase {
    fn collect(tokens: &[&str], today: NaiveDate) -> Option<Self> {
        let mut phrase = Self::default();
        let mut after_at = false;
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            let mut consumed = 1;
            match token {
                "at" => {
                    after_at = true;
                    i += 1;
                    continue;
                }
                "on" | "this" | "the" => {}
                "next" => {
                    if let Some(date) = tokens.get(i + 1).and_then(|unit| next_period(unit, today)) {
                        phrase.set_day(DayAnchor::Date(date))?;
                        consumed = 2;
                    }
                }
                "today" => phrase.set_day(DayAnchor::Today)?,
                "tomorrow" => phrase.set_day(DayAnchor::Tomorrow)?,
                "tonight" => {
                    phrase.set_day(DayAnchor::Today)?;
                    phrase.set_part(PartOfDay::Night)?;
                }
                _ => {
                    if let Some(part) = PartOfDay::parse(token) {
                        phrase.set_part(part)?;
                    } else if let Some(weekday) = parse_weekday(token) {
                        phrase.set_day(DayAnchor::Weekday(weekday))?;
                    } else if let Some((anchor, used)) = parse_calendar_day(&tokens[i..]) {
                        phrase.set_day(anchor)?;
                        consumed = used;
                    } else if let Some((time, used)) = parse_time(&tokens[i..]) {
                        phrase.set_time(Some(time), None)?;
                        consumed = used;
                    } else {
                        let (hour, used) = parse_bare_hour(&tokens[i..], after_at)?;
                        phrase.set_time(None, Some(hour))?;
                        consumed = used;
                    }
                }
            }
            after_at = false;
            i += consumed;
        }
        Some(phrase)
    }

    fn set_day(&mut self, anchor: DayAnchor) -> Option<()> {
        self.day.replace(anchor).is_none().then_some(())
    }

    fn set_part(&mut self, part: PartOfDay) -> Option<()> {
        self.part.replace(part).is_none().then_some(())
    }

    fn set_time(&mut self, time: Option<NaiveTime>, bare_hour: Option<u32>) -> Option<()> {
        if self.time.is_some() || self.bare_hour.is_some() {
            return None;
        }
        self.time = time;
        self.bare_hour = bare_hour;
        Some(())
    }

    /// 24-hour clock for a bare hour: the part of day decides when given,
    /// otherwise 1 to 7 mean the afternoon.
    fn clock_hour(&self, hour: u32) -> u32 {
        match (hour, self.part) {
            (1..=11, Some(part)) if part.is_after_noon() => hour + 12,
            (1..=11, Some(_)) => hour,
            (1..=7, None) => hour + 12,
            _ => hour,
        }
    }

    fn resolve(self, reference: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        let time = match (self.time, self.bare_hour) {
            (Some(time), _) => Some(time),
            (None, Some(hour)) => Some(NaiveTime::from_hms_opt(self.clock_hour(hour), 0, 0)?),
            (None, None) => self.part.and_then(PartOfDay::default_time),
        };
        resolve(self.day, time, reference)
    }
}

fn resolve(
    day: Option<DayAnchor>,
    time: Option<NaiveTime>,
    reference: DateTime<FixedOffset>,
) -> Option<DateTime<FixedOffset>> {
    let today = reference.date_naive();
    let time_of_day = time.unwrap_or_else(|| reference.time());
    let at = |date: NaiveDate| reference.offset().from_local_datetime(&date.and_time(time_of_day)).single();

    match day {
        Some(DayAnchor::Today) => at(today),
        Some(DayAnchor::Tomorrow) => at(today.succ_opt()?),
        Some(DayAnchor::Date(date)) => at(date),
        Some(DayAnchor::Weekday(weekday)) => {
            let ahead = (7 + weekday.num_days_from_monday() - today.weekday().num_days_from_monday()) % 7;
            let candidate = at(today + Duration::days(i64::from(ahead)))?;
            if candidate <= reference {
                Some(candidate + Duration::days(7))
            } else {
                Some(candidate)
            }
        }
        Some(DayAnchor::MonthDay { month, day, year: Some(year) }) => {
            at(NaiveDate::from_ymd_opt(year, month, day)?)
        }
        Some(DayAnchor::MonthDay { month, day, year: None }) => {
            let this_year = NaiveDate::from_ymd_opt(today.year(), month, day).and_then(at);
            match this_year {
                Some(candidate) if candidate > reference => Some(candidate),
                _ => at(NaiveDate::from_ymd_opt(today.year() + 1, month, day)?),
            }
        }
        None => {
            // A bare time of day is the next time the clock shows it.
            if time.is_none() {
                return None;
            }
            let candidate = at(today)?;
            if candidate <= reference {
                at(today.succ_opt()?)
            } else {
                Some(candidate)
            }
        }
    }
}

/// `in 5 minutes`, `in an hour`, `in 1 hour and 30 minutes`, `2 days from now`
fn parse_offset(tokens: &[&str]) -> Option<Duration> {
    let amounts = match tokens {
        ["in", rest @ ..] => rest,
        [rest @ .., "from", "now"] => rest,
        _ => return None,
    };
    if amounts.is_empty() {
        return None;
    }

    let mut total = Duration::zero();
    let mut rest = amounts;
    while !rest.is_empty() {
        if let ["and", tail @ ..] = rest {
            rest = tail;
        }
        let [amount, unit, tail @ ..] = rest else {
            return None;
        };
        let amount: i32 = match *amount {
            "a" | "an" => 1,
            n => n.parse().ok()?,
        };
        if amount <= 0 {
            return None;
        }
        total = total.checked_add(&(unit_step(unit)? * amount))?;
        rest = tail;
    }
    Some(total)
}

fn unit_step(unit: &str) -> Option<Duration> {
    let step = match unit.trim_end_matches('s') {
        "second" | "sec" => Duration::seconds(1),
        "minute" | "min" => Duration::minutes(1),
        "hour" | "hr" => Duration::hours(1),
        "day" => Duration::days(1),
        "week" => Duration::weeks(1),
        _ => return None,
    };
    Some(step)
}

/// Same time of day one week, month or year from `today`
fn next_period(unit: &str, today: NaiveDate) -> Option<NaiveDate> {
    match unit {
        "week" => today.checked_add_days(Days::new(7)),
        "month" => today.checked_add_months(Months::new(1)),
        "year" => today.checked_add_months(Months::new(12)),
        _ => None,
    }
}

/// ISO-ish absolute timestamps. Date-only input keeps the reference time of day.
fn parse_absolute(text: &str, reference: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime);
    }
    const FORMATS: [&str; 4] = ["%Y-%m-%d %H:%M", "%Y-%m-%dt%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dt%H:%M:%S"];
    let offset = reference.offset();
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return offset.from_local_datetime(&naive).single();
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| offset.from_local_datetime(&date.and_time(reference.time())).single())
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    let weekday = match token {
        "monday" | "mon" => Weekday::Mon,
        "tuesday" | "tue" | "tues" => Weekday::Tue,
        "wednesday" | "wed" => Weekday::Wed,
        "thursday" | "thu" | "thurs" => Weekday::Thu,
        "friday" | "fri" => Weekday::Fri,
        "saturday" | "sat" => Weekday::Sat,
        "sunday" | "sun" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn parse_month(token: &str) -> Option<u32> {
    let month = match token {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// `20`, `1st`, `22nd`
fn parse_day_of_month(token: &str) -> Option<u32> {
    let digits = ["st", "nd", "rd", "th"]
        .into_iter()
        .find_map(|suffix| token.strip_suffix(suffix))
        .unwrap_or(token);
    let day: u32 = digits.parse().ok()?;
    (1..=31).contains(&day).then_some(day)
}

fn parse_year(token: &str) -> Option<i32> {
    if token.len() != 4 {
        return None;
    }
    token.parse().ok()
}

/// `october 20`, `oct 20th 2027`, `20 october`, `20th of oct`
fn parse_calendar_day(tokens: &[&str]) -> Option<(DayAnchor, usize)> {
    let (month, day, used) = match parse_month(tokens.first()?) {
        Some(month) => (month, parse_day_of_month(tokens.get(1)?)?, 2),
        None => {
            let day = parse_day_of_month(tokens.first()?)?;
            let of = usize::from(tokens.get(1) == Some(&"of"));
            (parse_month(tokens.get(1 + of)?)?, day, 2 + of)
        }
    };
    let year = tokens.get(used).and_then(|t| parse_year(t));
    let used = used + usize::from(year.is_some());
    Some((DayAnchor::MonthDay { month, day, year }, used))
}

/// An hour with no am/pm, only after `at` or before `o'clock`
fn parse_bare_hour(tokens: &[&str], after_at: bool) -> Option<(u32, usize)> {
    let hour: u32 = tokens.first()?.parse().ok()?;
    if hour > 23 {
        return None;
    }
    match tokens.get(1).copied() {
        Some("o'clock" | "oclock") => Some((hour, 2)),
        _ if after_at => Some((hour, 1)),
        _ => None,
    }
}

/// Parse a time of day at the head of `tokens`, returning how many tokens it used
///
/// Accepts `noon`, `midnight`, `3pm`, `3:30pm`, `3 pm`, `3:30 pm` and 24-hour `15:00`.
fn parse_time(tokens: &[&str]) -> Option<(NaiveTime, usize)> {
    let head = *tokens.first()?;
    match head {
        "noon" => return Some((NaiveTime::from_hms_opt(12, 0, 0)?, 1)),
        "midnight" => return Some((NaiveTime::from_hms_opt(0, 0, 0)?, 1)),
        _ => {}
    }

    for meridiem in ["am", "pm"] {
        if let Some(clock) = head.strip_suffix(meridiem) {
            return Some((twelve_hour(clock, meridiem)?, 1));
        }
    }
    if let Some(meridiem) = tokens.get(1).copied().filter(|t| *t == "am" || *t == "pm") {
        return Some((twelve_hour(head, meridiem)?, 2));
    }

    // 24-hour clock needs the colon so a stray number is not read as an hour.
    let (hour, minute) = head.split_once(':')?;
    let time = NaiveTime::from_hms_opt(hour.parse().ok()?, minute.parse().ok()?, 0)?;
    Some((time, 1))
}

fn twelve_hour(clock: &str, meridiem: &str) -> Option<NaiveTime> {
    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };
    if !(1..=12).contains(&hour) {
        return None;
    }
    let hour = match meridiem {
        "pm" => hour % 12 + 12,
        _ => hour % 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Friday 2026-10-16 10:00 UTC
    fn reference() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2026, 10, 16, 10, 0, 0)
            .unwrap()
    }

    fn parse(text: &str) -> Option<DateTime<FixedOffset>> {
        NaturalDateParser.parse(text, reference())
    }

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        date(2026, 10, day, hour, minute)
    }

    fn date(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(year, month, day, hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn tomorrow_afternoon() {
        let resolved = parse("tomorrow 3pm").unwrap();
        assert_eq!(resolved, at(17, 15, 0));
        assert_eq!(resolved - reference(), Duration::hours(24) + Duration::hours(5));
        assert_eq!(parse("Tomorrow at 3 PM"), Some(at(17, 15, 0)));
        assert_eq!(parse("3pm tomorrow"), Some(at(17, 15, 0)));
    }

    #[test]
    fn gibberish_is_unresolved() {
        assert_eq!(parse("asdf"), None);
        assert_eq!(parse(""), None);
        assert_eq!(parse("tomorrow today"), None);
        assert_eq!(parse("in 5 parsecs"), None);
        assert_eq!(parse("13pm"), None);
    }

    #[test]
    fn weekdays_resolve_forward() {
        // Same weekday as the reference: later today if the time is ahead,
        // otherwise a week out.
        assert_eq!(parse("friday 11am"), Some(at(16, 11, 0)));
        assert_eq!(parse("friday 9am"), Some(at(23, 9, 0)));
        assert_eq!(parse("friday"), Some(at(23, 10, 0)));
        assert_eq!(parse("next monday at 9:30am"), Some(at(19, 9, 30)));
        assert_eq!(parse("wed noon"), Some(at(21, 12, 0)));
    }

    #[test]
    fn bare_time_is_next_occurrence() {
        assert_eq!(parse("15:00"), Some(at(16, 15, 0)));
        assert_eq!(parse("9am"), Some(at(17, 9, 0)));
        assert_eq!(parse("midnight"), Some(at(17, 0, 0)));
    }

    #[test]
    fn relative_offsets() {
        assert_eq!(parse("in 20 minutes"), Some(at(16, 10, 20)));
        assert_eq!(parse("in an hour"), Some(at(16, 11, 0)));
        assert_eq!(parse("in 2 days"), Some(at(18, 10, 0)));
        assert_eq!(parse("in 0 minutes"), None);
    }

    #[test]
    fn today_and_tonight_keep_the_day() {
        assert_eq!(parse("today 6pm"), Some(at(16, 18, 0)));
        assert_eq!(parse("tonight"), Some(at(16, 22, 0)));
        // Explicit "today" with a past time is returned as-is; callers reject it.
        assert_eq!(parse("today 8am"), Some(at(16, 8, 0)));
    }

    #[test]
    fn bare_hours_lean_towards_the_working_day() {
        assert_eq!(parse("at 5"), Some(at(16, 17, 0)));
        assert_eq!(parse("tomorrow at 5"), Some(at(17, 17, 0)));
        assert_eq!(parse("5 o'clock"), Some(at(16, 17, 0)));
        assert_eq!(parse("at 9"), Some(at(17, 9, 0)));
        assert_eq!(parse("at 17"), Some(at(16, 17, 0)));
        assert_eq!(parse("tonight at 9"), Some(at(16, 21, 0)));
        assert_eq!(parse("5"), None);
        assert_eq!(parse("at 5 at 6"), None);
    }

    #[test]
    fn parts_of_day() {
        assert_eq!(parse("tomorrow morning"), Some(at(17, 6, 0)));
        assert_eq!(parse("tomorrow evening"), Some(at(17, 20, 0)));
        assert_eq!(parse("this afternoon"), Some(at(16, 15, 0)));
        assert_eq!(parse("morning"), Some(at(17, 6, 0)));
        assert_eq!(parse("tomorrow morning at 7:30am"), Some(at(17, 7, 30)));
        assert_eq!(parse("morning evening"), None);
    }

    #[test]
    fn next_week_month_and_year() {
        assert_eq!(parse("next week"), Some(at(23, 10, 0)));
        assert_eq!(parse("next month"), Some(date(2026, 11, 16, 10, 0)));
        assert_eq!(parse("next year at noon"), Some(date(2027, 10, 16, 12, 0)));
    }

    #[test]
    fn compound_and_trailing_offsets() {
        assert_eq!(parse("in 1 hour 30 minutes"), Some(at(16, 11, 30)));
        assert_eq!(parse("in 1 hour and 15 minutes"), Some(at(16, 11, 15)));
        assert_eq!(parse("2 days from now"), Some(at(18, 10, 0)));
        assert_eq!(parse("in 1 hour 30"), None);
    }

    #[test]
    fn calendar_days_resolve_forward() {
        assert_eq!(parse("october 20 at 3pm"), Some(at(20, 15, 0)));
        assert_eq!(parse("oct 20"), Some(at(20, 10, 0)));
        assert_eq!(parse("20th of october"), Some(at(20, 10, 0)));
        // Already past this year.
        assert_eq!(parse("oct 1"), Some(date(2027, 10, 1, 10, 0)));
        assert_eq!(parse("march 3 2027 9am"), Some(date(2027, 3, 3, 9, 0)));
        assert_eq!(parse("oct 20 tomorrow"), None);
        assert_eq!(parse("oct 32"), None);
    }

    #[test]
    fn absolute_timestamps() {
        assert_eq!(parse("2026-10-20 14:30"), Some(at(20, 14, 30)));
        assert_eq!(parse("2026-10-20T14:30:00+00:00"), Some(at(20, 14, 30)));
        assert_eq!(parse("2026-10-20"), Some(at(20, 10, 0)));
    }
}
