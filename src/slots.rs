//! Daily slot geometry derived from `TimetableSettings`.

use log::warn;
use serde::Serialize;
use std::fmt;

use crate::data::TimetableSettings;

/// One teaching period, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSlot {
    pub start: u32,
    pub end: u32,
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02} - {:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

fn parse_clock(value: &str) -> Option<u32> {
    let (hours, minutes) = value.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok()?;
    let minutes: u32 = minutes.parse().ok()?;
    (hours < 24 && minutes < 60).then_some(hours * 60 + minutes)
}

/// Lays periods back to back from college start to end, skipping breaks.
///
/// A period that would overlap a break is dropped and the clock jumps to the end
/// of that break; a period that would overrun the day ends the list. Invalid
/// settings produce no slots.
pub fn generate_time_slots(settings: &TimetableSettings) -> Vec<TimeSlot> {
    let (Some(day_start), Some(day_end)) = (
        parse_clock(&settings.college_start_time),
        parse_clock(&settings.college_end_time),
    ) else {
        warn!("Invalid college start/end time in timetable settings: {:?}", settings);
        return Vec::new();
    };
    if settings.period_duration == 0 || day_start >= day_end {
        warn!("Timetable settings cannot produce any slot: {:?}", settings);
        return Vec::new();
    }

    let mut breaks: Vec<(u32, u32)> = settings
        .breaks
        .iter()
        .filter_map(|b| {
            let start = parse_clock(&b.start_time)?;
            let end = parse_clock(&b.end_time)?;
            (start < end).then_some((start, end))
        })
        .collect();
    breaks.sort_unstable();

    let mut slots = Vec::new();
    let mut now = day_start;
    while now < day_end {
        if let Some(&(_, end)) = breaks.iter().find(|(s, e)| now >= *s && now < *e) {
            now = end;
            continue;
        }
        let Some(slot_end) = now.checked_add(settings.period_duration).filter(|&e| e <= day_end) else {
            break;
        };
        if let Some(&(_, end)) = breaks.iter().find(|(s, e)| slot_end > *s && now < *e) {
            now = end;
            continue;
        }
        slots.push(TimeSlot { start: now, end: slot_end });
        now = slot_end;
    }
    slots
}
