use std::fmt;

/// Morning shift catalogue: eight 40-minute modules. The label is the
/// identity key for a slot everywhere (storage, IPC, conflict checks);
/// there is no separate numeric id.
pub const MORNING_SLOTS: [&str; 8] = [
    "07:30 - 08:10",
    "08:10 - 08:50",
    "08:50 - 09:30",
    "09:30 - 10:10",
    "10:10 - 10:50",
    "10:50 - 11:30",
    "11:30 - 12:10",
    "12:10 - 12:50",
];

/// Afternoon shift catalogue: eleven modules, evening classes included.
pub const AFTERNOON_SLOTS: [&str; 11] = [
    "13:00 - 13:40",
    "13:40 - 14:20",
    "14:20 - 15:00",
    "15:00 - 15:40",
    "15:40 - 16:20",
    "16:20 - 17:00",
    "17:00 - 17:40",
    "17:40 - 18:20",
    "18:20 - 19:00",
    "19:00 - 19:40",
    "19:40 - 20:20",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shift {
    Morning,
    Afternoon,
}

impl Shift {
    pub fn parse(s: &str) -> Option<Shift> {
        match s {
            "morning" => Some(Shift::Morning),
            "afternoon" => Some(Shift::Afternoon),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Shift::Morning => "morning",
            Shift::Afternoon => "afternoon",
        }
    }
}

pub fn ordered_slots(shift: Shift) -> &'static [&'static str] {
    match shift {
        Shift::Morning => &MORNING_SLOTS,
        Shift::Afternoon => &AFTERNOON_SLOTS,
    }
}

/// Position of a slot within its shift; contiguity of a run is defined as
/// consecutive indices. None for labels outside the catalogue.
pub fn slot_index(shift: Shift, label: &str) -> Option<usize> {
    ordered_slots(shift).iter().position(|s| *s == label)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
}

pub const ALL_WEEKDAYS: [Weekday; 5] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
];

impl Weekday {
    pub fn parse(s: &str) -> Option<Weekday> {
        match s {
            "mon" => Some(Weekday::Mon),
            "tue" => Some(Weekday::Tue),
            "wed" => Some(Weekday::Wed),
            "thu" => Some(Weekday::Thu),
            "fri" => Some(Weekday::Fri),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
