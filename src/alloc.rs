use crate::grid::{self, Shift, Weekday};
use std::collections::BTreeMap;

/// One (teacher, subject, course) teaching obligation as seen by the
/// allocator: how many weekly modules the curriculum requires and how many
/// are still unplaced.
#[derive(Debug, Clone)]
pub struct Obligation {
    pub subject_id: String,
    pub course_id: String,
    pub subject_name: String,
    pub required: i64,
    pub remaining: i64,
}

/// Free cells of one teacher's weekly grid, day -> slot labels ordered by
/// grid index. BTreeMap keeps day iteration stable (Mon..Fri). Consumed
/// slots are removed in place as the allocator commits them.
pub type FreeSlots = BTreeMap<Weekday, Vec<String>>;

/// Write side of an allocation run. Production wraps the live store; tests
/// use an in-memory fake.
pub trait AssignmentSink {
    /// Some(description) if another teacher already holds `course_id` with
    /// a different subject at (day, slot).
    fn course_conflict(
        &self,
        day: Weekday,
        slot: &str,
        course_id: &str,
        excluding_subject_id: &str,
    ) -> anyhow::Result<Option<String>>;

    /// Durably bind (day, slot) of the teacher being scheduled to
    /// (subject, course).
    fn commit(
        &mut self,
        day: Weekday,
        slot: &str,
        subject_id: &str,
        course_id: &str,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Default)]
pub struct Allocation {
    pub placed: i64,
    pub errors: Vec<String>,
}

/// Place up to `obligation.remaining` modules into the teacher's free
/// slots. Preference order:
///
/// 1. remaining == 5: a 3+2 split across two different weekdays, all five
///    candidate slots conflict-free; if none exists, fall through to 3.
/// 2. remaining == 3: three contiguous slots on one day, else a 2+1 split
///    across two days, else fall through to 3.
/// 3. Flexible fill: day-major scan, run length min(left, 3) down to 1,
///    commit the first fully-passing contiguous run and restart the scan.
///
/// Splits commit slot by slot with a final conflict gate per slot; an
/// individual rejection is recorded and earlier commits stand (no
/// rollback). Partial placement is a normal outcome, reported via
/// `Allocation`, never an Err. Err is reserved for store faults on the
/// conflict query.
pub fn allocate(
    shift: Shift,
    free: &mut FreeSlots,
    obligation: &Obligation,
    sink: &mut dyn AssignmentSink,
) -> anyhow::Result<Allocation> {
    let mut out = Allocation::default();
    let needed = obligation.remaining;
    if needed <= 0 {
        return Ok(out);
    }

    if needed == 5 {
        if let Some(((day_a, run_a), (day_b, run_b))) =
            find_split(shift, free, 3, 2, obligation, sink)?
        {
            commit_run(free, day_a, &run_a, obligation, sink, &mut out)?;
            commit_run(free, day_b, &run_b, obligation, sink, &mut out)?;
            return Ok(out);
        }
        // No usable 3+2 split anywhere; take whatever the flexible fill finds.
    } else if needed == 3 {
        if let Some((day, run)) = find_run_any_day(shift, free, 3, obligation, sink)? {
            commit_run(free, day, &run, obligation, sink, &mut out)?;
            return Ok(out);
        }
        if let Some(((day_a, run_a), (day_b, run_b))) =
            find_split(shift, free, 2, 1, obligation, sink)?
        {
            commit_run(free, day_a, &run_a, obligation, sink, &mut out)?;
            commit_run(free, day_b, &run_b, obligation, sink, &mut out)?;
            return Ok(out);
        }
    }

    // Flexible fill. Longer contiguous runs win over scattered singletons;
    // every committed run restarts the day scan so the longest-first rule
    // applies to the shrunk map too.
    'scan: while out.placed < needed {
        let days: Vec<Weekday> = free.keys().copied().collect();
        let left = (needed - out.placed).min(3) as usize;
        for day in days {
            for len in (1..=left).rev() {
                let run = match free.get(&day) {
                    Some(slots) => passing_run_on_day(shift, day, slots, len, obligation, sink)?,
                    None => None,
                };
                if let Some(run) = run {
                    let committed = commit_run(free, day, &run, obligation, sink, &mut out)?;
                    if committed > 0 {
                        continue 'scan;
                    }
                }
            }
        }
        // Full pass over every day produced nothing committable.
        break;
    }

    Ok(out)
}

fn find_run_any_day(
    shift: Shift,
    free: &FreeSlots,
    len: usize,
    obligation: &Obligation,
    sink: &dyn AssignmentSink,
) -> anyhow::Result<Option<(Weekday, Vec<String>)>> {
    for (day, slots) in free.iter() {
        if let Some(run) = passing_run_on_day(shift, *day, slots, len, obligation, sink)? {
            return Ok(Some((*day, run)));
        }
    }
    Ok(None)
}

/// A (len_a on one day, len_b on a different day) split with every slot
/// conflict-free. Scans day pairs in map order.
fn find_split(
    shift: Shift,
    free: &FreeSlots,
    len_a: usize,
    len_b: usize,
    obligation: &Obligation,
    sink: &dyn AssignmentSink,
) -> anyhow::Result<Option<((Weekday, Vec<String>), (Weekday, Vec<String>))>> {
    for (day_a, slots_a) in free.iter() {
        let Some(run_a) = passing_run_on_day(shift, *day_a, slots_a, len_a, obligation, sink)?
        else {
            continue;
        };
        for (day_b, slots_b) in free.iter() {
            if day_b == day_a {
                continue;
            }
            if let Some(run_b) =
                passing_run_on_day(shift, *day_b, slots_b, len_b, obligation, sink)?
            {
                return Ok(Some(((*day_a, run_a), (*day_b, run_b))));
            }
        }
    }
    Ok(None)
}

/// First contiguous window of `len` free slots on `day` whose cells all
/// pass the conflict check. `slots` is ordered by grid index; a gap in
/// indices (an already-assigned cell in between) breaks contiguity.
fn passing_run_on_day(
    shift: Shift,
    day: Weekday,
    slots: &[String],
    len: usize,
    obligation: &Obligation,
    sink: &dyn AssignmentSink,
) -> anyhow::Result<Option<Vec<String>>> {
    if len == 0 || slots.len() < len {
        return Ok(None);
    }
    'window: for window in slots.windows(len) {
        let mut prev: Option<usize> = None;
        for slot in window {
            let Some(idx) = grid::slot_index(shift, slot) else {
                continue 'window;
            };
            if let Some(p) = prev {
                if idx != p + 1 {
                    continue 'window;
                }
            }
            prev = Some(idx);
        }
        for slot in window {
            if sink
                .course_conflict(day, slot, &obligation.course_id, &obligation.subject_id)?
                .is_some()
            {
                continue 'window;
            }
        }
        return Ok(Some(window.to_vec()));
    }
    Ok(None)
}

/// Commit each slot of a pre-checked run, re-gating on the conflict check
/// immediately before the write. Rejections and commit failures are
/// recorded per slot; committed slots leave the free map.
fn commit_run(
    free: &mut FreeSlots,
    day: Weekday,
    run: &[String],
    obligation: &Obligation,
    sink: &mut dyn AssignmentSink,
    out: &mut Allocation,
) -> anyhow::Result<i64> {
    let mut committed = 0;
    for slot in run {
        match sink.course_conflict(day, slot, &obligation.course_id, &obligation.subject_id)? {
            Some(clash) => {
                out.errors
                    .push(format!("{}: {}", obligation.subject_name, clash));
                continue;
            }
            None => {}
        }
        match sink.commit(day, slot, &obligation.subject_id, &obligation.course_id) {
            Ok(()) => {
                remove_free_slot(free, day, slot);
                out.placed += 1;
                committed += 1;
            }
            Err(e) => {
                out.errors
                    .push(format!("{}: {} {}: {}", obligation.subject_name, day, slot, e));
            }
        }
    }
    Ok(committed)
}

fn remove_free_slot(free: &mut FreeSlots, day: Weekday, slot: &str) {
    if let Some(slots) = free.get_mut(&day) {
        slots.retain(|s| s != slot);
        if slots.is_empty() {
            free.remove(&day);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};

    /// In-memory stand-in for the availability store: `occupied` holds the
    /// (day, slot) -> (course, subject) bindings of *other* teachers,
    /// `fail_commits` simulates store write faults.
    #[derive(Default)]
    struct FakeSink {
        occupied: HashMap<(Weekday, String), (String, String)>,
        fail_commits: HashSet<(Weekday, String)>,
        committed: Vec<(Weekday, String)>,
    }

    impl AssignmentSink for FakeSink {
        fn course_conflict(
            &self,
            day: Weekday,
            slot: &str,
            course_id: &str,
            excluding_subject_id: &str,
        ) -> anyhow::Result<Option<String>> {
            match self.occupied.get(&(day, slot.to_string())) {
                Some((course, subject))
                    if course == course_id && subject != excluding_subject_id =>
                {
                    Ok(Some(format!("course {} taken by {}", course, subject)))
                }
                _ => Ok(None),
            }
        }

        fn commit(
            &mut self,
            day: Weekday,
            slot: &str,
            _subject_id: &str,
            _course_id: &str,
        ) -> anyhow::Result<()> {
            if self.fail_commits.contains(&(day, slot.to_string())) {
                anyhow::bail!("store write refused");
            }
            self.committed.push((day, slot.to_string()));
            Ok(())
        }
    }

    fn morning(labels: &[usize]) -> Vec<String> {
        labels
            .iter()
            .map(|i| grid::MORNING_SLOTS[*i].to_string())
            .collect()
    }

    fn obligation(remaining: i64) -> Obligation {
        Obligation {
            subject_id: "subj-x".to_string(),
            course_id: "course-y".to_string(),
            subject_name: "Mathematics".to_string(),
            required: remaining,
            remaining,
        }
    }

    #[test]
    fn five_places_as_three_plus_two_split() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1, 2, 3]));
        free.insert(Weekday::Tue, morning(&[0, 1]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(5), &mut sink).unwrap();

        assert_eq!(out.placed, 5);
        assert!(out.errors.is_empty());
        let mon: Vec<_> = sink
            .committed
            .iter()
            .filter(|(d, _)| *d == Weekday::Mon)
            .map(|(_, s)| s.clone())
            .collect();
        assert_eq!(mon, morning(&[0, 1, 2]));
        // Monday's fourth slot survives the run.
        assert_eq!(free.get(&Weekday::Mon), Some(&morning(&[3])));
        assert!(free.get(&Weekday::Tue).is_none());
    }

    #[test]
    fn five_without_split_falls_back_to_flexible_fill() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1]));
        free.insert(Weekday::Tue, morning(&[3, 4]));
        free.insert(Weekday::Wed, morning(&[6]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(5), &mut sink).unwrap();

        assert_eq!(out.placed, 5);
        assert!(out.errors.is_empty());
        assert!(free.is_empty());
    }

    #[test]
    fn three_prefers_one_contiguous_block() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1]));
        free.insert(Weekday::Wed, morning(&[2, 3, 4]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(3), &mut sink).unwrap();

        assert_eq!(out.placed, 3);
        assert!(sink.committed.iter().all(|(d, _)| *d == Weekday::Wed));
        assert_eq!(free.get(&Weekday::Mon), Some(&morning(&[0, 1])));
    }

    #[test]
    fn three_falls_back_to_two_plus_one() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1]));
        free.insert(Weekday::Thu, morning(&[5]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(3), &mut sink).unwrap();

        assert_eq!(out.placed, 3);
        assert!(out.errors.is_empty());
        assert!(free.is_empty());
    }

    #[test]
    fn assigned_gap_breaks_contiguity() {
        // Slots 0,1,3: slot 2 is taken, so there is no 3-run and the 2+1
        // split cannot use a single day. The flexible fill still places all
        // three on Monday as a pair plus a singleton.
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1, 3]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(3), &mut sink).unwrap();

        assert_eq!(out.placed, 3);
        assert!(free.is_empty());
        assert_eq!(sink.committed.len(), 3);
    }

    #[test]
    fn conflicting_slots_are_stepped_over() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1, 2]));
        let mut sink = FakeSink::default();
        sink.occupied.insert(
            (Weekday::Mon, grid::MORNING_SLOTS[0].to_string()),
            ("course-y".to_string(), "subj-z".to_string()),
        );

        let out = allocate(Shift::Morning, &mut free, &obligation(2), &mut sink).unwrap();

        assert_eq!(out.placed, 2);
        assert!(out.errors.is_empty());
        assert_eq!(
            sink.committed,
            vec![
                (Weekday::Mon, grid::MORNING_SLOTS[1].to_string()),
                (Weekday::Mon, grid::MORNING_SLOTS[2].to_string()),
            ]
        );
        // The conflicting slot stays free for some other course.
        assert_eq!(free.get(&Weekday::Mon), Some(&morning(&[0])));
    }

    #[test]
    fn same_course_same_subject_is_not_a_conflict() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0]));
        let mut sink = FakeSink::default();
        // Another teacher holds the same course with the *same* subject:
        // co-teaching, not a split course.
        sink.occupied.insert(
            (Weekday::Mon, grid::MORNING_SLOTS[0].to_string()),
            ("course-y".to_string(), "subj-x".to_string()),
        );

        let out = allocate(Shift::Morning, &mut free, &obligation(1), &mut sink).unwrap();
        assert_eq!(out.placed, 1);
    }

    #[test]
    fn split_commit_failure_keeps_earlier_commits() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1, 2]));
        free.insert(Weekday::Tue, morning(&[0, 1]));
        let mut sink = FakeSink::default();
        sink.fail_commits
            .insert((Weekday::Tue, grid::MORNING_SLOTS[1].to_string()));

        let out = allocate(Shift::Morning, &mut free, &obligation(5), &mut sink).unwrap();

        // Four of five landed; the failed slot is reported, nothing rolled back.
        assert_eq!(out.placed, 4);
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].starts_with("Mathematics:"));
        assert_eq!(sink.committed.len(), 4);
        // The failed slot is still in the free map.
        assert_eq!(free.get(&Weekday::Tue), Some(&morning(&[1])));
    }

    #[test]
    fn partial_placement_is_reported_not_fatal() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Fri, morning(&[7]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(4), &mut sink).unwrap();

        assert_eq!(out.placed, 1);
        assert!(free.is_empty());
    }

    #[test]
    fn satisfied_obligation_is_a_noop() {
        let mut free = FreeSlots::new();
        free.insert(Weekday::Mon, morning(&[0, 1]));
        let mut sink = FakeSink::default();

        let out = allocate(Shift::Morning, &mut free, &obligation(0), &mut sink).unwrap();

        assert_eq!(out.placed, 0);
        assert!(sink.committed.is_empty());
        assert_eq!(free.get(&Weekday::Mon), Some(&morning(&[0, 1])));
    }
}
