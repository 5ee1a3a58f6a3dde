use crate::alloc::{self, AssignmentSink, FreeSlots, Obligation};
use crate::grid::{self, Shift, Weekday};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn parse_weekday(raw: &str) -> Result<Weekday, HandlerErr> {
    Weekday::parse(raw).ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "weekday must be one of mon/tue/wed/thu/fri".to_string(),
        details: None,
    })
}

fn teacher_shift(conn: &Connection, teacher_id: &str) -> Result<Shift, HandlerErr> {
    let shift: Option<String> = conn
        .query_row("SELECT shift FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_err)?;
    let Some(shift) = shift else {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: None,
        });
    };
    Shift::parse(&shift).ok_or_else(|| HandlerErr {
        code: "db_query_failed",
        message: format!("teacher has unknown shift '{}'", shift),
        details: None,
    })
}

/// The other side of a course conflict: who already holds the course at
/// this cell, and with what subject.
struct Clash {
    subject_id: String,
    subject_name: String,
    course_name: String,
    teacher_id: String,
    teacher_name: String,
}

/// True heart of the cross-teacher constraint: any committed binding at
/// (weekday, slot) that ties `course_id` to a *different* subject blocks
/// the candidate. Same subject is co-teaching, not a split course. The
/// candidate teacher's own row at this cell is the one being written, so
/// it never counts against itself.
fn course_conflict(
    conn: &Connection,
    weekday: Weekday,
    slot: &str,
    course_id: &str,
    excluding_subject_id: &str,
    excluding_teacher_id: &str,
) -> Result<Option<Clash>, rusqlite::Error> {
    conn.query_row(
        "SELECT a.subject_id, s.name, c.name, t.id, t.name
         FROM availability a
         JOIN subjects s ON s.id = a.subject_id
         JOIN courses c ON c.id = a.course_id
         JOIN teachers t ON t.id = a.teacher_id
         WHERE a.weekday = ? AND a.slot = ? AND a.course_id = ?
           AND a.subject_id IS NOT NULL AND a.subject_id != ?
           AND a.teacher_id != ?
         LIMIT 1",
        (
            weekday.as_str(),
            slot,
            course_id,
            excluding_subject_id,
            excluding_teacher_id,
        ),
        |r| {
            Ok(Clash {
                subject_id: r.get(0)?,
                subject_name: r.get(1)?,
                course_name: r.get(2)?,
                teacher_id: r.get(3)?,
                teacher_name: r.get(4)?,
            })
        },
    )
    .optional()
}

/// Availability Store adapter for one allocation run: conflict queries and
/// durable cell writes for a single teacher, over the live connection.
struct DbSink<'a> {
    conn: &'a Connection,
    teacher_id: &'a str,
}

impl AssignmentSink for DbSink<'_> {
    fn course_conflict(
        &self,
        day: Weekday,
        slot: &str,
        course_id: &str,
        excluding_subject_id: &str,
    ) -> anyhow::Result<Option<String>> {
        let clash = course_conflict(
            self.conn,
            day,
            slot,
            course_id,
            excluding_subject_id,
            self.teacher_id,
        )?;
        Ok(clash.map(|c| {
            format!(
                "{} {}: course {} already has {} with {}",
                day, slot, c.course_name, c.subject_name, c.teacher_name
            )
        }))
    }

    fn commit(
        &mut self,
        day: Weekday,
        slot: &str,
        subject_id: &str,
        course_id: &str,
    ) -> anyhow::Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE availability
             SET subject_id = ?, course_id = ?, updated_at = ?
             WHERE teacher_id = ? AND weekday = ? AND slot = ?",
            (subject_id, course_id, &now, self.teacher_id, day.as_str(), slot),
        )?;
        if updated == 0 {
            anyhow::bail!("no availability entry for {} {}", day, slot);
        }
        Ok(())
    }
}

fn load_obligations(conn: &Connection, teacher_id: &str) -> Result<Vec<Obligation>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT ts.subject_id, s.name, ts.course_id, cc.weekly_modules,
                    (SELECT COUNT(*) FROM availability a
                     WHERE a.teacher_id = ts.teacher_id
                       AND a.subject_id = ts.subject_id
                       AND a.course_id = ts.course_id) AS assigned
             FROM teacher_subjects ts
             JOIN subjects s ON s.id = ts.subject_id
             JOIN course_curriculum cc
               ON cc.course_id = ts.course_id AND cc.subject_id = ts.subject_id
             WHERE ts.teacher_id = ?
             ORDER BY s.name",
        )
        .map_err(db_err)?;
    stmt.query_map([teacher_id], |r| {
        let required: i64 = r.get(3)?;
        let assigned: i64 = r.get(4)?;
        Ok(Obligation {
            subject_id: r.get(0)?,
            subject_name: r.get(1)?,
            course_id: r.get(2)?,
            required,
            remaining: required - assigned,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(db_err)
}

/// Free cells of the teacher's weekly grid, ordered by grid index per day.
/// Rows whose slot label fell out of the catalogue are skipped.
fn load_free_slots(
    conn: &Connection,
    teacher_id: &str,
    shift: Shift,
) -> Result<FreeSlots, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT weekday, slot FROM availability
             WHERE teacher_id = ? AND subject_id IS NULL",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([teacher_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut free = FreeSlots::new();
    for (weekday, slot) in rows {
        let Some(day) = Weekday::parse(&weekday) else {
            continue;
        };
        if grid::slot_index(shift, &slot).is_none() {
            continue;
        }
        free.entry(day).or_default().push(slot);
    }
    for slots in free.values_mut() {
        slots.sort_by_key(|s| grid::slot_index(shift, s));
    }
    Ok(free)
}

/// One teacher's auto-assignment pass: hardest obligations first (largest
/// required, then largest remaining), one shared free-slot map shrinking
/// across obligations. Partial placement is reported, never raised.
fn auto_assign_teacher(
    conn: &Connection,
    teacher_id: &str,
) -> Result<(i64, Vec<String>), HandlerErr> {
    let shift = teacher_shift(conn, teacher_id)?;
    let mut obligations = load_obligations(conn, teacher_id)?;
    obligations.retain(|o| o.remaining > 0);
    obligations.sort_by(|a, b| {
        b.required
            .cmp(&a.required)
            .then(b.remaining.cmp(&a.remaining))
    });

    let mut free = load_free_slots(conn, teacher_id, shift)?;
    let mut sink = DbSink { conn, teacher_id };

    let mut placed = 0i64;
    let mut errors: Vec<String> = Vec::new();
    for obligation in &obligations {
        match alloc::allocate(shift, &mut free, obligation, &mut sink) {
            Ok(outcome) => {
                placed += outcome.placed;
                errors.extend(outcome.errors);
                if outcome.placed < obligation.remaining {
                    errors.push(format!(
                        "{}: placed {} of {} needed modules",
                        obligation.subject_name, outcome.placed, obligation.remaining
                    ));
                }
            }
            Err(e) => {
                return Err(HandlerErr {
                    code: "db_query_failed",
                    message: e.to_string(),
                    details: None,
                })
            }
        }
    }
    Ok((placed, errors))
}

fn timetable_auto_assign(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let (placed, errors) = auto_assign_teacher(conn, &teacher_id)?;
    Ok(json!({ "placed": placed, "errors": errors }))
}

/// All teachers, strictly sequential: each teacher's run must observe the
/// commits of the previous one or the conflict gate loses its meaning.
/// A single teacher's failure is recorded in that teacher's entry and the
/// batch carries on.
fn timetable_auto_assign_all(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teachers: Vec<(String, String)> = {
        let mut stmt = conn
            .prepare("SELECT id, name FROM teachers ORDER BY name")
            .map_err(db_err)?;
        stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?
    };

    let mut total_placed = 0i64;
    let mut total_errors = 0usize;
    let mut per_teacher: Vec<serde_json::Value> = Vec::new();
    for (teacher_id, teacher_name) in teachers {
        match auto_assign_teacher(conn, &teacher_id) {
            Ok((placed, errors)) => {
                total_placed += placed;
                total_errors += errors.len();
                per_teacher.push(json!({
                    "teacherId": teacher_id,
                    "teacherName": teacher_name,
                    "placed": placed,
                    "errors": errors
                }));
            }
            Err(e) => {
                total_errors += 1;
                per_teacher.push(json!({
                    "teacherId": teacher_id,
                    "teacherName": teacher_name,
                    "placed": 0,
                    "errors": [e.message]
                }));
            }
        }
    }

    Ok(json!({
        "totalPlaced": total_placed,
        "totalErrors": total_errors,
        "teachers": per_teacher
    }))
}

/// Full reset before a fresh auto-assignment run.
fn timetable_unassign_all(
    conn: &Connection,
    _params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now = chrono::Utc::now().to_rfc3339();
    let cleared = conn
        .execute(
            "UPDATE availability
             SET subject_id = NULL, course_id = NULL, updated_at = ?
             WHERE subject_id IS NOT NULL",
            [&now],
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "availability" })),
        })?;
    Ok(json!({ "cleared": cleared }))
}

/// The interactive single-cell edit. Clearing always succeeds if the cell
/// exists; setting walks the full gauntlet: obligation present, curriculum
/// limit not already met by other cells, conflict gate clear.
fn timetable_assign_one(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let weekday = parse_weekday(&get_required_str(params, "weekday")?)?;
    let slot = get_required_str(params, "slot")?;
    let shift = teacher_shift(conn, &teacher_id)?;
    if grid::slot_index(shift, &slot).is_none() {
        return Err(HandlerErr {
            code: "bad_params",
            message: format!("slot '{}' is not in the {} catalogue", slot, shift.as_str()),
            details: None,
        });
    }

    let cell: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT subject_id, course_id FROM availability
             WHERE teacher_id = ? AND weekday = ? AND slot = ?",
            (&teacher_id, weekday.as_str(), &slot),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((current_subject, current_course)) = cell else {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher has no availability entry for this cell".to_string(),
            details: Some(json!({ "weekday": weekday.as_str(), "slot": slot })),
        });
    };

    let subject_id = params
        .get("subjectId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let now = chrono::Utc::now().to_rfc3339();

    // Clearing: Bound -> Empty, unconditional once the cell exists.
    let Some(subject_id) = subject_id else {
        conn.execute(
            "UPDATE availability
             SET subject_id = NULL, course_id = NULL, updated_at = ?
             WHERE teacher_id = ? AND weekday = ? AND slot = ?",
            (&now, &teacher_id, weekday.as_str(), &slot),
        )
        .map_err(|e| HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "availability" })),
        })?;
        return Ok(json!({ "cleared": true }));
    };
    let course_id = get_required_str(params, "courseId")?;

    // The pair must be a real obligation of this teacher; the curriculum
    // supplies the weekly limit.
    let obligation: Option<(i64, String, String)> = conn
        .query_row(
            "SELECT cc.weekly_modules, s.name, c.name
             FROM teacher_subjects ts
             JOIN course_curriculum cc
               ON cc.course_id = ts.course_id AND cc.subject_id = ts.subject_id
             JOIN subjects s ON s.id = ts.subject_id
             JOIN courses c ON c.id = ts.course_id
             WHERE ts.teacher_id = ? AND ts.subject_id = ? AND ts.course_id = ?",
            (&teacher_id, &subject_id, &course_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(db_err)?;
    let Some((limit, subject_name, course_name)) = obligation else {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher has no obligation for this subject and course".to_string(),
            details: Some(json!({ "subjectId": subject_id, "courseId": course_id })),
        });
    };

    // Re-assigning the identical (subject, course) pair is a no-op, never
    // a limit violation. Same subject for a different course is a real
    // re-bind and walks the checks below.
    if current_subject.as_deref() == Some(subject_id.as_str())
        && current_course.as_deref() == Some(course_id.as_str())
    {
        return Ok(json!({ "unchanged": true }));
    }

    // Limit check over *other* cells only, so Bound(A) -> Bound(B) is
    // evaluated as if the cell were empty.
    let current: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM availability
             WHERE teacher_id = ? AND subject_id = ? AND course_id = ?
               AND NOT (weekday = ? AND slot = ?)",
            (&teacher_id, &subject_id, &course_id, weekday.as_str(), &slot),
            |r| r.get(0),
        )
        .map_err(db_err)?;
    if current >= limit {
        return Err(HandlerErr {
            code: "limit_exceeded",
            message: format!(
                "{} already has {} of {} weekly modules for {}",
                subject_name, current, limit, course_name
            ),
            details: Some(json!({ "limit": limit, "current": current })),
        });
    }

    // Decisive conflict gate, right before the write. The cell's own
    // current binding is being replaced, so it is excluded along with the
    // rest of this teacher's row.
    if let Some(clash) =
        course_conflict(conn, weekday, &slot, &course_id, &subject_id, &teacher_id)
            .map_err(db_err)?
    {
        return Err(HandlerErr {
            code: "course_conflict",
            message: format!(
                "course {} already has {} with {} at {} {}",
                clash.course_name, clash.subject_name, clash.teacher_name, weekday, slot
            ),
            details: Some(json!({
                "conflictingSubjectId": clash.subject_id,
                "conflictingSubjectName": clash.subject_name,
                "conflictingTeacherId": clash.teacher_id,
                "conflictingTeacherName": clash.teacher_name
            })),
        });
    }

    conn.execute(
        "UPDATE availability
         SET subject_id = ?, course_id = ?, updated_at = ?
         WHERE teacher_id = ? AND weekday = ? AND slot = ?",
        (&subject_id, &course_id, &now, &teacher_id, weekday.as_str(), &slot),
    )
    .map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "availability" })),
    })?;

    Ok(json!({ "assigned": true }))
}

/// Read-only weekly grid for the UI: every catalogue slot of the teacher's
/// shift, marked closed / free / bound (with names).
fn timetable_week(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let shift = teacher_shift(conn, &teacher_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT a.weekday, a.slot, a.subject_id, s.name, a.course_id, c.name
             FROM availability a
             LEFT JOIN subjects s ON s.id = a.subject_id
             LEFT JOIN courses c ON c.id = a.course_id
             WHERE a.teacher_id = ?",
        )
        .map_err(db_err)?;
    let rows: Vec<(String, String, Option<String>, Option<String>, Option<String>, Option<String>)> =
        stmt.query_map([&teacher_id], |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut days: Vec<serde_json::Value> = Vec::new();
    for day in grid::ALL_WEEKDAYS {
        let cells: Vec<serde_json::Value> = grid::ordered_slots(shift)
            .iter()
            .map(|slot| {
                let row = rows
                    .iter()
                    .find(|(wd, sl, ..)| wd == day.as_str() && sl == *slot);
                match row {
                    Some((_, _, subject_id, subject_name, course_id, course_name)) => json!({
                        "slot": slot,
                        "open": true,
                        "subjectId": subject_id,
                        "subjectName": subject_name,
                        "courseId": course_id,
                        "courseName": course_name
                    }),
                    None => json!({ "slot": slot, "open": false }),
                }
            })
            .collect();
        days.push(json!({ "weekday": day.as_str(), "cells": cells }));
    }

    Ok(json!({ "teacherId": teacher_id, "shift": shift.as_str(), "days": days }))
}

fn handle(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "timetable.assignOne" => Some(handle(state, req, timetable_assign_one)),
        "timetable.autoAssign" => Some(handle(state, req, timetable_auto_assign)),
        "timetable.autoAssignAll" => Some(handle(state, req, timetable_auto_assign_all)),
        "timetable.unassignAll" => Some(handle(state, req, timetable_unassign_all)),
        "timetable.week" => Some(handle(state, req, timetable_week)),
        _ => None,
    }
}
