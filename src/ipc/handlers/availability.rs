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

fn validate_slots(shift: Shift, labels: &[String]) -> Result<(), HandlerErr> {
    for label in labels {
        if grid::slot_index(shift, label).is_none() {
            return Err(HandlerErr {
                code: "bad_params",
                message: format!("slot '{}' is not in the {} catalogue", label, shift.as_str()),
                details: None,
            });
        }
    }
    Ok(())
}

fn availability_get(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let shift = teacher_shift(conn, &teacher_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT weekday, slot, subject_id, course_id
             FROM availability
             WHERE teacher_id = ?",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([&teacher_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
                r.get::<_, Option<String>>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;

    let mut days: Vec<serde_json::Value> = Vec::new();
    for day in grid::ALL_WEEKDAYS {
        let mut cells: Vec<(usize, serde_json::Value)> = rows
            .iter()
            .filter(|(wd, _, _, _)| wd == day.as_str())
            .filter_map(|(_, slot, subject_id, course_id)| {
                grid::slot_index(shift, slot).map(|idx| {
                    (
                        idx,
                        json!({
                            "slot": slot,
                            "subjectId": subject_id,
                            "courseId": course_id,
                            "free": subject_id.is_none()
                        }),
                    )
                })
            })
            .collect();
        cells.sort_by_key(|(idx, _)| *idx);
        if !cells.is_empty() {
            days.push(json!({
                "weekday": day.as_str(),
                "cells": cells.into_iter().map(|(_, c)| c).collect::<Vec<_>>()
            }));
        }
    }

    Ok(json!({ "teacherId": teacher_id, "shift": shift.as_str(), "days": days }))
}

/// Replace one weekday's declared-open cells. Cells that survive the edit
/// keep their binding; removed cells drop theirs with the row.
fn availability_set_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let weekday = parse_weekday(&get_required_str(params, "weekday")?)?;
    let Some(slots_json) = params.get("slots").and_then(|v| v.as_array()) else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing slots".to_string(),
            details: None,
        });
    };
    let slots: Vec<String> = slots_json
        .iter()
        .filter_map(|v| v.as_str().map(|s| s.to_string()))
        .collect();
    let shift = teacher_shift(conn, &teacher_id)?;
    validate_slots(shift, &slots)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let existing: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT slot FROM availability WHERE teacher_id = ? AND weekday = ?")
            .map_err(db_err)?;
        stmt.query_map((&teacher_id, weekday.as_str()), |r| r.get::<_, String>(0))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?
    };

    for slot in &existing {
        if !slots.contains(slot) {
            tx.execute(
                "DELETE FROM availability WHERE teacher_id = ? AND weekday = ? AND slot = ?",
                (&teacher_id, weekday.as_str(), slot),
            )
            .map_err(|e| HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "availability" })),
            })?;
        }
    }
    let now = chrono::Utc::now().to_rfc3339();
    for slot in &slots {
        if !existing.contains(slot) {
            tx.execute(
                "INSERT INTO availability(teacher_id, weekday, slot, subject_id, course_id, updated_at)
                 VALUES(?, ?, ?, NULL, NULL, ?)",
                (&teacher_id, weekday.as_str(), slot, &now),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "availability" })),
            })?;
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "teacherId": teacher_id, "weekday": weekday.as_str(), "slots": slots.len() }))
}

fn availability_delete_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let weekday = parse_weekday(&get_required_str(params, "weekday")?)?;
    teacher_shift(conn, &teacher_id)?;

    let removed = conn
        .execute(
            "DELETE FROM availability WHERE teacher_id = ? AND weekday = ?",
            (&teacher_id, weekday.as_str()),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "availability" })),
        })?;

    Ok(json!({ "removed": removed }))
}

/// Materialize availability as the complement of a declared-unavailable
/// set over the teacher's shift catalogue, for all five weekdays. This is
/// the incompatibility-declaration path: the operator states when the
/// teacher can NOT come in, everything else becomes open.
fn availability_generate_from_unavailable(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;
    let shift = teacher_shift(conn, &teacher_id)?;
    let unavailable = params
        .get("unavailable")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing unavailable".to_string(),
            details: None,
        })?;

    let mut per_day: Vec<(Weekday, Vec<String>)> = Vec::new();
    for day in grid::ALL_WEEKDAYS {
        let blocked: Vec<String> = unavailable
            .get(day.as_str())
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        validate_slots(shift, &blocked)?;
        let open: Vec<String> = grid::ordered_slots(shift)
            .iter()
            .filter(|s| !blocked.iter().any(|b| b == **s))
            .map(|s| s.to_string())
            .collect();
        per_day.push((day, open));
    }

    let mut total_open = 0usize;
    for (day, open) in &per_day {
        let day_params = json!({
            "teacherId": teacher_id,
            "weekday": day.as_str(),
            "slots": open
        });
        availability_set_day(conn, &day_params)?;
        total_open += open.len();
    }

    Ok(json!({ "teacherId": teacher_id, "openCells": total_open }))
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
        "availability.get" => Some(handle(state, req, availability_get)),
        "availability.setDay" => Some(handle(state, req, availability_set_day)),
        "availability.deleteDay" => Some(handle(state, req, availability_delete_day)),
        "availability.generateFromUnavailable" => {
            Some(handle(state, req, availability_generate_from_unavailable))
        }
        _ => None,
    }
}
