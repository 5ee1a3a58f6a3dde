use crate::grid::Shift;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_teachers_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "teachers": [] }));
    };

    // Include basic counts so the UI can show a useful dashboard.
    let mut stmt = match conn.prepare(
        "SELECT
           t.id,
           t.name,
           t.shift,
           (SELECT COUNT(*) FROM teacher_subjects ts WHERE ts.teacher_id = t.id) AS obligation_count,
           (SELECT COUNT(*) FROM availability a WHERE a.teacher_id = t.id) AS open_slot_count,
           (SELECT COUNT(*) FROM availability a
            WHERE a.teacher_id = t.id AND a.subject_id IS NOT NULL) AS assigned_slot_count
         FROM teachers t
         ORDER BY t.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "shift": row.get::<_, String>(2)?,
                "obligationCount": row.get::<_, i64>(3)?,
                "openSlotCount": row.get::<_, i64>(4)?,
                "assignedSlotCount": row.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(teachers) => ok(&req.id, json!({ "teachers": teachers })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }
    let shift = req
        .params
        .get("shift")
        .and_then(|v| v.as_str())
        .unwrap_or("morning");
    if Shift::parse(shift).is_none() {
        return err(
            &req.id,
            "bad_params",
            "shift must be 'morning' or 'afternoon'",
            None,
        );
    }

    let teacher_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teachers(id, name, shift) VALUES(?, ?, ?)",
        (&teacher_id, &name, shift),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    ok(
        &req.id,
        json!({ "teacherId": teacher_id, "name": name, "shift": shift }),
    )
}

fn handle_teachers_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "teacher not found", None);
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    if let Err(e) = tx.execute(
        "DELETE FROM availability WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "availability" })),
        );
    }
    if let Err(e) = tx.execute(
        "DELETE FROM teacher_subjects WHERE teacher_id = ?",
        [&teacher_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }
    if let Err(e) = tx.execute("DELETE FROM teachers WHERE id = ?", [&teacher_id]) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teachers" })),
        );
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_teachers_assign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };
    let subject_id = match req.params.get("subjectId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing subjectId", None),
    };
    let course_id = match req.params.get("courseId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing courseId", None),
    };

    // The triple only makes sense if the course curriculum declares the
    // subject; the required module count comes from there.
    let weekly: Option<i64> = match conn
        .query_row(
            "SELECT weekly_modules FROM course_curriculum WHERE course_id = ? AND subject_id = ?",
            (&course_id, &subject_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(weekly_modules) = weekly else {
        return err(
            &req.id,
            "not_found",
            "course curriculum has no entry for this subject",
            Some(json!({ "courseId": course_id, "subjectId": subject_id })),
        );
    };

    let assignment_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO teacher_subjects(id, teacher_id, subject_id, course_id)
         VALUES(?, ?, ?, ?)
         ON CONFLICT(teacher_id, subject_id, course_id) DO NOTHING",
        (&assignment_id, &teacher_id, &subject_id, &course_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }

    ok(
        &req.id,
        json!({
            "teacherId": teacher_id,
            "subjectId": subject_id,
            "courseId": course_id,
            "weeklyModules": weekly_modules
        }),
    )
}

fn handle_teachers_list_assignments(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let teacher_id = match req.params.get("teacherId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing teacherId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT ts.id, ts.subject_id, s.name, ts.course_id, c.name, cc.weekly_modules,
                (SELECT COUNT(*) FROM availability a
                 WHERE a.teacher_id = ts.teacher_id
                   AND a.subject_id = ts.subject_id
                   AND a.course_id = ts.course_id) AS assigned
         FROM teacher_subjects ts
         JOIN subjects s ON s.id = ts.subject_id
         JOIN courses c ON c.id = ts.course_id
         JOIN course_curriculum cc ON cc.course_id = ts.course_id AND cc.subject_id = ts.subject_id
         WHERE ts.teacher_id = ?
         ORDER BY cc.weekly_modules DESC, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&teacher_id], |row| {
            Ok(json!({
                "assignmentId": row.get::<_, String>(0)?,
                "subjectId": row.get::<_, String>(1)?,
                "subjectName": row.get::<_, String>(2)?,
                "courseId": row.get::<_, String>(3)?,
                "courseName": row.get::<_, String>(4)?,
                "weeklyModules": row.get::<_, i64>(5)?,
                "assignedModules": row.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assignments) => ok(&req.id, json!({ "assignments": assignments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_teachers_unassign_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let assignment_id = match req.params.get("assignmentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing assignmentId", None),
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT teacher_id, subject_id, course_id FROM teacher_subjects WHERE id = ?",
            [&assignment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((teacher_id, subject_id, course_id)) = row else {
        return err(&req.id, "not_found", "assignment not found", None);
    };

    // Refuse while timetable cells still carry the binding; the operator
    // must clear those first so the obligation-count invariant stays true.
    let bound: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM availability
         WHERE teacher_id = ? AND subject_id = ? AND course_id = ?",
        (&teacher_id, &subject_id, &course_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if bound > 0 {
        return err(
            &req.id,
            "bad_params",
            format!("{} timetable cells still bound; clear them first", bound),
            Some(json!({ "boundCells": bound })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM teacher_subjects WHERE id = ?", [&assignment_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "teacher_subjects" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teachers.list" => Some(handle_teachers_list(state, req)),
        "teachers.create" => Some(handle_teachers_create(state, req)),
        "teachers.delete" => Some(handle_teachers_delete(state, req)),
        "teachers.assignSubject" => Some(handle_teachers_assign_subject(state, req)),
        "teachers.listAssignments" => Some(handle_teachers_list_assignments(state, req)),
        "teachers.unassignSubject" => Some(handle_teachers_unassign_subject(state, req)),
        _ => None,
    }
}
