use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("timetable.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            shift TEXT NOT NULL DEFAULT 'morning'
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            shift TEXT NOT NULL DEFAULT 'morning'
        )",
        [],
    )?;

    // Per-course curriculum: how many weekly modules each subject needs.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS course_curriculum(
            course_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            weekly_modules INTEGER NOT NULL,
            PRIMARY KEY(course_id, subject_id),
            FOREIGN KEY(course_id) REFERENCES courses(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_course_curriculum_subject ON course_curriculum(subject_id)",
        [],
    )?;

    // Obligation links: this teacher teaches this subject to this course.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_subjects(
            id TEXT PRIMARY KEY,
            teacher_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            course_id TEXT NOT NULL,
            UNIQUE(teacher_id, subject_id, course_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_subjects_teacher ON teacher_subjects(teacher_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teacher_subjects_course ON teacher_subjects(course_id)",
        [],
    )?;

    // One row per declared-open cell of the weekly grid. The binding columns
    // double as the cell's slot assignment; NULL means free.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS availability(
            teacher_id TEXT NOT NULL,
            weekday TEXT NOT NULL,
            slot TEXT NOT NULL,
            subject_id TEXT,
            course_id TEXT,
            updated_at TEXT,
            PRIMARY KEY(teacher_id, weekday, slot),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_availability_cell ON availability(weekday, slot)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_availability_course ON availability(course_id)",
        [],
    )?;

    Ok(conn)
}
