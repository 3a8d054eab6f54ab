use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::HashMap;

/// Student record. `credits` is only ever mutated through
/// `create_credit_transaction`; it starts at zero.
#[derive(Debug, Serialize, Clone)]
pub struct Student {
    pub id: String,
    pub roll: String,
    pub name: String,
    pub course: String,
    pub year: i64,
    pub credits: i64,
    pub attendance_percent: f64,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

impl Student {
    pub fn new(roll: &str, name: &str, course: &str, year: i64, password_hash: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            roll: roll.to_string(),
            name: name.to_string(),
            course: course.to_string(),
            year,
            credits: 0,
            attendance_percent: 0.0,
            password_hash: password_hash.to_string(),
        }
    }
}

/// Faculty record. `program_ids` grows by one entry per program the
/// faculty member creates; it is stored as a JSON array column.
#[derive(Debug, Serialize, Clone)]
pub struct Faculty {
    pub id: String,
    pub fid: String,
    pub name: String,
    pub program_ids: Vec<String>,
    #[serde(skip_serializing)]
    pub password_hash: String,
}

impl Faculty {
    pub fn new(fid: &str, name: &str, password_hash: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            fid: fid.to_string(),
            name: name.to_string(),
            program_ids: Vec::new(),
            password_hash: password_hash.to_string(),
        }
    }
}

/// Program (event) record with extensible fields.
/// Known fields are columns; everything else a faculty member sends at
/// creation time lands in `fields` and is stored as a JSON column, so the
/// event shape can grow without schema changes.
#[derive(Debug, Serialize, Clone)]
pub struct Program {
    pub id: String,
    /// Owning faculty member's fid (business key, not internal id).
    pub faculty_id: String,
    pub event_date: NaiveDate,
    pub registered_ids: Vec<String>,
    pub attended_ids: Vec<String>,
    #[serde(flatten)]
    pub fields: HashMap<String, serde_json::Value>,
}

impl Program {
    pub fn new(
        faculty_fid: &str,
        event_date: NaiveDate,
        fields: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            faculty_id: faculty_fid.to_string(),
            event_date,
            registered_ids: Vec::new(),
            attended_ids: Vec::new(),
            fields,
        }
    }
}

/// Credit transaction: a signed delta from a faculty member (by fid) to a
/// student (by roll). Immutable once written; the side effect on the
/// student's balance is applied in the same SQL transaction.
#[derive(Debug, Serialize, Clone)]
pub struct CreditTransaction {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub credits: i64,
    pub date: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(sender_fid: &str, receiver_roll: &str, credits: i64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender_id: sender_fid.to_string(),
            receiver_id: receiver_roll.to_string(),
            credits,
            date: Utc::now(),
        }
    }
}

/// Caller identity resolved to a concrete role, exactly once per request.
#[derive(Debug, Clone)]
pub enum UserRecord {
    Faculty(Faculty),
    Student(Student),
}

impl UserRecord {
    pub fn role(&self) -> &'static str {
        match self {
            UserRecord::Faculty(_) => "faculty",
            UserRecord::Student(_) => "student",
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students (
            id TEXT PRIMARY KEY,
            roll TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            course TEXT NOT NULL,
            year INTEGER NOT NULL,
            credits INTEGER NOT NULL DEFAULT 0,
            attendance_percent REAL NOT NULL DEFAULT 0,
            password_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty (
            id TEXT PRIMARY KEY,
            fid TEXT UNIQUE NOT NULL,
            name TEXT NOT NULL,
            program_ids TEXT NOT NULL DEFAULT '[]',
            password_hash TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS programs (
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            event_date TEXT NOT NULL,
            registered_ids TEXT NOT NULL DEFAULT '[]',
            attended_ids TEXT NOT NULL DEFAULT '[]',
            fields TEXT NOT NULL DEFAULT '{}',
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS credit_transactions (
            id TEXT PRIMARY KEY,
            sender_id TEXT NOT NULL,
            receiver_id TEXT NOT NULL,
            credits INTEGER NOT NULL,
            date TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_sender ON credit_transactions(sender_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_tx_receiver ON credit_transactions(receiver_id)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// Students
// ============================================================================

pub fn insert_student(conn: &Connection, student: &Student) -> Result<()> {
    conn.execute(
        "INSERT INTO students (id, roll, name, course, year, credits, attendance_percent, password_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            student.id,
            student.roll,
            student.name,
            student.course,
            student.year,
            student.credits,
            student.attendance_percent,
            student.password_hash,
        ],
    )
    .context("Failed to insert student")?;

    Ok(())
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: row.get(0)?,
        roll: row.get(1)?,
        name: row.get(2)?,
        course: row.get(3)?,
        year: row.get(4)?,
        credits: row.get(5)?,
        attendance_percent: row.get(6)?,
        password_hash: row.get(7)?,
    })
}

const STUDENT_COLUMNS: &str =
    "id, roll, name, course, year, credits, attendance_percent, password_hash";

pub fn find_student_by_roll(conn: &Connection, roll: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE roll = ?1"),
            params![roll],
            student_from_row,
        )
        .optional()?;

    Ok(student)
}

pub fn find_student_by_id(conn: &Connection, id: &str) -> Result<Option<Student>> {
    let student = conn
        .query_row(
            &format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1"),
            params![id],
            student_from_row,
        )
        .optional()?;

    Ok(student)
}

pub fn all_students(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!("SELECT {STUDENT_COLUMNS} FROM students"))?;

    let students = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(students)
}

// ============================================================================
// Faculty
// ============================================================================

pub fn insert_faculty(conn: &Connection, faculty: &Faculty) -> Result<()> {
    let program_ids_json = serde_json::to_string(&faculty.program_ids)?;

    conn.execute(
        "INSERT INTO faculty (id, fid, name, program_ids, password_hash)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            faculty.id,
            faculty.fid,
            faculty.name,
            program_ids_json,
            faculty.password_hash,
        ],
    )
    .context("Failed to insert faculty")?;

    Ok(())
}

fn faculty_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Faculty> {
    let program_ids_json: String = row.get(3)?;
    let program_ids =
        serde_json::from_str(&program_ids_json).map_err(|_| rusqlite::Error::InvalidQuery)?;

    Ok(Faculty {
        id: row.get(0)?,
        fid: row.get(1)?,
        name: row.get(2)?,
        program_ids,
        password_hash: row.get(4)?,
    })
}

const FACULTY_COLUMNS: &str = "id, fid, name, program_ids, password_hash";

pub fn find_faculty_by_fid(conn: &Connection, fid: &str) -> Result<Option<Faculty>> {
    let faculty = conn
        .query_row(
            &format!("SELECT {FACULTY_COLUMNS} FROM faculty WHERE fid = ?1"),
            params![fid],
            faculty_from_row,
        )
        .optional()?;

    Ok(faculty)
}

pub fn find_faculty_by_id(conn: &Connection, id: &str) -> Result<Option<Faculty>> {
    let faculty = conn
        .query_row(
            &format!("SELECT {FACULTY_COLUMNS} FROM faculty WHERE id = ?1"),
            params![id],
            faculty_from_row,
        )
        .optional()?;

    Ok(faculty)
}

pub fn all_faculty(conn: &Connection) -> Result<Vec<Faculty>> {
    let mut stmt = conn.prepare(&format!("SELECT {FACULTY_COLUMNS} FROM faculty"))?;

    let faculty = stmt
        .query_map([], faculty_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(faculty)
}

/// Resolve an internal identifier to a role-tagged record, checking faculty
/// first and students second. One lookup per request; callers match on the
/// result instead of probing both collections again.
pub fn resolve_user(conn: &Connection, id: &str) -> Result<Option<UserRecord>> {
    if let Some(faculty) = find_faculty_by_id(conn, id)? {
        return Ok(Some(UserRecord::Faculty(faculty)));
    }

    if let Some(student) = find_student_by_id(conn, id)? {
        return Ok(Some(UserRecord::Student(student)));
    }

    Ok(None)
}

// ============================================================================
// Programs
// ============================================================================

/// Insert a program and append its id to the owning faculty's program list.
/// Both writes happen in one SQL transaction: either the program exists and
/// is listed under its owner, or neither write is visible.
pub fn create_program(conn: &mut Connection, program: &Program) -> Result<()> {
    let tx = conn.transaction()?;

    let registered_json = serde_json::to_string(&program.registered_ids)?;
    let attended_json = serde_json::to_string(&program.attended_ids)?;
    let fields_json = serde_json::to_string(&program.fields)?;

    tx.execute(
        "INSERT INTO programs (id, faculty_id, event_date, registered_ids, attended_ids, fields)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            program.id,
            program.faculty_id,
            program.event_date.format("%Y-%m-%d").to_string(),
            registered_json,
            attended_json,
            fields_json,
        ],
    )
    .context("Failed to insert program")?;

    let program_ids_json: String = tx.query_row(
        "SELECT program_ids FROM faculty WHERE fid = ?1",
        params![program.faculty_id],
        |row| row.get(0),
    )?;

    let mut program_ids: Vec<String> = serde_json::from_str(&program_ids_json)?;
    program_ids.push(program.id.clone());

    tx.execute(
        "UPDATE faculty SET program_ids = ?1 WHERE fid = ?2",
        params![serde_json::to_string(&program_ids)?, program.faculty_id],
    )?;

    tx.commit()?;

    Ok(())
}

fn program_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Program> {
    let event_date_str: String = row.get(2)?;
    let event_date = NaiveDate::parse_from_str(&event_date_str, "%Y-%m-%d")
        .map_err(|_| rusqlite::Error::InvalidQuery)?;

    let registered_json: String = row.get(3)?;
    let attended_json: String = row.get(4)?;
    let fields_json: String = row.get(5)?;

    Ok(Program {
        id: row.get(0)?,
        faculty_id: row.get(1)?,
        event_date,
        registered_ids: serde_json::from_str(&registered_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        attended_ids: serde_json::from_str(&attended_json)
            .map_err(|_| rusqlite::Error::InvalidQuery)?,
        fields: serde_json::from_str(&fields_json).map_err(|_| rusqlite::Error::InvalidQuery)?,
    })
}

pub fn all_programs(conn: &Connection) -> Result<Vec<Program>> {
    let mut stmt = conn.prepare(
        "SELECT id, faculty_id, event_date, registered_ids, attended_ids, fields FROM programs",
    )?;

    let programs = stmt
        .query_map([], program_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(programs)
}

// ============================================================================
// Credit transactions
// ============================================================================

/// Insert a credit transaction and apply its delta to the receiver's
/// balance, in one SQL transaction. Returns `false` without writing
/// anything when the receiver roll does not exist.
pub fn create_credit_transaction(
    conn: &mut Connection,
    credit_tx: &CreditTransaction,
) -> Result<bool> {
    let tx = conn.transaction()?;

    let receiver_exists: Option<i64> = tx
        .query_row(
            "SELECT 1 FROM students WHERE roll = ?1",
            params![credit_tx.receiver_id],
            |row| row.get(0),
        )
        .optional()?;

    if receiver_exists.is_none() {
        return Ok(false);
    }

    tx.execute(
        "INSERT INTO credit_transactions (id, sender_id, receiver_id, credits, date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            credit_tx.id,
            credit_tx.sender_id,
            credit_tx.receiver_id,
            credit_tx.credits,
            credit_tx.date.to_rfc3339(),
        ],
    )
    .context("Failed to insert credit transaction")?;

    tx.execute(
        "UPDATE students SET credits = credits + ?1 WHERE roll = ?2",
        params![credit_tx.credits, credit_tx.receiver_id],
    )?;

    tx.commit()?;

    Ok(true)
}

fn credit_tx_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<CreditTransaction> {
    let date_str: String = row.get(4)?;
    let date = DateTime::parse_from_rfc3339(&date_str)
        .map_err(|_| rusqlite::Error::InvalidQuery)?
        .with_timezone(&Utc);

    Ok(CreditTransaction {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        credits: row.get(3)?,
        date,
    })
}

pub fn transactions_for_sender(conn: &Connection, fid: &str) -> Result<Vec<CreditTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, credits, date
         FROM credit_transactions
         WHERE sender_id = ?1",
    )?;

    let transactions = stmt
        .query_map(params![fid], credit_tx_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

pub fn transactions_for_receiver(conn: &Connection, roll: &str) -> Result<Vec<CreditTransaction>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, receiver_id, credits, date
         FROM credit_transactions
         WHERE receiver_id = ?1",
    )?;

    let transactions = stmt
        .query_map(params![roll], credit_tx_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(transactions)
}

// ============================================================================
// Counts (admin CLI)
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct CollectionCounts {
    pub students: i64,
    pub faculty: i64,
    pub programs: i64,
    pub transactions: i64,
}

pub fn collection_counts(conn: &Connection) -> Result<CollectionCounts> {
    let count = |table: &str| -> Result<i64> {
        let n = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(n)
    };

    Ok(CollectionCounts {
        students: count("students")?,
        faculty: count("faculty")?,
        programs: count("programs")?,
        transactions: count("credit_transactions")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn test_student(roll: &str, name: &str) -> Student {
        Student::new(roll, name, "CS", 2, "hash")
    }

    #[test]
    fn test_duplicate_roll_rejected_first_record_unchanged() {
        let conn = test_conn();

        insert_student(&conn, &test_student("21CS001", "Asha")).unwrap();
        let second = insert_student(&conn, &test_student("21CS001", "Imposter"));

        assert!(second.is_err(), "duplicate roll must be rejected");

        let stored = find_student_by_roll(&conn, "21CS001").unwrap().unwrap();
        assert_eq!(stored.name, "Asha");
    }

    #[test]
    fn test_duplicate_fid_rejected() {
        let conn = test_conn();

        insert_faculty(&conn, &Faculty::new("F01", "Dr. Rao", "hash")).unwrap();
        let second = insert_faculty(&conn, &Faculty::new("F01", "Dr. Rao Again", "hash"));

        assert!(second.is_err());
        assert_eq!(all_faculty(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_resolve_user_tags_role() {
        let conn = test_conn();

        let faculty = Faculty::new("F01", "Dr. Rao", "hash");
        let student = test_student("21CS001", "Asha");
        insert_faculty(&conn, &faculty).unwrap();
        insert_student(&conn, &student).unwrap();

        match resolve_user(&conn, &faculty.id).unwrap() {
            Some(UserRecord::Faculty(f)) => assert_eq!(f.fid, "F01"),
            other => panic!("expected faculty, got {:?}", other),
        }

        match resolve_user(&conn, &student.id).unwrap() {
            Some(UserRecord::Student(s)) => assert_eq!(s.roll, "21CS001"),
            other => panic!("expected student, got {:?}", other),
        }

        assert!(resolve_user(&conn, "nope").unwrap().is_none());
    }

    #[test]
    fn test_create_program_appends_id_exactly_once() {
        let mut conn = test_conn();

        let faculty = Faculty::new("F01", "Dr. Rao", "hash");
        insert_faculty(&conn, &faculty).unwrap();

        let date = NaiveDate::parse_from_str("2024-05-01", "%Y-%m-%d").unwrap();
        let mut fields = HashMap::new();
        fields.insert("title".to_string(), serde_json::json!("Blood Drive"));
        let program = Program::new("F01", date, fields);

        create_program(&mut conn, &program).unwrap();

        let stored = &all_programs(&conn).unwrap()[0];
        assert_eq!(stored.event_date, date);
        assert_eq!(stored.faculty_id, "F01");
        assert!(stored.registered_ids.is_empty());
        assert!(stored.attended_ids.is_empty());

        let owner = find_faculty_by_fid(&conn, "F01").unwrap().unwrap();
        assert_eq!(owner.program_ids, vec![program.id.clone()]);
    }

    #[test]
    fn test_transaction_increments_credits_each_time() {
        let mut conn = test_conn();

        insert_student(&conn, &test_student("21CS001", "Asha")).unwrap();

        let tx = CreditTransaction::new("F01", "21CS001", 50);
        assert!(create_credit_transaction(&mut conn, &tx).unwrap());

        let after_one = find_student_by_roll(&conn, "21CS001").unwrap().unwrap();
        assert_eq!(after_one.credits, 50);

        // Not idempotent: a second identical delta applies again.
        let tx2 = CreditTransaction::new("F01", "21CS001", 50);
        assert!(create_credit_transaction(&mut conn, &tx2).unwrap());

        let after_two = find_student_by_roll(&conn, "21CS001").unwrap().unwrap();
        assert_eq!(after_two.credits, 100);
    }

    #[test]
    fn test_negative_delta_decreases_balance() {
        let mut conn = test_conn();

        insert_student(&conn, &test_student("21CS001", "Asha")).unwrap();

        create_credit_transaction(&mut conn, &CreditTransaction::new("F01", "21CS001", 30))
            .unwrap();
        create_credit_transaction(&mut conn, &CreditTransaction::new("F01", "21CS001", -10))
            .unwrap();

        let student = find_student_by_roll(&conn, "21CS001").unwrap().unwrap();
        assert_eq!(student.credits, 20);
    }

    #[test]
    fn test_transaction_unknown_receiver_writes_nothing() {
        let mut conn = test_conn();

        let tx = CreditTransaction::new("F01", "NOPE", 50);
        assert!(!create_credit_transaction(&mut conn, &tx).unwrap());

        assert_eq!(collection_counts(&conn).unwrap().transactions, 0);
    }

    #[test]
    fn test_transactions_filtered_by_business_key() {
        let mut conn = test_conn();

        insert_student(&conn, &test_student("21CS001", "Asha")).unwrap();
        insert_student(&conn, &test_student("21CS002", "Binu")).unwrap();

        create_credit_transaction(&mut conn, &CreditTransaction::new("F01", "21CS001", 10))
            .unwrap();
        create_credit_transaction(&mut conn, &CreditTransaction::new("F01", "21CS002", 20))
            .unwrap();
        create_credit_transaction(&mut conn, &CreditTransaction::new("F02", "21CS001", 30))
            .unwrap();

        let for_asha = transactions_for_receiver(&conn, "21CS001").unwrap();
        assert_eq!(for_asha.len(), 2);
        assert!(for_asha.iter().all(|t| t.receiver_id == "21CS001"));

        let from_f01 = transactions_for_sender(&conn, "F01").unwrap();
        assert_eq!(from_f01.len(), 2);
        assert!(from_f01.iter().all(|t| t.sender_id == "F01"));
    }
}
