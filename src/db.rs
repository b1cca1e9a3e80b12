use std::path::Path;

use chrono::NaiveDateTime;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Result, Row};

use crate::models::{Expense, MonthlyBudget, TransactionType};

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(path: &Path) -> DbPool {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::new(manager).expect("db pool");
    {
        let conn = pool.get().expect("db connection");
        run_migrations(&conn).expect("db migrations");
    }
    pool
}

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS expenses (
            id INTEGER PRIMARY KEY,
            amount REAL NOT NULL,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            date TEXT NOT NULL,
            transaction_type TEXT NOT NULL CHECK(transaction_type IN ('ONLINE', 'OFFLINE')),
            transaction_id TEXT
        );

        CREATE TABLE IF NOT EXISTS license_keys (
            license_key TEXT PRIMARY KEY,
            is_active INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS monthly_budgets (
            id INTEGER PRIMARY KEY,
            year_month TEXT NOT NULL UNIQUE,
            amount REAL NOT NULL
        );
        ",
    )?;
    Ok(())
}

fn read_transaction_type(row: &Row<'_>, idx: usize) -> Result<TransactionType> {
    let raw: String = row.get(idx)?;
    TransactionType::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            format!("unknown transaction type: {raw}").into(),
        )
    })
}

fn expense_from_row(row: &Row<'_>) -> Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        amount: row.get(1)?,
        description: row.get(2)?,
        category: row.get(3)?,
        date: row.get(4)?,
        transaction_type: read_transaction_type(row, 5)?,
        transaction_id: row.get(6)?,
    })
}

pub fn insert_expense(
    conn: &Connection,
    amount: f64,
    description: &str,
    category: &str,
    date: NaiveDateTime,
    transaction_type: TransactionType,
    transaction_id: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "
        INSERT INTO expenses (amount, description, category, date, transaction_type, transaction_id)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            amount,
            description,
            category,
            date,
            transaction_type.as_str(),
            transaction_id
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn sort_column(field: &str) -> &'static str {
    match field {
        "amount" => "amount",
        "category" => "category",
        "description" => "description",
        "id" => "id",
        _ => "date",
    }
}

// Range bounds are [start, end): callers pass the first excluded instant.
pub fn expenses_page(
    conn: &Connection,
    range: Option<(NaiveDateTime, NaiveDateTime)>,
    sort_by: &str,
    descending: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Expense>> {
    let column = sort_column(sort_by);
    let dir = if descending { "DESC" } else { "ASC" };

    let mut out = Vec::new();
    if let Some((start, end)) = range {
        let mut stmt = conn.prepare(&format!(
            "
            SELECT id, amount, description, category, date, transaction_type, transaction_id
            FROM expenses
            WHERE date >= ?1 AND date < ?2
            ORDER BY {column} {dir}, id {dir}
            LIMIT ?3 OFFSET ?4
            "
        ))?;
        let rows = stmt.query_map(params![start, end, limit, offset], expense_from_row)?;
        for row in rows {
            out.push(row?);
        }
    } else {
        let mut stmt = conn.prepare(&format!(
            "
            SELECT id, amount, description, category, date, transaction_type, transaction_id
            FROM expenses
            ORDER BY {column} {dir}, id {dir}
            LIMIT ?1 OFFSET ?2
            "
        ))?;
        let rows = stmt.query_map(params![limit, offset], expense_from_row)?;
        for row in rows {
            out.push(row?);
        }
    }
    Ok(out)
}

pub fn count_expenses(
    conn: &Connection,
    range: Option<(NaiveDateTime, NaiveDateTime)>,
) -> Result<i64> {
    if let Some((start, end)) = range {
        conn.query_row(
            "SELECT COUNT(*) FROM expenses WHERE date >= ?1 AND date < ?2",
            params![start, end],
            |row| row.get(0),
        )
    } else {
        conn.query_row("SELECT COUNT(*) FROM expenses", [], |row| row.get(0))
    }
}

pub fn total_expenses(conn: &Connection) -> Result<Option<f64>> {
    conn.query_row("SELECT SUM(amount) FROM expenses", [], |row| row.get(0))
}

pub fn total_expenses_between(
    conn: &Connection,
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<Option<f64>> {
    conn.query_row(
        "SELECT SUM(amount) FROM expenses WHERE date >= ?1 AND date < ?2",
        params![start, end],
        |row| row.get(0),
    )
}

pub fn license_exists(conn: &Connection) -> Result<bool> {
    conn.query_row("SELECT EXISTS(SELECT 1 FROM license_keys)", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|value| value == 1)
}

// First registration wins: the conditional insert is a single statement, so
// two concurrent registers against an empty table cannot both succeed.
pub fn register_license(conn: &Connection, license_key: &str) -> Result<bool> {
    let inserted = conn.execute(
        "
        INSERT INTO license_keys (license_key, is_active)
        SELECT ?1, 1
        WHERE NOT EXISTS (SELECT 1 FROM license_keys)
        ",
        params![license_key],
    )?;
    Ok(inserted == 1)
}

pub fn validate_license(conn: &Connection, license_key: &str) -> Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM license_keys WHERE license_key = ?1 AND is_active = 1)",
        params![license_key],
        |row| row.get::<_, i64>(0),
    )
    .map(|value| value == 1)
}

pub fn budget_by_month(conn: &Connection, year_month: &str) -> Result<Option<MonthlyBudget>> {
    let mut stmt = conn.prepare(
        "
        SELECT id, year_month, amount
        FROM monthly_budgets
        WHERE year_month = ?1
        ",
    )?;
    let mut rows = stmt.query(params![year_month])?;
    if let Some(row) = rows.next()? {
        Ok(Some(MonthlyBudget {
            id: row.get(0)?,
            year_month: row.get(1)?,
            amount: row.get(2)?,
        }))
    } else {
        Ok(None)
    }
}

pub fn set_budget(conn: &Connection, year_month: &str, amount: f64) -> Result<bool> {
    let inserted = conn.execute(
        "
        INSERT INTO monthly_budgets (year_month, amount)
        VALUES (?1, ?2)
        ON CONFLICT(year_month) DO NOTHING
        ",
        params![year_month, amount],
    )?;
    Ok(inserted == 1)
}

pub fn total_budget(conn: &Connection) -> Result<Option<f64>> {
    conn.query_row("SELECT SUM(amount) FROM monthly_budgets", [], |row| {
        row.get(0)
    })
}
