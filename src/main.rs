#[macro_use]
extern crate rocket;

mod db;
mod models;

use std::path::PathBuf;

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime};
use db::DbPool;
use models::{Expense, TransactionType};
use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::{Header, Status};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{Build, Request, Response, Rocket, State};
use serde::{Deserialize, Serialize};

const ALLOWED_ORIGIN: &str = "http://localhost:5173";
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 200;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewExpense {
    amount: f64,
    description: String,
    category: String,
    transaction_type: TransactionType,
    transaction_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LicensePayload {
    license_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BudgetPayload {
    amount: f64,
    year_month: String,
}

#[derive(FromForm)]
struct ExpenseListQuery {
    page: Option<i64>,
    size: Option<i64>,
    #[field(name = "sortBy")]
    sort_by: Option<String>,
    #[field(name = "sortDir")]
    sort_dir: Option<String>,
    #[field(name = "startDate")]
    start_date: Option<String>,
    #[field(name = "endDate")]
    end_date: Option<String>,
}

#[derive(Serialize)]
struct MessageView {
    message: String,
}

impl MessageView {
    fn new(message: &str) -> Self {
        MessageView {
            message: message.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ValidityView {
    valid: bool,
}

#[derive(Serialize)]
struct PresenceView {
    exists: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExpensePageView {
    content: Vec<Expense>,
    total_pages: i64,
    total_elements: i64,
    page: i64,
    size: i64,
}

#[derive(Serialize)]
struct MonthSummaryView {
    budget: f64,
    expenses: f64,
    remaining: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AllTimeView {
    total_budget: f64,
    total_expenses: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryView {
    current_month: MonthSummaryView,
    all_time: AllTimeView,
}

fn current_month() -> String {
    Local::now().date_naive().format("%Y-%m").to_string()
}

fn current_month_range() -> (NaiveDateTime, NaiveDateTime) {
    let today = Local::now().date_naive();
    let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap_or(today);
    let (next_year, next_month) = if today.month() == 12 {
        (today.year() + 1, 1)
    } else {
        (today.year(), today.month() + 1)
    };
    let end = NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap_or(today);
    (start.and_time(NaiveTime::MIN), end.and_time(NaiveTime::MIN))
}

// Inclusive day range on the wire, half-open instants against the store.
fn parse_day_range(start: &str, end: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let start = NaiveDate::parse_from_str(start.trim(), "%Y-%m-%d").ok()?;
    let end = NaiveDate::parse_from_str(end.trim(), "%Y-%m-%d").ok()?;
    if start > end {
        return None;
    }
    let upper = end.succ_opt()?;
    Some((start.and_time(NaiveTime::MIN), upper.and_time(NaiveTime::MIN)))
}

fn is_year_month(value: &str) -> bool {
    value.len() == 7 && NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").is_ok()
}

#[post("/expenses", data = "<payload>")]
fn create_expense(
    pool: &State<DbPool>,
    payload: Json<NewExpense>,
) -> Result<Json<Expense>, Status> {
    let payload = payload.into_inner();
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    // The stored date is stamped here; any client-supplied value is discarded.
    let date = Local::now().naive_local();
    let id = db::insert_expense(
        &conn,
        payload.amount,
        &payload.description,
        &payload.category,
        date,
        payload.transaction_type,
        payload.transaction_id.as_deref(),
    )
    .map_err(|_| Status::InternalServerError)?;

    Ok(Json(Expense {
        id,
        amount: payload.amount,
        description: payload.description,
        category: payload.category,
        date,
        transaction_type: payload.transaction_type,
        transaction_id: payload.transaction_id,
    }))
}

#[post("/license/validate", data = "<payload>")]
fn validate_key(
    pool: &State<DbPool>,
    payload: Json<LicensePayload>,
) -> Result<Json<ValidityView>, Status> {
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let valid = db::validate_license(&conn, &payload.license_key)
        .map_err(|_| Status::InternalServerError)?;
    Ok(Json(ValidityView { valid }))
}

#[post("/license/register", data = "<payload>")]
fn register_key(
    pool: &State<DbPool>,
    payload: Json<LicensePayload>,
) -> Result<Custom<Json<MessageView>>, Status> {
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let registered = db::register_license(&conn, &payload.license_key)
        .map_err(|_| Status::InternalServerError)?;
    if registered {
        Ok(Custom(
            Status::Ok,
            Json(MessageView::new("License key registered successfully")),
        ))
    } else {
        Ok(Custom(
            Status::BadRequest,
            Json(MessageView::new("License key already registered")),
        ))
    }
}

#[get("/license/check")]
fn check_key(pool: &State<DbPool>) -> Result<Json<PresenceView>, Status> {
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let exists = db::license_exists(&conn).map_err(|_| Status::InternalServerError)?;
    Ok(Json(PresenceView { exists }))
}

#[get("/dashboard/expenses?<query..>")]
fn dashboard_expenses(
    pool: &State<DbPool>,
    query: ExpenseListQuery,
) -> Result<Json<ExpensePageView>, Status> {
    let page = query.page.unwrap_or(0).max(0);
    let size = query.size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let sort_by = query.sort_by.unwrap_or_default();
    let descending = !matches!(query.sort_dir.as_deref(), Some("asc"));
    let range = match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) => {
            Some(parse_day_range(start, end).ok_or(Status::BadRequest)?)
        }
        (None, None) => None,
        _ => return Err(Status::BadRequest),
    };

    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let total = db::count_expenses(&conn, range).map_err(|_| Status::InternalServerError)?;
    let content = db::expenses_page(&conn, range, &sort_by, descending, size, page.saturating_mul(size))
        .map_err(|_| Status::InternalServerError)?;
    let total_pages = if total == 0 { 0 } else { (total + size - 1) / size };

    Ok(Json(ExpensePageView {
        content,
        total_pages,
        total_elements: total,
        page,
        size,
    }))
}

#[get("/dashboard/summary")]
fn dashboard_summary(pool: &State<DbPool>) -> Result<Json<SummaryView>, Status> {
    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let (month_start, month_end) = current_month_range();
    let budget = db::budget_by_month(&conn, &current_month())
        .map_err(|_| Status::InternalServerError)?
        .map(|record| record.amount)
        .unwrap_or(0.0);
    let expenses = db::total_expenses_between(&conn, month_start, month_end)
        .map_err(|_| Status::InternalServerError)?
        .unwrap_or(0.0);
    let total_budget = db::total_budget(&conn)
        .map_err(|_| Status::InternalServerError)?
        .unwrap_or(0.0);
    let total_expenses = db::total_expenses(&conn)
        .map_err(|_| Status::InternalServerError)?
        .unwrap_or(0.0);

    Ok(Json(SummaryView {
        current_month: MonthSummaryView {
            budget,
            expenses,
            remaining: budget - expenses,
        },
        all_time: AllTimeView {
            total_budget,
            total_expenses,
        },
    }))
}

#[post("/dashboard/budget", data = "<payload>")]
fn add_budget(
    pool: &State<DbPool>,
    payload: Json<BudgetPayload>,
) -> Result<Custom<Json<MessageView>>, Status> {
    let payload = payload.into_inner();
    let year_month = payload.year_month.trim().to_string();
    if !is_year_month(&year_month) {
        return Ok(Custom(
            Status::BadRequest,
            Json(MessageView::new("Invalid yearMonth, expected YYYY-MM")),
        ));
    }

    let conn = pool.get().map_err(|_| Status::InternalServerError)?;
    let inserted = db::set_budget(&conn, &year_month, payload.amount)
        .map_err(|_| Status::InternalServerError)?;
    if inserted {
        Ok(Custom(
            Status::Ok,
            Json(MessageView::new("Budget set successfully")),
        ))
    } else {
        Ok(Custom(
            Status::BadRequest,
            Json(MessageView::new("Budget already set for this month")),
        ))
    }
}

#[options("/<_..>")]
fn preflight() {}

struct Cors;

#[rocket::async_trait]
impl Fairing for Cors {
    fn info(&self) -> Info {
        Info {
            name: "CORS headers",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, _request: &'r Request<'_>, response: &mut Response<'r>) {
        response.set_header(Header::new("Access-Control-Allow-Origin", ALLOWED_ORIGIN));
        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, OPTIONS",
        ));
        response.set_header(Header::new("Access-Control-Allow-Headers", "Content-Type"));
    }
}

fn build_rocket(pool: DbPool) -> Rocket<Build> {
    rocket::build()
        .manage(pool)
        .mount(
            "/api",
            routes![
                create_expense,
                validate_key,
                register_key,
                check_key,
                dashboard_expenses,
                dashboard_summary,
                add_budget,
                preflight
            ],
        )
        .attach(Cors)
}

#[launch]
fn rocket() -> _ {
    let mut db_path = PathBuf::from("data");
    std::fs::create_dir_all(&db_path).expect("create data directory");
    db_path.push("spendbook.sqlite");
    build_rocket(db::init_db(&db_path))
}
