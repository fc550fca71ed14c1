//!
//! Documentation of the stats module.
//! Counters for the admin dashboard and per-day activity series.
//!

use super::*;
use models::*;

use bson::{doc, Document};
use chrono::{Duration, Months, TimeZone, Utc};
use futures::stream::TryStreamExt;
use mongodb::Database;
use serde::Serialize;

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardCounts {
    pub total_users: u64,
    pub active_users: u64,
    pub total_vehicles: u64,
    pub total_tickets: u64,
    pub open_tickets: u64,
    pub today_tickets: u64,
    pub today_scans: u64,
}

/// Window of the statistics endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeframe {
    Day,
    Week,
    Month,
}

impl Timeframe {
    /// Unknown or missing values mean a week
    pub fn parse(value: Option<&str>) -> Timeframe {
        match value.map(str::trim) {
            Some("day") => Timeframe::Day,
            Some("month") => Timeframe::Month,
            _ => Timeframe::Week,
        }
    }

    /// First instant covered by the window ending at `now`
    pub fn start(self, now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
        match self {
            Timeframe::Day => start_of_day(now),
            Timeframe::Week => now - Duration::days(7),
            Timeframe::Month => now.checked_sub_months(Months::new(1)).unwrap_or(now - Duration::days(30)),
        }
    }
}

/// Midnight UTC of `now`'s day
pub fn start_of_day(now: chrono::DateTime<Utc>) -> chrono::DateTime<Utc> {
    let date = now.date_naive();
    Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).unwrap_or_default())
}

/// One day of activity
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DailyCount {
    #[serde(rename = "_id")]
    pub day: String,
    pub count: u64,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub tickets: Vec<DailyCount>,
    pub resolved_tickets: Vec<DailyCount>,
    pub scans: Vec<DailyCount>,
}

pub async fn dashboard(db: &Database) -> mongodb::error::Result<DashboardCounts> {
    let today = bson::DateTime::from_chrono(start_of_day(Utc::now()));
    let users = db.collection::<Document>(USERS);
    let vehicles = db.collection::<Document>(VEHICLES);
    let tickets = db.collection::<Document>(TICKETS);

    let (total_users, active_users, total_vehicles, total_tickets, open_tickets, today_tickets, today_scans) = futures::try_join!(
        users.count_documents(doc! { "role": "user" }, None),
        users.count_documents(doc! { "role": "user", "isActive": true }, None),
        vehicles.count_documents(doc! { "isActive": true }, None),
        tickets.count_documents(None, None),
        tickets.count_documents(doc! { "status": { "$ne": TicketStatus::Resolved.as_str() } }, None),
        tickets.count_documents(doc! { "createdAt": { "$gte": today } }, None),
        notifications::count_scans_since(db, today),
    )?;

    Ok(DashboardCounts { total_users, active_users, total_vehicles, total_tickets, open_tickets, today_tickets, today_scans })
}

/// `$match` on `createdAt >= since` then one bucket per calendar day
pub fn daily_pipeline(since: bson::DateTime, extra: Document) -> Vec<Document> {
    let mut matcher = doc! { "createdAt": { "$gte": since } };
    matcher.extend(extra);
    vec![
        doc! { "$match": matcher },
        doc! { "$group": {
            "_id": { "$dateToString": { "format": "%Y-%m-%d", "date": "$createdAt" } },
            "count": { "$sum": 1 },
        } },
        doc! { "$sort": { "_id": 1 } },
    ]
}

async fn daily(db: &Database, collection: &str, pipeline: Vec<Document>) -> mongodb::error::Result<Vec<DailyCount>> {
    let rows: Vec<Document> = db
        .collection::<Document>(collection)
        .aggregate(pipeline, None)
        .await?
        .try_collect()
        .await?;

    Ok(rows
        .iter()
        .filter_map(|row| {
            let day = row.get_str("_id").ok()?.to_string();
            let count = match row.get("count")? {
                bson::Bson::Int32(n) => *n as u64,
                bson::Bson::Int64(n) => *n as u64,
                _ => return None,
            };
            Some(DailyCount { day, count })
        })
        .collect())
}

pub async fn statistics(db: &Database, timeframe: Timeframe) -> mongodb::error::Result<Statistics> {
    let since = bson::DateTime::from_chrono(timeframe.start(Utc::now()));
    let (tickets, resolved_tickets, scans) = futures::try_join!(
        daily(db, TICKETS, daily_pipeline(since, doc! {})),
        daily(db, TICKETS, daily_pipeline(since, doc! { "status": TicketStatus::Resolved.as_str() })),
        daily(db, NOTIFICATIONS, daily_pipeline(since, doc! { "type": "qr_scan" })),
    )?;
    Ok(Statistics { tickets, resolved_tickets, scans })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_timeframes_mean_a_week() {
        assert_eq!(Timeframe::parse(Some("day")), Timeframe::Day);
        assert_eq!(Timeframe::parse(Some("month")), Timeframe::Month);
        assert_eq!(Timeframe::parse(Some("year")), Timeframe::Week);
        assert_eq!(Timeframe::parse(None), Timeframe::Week);
    }

    #[test]
    fn windows_end_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap();
        assert_eq!(Timeframe::Day.start(now), Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap());
        assert_eq!(Timeframe::Week.start(now), Utc.with_ymd_and_hms(2024, 3, 24, 15, 30, 0).unwrap());
        // clamps to the end of the shorter month
        assert_eq!(Timeframe::Month.start(now), Utc.with_ymd_and_hms(2024, 2, 29, 15, 30, 0).unwrap());
    }

    #[test]
    fn pipeline_groups_by_day() {
        let pipeline = daily_pipeline(bson::DateTime::from_millis(0), doc! { "type": "qr_scan" });
        assert_eq!(pipeline.len(), 3);
        let matcher = pipeline[0].get_document("$match").unwrap();
        assert_eq!(matcher.get_str("type").unwrap(), "qr_scan");
        assert!(matcher.contains_key("createdAt"));
        assert!(pipeline[1].get_document("$group").is_ok());
    }
}
