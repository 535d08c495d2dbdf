//! Job search over backend records.

use crate::backend::{JobRecord, JobState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Default page size.
pub const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Normalised view of a backend job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSearchResult {
    pub id: String,
    pub name: String,
    pub queue: String,
    pub payload: Value,
    pub status: JobState,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub attempts_made: u32,
    pub priority: i32,
    pub failed_reason: Option<String>,
    pub return_value: Option<Value>,
}

impl From<&JobRecord> for JobSearchResult {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            queue: record.queue.clone(),
            payload: record.payload.clone(),
            status: record.state,
            created_at: record.created_at,
            processed_at: record.processed_at,
            finished_at: record.finished_at,
            attempts_made: record.attempts_made,
            priority: record.priority,
            failed_reason: record.failed_reason.clone(),
            return_value: record.return_value.clone(),
        }
    }
}

/// Inclusive creation-time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderField {
    CreatedAt,
    ProcessedAt,
    FinishedAt,
    Priority,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: OrderField,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Filters applied to a search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    /// States to include. Empty means every state.
    #[serde(default)]
    pub status: Vec<JobState>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub date_range: Option<DateRange>,
    #[serde(default)]
    pub order_by: Option<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

/// A search request. Without a queue every known queue is searched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default)]
    pub filter: SearchFilter,
}

impl SearchQuery {
    pub fn queue(queue: impl Into<String>) -> Self {
        Self {
            queue: Some(queue.into()),
            filter: SearchFilter::default(),
        }
    }

    pub fn status(mut self, state: JobState) -> Self {
        self.filter.status.push(state);
        self
    }

    pub fn job_id(mut self, id: impl Into<String>) -> Self {
        self.filter.job_id = Some(id.into());
        self
    }

    pub fn order_by(mut self, field: OrderField, direction: SortDirection) -> Self {
        self.filter.order_by = Some(OrderBy { field, direction });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.filter.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.filter.offset = Some(offset);
        self
    }
}

fn compare(a: &JobSearchResult, b: &JobSearchResult, field: OrderField) -> Ordering {
    match field {
        OrderField::CreatedAt => a.created_at.cmp(&b.created_at),
        OrderField::ProcessedAt => a.processed_at.cmp(&b.processed_at),
        OrderField::FinishedAt => a.finished_at.cmp(&b.finished_at),
        OrderField::Priority => a.priority.cmp(&b.priority),
    }
}

/// Filter, order and paginate records.
///
/// Results are ordered newest first by creation time unless `order_by` says
/// otherwise.
pub fn apply(records: &[JobRecord], filter: &SearchFilter) -> Vec<JobSearchResult> {
    let mut results: Vec<JobSearchResult> = records
        .iter()
        .filter(|r| filter.status.is_empty() || filter.status.contains(&r.state))
        .filter(|r| filter.job_id.as_deref().map_or(true, |id| r.id == id))
        .filter(|r| filter.date_range.map_or(true, |range| range.contains(r.created_at)))
        .map(JobSearchResult::from)
        .collect();

    let order = filter.order_by.unwrap_or(OrderBy {
        field: OrderField::CreatedAt,
        direction: SortDirection::Desc,
    });
    results.sort_by(|a, b| {
        let ord = compare(a, b, order.field).then_with(|| a.id.cmp(&b.id));
        match order.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    });

    results
        .into_iter()
        .skip(filter.offset.unwrap_or(0))
        .take(filter.limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue_name::QueueNamer;
    use crate::schedule::CompiledScheduleOptions;
    use chrono::{Duration, TimeZone};

    fn records() -> Vec<JobRecord> {
        let queue = QueueNamer::default().name(None, None).unwrap();
        let base = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        (0..5)
            .map(|i| {
                let mut record = JobRecord::new(
                    i.to_string(),
                    &queue,
                    "send",
                    Value::Null,
                    CompiledScheduleOptions {
                        priority: Some(i),
                        ..CompiledScheduleOptions::default()
                    },
                    base + Duration::minutes(i64::from(i)),
                );
                if i % 2 == 0 {
                    record.state = JobState::Completed;
                }
                record
            })
            .collect()
    }

    #[test]
    fn test_default_order_is_newest_first() {
        let results = apply(&records(), &SearchFilter::default());
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["4", "3", "2", "1", "0"]);
    }

    #[test]
    fn test_status_filter_and_pagination() {
        let filter = SearchQuery::default()
            .status(JobState::Completed)
            .order_by(OrderField::Priority, SortDirection::Asc)
            .offset(1)
            .limit(1)
            .filter;
        let results = apply(&records(), &filter);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "2");
    }

    #[test]
    fn test_job_id_and_date_range() {
        let filter = SearchQuery::default().job_id("3").filter;
        assert_eq!(apply(&records(), &filter).len(), 1);

        let base = Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap();
        let filter = SearchFilter {
            date_range: Some(DateRange {
                from: Some(base + Duration::minutes(1)),
                to: Some(base + Duration::minutes(2)),
            }),
            ..SearchFilter::default()
        };
        assert_eq!(apply(&records(), &filter).len(), 2);
    }

    #[test]
    fn test_default_limit() {
        let queue = QueueNamer::default().name(None, None).unwrap();
        let many: Vec<JobRecord> = (0..80)
            .map(|i| {
                JobRecord::new(
                    i.to_string(),
                    &queue,
                    "send",
                    Value::Null,
                    CompiledScheduleOptions::default(),
                    Utc::now(),
                )
            })
            .collect();
        assert_eq!(apply(&many, &SearchFilter::default()).len(), DEFAULT_SEARCH_LIMIT);
    }
}
