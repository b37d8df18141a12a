//! Filtering and pagination for the administrative task listing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Task;
use crate::error::{Result, TaskQueueError};
use crate::state_machine::TaskStatus;

pub const DEFAULT_PER_PAGE: u32 = 10;
pub const MAX_PER_PAGE: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub task_type: Option<String>,
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_until: Option<DateTime<Utc>>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_until = Some(until);
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |s| task.status == s)
            && self
                .task_type
                .as_deref()
                .map_or(true, |t| task.task_type == t)
            && self.created_from.map_or(true, |from| task.created_at >= from)
            && self.created_until.map_or(true, |until| task.created_at < until)
    }
}

/// Validated paging parameters.
///
/// Only obtainable through [`PageRequest::new`], its `Default`, or
/// deserialization, which applies the same checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPageRequest")]
pub struct PageRequest {
    page: u32,
    per_page: u32,
}

/// Wire form of [`PageRequest`] before validation
#[derive(Deserialize)]
struct RawPageRequest {
    #[serde(default = "first_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

fn first_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    DEFAULT_PER_PAGE
}

impl TryFrom<RawPageRequest> for PageRequest {
    type Error = TaskQueueError;

    fn try_from(raw: RawPageRequest) -> Result<Self> {
        Self::new(raw.page, raw.per_page)
    }
}

impl PageRequest {
    /// Validate page parameters; `per_page` is capped at [`MAX_PER_PAGE`]
    pub fn new(page: u32, per_page: u32) -> Result<Self> {
        if page < 1 {
            return Err(TaskQueueError::ValidationError(format!(
                "Invalid page: {page}"
            )));
        }
        if per_page < 1 {
            return Err(TaskQueueError::ValidationError(format!(
                "Invalid page size: {per_page}"
            )));
        }
        Ok(Self {
            page,
            per_page: per_page.min(MAX_PER_PAGE),
        })
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn limit(&self) -> u64 {
        u64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageMeta {
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u64,
    pub from: u64,
    pub to: u64,
}

impl PageMeta {
    pub fn new(total: u64, request: PageRequest) -> Self {
        let per_page = u64::from(request.per_page.max(1));
        let last_page = total.div_ceil(per_page);
        let (from, to) = if total == 0 || request.offset() >= total {
            (0, 0)
        } else {
            (
                request.offset() + 1,
                (u64::from(request.page) * per_page).min(total),
            )
        };

        Self {
            total,
            per_page: request.per_page,
            current_page: request.page,
            last_page,
            from,
            to,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, request: PageRequest) -> Self {
        Self {
            data,
            meta: PageMeta::new(total, request),
        }
    }
}
