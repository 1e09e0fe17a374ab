use chrono::{DateTime, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{Message, Thread};

/// Page size. `All` is spelled `false` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerPage {
    Limit(usize),
    All,
}

impl PerPage {
    pub fn limit(&self) -> Option<usize> {
        match self {
            PerPage::Limit(n) => Some(*n),
            PerPage::All => None,
        }
    }
}

impl From<usize> for PerPage {
    fn from(n: usize) -> Self {
        PerPage::Limit(n)
    }
}

impl Serialize for PerPage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            PerPage::Limit(n) => serializer.serialize_u64(*n as u64),
            PerPage::All => serializer.serialize_bool(false),
        }
    }
}

impl<'de> Deserialize<'de> for PerPage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PerPageVisitor;

        impl<'de> Visitor<'de> for PerPageVisitor {
            type Value = PerPage;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a non-negative page size or false")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<PerPage, E> {
                if v {
                    Err(E::custom("perPage: true is not a page size"))
                } else {
                    Ok(PerPage::All)
                }
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<PerPage, E> {
                Ok(PerPage::Limit(v as usize))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<PerPage, E> {
                usize::try_from(v)
                    .map(PerPage::Limit)
                    .map_err(|_| E::custom("perPage must be >= 0"))
            }
        }

        deserializer.deserialize_any(PerPageVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThreadOrderField {
    #[default]
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadOrderBy {
    pub field: ThreadOrderField,
    pub direction: SortDirection,
}

impl Default for ThreadOrderBy {
    fn default() -> Self {
        Self {
            field: ThreadOrderField::CreatedAt,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListThreadsQuery {
    pub resource_id: String,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_thread_page_size")]
    pub per_page: PerPage,
    #[serde(default)]
    pub order_by: ThreadOrderBy,
}

fn default_thread_page_size() -> PerPage {
    PerPage::Limit(100)
}

impl ListThreadsQuery {
    pub fn new(resource_id: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            page: 0,
            per_page: default_thread_page_size(),
            order_by: ThreadOrderBy::default(),
        }
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn with_per_page(mut self, per_page: impl Into<PerPage>) -> Self {
        self.per_page = per_page.into();
        self
    }

    pub fn with_order_by(mut self, field: ThreadOrderField, direction: SortDirection) -> Self {
        self.order_by = ThreadOrderBy { field, direction };
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadPage {
    pub threads: Vec<Thread>,
    pub total: usize,
    pub page: i64,
    pub per_page: PerPage,
    pub has_more: bool,
}

/// Extra message pulled into a listing together with its rank neighbours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncludeRequest {
    pub id: String,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub with_previous_messages: usize,
    #[serde(default)]
    pub with_next_messages: usize,
}

impl IncludeRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            with_previous_messages: 0,
            with_next_messages: 0,
        }
    }

    pub fn in_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_context(mut self, previous: usize, next: usize) -> Self {
        self.with_previous_messages = previous;
        self.with_next_messages = next;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_exclusive: bool,
    #[serde(default)]
    pub end_exclusive: bool,
}

impl DateRange {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        let after_start = match &self.start {
            Some(start) if self.start_exclusive => at > start,
            Some(start) => at >= start,
            None => true,
        };
        let before_end = match &self.end {
            Some(end) if self.end_exclusive => at < end,
            Some(end) => at <= end,
            None => true,
        };
        after_start && before_end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListMessagesQuery {
    pub thread_ids: Vec<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub include: Vec<IncludeRequest>,
    #[serde(default)]
    pub filter: MessageFilter,
    #[serde(default)]
    pub page: i64,
    #[serde(default = "default_message_page_size")]
    pub per_page: PerPage,
    #[serde(default)]
    pub order: SortDirection,
}

fn default_message_page_size() -> PerPage {
    PerPage::Limit(40)
}

impl ListMessagesQuery {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::threads(vec![thread_id.into()])
    }

    pub fn threads(thread_ids: Vec<String>) -> Self {
        Self {
            thread_ids,
            resource_id: None,
            include: Vec::new(),
            filter: MessageFilter::default(),
            page: 0,
            per_page: default_message_page_size(),
            order: SortDirection::Asc,
        }
    }

    pub fn with_page(mut self, page: i64) -> Self {
        self.page = page;
        self
    }

    pub fn with_per_page(mut self, per_page: impl Into<PerPage>) -> Self {
        self.per_page = per_page.into();
        self
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_include(mut self, include: IncludeRequest) -> Self {
        self.include.push(include);
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.filter.date_range = Some(range);
        self
    }

    pub fn with_order(mut self, order: SortDirection) -> Self {
        self.order = order;
        self
    }

    pub(crate) fn has_filters(&self) -> bool {
        self.resource_id.is_some() || self.filter.date_range.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total: usize,
    pub page: i64,
    pub per_page: PerPage,
    pub has_more: bool,
}

impl MessagePage {
    pub(crate) fn empty(page: i64, per_page: PerPage) -> Self {
        Self {
            messages: Vec::new(),
            total: 0,
            page,
            per_page,
            has_more: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_per_page_wire_format() {
        assert_eq!(serde_json::from_value::<PerPage>(json!(false)).unwrap(), PerPage::All);
        assert_eq!(serde_json::from_value::<PerPage>(json!(20)).unwrap(), PerPage::Limit(20));
        assert!(serde_json::from_value::<PerPage>(json!(true)).is_err());
        assert!(serde_json::from_value::<PerPage>(json!(-1)).is_err());
        assert_eq!(serde_json::to_value(PerPage::All).unwrap(), json!(false));
    }

    #[test]
    fn test_date_range_bounds() {
        let at = |s| Utc.timestamp_opt(s, 0).unwrap();
        let inclusive = DateRange {
            start: Some(at(10)),
            end: Some(at(20)),
            ..Default::default()
        };
        assert!(inclusive.contains(&at(10)));
        assert!(inclusive.contains(&at(20)));
        assert!(!inclusive.contains(&at(21)));

        let exclusive = DateRange {
            start_exclusive: true,
            end_exclusive: true,
            ..inclusive
        };
        assert!(!exclusive.contains(&at(10)));
        assert!(!exclusive.contains(&at(20)));
        assert!(exclusive.contains(&at(15)));
    }

    #[test]
    fn test_query_from_wire() {
        let query: ListMessagesQuery = serde_json::from_value(json!({
            "threadIds": ["t1"],
            "perPage": false,
            "include": [{"id": "m1", "withPreviousMessages": 2}]
        }))
        .unwrap();
        assert_eq!(query.per_page, PerPage::All);
        assert_eq!(query.include[0].with_previous_messages, 2);
        assert_eq!(query.order, SortDirection::Asc);
    }
}
