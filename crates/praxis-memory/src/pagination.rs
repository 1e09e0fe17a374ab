//! `list_messages`: windowed reads over the order index, filtered scans,
//! include windows and `has_more` accounting.

use std::collections::{HashMap, HashSet};

use crate::error::{DegradeExt, Result};
use crate::models::{ListMessagesQuery, Message, MessagePage, PerPage, SortDirection};
use crate::order::{OrderIndex, OrderSnapshot};
use crate::repositories::{check_page, MessageRepository, Violations};

#[derive(Clone)]
pub struct MessageListing {
    order: OrderIndex,
    messages: MessageRepository,
}

/// Order snapshots loaded while answering one query, by thread id.
type Orders = HashMap<String, OrderSnapshot>;

impl MessageListing {
    pub fn new(order: OrderIndex, messages: MessageRepository) -> Self {
        Self { order, messages }
    }

    /// One page of messages from one or more threads, plus any requested
    /// include windows. Input problems fail before any I/O; backend failures
    /// are logged and produce an empty page.
    pub async fn list_messages(&self, query: ListMessagesQuery) -> Result<MessagePage> {
        validate_query(&query)?;
        let (page, per_page) = (query.page, query.per_page);
        self.collect_page(&query)
            .await
            .or_degraded("list_messages", || MessagePage::empty(page, per_page))
    }

    async fn collect_page(&self, query: &ListMessagesQuery) -> Result<MessagePage> {
        let offset = match query.per_page {
            PerPage::Limit(limit) => (query.page as usize).saturating_mul(limit),
            PerPage::All => 0,
        };
        let mut orders = Orders::new();

        let window = match query.per_page {
            PerPage::Limit(limit) if query.thread_ids.len() == 1 && !query.has_filters() => {
                self.indexed_window(query, offset, limit, &mut orders).await?
            }
            _ => self.filtered_window(query, offset, &mut orders).await?,
        };
        let page_len = window.messages.len();

        let mut selected = window.messages;
        let included = self.resolve_includes(query, &mut orders).await?;
        selected.extend(included);
        dedupe_by_id(&mut selected);
        sort_messages(&mut selected, &orders, query.order);

        let has_more = match query.per_page {
            PerPage::All => false,
            PerPage::Limit(limit) => {
                let covered = selected.iter().filter(|m| matches_query(m, query)).count();
                if covered >= window.total {
                    false
                } else {
                    match query.order {
                        SortDirection::Asc => offset.saturating_add(page_len) < window.total,
                        SortDirection::Desc => offset.saturating_add(limit) < window.total,
                    }
                }
            }
        };

        Ok(MessagePage {
            messages: selected,
            total: window.total,
            page: query.page,
            per_page: query.per_page,
            has_more,
        })
    }

    /// Reads the page straight from a single thread's order index.
    async fn indexed_window(
        &self,
        query: &ListMessagesQuery,
        offset: usize,
        limit: usize,
        orders: &mut Orders,
    ) -> Result<Window> {
        let thread_id = &query.thread_ids[0];
        let order = self.order.snapshot(thread_id).await?;
        let total = order.len();

        let (start, end) = match query.order {
            SortDirection::Asc => (offset, offset.saturating_add(limit).min(total)),
            SortDirection::Desc => {
                let end = total.saturating_sub(offset);
                (end.saturating_sub(limit), end)
            }
        };
        let ids = if start < end {
            order.range(start as i64, end as i64 - 1)
        } else {
            Vec::new()
        };
        orders.insert(thread_id.clone(), order);

        let targets = ids.into_iter().map(|id| (thread_id.clone(), id)).collect();
        let messages = self.messages.fetch_many(targets).await?;
        Ok(Window { messages, total })
    }

    /// Hydrates every message of every queried thread, filters, sorts and
    /// slices in memory.
    async fn filtered_window(
        &self,
        query: &ListMessagesQuery,
        offset: usize,
        orders: &mut Orders,
    ) -> Result<Window> {
        let mut targets = Vec::new();
        for thread_id in &query.thread_ids {
            if orders.contains_key(thread_id) {
                continue;
            }
            let order = self.order.snapshot(thread_id).await?;
            targets.extend(order.full_order().into_iter().map(|id| (thread_id.clone(), id)));
            orders.insert(thread_id.clone(), order);
        }

        let mut candidates = self.messages.fetch_many(targets).await?;
        candidates.retain(|m| matches_query(m, query));
        dedupe_by_id(&mut candidates);
        sort_messages(&mut candidates, orders, query.order);

        let total = candidates.len();
        let messages = match query.per_page {
            PerPage::All => candidates,
            PerPage::Limit(limit) => candidates.into_iter().skip(offset).take(limit).collect(),
        };
        Ok(Window { messages, total })
    }

    /// Rank windows around each include target, in the target's own thread.
    async fn resolve_includes(&self, query: &ListMessagesQuery, orders: &mut Orders) -> Result<Vec<Message>> {
        let mut targets: Vec<(String, String)> = Vec::new();
        let mut requested = HashSet::new();

        for include in &query.include {
            let thread_id = match &include.thread_id {
                Some(thread_id) => Some(thread_id.clone()),
                None => self.include_thread(&include.id, query, orders).await?,
            };
            let Some(thread_id) = thread_id else {
                tracing::debug!("Include target {} not found in any thread", include.id);
                continue;
            };

            if !orders.contains_key(&thread_id) {
                let order = self.order.snapshot(&thread_id).await?;
                orders.insert(thread_id.clone(), order);
            }
            let Some(order) = orders.get(&thread_id) else {
                continue;
            };
            let Some(rank) = order.rank(&include.id) else {
                tracing::debug!("Include target {} is not indexed in thread {}", include.id, thread_id);
                continue;
            };

            let start = rank.saturating_sub(include.with_previous_messages);
            let end = rank
                .saturating_add(include.with_next_messages)
                .min(order.len().saturating_sub(1));
            for id in order.range(start as i64, end as i64) {
                if requested.insert((thread_id.clone(), id.clone())) {
                    targets.push((thread_id.clone(), id));
                }
            }
        }

        if targets.is_empty() {
            return Ok(Vec::new());
        }
        self.messages.fetch_many(targets).await
    }

    /// The queried thread indexing `message_id`, or whichever thread holds it.
    async fn include_thread(
        &self,
        message_id: &str,
        query: &ListMessagesQuery,
        orders: &mut Orders,
    ) -> Result<Option<String>> {
        for thread_id in &query.thread_ids {
            if !orders.contains_key(thread_id) {
                let order = self.order.snapshot(thread_id).await?;
                orders.insert(thread_id.clone(), order);
            }
            if orders.get(thread_id).is_some_and(|order| order.contains(message_id)) {
                return Ok(Some(thread_id.clone()));
            }
        }
        self.messages.find_message_in_any_thread(message_id).await
    }
}

struct Window {
    messages: Vec<Message>,
    /// Messages matching the thread and filter criteria, before slicing.
    total: usize,
}

fn validate_query(query: &ListMessagesQuery) -> Result<()> {
    check_page(query.page)?;
    let mut violations = Violations::new();
    if query.thread_ids.is_empty() {
        violations.push("threadId is required");
    }
    for (i, thread_id) in query.thread_ids.iter().enumerate() {
        violations.check_id(&format!("threadIds[{i}]"), thread_id);
    }
    for (i, include) in query.include.iter().enumerate() {
        violations.check_message_id(&format!("include[{i}].id"), &include.id);
        if let Some(thread_id) = &include.thread_id {
            violations.check_id(&format!("include[{i}].threadId"), thread_id);
        }
    }
    if let Some(resource_id) = &query.resource_id {
        violations.check_id("resourceId", resource_id);
    }
    violations.into_result()
}

fn matches_query(message: &Message, query: &ListMessagesQuery) -> bool {
    if !query.thread_ids.contains(&message.thread_id) {
        return false;
    }
    if let Some(resource_id) = &query.resource_id {
        if message.resource_id.as_ref() != Some(resource_id) {
            return false;
        }
    }
    match &query.filter.date_range {
        Some(range) => range.contains(&message.created_at),
        None => true,
    }
}

fn dedupe_by_id(messages: &mut Vec<Message>) {
    let mut seen = HashSet::new();
    messages.retain(|m| seen.insert(m.id.clone()));
}

/// Index score first, `created_at` for messages no loaded index knows, id last.
fn sort_messages(messages: &mut [Message], orders: &Orders, direction: SortDirection) {
    let position = |m: &Message| -> f64 {
        orders
            .get(&m.thread_id)
            .and_then(|order| order.score(&m.id))
            .unwrap_or_else(|| m.created_at.timestamp_micros() as f64)
    };
    messages.sort_by(|a, b| {
        let ordering = position(a)
            .total_cmp(&position(b))
            .then_with(|| a.id.cmp(&b.id));
        match direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}
