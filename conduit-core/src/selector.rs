//! Queue Selector (spec.md §4.5): given a tag hint, pick the best
//! candidate queue — the live child carrying that tag with the lowest
//! depth, LRU-broken, falling back to the Lead when no child carries it.

use crate::queue::QueueHandle;
use crate::tags::Tags;

/// One selectable destination: a queue plus the tags it currently carries.
pub struct Candidate<'a> {
    pub tags: Tags,
    pub queue: &'a QueueHandle,
}

/// Picks the queue to route a `tag_hint` request to.
///
/// Rules (spec.md §4.5):
/// 1. Prefer a child carrying `tag_hint`.
/// 2. Among those, the lowest current depth wins.
/// 3. Ties broken by the oldest `last_submit_seq` (least-recently-used).
/// 4. If no child carries the tag, fall back to `lead` — the Lead always
///    carries every tag it hasn't delegated.
pub fn select<'a>(candidates: &[Candidate<'a>], tag_hint: Tags, lead: &'a QueueHandle) -> &'a QueueHandle {
    let mut best: Option<&Candidate<'a>> = None;
    for candidate in candidates {
        if !candidate.tags.contains(tag_hint) {
            continue;
        }
        best = Some(match best {
            None => candidate,
            Some(current) => pick_better(current, candidate),
        });
    }

    best.map(|c| c.queue).unwrap_or(lead)
}

fn pick_better<'a, 'b>(a: &'b Candidate<'a>, b: &'b Candidate<'a>) -> &'b Candidate<'a> {
    let (da, db) = (a.queue.depth(), b.queue.depth());
    if da != db {
        return if da < db { a } else { b };
    }
    if a.queue.last_submit_seq() <= b.queue.last_submit_seq() {
        a
    } else {
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{bounded, WorkItem};
    use crate::tags::Tags;
    use crate::types::QueryRequest;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn request() -> QueryRequest {
        QueryRequest {
            sql: "SELECT 1".into(),
            bindings: vec![],
            queue_hint: crate::tags::QueueKind::Fast,
            timeout_seconds: 5,
        }
    }

    fn fill(handle: &QueueHandle, n: usize) {
        for _ in 0..n {
            let (tx, _rx) = oneshot::channel();
            handle
                .try_submit(WorkItem { query_id: Uuid::new_v4(), request: request(), result_tx: tx })
                .unwrap();
        }
    }

    #[tokio::test]
    async fn prefers_lowest_depth_among_matching_children() {
        let (busy, _w1) = bounded(10);
        let (idle, _w2) = bounded(10);
        fill(&busy, 3);

        let candidates = [
            Candidate { tags: Tags::FAST, queue: &busy },
            Candidate { tags: Tags::FAST, queue: &idle },
        ];
        let (lead, _wl) = bounded(10);
        let chosen = select(&candidates, Tags::FAST, &lead);
        assert_eq!(chosen.depth(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_lead_when_no_child_carries_tag() {
        let (slow_child, _w1) = bounded(10);
        let candidates = [Candidate { tags: Tags::SLOW, queue: &slow_child }];
        let (lead, _wl) = bounded(10);
        let chosen = select(&candidates, Tags::FAST, &lead);
        let chosen_ptr: *const _ = chosen;
        let lead_ptr: *const _ = &lead;
        assert_eq!(chosen_ptr, lead_ptr);
    }

    #[tokio::test]
    async fn ties_break_by_least_recently_used() {
        let (a, _wa) = bounded(10);
        let (b, _wb) = bounded(10);
        fill(&a, 1);
        fill(&b, 1);
        // `a` submitted first, so it has the smaller last_submit_seq.
        let candidates = [
            Candidate { tags: Tags::CACHE, queue: &a },
            Candidate { tags: Tags::CACHE, queue: &b },
        ];
        let (lead, _wl) = bounded(10);
        let chosen = select(&candidates, Tags::CACHE, &lead);
        let chosen_ptr: *const _ = chosen;
        let a_ptr: *const _ = &a;
        assert_eq!(chosen_ptr, a_ptr);
    }
}
