use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};

use crate::crawler::request::CrawlRequest;

/// Lane used by requests that carry no run context
const DEFAULT_LANE: &str = "default";

struct Queued {
    priority: i32,
    seq: u64,
    request: CrawlRequest,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // Higher priority first, then FIFO
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pending requests, one priority queue per lane.
///
/// Lanes are served round-robin so that simultaneous runs advance at the
/// same pace no matter how many links each of them has queued.
#[derive(Default)]
pub struct Frontier {
    lanes: HashMap<String, BinaryHeap<Queued>>,
    rotation: VecDeque<String>,
    next_seq: u64,
    len: usize,
}

impl Frontier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, request: CrawlRequest) {
        let lane = request.lane_key().unwrap_or(DEFAULT_LANE).to_string();
        let queued = Queued {
            priority: request.priority,
            seq: self.next_seq,
            request,
        };
        self.next_seq += 1;
        self.len += 1;

        if !self.lanes.contains_key(&lane) {
            self.rotation.push_back(lane.clone());
        }
        self.lanes.entry(lane).or_default().push(queued);
    }

    /// Next request from the lane whose turn it is
    pub fn pop(&mut self) -> Option<CrawlRequest> {
        let lane = self.rotation.pop_front()?;
        let heap = self.lanes.get_mut(&lane)?;
        let queued = heap.pop()?;

        if heap.is_empty() {
            self.lanes.remove(&lane);
        } else {
            self.rotation.push_back(lane);
        }
        self.len -= 1;

        Some(queued.request)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of lanes with pending requests
    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }
}
