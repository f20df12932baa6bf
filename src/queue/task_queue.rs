// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;

use crate::domain::models::task::ExecutionTask;

/// 待执行任务队列
///
/// 按计划时间升序、同一时刻按优先级降序排列。
/// 出队时只考虑计划时间已到的任务，并在其中挑选优先级最高的一个。
#[derive(Debug, Default)]
pub struct PendingQueue {
    tasks: Vec<ExecutionTask>,
}

fn queue_order(a: &ExecutionTask, b: &ExecutionTask) -> Ordering {
    a.scheduled_time
        .cmp(&b.scheduled_time)
        .then_with(|| b.priority.total_cmp(&a.priority))
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 入队任务，保持排序
    pub fn push(&mut self, task: ExecutionTask) {
        let idx = self
            .tasks
            .partition_point(|existing| queue_order(existing, &task) != Ordering::Greater);
        self.tasks.insert(idx, task);
    }

    /// 取出下一个可执行的任务
    ///
    /// # 参数
    ///
    /// * `now` - 当前时间
    /// * `admit` - 资源判断，返回 false 的任务被跳过并留在队列中
    ///
    /// # 返回值
    ///
    /// 计划时间已到且被接纳的任务中优先级最高者；
    /// 优先级相同时取计划时间更早的
    pub fn take_next_ready<F>(&mut self, now: DateTime<Utc>, mut admit: F) -> Option<ExecutionTask>
    where
        F: FnMut(&ExecutionTask) -> bool,
    {
        let ready = self.tasks.partition_point(|t| t.scheduled_time <= now);
        let mut best: Option<usize> = None;

        for idx in 0..ready {
            let candidate = &self.tasks[idx];
            let better = match best {
                None => true,
                Some(b) => candidate.priority > self.tasks[b].priority,
            };
            if better && admit(candidate) {
                best = Some(idx);
            }
        }

        best.map(|idx| self.tasks.remove(idx))
    }

    /// 队首任务的计划时间
    pub fn next_scheduled_time(&self) -> Option<DateTime<Utc>> {
        self.tasks.first().map(|t| t.scheduled_time)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionTask> {
        self.tasks.iter()
    }

    /// 某个层级仍在排队的任务数
    pub fn count_for_tier(&self, tier: &str) -> usize {
        self.tasks.iter().filter(|t| t.tier == tier).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::profile::{IdentityProfile, NavigationPattern};
    use crate::domain::models::schedule::{RandomizationBag, ScheduledItem};
    use crate::domain::models::task::{AntiDetectionBundle, DelayPlan};
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 10, minute, 0).unwrap()
    }

    fn task(retailer: &str, minute: u32, priority: f64) -> ExecutionTask {
        let identity = IdentityProfile::try_new("ua", "Chrome", "Linux", 1.0).unwrap();
        ExecutionTask::from_item(
            ScheduledItem {
                retailer: retailer.to_string(),
                category: format!("cat{}", minute),
                url: "https://example.cl/".to_string(),
                tier: "critical".to_string(),
                priority,
                pages_to_scrape: 1,
                scheduled_time: at(minute),
                randomization: RandomizationBag {
                    identity: identity.clone(),
                    pages: 1,
                    original_range: (1, 1),
                    proxy_enabled: false,
                    stealth_mode: false,
                    execution_id: format!("{:08}", minute),
                },
            },
            AntiDetectionBundle {
                identity,
                headers: Default::default(),
                delays: DelayPlan {
                    page_load_secs: 1.0,
                    between_pages_secs: 1.0,
                    category_switch_secs: 1.0,
                },
                navigation: NavigationPattern::QuickScan,
                page_order: vec![1],
                scroll: NavigationPattern::QuickScan.scroll_behavior(),
                proxy: None,
            },
            0,
            at(0),
        )
    }

    #[test]
    fn test_queue_orders_by_time_then_priority() {
        let mut queue = PendingQueue::new();
        queue.push(task("paris", 5, 1.0));
        queue.push(task("ripley", 1, 1.0));
        queue.push(task("hites", 5, 1.8));

        let order: Vec<&str> = queue.iter().map(|t| t.retailer.as_str()).collect();
        assert_eq!(order, vec!["ripley", "hites", "paris"]);
        assert_eq!(queue.next_scheduled_time(), Some(at(1)));
    }

    #[test]
    fn test_take_next_ready_picks_highest_priority_among_ready() {
        let mut queue = PendingQueue::new();
        queue.push(task("paris", 1, 1.0));
        queue.push(task("ripley", 2, 1.9));
        queue.push(task("hites", 30, 5.0));

        let first = queue.take_next_ready(at(10), |_| true).unwrap();
        assert_eq!(first.retailer, "ripley");
        let second = queue.take_next_ready(at(10), |_| true).unwrap();
        assert_eq!(second.retailer, "paris");
        assert!(queue.take_next_ready(at(10), |_| true).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_take_next_ready_skips_rejected_tasks() {
        let mut queue = PendingQueue::new();
        queue.push(task("ripley", 1, 1.9));
        queue.push(task("paris", 2, 1.0));

        let taken = queue.take_next_ready(at(10), |t| t.retailer != "ripley").unwrap();
        assert_eq!(taken.retailer, "paris");
        assert_eq!(queue.count_for_tier("critical"), 1);
    }
}
