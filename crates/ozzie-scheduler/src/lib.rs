//! Cron, interval, and event-triggered scheduling on top of the task actor
//! pool (§4.7). The teacher's scheduler stub named only its cron dependency
//! and a config/tools pairing; the three concurrent loops and the
//! `ScheduleEntry` firing protocol are built here from that declared intent.

mod error;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use ozzie_bus::{Event, EventBus, EventSource, EventType};
use ozzie_store::{ScheduleEntry, ScheduleStore, Task, TaskConfig};
use ozzie_tasks::ActorPool;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use error::SchedulerError;

const MIN_INTERVAL_SECS: u64 = 5;

pub struct SchedulerConfig {
    pub cron_tick: StdDuration,
    pub interval_tick: StdDuration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { cron_tick: StdDuration::from_secs(60), interval_tick: StdDuration::from_secs(1) }
    }
}

pub struct Scheduler {
    store: ScheduleStore,
    bus: EventBus,
    pool: Arc<ActorPool>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(store: ScheduleStore, bus: EventBus, pool: Arc<ActorPool>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self { store, bus, pool, config })
    }

    /// `AddEntry`: validates exactly one trigger, rejects short intervals,
    /// and parses `cron_spec` at insert time so a bad expression fails fast
    /// rather than silently never firing (§4.7).
    pub async fn add_entry(&self, entry: ScheduleEntry) -> Result<(), SchedulerError> {
        if !entry.has_exactly_one_trigger() {
            return Err(SchedulerError::InvalidTrigger);
        }
        if let Some(interval) = entry.interval_sec {
            if interval < MIN_INTERVAL_SECS {
                return Err(SchedulerError::IntervalTooShort(interval));
            }
        }
        if let Some(spec) = &entry.cron_spec {
            parse_cron(spec).map_err(SchedulerError::InvalidCron)?;
        }
        self.store.create(&entry).await?;
        Ok(())
    }

    /// `RemoveEntry`: removes from disk; in-memory loops simply stop seeing
    /// it on their next `list()` pass.
    pub async fn remove_entry(&self, id: &str) -> Result<(), SchedulerError> {
        self.store.remove(id).await?;
        Ok(())
    }

    pub fn spawn(self: &Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.clone().spawn_cron_loop(cancel.clone()),
            self.clone().spawn_interval_loop(cancel.clone()),
            self.clone().spawn_event_loop(cancel),
        ]
    }

    fn spawn_cron_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.cron_tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if let Err(e) = self.fire_due_cron_entries(now).await {
                            tracing::warn!(error = %e, "cron loop pass failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_interval_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval_tick);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let now = Utc::now();
                        if let Err(e) = self.fire_due_interval_entries(now).await {
                            tracing::warn!(error = %e, "interval loop pass failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_event_loop(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (sub_id, mut rx) = self.bus.subscribe(None);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = rx.recv() => {
                        match event {
                            Some(event) => {
                                if let Err(e) = self.fire_matching_event_entries(&event).await {
                                    tracing::warn!(error = %e, "event loop pass failed");
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
            self.bus.unsubscribe(sub_id);
        })
    }

    async fn fire_due_cron_entries(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        for entry in self.store.list().await? {
            if !entry.enabled {
                continue;
            }
            let Some(spec) = entry.cron_spec.clone() else { continue };
            if !cron_due(&spec, now) {
                continue;
            }
            if !cooldown_elapsed(entry.last_run_at, entry.cooldown_sec, now) {
                continue;
            }
            self.fire(entry).await?;
        }
        Ok(())
    }

    async fn fire_due_interval_entries(&self, now: DateTime<Utc>) -> Result<(), SchedulerError> {
        for entry in self.store.list().await? {
            if !entry.enabled {
                continue;
            }
            let Some(interval_sec) = entry.interval_sec else { continue };
            let min_gap = interval_sec.max(entry.cooldown_sec);
            if !cooldown_elapsed(entry.last_run_at, min_gap, now) {
                continue;
            }
            self.fire(entry).await?;
        }
        Ok(())
    }

    async fn fire_matching_event_entries(&self, event: &Event) -> Result<(), SchedulerError> {
        let now = Utc::now();
        for entry in self.store.list().await? {
            if !entry.enabled {
                continue;
            }
            let Some(on_event) = entry.on_event.clone() else { continue };
            if on_event.event != event.event_type.as_str() {
                continue;
            }
            if !filter_matches(&on_event.filter, &event.payload) {
                continue;
            }
            if !cooldown_elapsed(entry.last_run_at, entry.cooldown_sec, now) {
                continue;
            }
            self.fire(entry).await?;
        }
        Ok(())
    }

    /// Firing: bump `run_count`, stamp `last_run_at`, submit the derived
    /// task, auto-disable past `max_runs`, persist, and publish
    /// `schedule.trigger` (§4.7).
    async fn fire(&self, mut entry: ScheduleEntry) -> Result<(), SchedulerError> {
        entry.run_count += 1;
        entry.last_run_at = Some(Utc::now());
        if let Some(max_runs) = entry.max_runs {
            if entry.run_count >= max_runs {
                entry.enabled = false;
            }
        }

        let task = build_task(&entry);
        let task_id = task.id.clone();
        self.pool.submit(task).await?;
        self.store.save(&entry).await?;

        let _ = self.bus.publish(Event::new(
            EventType::ScheduleTrigger,
            EventSource::Scheduler,
            entry.session_id.clone(),
            json!({"entry_id": entry.id, "task_id": task_id}),
        ));
        Ok(())
    }
}

fn cooldown_elapsed(last_run_at: Option<DateTime<Utc>>, cooldown_sec: u64, now: DateTime<Utc>) -> bool {
    match last_run_at {
        None => true,
        Some(last) => (now - last).num_seconds() >= cooldown_sec as i64,
    }
}

fn filter_matches(filter: &std::collections::HashMap<String, serde_json::Value>, payload: &serde_json::Value) -> bool {
    filter.iter().all(|(key, expected)| payload.get(key) == Some(expected))
}

/// The `cron` crate requires a leading seconds field; five-field specs
/// (the common `* * * * *` shorthand) are widened to run at second 0.
fn normalize_cron(spec: &str) -> String {
    if spec.split_whitespace().count() == 5 {
        format!("0 {spec}")
    } else {
        spec.to_string()
    }
}

fn parse_cron(spec: &str) -> Result<Schedule, String> {
    Schedule::from_str(&normalize_cron(spec)).map_err(|e| e.to_string())
}

/// True if `spec` has a scheduled fire time within the minute ending at
/// `now` — the cron loop ticks once a minute, so this catches the entry
/// without requiring the tick to land on an exact second-0 boundary.
fn cron_due(spec: &str, now: DateTime<Utc>) -> bool {
    match parse_cron(spec) {
        Ok(schedule) => schedule.after(&(now - chrono::Duration::seconds(60))).next().map(|t| t <= now).unwrap_or(false),
        Err(_) => false,
    }
}

fn build_task(entry: &ScheduleEntry) -> Task {
    let id = format!("task_{}", Uuid::new_v4());
    let template = entry.task_template.as_ref();
    let title = template.and_then(|t| t.get("title")).and_then(|v| v.as_str()).unwrap_or(&entry.title).to_string();
    let description = template.and_then(|t| t.get("description")).and_then(|v| v.as_str()).unwrap_or(&entry.description).to_string();

    let mut task = Task::new(id, title, description);
    task.session_id = entry.session_id.clone();

    if let Some(skill) = &entry.skill_name {
        task.config.skill = Some(skill.clone());
    }
    if let Some(config_value) = template.and_then(|t| t.get("config")) {
        if let Ok(config) = serde_json::from_value::<TaskConfig>(config_value.clone()) {
            task.config = config;
        }
    }
    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use ozzie_bus::EventBus;
    use ozzie_store::{ScheduleSource, TaskStore};
    use ozzie_tasks::{TaskExecutor, TaskOutcome};
    use std::sync::Arc;

    struct ImmediateSuccess;

    #[async_trait::async_trait]
    impl TaskExecutor for ImmediateSuccess {
        async fn run(&self, _task: &Task, _cancel: tokio_util::sync::CancellationToken) -> TaskOutcome {
            TaskOutcome::Completed { output: json!({}), summary: "ok".into() }
        }
        async fn resume(&self, _task: &Task, _feedback: serde_json::Value, _cancel: tokio_util::sync::CancellationToken) -> TaskOutcome {
            TaskOutcome::Completed { output: json!({}), summary: "ok".into() }
        }
    }

    fn interval_entry(id: &str, interval_sec: u64) -> ScheduleEntry {
        ScheduleEntry {
            id: id.into(),
            source: ScheduleSource::Dynamic,
            session_id: None,
            title: "t".into(),
            description: "d".into(),
            cron_spec: None,
            interval_sec: Some(interval_sec),
            on_event: None,
            task_template: None,
            skill_name: None,
            cooldown_sec: 0,
            max_runs: None,
            run_count: 0,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
        }
    }

    #[test]
    fn five_field_cron_spec_is_widened_with_seconds() {
        assert_eq!(normalize_cron("* * * * *"), "0 * * * * *");
        assert_eq!(normalize_cron("0 * * * * *"), "0 * * * * *");
    }

    #[tokio::test]
    async fn add_entry_rejects_short_interval() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(ImmediateSuccess), 1);
        let scheduler = Scheduler::new(store, EventBus::new(), pool, SchedulerConfig::default());
        let err = scheduler.add_entry(interval_entry("sched_1", 1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::IntervalTooShort(1)));
    }

    #[tokio::test]
    async fn add_entry_rejects_entry_with_no_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(ImmediateSuccess), 1);
        let scheduler = Scheduler::new(store, EventBus::new(), pool, SchedulerConfig::default());
        let mut entry = interval_entry("sched_1", 60);
        entry.interval_sec = None;
        let err = scheduler.add_entry(entry).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTrigger));
    }

    #[tokio::test]
    async fn due_interval_entry_fires_and_disables_after_max_runs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(ImmediateSuccess), 1);
        let scheduler = Scheduler::new(store.clone(), EventBus::new(), pool, SchedulerConfig::default());

        let mut entry = interval_entry("sched_1", 5);
        entry.max_runs = Some(1);
        scheduler.add_entry(entry).await.unwrap();

        scheduler.fire_due_interval_entries(Utc::now()).await.unwrap();

        let saved = store.get("sched_1").await.unwrap();
        assert_eq!(saved.run_count, 1);
        assert!(!saved.enabled);
    }

    #[tokio::test]
    async fn cooldown_blocks_refire_before_elapsed() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        let pool = ActorPool::new(TaskStore::new(dir.path()), EventBus::new(), Arc::new(ImmediateSuccess), 1);
        let scheduler = Scheduler::new(store.clone(), EventBus::new(), pool, SchedulerConfig::default());

        let mut entry = interval_entry("sched_1", 5);
        entry.cooldown_sec = 3600;
        scheduler.add_entry(entry).await.unwrap();
        scheduler.fire_due_interval_entries(Utc::now()).await.unwrap();
        scheduler.fire_due_interval_entries(Utc::now()).await.unwrap();

        let saved = store.get("sched_1").await.unwrap();
        assert_eq!(saved.run_count, 1);
    }

    #[test]
    fn filter_matches_requires_all_equalities() {
        let mut filter = std::collections::HashMap::new();
        filter.insert("status".to_string(), json!("ready"));
        let payload = json!({"status": "ready", "extra": 1});
        assert!(filter_matches(&filter, &payload));

        filter.insert("missing".to_string(), json!(true));
        assert!(!filter_matches(&filter, &payload));
    }
}
