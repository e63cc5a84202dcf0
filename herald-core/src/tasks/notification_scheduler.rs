// herald-core/src/tasks/notification_scheduler.rs
//
// Per-minute tick over the due-notification set: deliver, log the outcome,
// advance the recurrence. A failure in one row never stalls the rest, and a
// tick that overruns its minute coalesces with the next one.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Days, Months, Timelike, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use herald_common::models::{DeliveryStatus, DueNotification, NewNotificationLog, RepeatType};
use herald_common::traits::repository_traits::{BotSettingsRepository, NotificationRepository};

use crate::platforms::ChatSender;
use crate::Error;

const CHANNEL_UNAVAILABLE: &str = "channel not found/accessible";

pub struct NotificationScheduler {
    notifications: Arc<dyn NotificationRepository>,
    settings: Arc<dyn BotSettingsRepository>,
    sender: Arc<dyn ChatSender>,
}

impl NotificationScheduler {
    pub fn new(
        notifications: Arc<dyn NotificationRepository>,
        settings: Arc<dyn BotSettingsRepository>,
        sender: Arc<dyn ChatSender>,
    ) -> Self {
        Self {
            notifications,
            settings,
            sender,
        }
    }

    /// Spawns the tick loop: first activation on the next whole minute, then
    /// every minute. Overlong ticks skip ahead instead of stacking up.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let wait = seconds_to_next_minute(Utc::now());
            let mut ticker = interval_at(
                Instant::now() + Duration::from_secs(wait),
                Duration::from_secs(60),
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("Notification scheduler started (first tick in {}s).", wait);

            loop {
                ticker.tick().await;
                let now = Utc::now();
                if let Err(e) = self.run_tick(now).await {
                    error!("Notification tick failed: {}", e);
                }
            }
        })
    }

    /// One scheduler activation. Repository errors bubble up to the tick
    /// loop; per-row failures are contained inside `process_due`.
    pub async fn run_tick(&self, now: DateTime<Utc>) -> Result<(), Error> {
        let working_days = self.settings.get().await?.working_days;
        let due = self.notifications.get_due(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!("Processing {} due notification(s).", due.len());
        for row in &due {
            if let Err(e) = self.process_due(row, now, &working_days).await {
                error!(
                    "Notification {} processing failed: {}",
                    row.notification.notification_id, e
                );
            }
        }
        Ok(())
    }

    /// Handles one due row: working-day deferral, delivery, outcome log, and
    /// recurrence advancement. Delivery failure still advances the schedule,
    /// so a failed `once` row is retired rather than retried forever.
    pub async fn process_due(
        &self,
        due: &DueNotification,
        now: DateTime<Utc>,
        working_days: &[i16],
    ) -> Result<(), Error> {
        let n = &due.notification;

        if n.repeat_type == RepeatType::WorkingDays && !is_working_day(now, working_days) {
            let deferred = defer_to_next_working_day(now, n.schedule_date, working_days);
            debug!(
                "Notification {} falls on a non-working day; deferred to {}.",
                n.notification_id, deferred
            );
            self.notifications
                .defer_schedule(n.notification_id, deferred)
                .await?;
            return Ok(());
        }

        let outcome = self.deliver(due).await;
        let (status, error) = match outcome {
            Ok(()) => (DeliveryStatus::Success, None),
            Err(reason) => {
                warn!("Notification {} delivery failed: {}", n.notification_id, reason);
                (DeliveryStatus::Failed, Some(reason))
            }
        };
        self.notifications
            .insert_log(&NewNotificationLog {
                notification_id: n.notification_id,
                sent_at: now,
                status,
                error,
            })
            .await?;

        // Guard against long downtime: never compute the next fire from a
        // stale instant, and never backfill missed fires.
        let base = n.next_scheduled.map_or(now, |ns| ns.max(now));
        let next = compute_next_fire(n.repeat_type, base, working_days);

        match next {
            Some(next) if n.end_date.map_or(true, |end| next <= end) => {
                self.notifications
                    .advance_schedule(n.notification_id, now, next)
                    .await?;
            }
            _ => {
                self.notifications.deactivate(n.notification_id, now).await?;
            }
        }
        Ok(())
    }

    async fn deliver(&self, due: &DueNotification) -> Result<(), String> {
        let n = &due.notification;

        if let Err(e) = self.sender.resolve_target(&due.channel_platform_id).await {
            return Err(match e {
                Error::NotFound(_) => CHANNEL_UNAVAILABLE.to_string(),
                other => other.to_string(),
            });
        }

        let body = if n.mentions_everyone {
            format!("@everyone {}", n.message)
        } else {
            n.message.clone()
        };
        self.sender
            .send_message(&due.channel_platform_id, &body)
            .await
            .map_err(|e| e.to_string())
    }
}

fn seconds_to_next_minute(now: DateTime<Utc>) -> u64 {
    60 - u64::from(now.second()) % 60
}

fn weekday_number(at: DateTime<Utc>) -> i16 {
    at.weekday().num_days_from_sunday() as i16
}

fn is_working_day(at: DateTime<Utc>, working_days: &[i16]) -> bool {
    working_days.contains(&weekday_number(at))
}

/// Next calendar day strictly after `today` whose weekday is configured,
/// carrying the clock time of `schedule_date`. Falls back to tomorrow when
/// the working-day set is empty.
fn defer_to_next_working_day(
    now: DateTime<Utc>,
    schedule_date: DateTime<Utc>,
    working_days: &[i16],
) -> DateTime<Utc> {
    let clock = schedule_date.time();
    for offset in 1..=7u64 {
        let candidate = now + chrono::Duration::days(offset as i64);
        if is_working_day(candidate, working_days) {
            return candidate.date_naive().and_time(clock).and_utc();
        }
    }
    (now + chrono::Duration::days(1))
        .date_naive()
        .and_time(clock)
        .and_utc()
}

/// Next fire time after `base` for the given recurrence, or `None` for a
/// one-shot row. Monthly advancement clamps to the last valid day of a
/// shorter target month.
pub fn compute_next_fire(
    repeat_type: RepeatType,
    base: DateTime<Utc>,
    working_days: &[i16],
) -> Option<DateTime<Utc>> {
    match repeat_type {
        RepeatType::Once => None,
        RepeatType::Daily => Some(base + chrono::Duration::days(1)),
        RepeatType::Weekly => Some(base + chrono::Duration::days(7)),
        RepeatType::Monthly => base.checked_add_months(Months::new(1)),
        RepeatType::WorkingDays => {
            for offset in 1..=7u64 {
                let candidate = base.checked_add_days(Days::new(offset))?;
                if is_working_day(candidate, working_days) {
                    return Some(candidate);
                }
            }
            base.checked_add_days(Days::new(1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    use herald_common::models::{BotSettings, Notification};

    use crate::platforms::MockChatSender;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn due_row(
        notification_id: i64,
        repeat_type: RepeatType,
        schedule_date: DateTime<Utc>,
        next_scheduled: DateTime<Utc>,
        end_date: Option<DateTime<Utc>>,
        mentions_everyone: bool,
    ) -> DueNotification {
        let now = Utc::now();
        DueNotification {
            notification: Notification {
                notification_id,
                user_id: 1,
                server_id: 1,
                channel_id: 10,
                title: Some("reminder".to_string()),
                message: "standup time".to_string(),
                schedule_date,
                repeat_type,
                end_date,
                is_active: true,
                timezone: "UTC".to_string(),
                mentions_everyone,
                created_at: now,
                updated_at: now,
                last_sent: None,
                next_scheduled: Some(next_scheduled),
            },
            channel_platform_id: "100".to_string(),
            server_platform_id: "555".to_string(),
        }
    }

    #[derive(Debug, PartialEq)]
    enum ScheduleWrite {
        Advance {
            id: i64,
            last_sent: DateTime<Utc>,
            next_scheduled: DateTime<Utc>,
        },
        Deactivate {
            id: i64,
            last_sent: DateTime<Utc>,
        },
        Defer {
            id: i64,
            next_scheduled: DateTime<Utc>,
        },
    }

    #[derive(Default)]
    struct RecordingNotificationRepo {
        due: Vec<DueNotification>,
        writes: Mutex<Vec<ScheduleWrite>>,
        logs: Mutex<Vec<NewNotificationLog>>,
    }

    impl RecordingNotificationRepo {
        fn with_due(due: Vec<DueNotification>) -> Self {
            Self {
                due,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl NotificationRepository for RecordingNotificationRepo {
        async fn get_due(&self, _now: DateTime<Utc>) -> Result<Vec<DueNotification>, Error> {
            Ok(self.due.clone())
        }

        async fn advance_schedule(
            &self,
            notification_id: i64,
            last_sent: DateTime<Utc>,
            next_scheduled: DateTime<Utc>,
        ) -> Result<(), Error> {
            self.writes.lock().unwrap().push(ScheduleWrite::Advance {
                id: notification_id,
                last_sent,
                next_scheduled,
            });
            Ok(())
        }

        async fn deactivate(
            &self,
            notification_id: i64,
            last_sent: DateTime<Utc>,
        ) -> Result<(), Error> {
            self.writes.lock().unwrap().push(ScheduleWrite::Deactivate {
                id: notification_id,
                last_sent,
            });
            Ok(())
        }

        async fn defer_schedule(
            &self,
            notification_id: i64,
            next_scheduled: DateTime<Utc>,
        ) -> Result<(), Error> {
            self.writes.lock().unwrap().push(ScheduleWrite::Defer {
                id: notification_id,
                next_scheduled,
            });
            Ok(())
        }

        async fn insert_log(&self, log: &NewNotificationLog) -> Result<(), Error> {
            self.logs.lock().unwrap().push(log.clone());
            Ok(())
        }
    }

    struct FixedSettingsRepo(BotSettings);

    #[async_trait]
    impl BotSettingsRepository for FixedSettingsRepo {
        async fn get(&self) -> Result<BotSettings, Error> {
            Ok(self.0.clone())
        }
    }

    fn scheduler(
        repo: Arc<RecordingNotificationRepo>,
        sender: MockChatSender,
    ) -> NotificationScheduler {
        NotificationScheduler::new(
            repo,
            Arc::new(FixedSettingsRepo(BotSettings::default())),
            Arc::new(sender),
        )
    }

    fn accepting_sender() -> MockChatSender {
        let mut sender = MockChatSender::new();
        sender.expect_resolve_target().returning(|_| Ok(()));
        sender.expect_send_message().returning(|_, _| Ok(()));
        sender
    }

    // --- recurrence math ---

    #[test]
    fn daily_advances_one_day() {
        let base = utc(2025, 1, 1, 9, 0);
        assert_eq!(
            compute_next_fire(RepeatType::Daily, base, &[]),
            Some(utc(2025, 1, 2, 9, 0))
        );
    }

    #[test]
    fn weekly_advances_seven_days() {
        let base = utc(2025, 1, 1, 9, 0);
        assert_eq!(
            compute_next_fire(RepeatType::Weekly, base, &[]),
            Some(utc(2025, 1, 8, 9, 0))
        );
    }

    #[test]
    fn monthly_clamps_to_shorter_target_month() {
        let base = utc(2025, 1, 31, 9, 0);
        assert_eq!(
            compute_next_fire(RepeatType::Monthly, base, &[]),
            Some(utc(2025, 2, 28, 9, 0))
        );
    }

    #[test]
    fn once_never_recurs() {
        assert_eq!(compute_next_fire(RepeatType::Once, utc(2025, 1, 1, 9, 0), &[]), None);
    }

    #[test]
    fn working_days_skips_the_weekend() {
        // 2025-01-03 is a Friday.
        let base = utc(2025, 1, 3, 9, 0);
        assert_eq!(
            compute_next_fire(RepeatType::WorkingDays, base, &[1, 2, 3, 4, 5]),
            Some(utc(2025, 1, 6, 9, 0))
        );
    }

    #[test]
    fn working_days_with_empty_set_falls_back_to_tomorrow() {
        let base = utc(2025, 1, 3, 9, 0);
        assert_eq!(
            compute_next_fire(RepeatType::WorkingDays, base, &[]),
            Some(utc(2025, 1, 4, 9, 0))
        );
    }

    #[test]
    fn deferral_keeps_the_original_clock_time() {
        // 2025-01-04 is a Saturday; next working day is Monday the 6th.
        let now = utc(2025, 1, 4, 8, 0);
        let schedule_date = utc(2024, 12, 2, 8, 30);
        assert_eq!(
            defer_to_next_working_day(now, schedule_date, &[1, 2, 3, 4, 5]),
            utc(2025, 1, 6, 8, 30)
        );
    }

    // --- end-to-end scenarios ---

    #[tokio::test]
    async fn daily_row_fires_and_advances() {
        let now = utc(2025, 1, 1, 9, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            1,
            RepeatType::Daily,
            utc(2025, 1, 1, 9, 0),
            now,
            None,
            false,
        )]));
        let sched = scheduler(repo.clone(), accepting_sender());

        sched.run_tick(now).await.unwrap();

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Success);

        let writes = repo.writes.lock().unwrap();
        assert_eq!(
            *writes,
            vec![ScheduleWrite::Advance {
                id: 1,
                last_sent: now,
                next_scheduled: utc(2025, 1, 2, 9, 0),
            }]
        );
    }

    #[tokio::test]
    async fn once_row_terminates_after_first_fire() {
        let now = utc(2025, 1, 1, 10, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            2,
            RepeatType::Once,
            now,
            now,
            None,
            false,
        )]));
        let sched = scheduler(repo.clone(), accepting_sender());

        sched.run_tick(now).await.unwrap();

        assert_eq!(repo.logs.lock().unwrap().len(), 1);
        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Deactivate { id: 2, last_sent: now }]
        );
    }

    #[tokio::test]
    async fn working_days_row_defers_on_saturday_without_log() {
        // 2025-01-04 is a Saturday.
        let now = utc(2025, 1, 4, 8, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            3,
            RepeatType::WorkingDays,
            utc(2025, 1, 1, 8, 0),
            now,
            None,
            false,
        )]));

        let mut sender = MockChatSender::new();
        sender.expect_resolve_target().times(0);
        sender.expect_send_message().times(0);
        let sched = scheduler(repo.clone(), sender);

        sched.run_tick(now).await.unwrap();

        assert!(repo.logs.lock().unwrap().is_empty());
        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Defer {
                id: 3,
                next_scheduled: utc(2025, 1, 6, 8, 0),
            }]
        );
    }

    #[tokio::test]
    async fn weekly_row_past_end_date_deactivates_after_success() {
        let now = utc(2025, 1, 8, 0, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            4,
            RepeatType::Weekly,
            utc(2025, 1, 1, 0, 0),
            now,
            Some(utc(2025, 1, 10, 0, 0)),
            false,
        )]));
        let sched = scheduler(repo.clone(), accepting_sender());

        sched.run_tick(now).await.unwrap();

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Success);
        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Deactivate { id: 4, last_sent: now }]
        );
    }

    #[tokio::test]
    async fn mentions_everyone_prefixes_the_body() {
        let now = utc(2025, 1, 1, 9, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            5,
            RepeatType::Once,
            now,
            now,
            None,
            true,
        )]));

        let mut sender = MockChatSender::new();
        sender.expect_resolve_target().returning(|_| Ok(()));
        sender
            .expect_send_message()
            .withf(|target, body| target == "100" && body == "@everyone standup time")
            .times(1)
            .returning(|_, _| Ok(()));
        let sched = scheduler(repo.clone(), sender);

        sched.run_tick(now).await.unwrap();
    }

    #[tokio::test]
    async fn missing_channel_logs_failure_and_still_advances() {
        let now = utc(2025, 1, 1, 9, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            6,
            RepeatType::Daily,
            utc(2025, 1, 1, 9, 0),
            now,
            None,
            false,
        )]));

        let mut sender = MockChatSender::new();
        sender
            .expect_resolve_target()
            .returning(|c| Err(Error::NotFound(format!("channel {c} not found"))));
        sender.expect_send_message().times(0);
        let sched = scheduler(repo.clone(), sender);

        sched.run_tick(now).await.unwrap();

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].error.as_deref(), Some("channel not found/accessible"));
        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Advance {
                id: 6,
                last_sent: now,
                next_scheduled: utc(2025, 1, 2, 9, 0),
            }]
        );
    }

    #[tokio::test]
    async fn failed_once_row_still_deactivates() {
        let now = utc(2025, 1, 1, 10, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            7,
            RepeatType::Once,
            now,
            now,
            None,
            false,
        )]));

        let mut sender = MockChatSender::new();
        sender.expect_resolve_target().returning(|_| Ok(()));
        sender
            .expect_send_message()
            .returning(|_, _| Err(Error::Platform("rate limited".into())));
        let sched = scheduler(repo.clone(), sender);

        sched.run_tick(now).await.unwrap();

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Deactivate { id: 7, last_sent: now }]
        );
    }

    #[tokio::test]
    async fn stale_next_scheduled_advances_from_tick_time() {
        // Worker was down for a week; the row must not backfill.
        let now = utc(2025, 1, 8, 9, 30);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![due_row(
            8,
            RepeatType::Daily,
            utc(2025, 1, 1, 9, 0),
            utc(2025, 1, 1, 9, 0),
            None,
            false,
        )]));
        let sched = scheduler(repo.clone(), accepting_sender());

        sched.run_tick(now).await.unwrap();

        assert_eq!(
            *repo.writes.lock().unwrap(),
            vec![ScheduleWrite::Advance {
                id: 8,
                last_sent: now,
                next_scheduled: utc(2025, 1, 9, 9, 30),
            }]
        );
    }

    #[tokio::test]
    async fn one_bad_row_does_not_block_the_rest() {
        let now = utc(2025, 1, 1, 9, 0);
        let repo = Arc::new(RecordingNotificationRepo::with_due(vec![
            due_row(9, RepeatType::Daily, utc(2025, 1, 1, 9, 0), now, None, false),
            due_row(10, RepeatType::Daily, utc(2025, 1, 1, 9, 0), now, None, false),
        ]));

        let mut sender = MockChatSender::new();
        sender.expect_resolve_target().returning(|_| Ok(()));
        let mut first = true;
        sender.expect_send_message().returning(move |_, _| {
            if std::mem::take(&mut first) {
                Err(Error::Platform("boom".into()))
            } else {
                Ok(())
            }
        });
        let sched = scheduler(repo.clone(), sender);

        sched.run_tick(now).await.unwrap();

        let logs = repo.logs.lock().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[1].status, DeliveryStatus::Success);
        assert_eq!(repo.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn next_minute_phase_is_within_a_minute() {
        let wait = seconds_to_next_minute(Utc::now());
        assert!(wait >= 1 && wait <= 60);
    }
}
