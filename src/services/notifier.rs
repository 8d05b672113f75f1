use anyhow::Result;
use rusqlite::Connection;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::database;
use crate::models::{
    AnomalySeverity, DeliveryState, EngineSettings, Notification, NotificationType,
};
use crate::state::{AppState, DispatchEvent};
use crate::utils::time as timeutil;

const ESCALATION_TICK_SECS: u64 = 60;
const DIGEST_TICK_SECS: u64 = 60;

/// Fallback broadcast target when a person has no channel preference.
const BROADCAST_CHANNEL: &str = "notify";

/// Where an event ended up after the pipeline ran. Every disposition is
/// persisted; nothing is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver over these channels, first that works wins.
    Deliver(Vec<String>),
    /// Folded into an earlier notification of the same type.
    Grouped(String),
    RateLimited,
    /// Held for the next digest.
    Digested,
    Suppressed,
}

pub fn start_notifier(state: AppState, mut dispatch_rx: mpsc::Receiver<DispatchEvent>) {
    let pipeline_state = state.clone();
    tokio::spawn(async move {
        log::info!("[Notifier] Dispatcher started");
        while let Some(event) = dispatch_rx.recv().await {
            if let Err(e) = process(&pipeline_state, event).await {
                log::error!("[Notifier] Dispatch failed: {}", e);
            }
        }
    });

    let escalation_state = state.clone();
    tokio::spawn(async move {
        let mut escalated: HashSet<String> = HashSet::new();
        loop {
            tokio::time::sleep(Duration::from_secs(ESCALATION_TICK_SECS)).await;
            if let Err(e) = escalation_pass(&escalation_state, &mut escalated).await {
                log::error!("[Notifier] Escalation pass failed: {}", e);
            }
        }
    });

    tokio::spawn(async move {
        let mut last_digest_date: Option<chrono::NaiveDate> = None;
        loop {
            tokio::time::sleep(Duration::from_secs(DIGEST_TICK_SECS)).await;
            if let Err(e) = digest_pass(&state, &mut last_digest_date).await {
                log::error!("[Notifier] Digest pass failed: {}", e);
            }
        }
    });
}

async fn process(state: &AppState, event: DispatchEvent) -> Result<()> {
    let conn = state.conn()?;
    let settings = state.settings()?;
    let now = chrono::Utc::now().timestamp();

    let disposition = route(&conn, &settings, &event, now)?;
    match disposition {
        Disposition::Grouped(id) => {
            database::notifications::bump_group_count(&conn, &id)?;
            log::debug!("[Notifier] Grouped {} into {}", event.notification_type.as_str(), id);
            return Ok(());
        }
        Disposition::Deliver(channels) => {
            let id = persist(&conn, &event, DeliveryState::Pending, now)?;
            drop(conn);
            deliver(state, &id, &event.title, &event.message, &channels).await?;
        }
        Disposition::RateLimited => {
            persist(&conn, &event, DeliveryState::RateLimited, now)?;
        }
        Disposition::Digested => {
            persist(&conn, &event, DeliveryState::Digest, now)?;
        }
        Disposition::Suppressed => {
            persist(&conn, &event, DeliveryState::Suppressed, now)?;
        }
    }
    Ok(())
}

/// The pipeline: enabled → rate limit → grouping → quiet hours → channels.
/// Critical severity skips DND and quiet hours when the override is on.
pub fn route(
    conn: &Connection,
    settings: &EngineSettings,
    event: &DispatchEvent,
    now: i64,
) -> Result<Disposition> {
    let basic = &settings.notifications;
    let extended = &settings.notifications_extended;
    let type_setting = basic.type_setting(event.notification_type);
    let critical =
        event.severity == AnomalySeverity::Critical && basic.critical_override;

    if !type_setting.enabled {
        return Ok(Disposition::Suppressed);
    }
    if basic.dnd && !critical {
        return Ok(Disposition::Suppressed);
    }

    if !critical {
        let delivered =
            database::notifications::delivered_in_last_hour(conn, event.notification_type, now)?;
        if delivered >= type_setting.rate_limit_per_hour as i64 {
            return Ok(if extended.digest_enabled {
                Disposition::Digested
            } else {
                Disposition::RateLimited
            });
        }

        if let Some(recent) = database::notifications::latest_in_group_window(
            conn,
            event.notification_type,
            extended.group_window_secs as i64,
            now,
        )? {
            if recent.delivery_state == DeliveryState::Delivered {
                return Ok(Disposition::Grouped(recent.id));
            }
        }

        if in_quiet_hours(settings, now) {
            return Ok(if extended.digest_enabled {
                Disposition::Digested
            } else {
                Disposition::Suppressed
            });
        }
    }

    Ok(Disposition::Deliver(channels_for(extended, event.person.as_deref())))
}

fn channels_for(
    extended: &crate::models::ExtendedNotificationSettings,
    person: Option<&str>,
) -> Vec<String> {
    let mut channels = person
        .and_then(|p| extended.person_channels.get(p).cloned())
        .unwrap_or_default();
    if channels.is_empty() {
        channels.push(BROADCAST_CHANNEL.to_string());
    }
    channels
}

/// Local-time quiet hours, with the weekend window on Saturday and Sunday.
/// Windows may cross midnight.
pub fn in_quiet_hours(settings: &EngineSettings, now: i64) -> bool {
    if !settings.notifications.quiet_hours_enabled {
        return false;
    }
    let tz = &settings.general.timezone;
    let window = if timeutil::is_weekend_day(timeutil::local_date(now, tz)) {
        &settings.notifications.quiet_hours_weekend
    } else {
        &settings.notifications.quiet_hours_weekday
    };
    let (Some(start), Some(end)) = (parse_minute(&window.start), parse_minute(&window.end)) else {
        return false;
    };
    let minute = timeutil::minute_of_day(now, tz) as i64;
    if start <= end {
        minute >= start && minute < end
    } else {
        minute >= start || minute < end
    }
}

fn parse_minute(hhmm: &str) -> Option<i64> {
    let (h, m) = hhmm.split_once(':')?;
    let h: i64 = h.parse().ok()?;
    let m: i64 = m.parse().ok()?;
    (h < 24 && m < 60).then_some(h * 60 + m)
}

fn persist(
    conn: &Connection,
    event: &DispatchEvent,
    delivery_state: DeliveryState,
    now: i64,
) -> Result<String> {
    let notification = Notification {
        id: uuid::Uuid::new_v4().to_string(),
        notification_type: event.notification_type,
        severity: event.severity,
        title: event.title.clone(),
        message: event.message.clone(),
        person: event.person.clone(),
        channel: None,
        delivery_state,
        read: false,
        group_count: 1,
        created_at: now,
    };
    database::notifications::insert_notification(conn, &notification)?;
    Ok(notification.id)
}

/// Tries each channel in order; the first success wins. Failure on every
/// channel leaves the row in failed state for the escalation pass.
async fn deliver(
    state: &AppState,
    id: &str,
    title: &str,
    message: &str,
    channels: &[String],
) -> Result<()> {
    for channel in channels {
        match state.ha.notify(channel, title, message).await {
            Ok(()) => {
                let conn = state.conn()?;
                database::notifications::set_delivery_state(&conn, id, DeliveryState::Delivered)?;
                conn.execute(
                    "UPDATE notifications SET channel = ?2 WHERE id = ?1",
                    rusqlite::params![id, channel],
                )?;
                return Ok(());
            }
            Err(e) => {
                log::warn!("[Notifier] Channel {} failed: {}", channel, e);
            }
        }
    }
    let conn = state.conn()?;
    database::notifications::set_delivery_state(&conn, id, DeliveryState::Failed)?;
    Ok(())
}

/// Unread delivered notifications older than the configured delay are
/// re-announced over TTS once.
async fn escalation_pass(state: &AppState, escalated: &mut HashSet<String>) -> Result<()> {
    let settings = state.settings()?;
    let extended = &settings.notifications_extended;
    if !extended.escalation_enabled {
        return Ok(());
    }
    let cutoff = chrono::Utc::now().timestamp() - extended.escalation_delay_secs as i64;
    let stale = {
        let conn = state.conn()?;
        database::notifications::unread_for_escalation(&conn, cutoff)?
    };
    for notification in stale {
        if !escalated.insert(notification.id.clone()) {
            continue;
        }
        log::info!("[Notifier] Escalating unread notification {}", notification.id);
        let mut data = std::collections::HashMap::new();
        data.insert(
            "message".to_string(),
            serde_json::Value::String(format!("Reminder: {}", notification.title)),
        );
        if let Err(e) = state
            .ha
            .call_service("tts.speak", "media_player.announce", &data)
            .await
        {
            log::warn!("[Notifier] TTS escalation failed: {}", e);
        }
    }
    // Read notifications no longer need tracking.
    if escalated.len() > 1000 {
        escalated.clear();
    }
    Ok(())
}

/// Once a day at the configured local time, everything that was deferred
/// into the digest is summarized into a single notification.
async fn digest_pass(
    state: &AppState,
    last_digest_date: &mut Option<chrono::NaiveDate>,
) -> Result<()> {
    let settings = state.settings()?;
    let extended = &settings.notifications_extended;
    if !extended.digest_enabled {
        return Ok(());
    }
    let now = chrono::Utc::now().timestamp();
    let tz = &settings.general.timezone;
    let today = timeutil::local_date(now, tz);
    if *last_digest_date == Some(today) {
        return Ok(());
    }
    let Some(due) = parse_minute(&extended.digest_time) else {
        return Ok(());
    };
    if (timeutil::minute_of_day(now, tz) as i64) < due {
        return Ok(());
    }
    *last_digest_date = Some(today);

    let entries = {
        let conn = state.conn()?;
        database::notifications::digest_entries_since(&conn, now - 24 * 3600)?
    };
    if entries.is_empty() {
        return Ok(());
    }

    let mut lines: Vec<String> = entries
        .iter()
        .map(|n| format!("• {}", n.title))
        .collect();
    lines.dedup();
    let message = lines.join("\n");
    let id = {
        let conn = state.conn()?;
        persist(
            &conn,
            &DispatchEvent {
                notification_type: NotificationType::Digest,
                severity: AnomalySeverity::Low,
                title: format!("Daily summary ({} items)", entries.len()),
                message: message.clone(),
                person: None,
            },
            DeliveryState::Pending,
            now,
        )?
    };
    deliver(
        state,
        &id,
        "Daily summary",
        &message,
        &[BROADCAST_CHANNEL.to_string()],
    )
    .await
}
