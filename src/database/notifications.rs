use anyhow::{anyhow, Result};
use rusqlite::{Connection, OptionalExtension};

use crate::models::{
    AnomalySeverity, DeliveryState, Notification, NotificationType,
};

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<Notification> {
    let ntype: String = row.get(1)?;
    let severity: String = row.get(2)?;
    let delivery: String = row.get(7)?;
    Ok(Notification {
        id: row.get(0)?,
        notification_type: NotificationType::parse(&ntype).unwrap_or(NotificationType::System),
        severity: AnomalySeverity::parse(&severity).unwrap_or(AnomalySeverity::Low),
        title: row.get(3)?,
        message: row.get(4)?,
        person: row.get(5)?,
        channel: row.get(6)?,
        delivery_state: DeliveryState::parse(&delivery).unwrap_or(DeliveryState::Pending),
        read: row.get::<_, i64>(8)? != 0,
        group_count: row.get(9)?,
        created_at: row.get(10)?,
    })
}

const COLUMNS: &str = "id, notification_type, severity, title, message, person, channel, \
     delivery_state, read, group_count, created_at";

pub fn insert_notification(conn: &Connection, n: &Notification) -> Result<()> {
    conn.execute(
        "INSERT INTO notifications
         (id, notification_type, severity, title, message, person, channel,
          delivery_state, read, group_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        rusqlite::params![
            &n.id,
            n.notification_type.as_str(),
            n.severity.as_str(),
            &n.title,
            &n.message,
            &n.person,
            &n.channel,
            n.delivery_state.as_str(),
            n.read as i64,
            n.group_count,
            n.created_at,
        ],
    )?;
    Ok(())
}

pub fn list_notifications(
    conn: &Connection,
    unread_only: bool,
    limit: i64,
    offset: i64,
) -> Result<Vec<Notification>> {
    let sql = if unread_only {
        format!(
            "SELECT {} FROM notifications WHERE read = 0 ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            COLUMNS
        )
    } else {
        format!(
            "SELECT {} FROM notifications ORDER BY created_at DESC LIMIT ?1 OFFSET ?2",
            COLUMNS
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([limit + 1, offset], row_to_notification)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_notification(conn: &Connection, id: &str) -> Result<Option<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications WHERE id = ?1",
        COLUMNS
    ))?;
    let n = stmt.query_row([id], row_to_notification).optional()?;
    Ok(n)
}

pub fn mark_read(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("UPDATE notifications SET read = 1 WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(anyhow!("notification {} not found", id));
    }
    Ok(())
}

pub fn mark_all_read(conn: &Connection) -> Result<usize> {
    let changed = conn.execute("UPDATE notifications SET read = 1 WHERE read = 0", [])?;
    Ok(changed)
}

pub fn set_delivery_state(conn: &Connection, id: &str, state: DeliveryState) -> Result<()> {
    conn.execute(
        "UPDATE notifications SET delivery_state = ?2 WHERE id = ?1",
        rusqlite::params![id, state.as_str()],
    )?;
    Ok(())
}

/// How many notifications of this type were actually delivered in the last
/// hour. Suppressed or digested entries do not count against the limit.
pub fn delivered_in_last_hour(
    conn: &Connection,
    ntype: NotificationType,
    now: i64,
) -> Result<i64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications
         WHERE notification_type = ?1 AND delivery_state = 'delivered'
           AND created_at > ?2",
        rusqlite::params![ntype.as_str(), now - 3600],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Most recent notification of a type inside the grouping window, if any.
pub fn latest_in_group_window(
    conn: &Connection,
    ntype: NotificationType,
    window_secs: i64,
    now: i64,
) -> Result<Option<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications
         WHERE notification_type = ?1 AND created_at > ?2
         ORDER BY created_at DESC LIMIT 1",
        COLUMNS
    ))?;
    let n = stmt
        .query_row(
            rusqlite::params![ntype.as_str(), now - window_secs],
            row_to_notification,
        )
        .optional()?;
    Ok(n)
}

pub fn bump_group_count(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE notifications SET group_count = group_count + 1 WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Used to avoid re-raising the same finding while the previous one is
/// still unread.
pub fn unread_with_message_exists(
    conn: &Connection,
    ntype: NotificationType,
    message: &str,
) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM notifications
         WHERE notification_type = ?1 AND message = ?2 AND read = 0",
        rusqlite::params![ntype.as_str(), message],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Unread delivered notifications older than the escalation delay.
pub fn unread_for_escalation(conn: &Connection, older_than: i64) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications
         WHERE read = 0 AND delivery_state = 'delivered' AND created_at < ?1
         ORDER BY created_at ASC",
        COLUMNS
    ))?;
    let rows = stmt
        .query_map([older_than], row_to_notification)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Entries folded into the digest since the given timestamp.
pub fn digest_entries_since(conn: &Connection, since: i64) -> Result<Vec<Notification>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM notifications
         WHERE delivery_state = 'digest' AND created_at >= ?1
         ORDER BY created_at ASC",
        COLUMNS
    ))?;
    let rows = stmt
        .query_map([since], row_to_notification)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;

    fn notification(id: &str, state: DeliveryState, created_at: i64) -> Notification {
        Notification {
            id: id.to_string(),
            notification_type: NotificationType::Anomaly,
            severity: AnomalySeverity::Medium,
            title: "t".to_string(),
            message: "m".to_string(),
            person: None,
            channel: None,
            delivery_state: state,
            read: false,
            group_count: 1,
            created_at,
        }
    }

    #[test]
    fn rate_limit_counts_only_delivered() {
        let conn = open_test_db();
        let now = 10_000;
        insert_notification(&conn, &notification("a", DeliveryState::Delivered, now - 100)).unwrap();
        insert_notification(&conn, &notification("b", DeliveryState::Suppressed, now - 100)).unwrap();
        insert_notification(&conn, &notification("c", DeliveryState::Delivered, now - 4000)).unwrap();
        let count = delivered_in_last_hour(&conn, NotificationType::Anomaly, now).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn mark_all_read_reports_count() {
        let conn = open_test_db();
        insert_notification(&conn, &notification("a", DeliveryState::Delivered, 1)).unwrap();
        insert_notification(&conn, &notification("b", DeliveryState::Delivered, 2)).unwrap();
        assert_eq!(mark_all_read(&conn).unwrap(), 2);
        assert_eq!(mark_all_read(&conn).unwrap(), 0);
    }

    #[test]
    fn grouping_finds_recent_same_type() {
        let conn = open_test_db();
        let now = 5_000;
        insert_notification(&conn, &notification("a", DeliveryState::Delivered, now - 60)).unwrap();
        let hit = latest_in_group_window(&conn, NotificationType::Anomaly, 300, now).unwrap();
        assert!(hit.is_some());
        bump_group_count(&conn, "a").unwrap();
        let n = get_notification(&conn, "a").unwrap().unwrap();
        assert_eq!(n.group_count, 2);
    }
}
