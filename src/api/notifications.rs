use crate::api::{clamp_limit, page, ApiResult, EngineError, Paginated};
use crate::database;
use crate::models::{
    ExtendedNotificationSettings, Notification, NotificationSettings,
};
use crate::state::AppState;

pub async fn list(
    state: &AppState,
    unread_only: bool,
    limit: Option<i64>,
    offset: Option<i64>,
) -> ApiResult<Paginated<Notification>> {
    let conn = state.conn()?;
    let limit = clamp_limit(limit);
    let rows =
        database::notifications::list_notifications(&conn, unread_only, limit, offset.unwrap_or(0))?;
    Ok(page(rows, limit))
}

pub async fn mark_read(state: &AppState, id: &str) -> ApiResult<Notification> {
    let conn = state.conn()?;
    database::notifications::mark_read(&conn, id)
        .map_err(|_| EngineError::not_found("notification", id))?;
    database::notifications::get_notification(&conn, id)?
        .ok_or_else(|| EngineError::not_found("notification", id))
}

pub async fn mark_all_read(state: &AppState) -> ApiResult<usize> {
    let conn = state.conn()?;
    Ok(database::notifications::mark_all_read(&conn)?)
}

pub async fn get_settings(state: &AppState) -> ApiResult<NotificationSettings> {
    Ok(state.settings()?.notifications)
}

pub async fn update_settings(
    state: &AppState,
    notifications: NotificationSettings,
) -> ApiResult<NotificationSettings> {
    let mut settings = state.settings()?;
    settings.notifications = notifications.clone();
    crate::utils::config::save_settings(&state.data_dir, &settings)?;
    Ok(notifications)
}

pub async fn get_extended_settings(state: &AppState) -> ApiResult<ExtendedNotificationSettings> {
    Ok(state.settings()?.notifications_extended)
}

pub async fn update_extended_settings(
    state: &AppState,
    extended: ExtendedNotificationSettings,
) -> ApiResult<ExtendedNotificationSettings> {
    if extended.group_window_secs == 0 {
        return Err(EngineError::Validation(
            "group_window_secs must be positive".to_string(),
        ));
    }
    let mut settings = state.settings()?;
    settings.notifications_extended = extended.clone();
    crate::utils::config::save_settings(&state.data_dir, &settings)?;
    Ok(extended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnomalySeverity, DeliveryState, NotificationType};
    use crate::state::test_support;

    fn seed(state: &AppState, id: &str) {
        let conn = state.conn().unwrap();
        database::notifications::insert_notification(
            &conn,
            &Notification {
                id: id.to_string(),
                notification_type: NotificationType::Anomaly,
                severity: AnomalySeverity::Medium,
                title: "t".to_string(),
                message: "m".to_string(),
                person: None,
                channel: None,
                delivery_state: DeliveryState::Delivered,
                read: false,
                group_count: 1,
                created_at: chrono::Utc::now().timestamp(),
            },
        )
        .unwrap();
    }

    #[tokio::test]
    async fn mark_read_then_unread_listing_shrinks() {
        let ts = test_support::app_state();
        seed(&ts.state, "a");
        seed(&ts.state, "b");

        let unread = list(&ts.state, true, None, None).await.unwrap();
        assert_eq!(unread.items.len(), 2);

        let n = mark_read(&ts.state, "a").await.unwrap();
        assert!(n.read);
        let unread = list(&ts.state, true, None, None).await.unwrap();
        assert_eq!(unread.items.len(), 1);
    }

    #[tokio::test]
    async fn marking_unknown_notification_is_not_found() {
        let ts = test_support::app_state();
        let err = mark_read(&ts.state, "nope").await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[tokio::test]
    async fn zero_group_window_is_rejected() {
        let ts = test_support::app_state();
        let mut extended = ExtendedNotificationSettings::default();
        extended.group_window_secs = 0;
        let err = update_extended_settings(&ts.state, extended).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
