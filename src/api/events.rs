use crate::api::{ApiResult, EngineError};
use crate::database;
use crate::models::{NewStateEvent, StateEvent};
use crate::state::AppState;

/// Hands an incoming state change to the single-writer ingestion loop.
/// Backpressure drops are the writer's concern; submission itself only
/// fails when the payload is unusable.
pub async fn submit(state: &AppState, event: NewStateEvent) -> ApiResult<()> {
    if event.entity_id.is_empty() {
        return Err(EngineError::Validation("entity_id must not be empty".to_string()));
    }
    state
        .event_tx
        .send(event)
        .await
        .map_err(|_| EngineError::Internal(anyhow::anyhow!("ingestion channel closed")))?;
    Ok(())
}

pub async fn history(
    state: &AppState,
    entity_id: &str,
    from: i64,
    to: i64,
) -> ApiResult<Vec<StateEvent>> {
    if from >= to {
        return Err(EngineError::Validation(
            "history window must satisfy from < to".to_string(),
        ));
    }
    let conn = state.conn()?;
    Ok(database::events::get_events_for_entity(&conn, entity_id, from, to)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support;

    #[tokio::test]
    async fn empty_entity_is_rejected_before_send() {
        let ts = test_support::app_state();
        let err = submit(
            &ts.state,
            NewStateEvent {
                entity_id: String::new(),
                old_state: None,
                new_state: Some("on".to_string()),
                attributes: Default::default(),
                timestamp: 0,
                persons_home: vec![],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn submitted_event_reaches_the_writer_channel() {
        let mut ts = test_support::app_state();
        submit(
            &ts.state,
            NewStateEvent {
                entity_id: "light.kitchen".to_string(),
                old_state: Some("off".to_string()),
                new_state: Some("on".to_string()),
                attributes: Default::default(),
                timestamp: 1_700_000_000,
                persons_home: vec![],
            },
        )
        .await
        .unwrap();
        let received = ts.event_rx.try_recv().unwrap();
        assert_eq!(received.entity_id, "light.kitchen");
    }

    #[tokio::test]
    async fn inverted_history_window_is_rejected() {
        let ts = test_support::app_state();
        let err = history(&ts.state, "light.kitchen", 10, 5).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
