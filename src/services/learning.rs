use anyhow::Result;
use rusqlite::Connection;

use crate::database;
use crate::models::{EngineSettings, LearningPhase};

/// Pattern evidence required before a scope leaves observing.
const PROMOTE_MIN_PATTERNS: usize = 3;
const PROMOTE_MIN_TOTAL_MATCHES: i64 = 15;

/// Decision evidence required before a scope goes autonomous.
const AUTONOMY_MIN_DECISIONS: i64 = 10;
const AUTONOMY_CONFIRM_RATIO: f64 = 0.8;

/// Walks every learning scope and promotes the ones whose evidence clears
/// the bar. Promotions are monotonic; nothing here ever demotes.
pub fn evaluate_scope_promotions(conn: &Connection, settings: &EngineSettings) -> Result<()> {
    let params = settings.mining.resolve();
    let scale = settings.learning_speed.threshold_scale();

    for scope in database::learning::list_phases(conn)? {
        match scope.phase {
            LearningPhase::Observing => {
                let stats = database::patterns::scope_stats(
                    conn,
                    &scope.room_id,
                    &scope.domain,
                    params.min_confidence,
                )?;
                let need_patterns =
                    ((PROMOTE_MIN_PATTERNS as f64) * scale).ceil() as i64;
                let need_matches =
                    ((PROMOTE_MIN_TOTAL_MATCHES as f64) * scale).ceil() as i64;
                if stats.qualified_patterns >= need_patterns
                    && stats.total_match_count >= need_matches
                {
                    database::learning::set_phase(
                        conn,
                        &scope.room_id,
                        &scope.domain,
                        LearningPhase::Suggesting,
                        params.min_confidence,
                    )?;
                    log::info!(
                        "[Learning] {}/{} promoted to suggesting ({} patterns, {} matches)",
                        scope.room_id,
                        scope.domain,
                        stats.qualified_patterns,
                        stats.total_match_count
                    );
                }
            }
            LearningPhase::Suggesting => {
                let decided = scope.confirmed_count + scope.rejected_count;
                let need_decisions =
                    ((AUTONOMY_MIN_DECISIONS as f64) * scale).ceil() as i64;
                if decided < need_decisions {
                    continue;
                }
                let ratio = scope.confirmed_count as f64 / decided as f64;
                if ratio >= AUTONOMY_CONFIRM_RATIO {
                    database::learning::set_phase(
                        conn,
                        &scope.room_id,
                        &scope.domain,
                        LearningPhase::Autonomous,
                        ratio,
                    )?;
                    log::info!(
                        "[Learning] {}/{} promoted to autonomous ({:.0}% confirmed over {})",
                        scope.room_id,
                        scope.domain,
                        ratio * 100.0,
                        decided
                    );
                }
            }
            LearningPhase::Autonomous => {}
        }
    }
    Ok(())
}

/// Full reset of one scope: its learned patterns, their predictions and
/// the phase record go back to a blank observing state in one transaction.
pub fn reset_scope(conn: &Connection, room_id: &str, domain: &str) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let removed = database::patterns::delete_patterns_for_scope(&tx, room_id, domain)?;
    database::learning::reset_phase(&tx, room_id, domain)?;
    tx.commit()?;
    log::info!(
        "[Learning] Scope {}/{} reset, {} patterns dropped",
        room_id,
        domain,
        removed
    );
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_test_db;
    use crate::database::patterns::{NewPattern, PatternKey};
    use crate::models::{LearningSpeed, PatternData, PatternStatus, PatternType};

    fn seed_pattern(conn: &Connection, entity: &str, match_count: i64, confidence: f64) -> i64 {
        database::patterns::insert_pattern(
            conn,
            &NewPattern {
                key: &PatternKey {
                    pattern_type: PatternType::TimeBased,
                    entity_id: entity.to_string(),
                    target_state: "on".to_string(),
                    trigger_entity: String::new(),
                    trigger_state: String::new(),
                },
                room_id: "living_room",
                domain: "light",
                data: &PatternData::default(),
                confidence,
                match_count,
                status: PatternStatus::Observed,
                last_observed: 0,
            },
        )
        .unwrap()
    }

    fn scope_phase(conn: &Connection) -> LearningPhase {
        database::learning::get_phase(conn, "living_room", "light")
            .unwrap()
            .unwrap()
            .phase
    }

    #[test]
    fn observing_promotes_on_pattern_evidence() {
        let conn = open_test_db();
        let settings = EngineSettings::default();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();

        seed_pattern(&conn, "light.a", 6, 0.9);
        seed_pattern(&conn, "light.b", 5, 0.85);
        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Observing);

        seed_pattern(&conn, "light.c", 6, 0.9);
        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Suggesting);
    }

    #[test]
    fn rejected_patterns_do_not_count_toward_promotion() {
        let conn = open_test_db();
        let settings = EngineSettings::default();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();

        seed_pattern(&conn, "light.a", 6, 0.9);
        seed_pattern(&conn, "light.b", 5, 0.85);
        let id = seed_pattern(&conn, "light.c", 6, 0.9);
        database::patterns::transition_status(&conn, id, PatternStatus::Rejected, None).unwrap();

        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Observing);
    }

    #[test]
    fn low_confidence_patterns_do_not_count() {
        let conn = open_test_db();
        let settings = EngineSettings::default();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();

        for i in 0..5 {
            seed_pattern(&conn, &format!("light.weak_{}", i), 10, 0.3);
        }
        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Observing);
    }

    #[test]
    fn suggesting_promotes_on_confirm_ratio() {
        let conn = open_test_db();
        let settings = EngineSettings::default();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();
        database::learning::set_phase(
            &conn,
            "living_room",
            "light",
            LearningPhase::Suggesting,
            0.7,
        )
        .unwrap();

        // 9 confirms, 1 reject over 10 decisions: 90% >= 80%
        for _ in 0..9 {
            database::learning::record_decision(&conn, "living_room", "light", true).unwrap();
        }
        database::learning::record_decision(&conn, "living_room", "light", false).unwrap();

        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Autonomous);
    }

    #[test]
    fn weak_ratio_stays_suggesting() {
        let conn = open_test_db();
        let settings = EngineSettings::default();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();
        database::learning::set_phase(
            &conn,
            "living_room",
            "light",
            LearningPhase::Suggesting,
            0.7,
        )
        .unwrap();

        for _ in 0..6 {
            database::learning::record_decision(&conn, "living_room", "light", true).unwrap();
        }
        for _ in 0..4 {
            database::learning::record_decision(&conn, "living_room", "light", false).unwrap();
        }
        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Suggesting);
    }

    #[test]
    fn slow_speed_raises_the_bar() {
        let conn = open_test_db();
        let mut settings = EngineSettings::default();
        settings.learning_speed = LearningSpeed::Careful;
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();

        // Enough for normal speed (3 patterns / 15 matches) but careful
        // needs ceil(3*1.5)=5 patterns and ceil(15*1.5)=23 matches.
        seed_pattern(&conn, "light.a", 6, 0.9);
        seed_pattern(&conn, "light.b", 5, 0.85);
        seed_pattern(&conn, "light.c", 6, 0.9);
        evaluate_scope_promotions(&conn, &settings).unwrap();
        assert_eq!(scope_phase(&conn), LearningPhase::Observing);
    }

    #[test]
    fn reset_clears_patterns_and_phase() {
        let conn = open_test_db();
        database::learning::get_or_create_phase(&conn, "living_room", "light").unwrap();
        database::learning::set_phase(
            &conn,
            "living_room",
            "light",
            LearningPhase::Autonomous,
            0.9,
        )
        .unwrap();
        let id = seed_pattern(&conn, "light.a", 6, 0.9);
        database::predictions::insert_prediction(
            &conn,
            id,
            crate::models::PredictionStatus::Pending,
            0.9,
        )
        .unwrap();

        let removed = reset_scope(&conn, "living_room", "light").unwrap();
        assert_eq!(removed, 1);
        assert_eq!(scope_phase(&conn), LearningPhase::Observing);
        assert!(database::patterns::get_pattern(&conn, id).unwrap().is_none());
    }
}
