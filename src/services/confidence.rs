/// Confidence scoring for mined patterns.
///
/// The score combines a saturating occurrence component with a penalty for
/// timing spread: more matches across more distinct days push the score up,
/// loose clustering pulls it down. Always clamped to [0,1] and monotone
/// non-decreasing in match count for a fixed spread.

const OCCURRENCE_SATURATION: f64 = 5.0;
const VARIANCE_PENALTY_WEIGHT: f64 = 0.5;

/// Discount applied each time an autonomous execution is undone.
pub const UNDO_DISCOUNT: f64 = 0.85;

pub struct ScoreInput {
    pub match_count: i64,
    pub distinct_days: u32,
    pub min_distinct_days: u32,
    /// Timing spread (stddev) normalized by the detector's window:
    /// minutes-of-day stddev / window for time patterns, delay stddev /
    /// chain window for chains.
    pub normalized_spread: f64,
}

pub fn score(input: &ScoreInput) -> f64 {
    if input.match_count <= 0 {
        return 0.0;
    }
    let occurrence = 1.0 - (-(input.match_count as f64) / OCCURRENCE_SATURATION).exp();
    let day_factor = if input.min_distinct_days == 0 {
        1.0
    } else {
        (input.distinct_days as f64 / input.min_distinct_days as f64).min(1.0)
    };
    let penalty = 1.0 - VARIANCE_PENALTY_WEIGHT * input.normalized_spread.clamp(0.0, 1.0);
    (occurrence * day_factor * penalty).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(match_count: i64, spread: f64) -> ScoreInput {
        ScoreInput {
            match_count,
            distinct_days: 5,
            min_distinct_days: 3,
            normalized_spread: spread,
        }
    }

    #[test]
    fn bounded_in_unit_interval() {
        for count in [0, 1, 10, 1000] {
            for spread in [0.0, 0.5, 1.0, 10.0] {
                let s = score(&input(count, spread));
                assert!((0.0..=1.0).contains(&s), "score {} out of bounds", s);
            }
        }
    }

    #[test]
    fn monotone_in_match_count_for_fixed_spread() {
        let mut last = 0.0;
        for count in 1..=30 {
            let s = score(&input(count, 0.2));
            assert!(s >= last, "count {} regressed: {} < {}", count, s, last);
            last = s;
        }
    }

    #[test]
    fn tighter_clustering_scores_higher() {
        let tight = score(&input(10, 0.05));
        let loose = score(&input(10, 0.8));
        assert!(tight > loose);
    }

    #[test]
    fn too_few_distinct_days_dampens() {
        let few = score(&ScoreInput {
            match_count: 10,
            distinct_days: 1,
            min_distinct_days: 3,
            normalized_spread: 0.1,
        });
        let enough = score(&ScoreInput {
            match_count: 10,
            distinct_days: 3,
            min_distinct_days: 3,
            normalized_spread: 0.1,
        });
        assert!(few < enough);
    }
}
