/// Industry-standard organic CTR curve (2024 table).
///
/// Positions 11-20 and 21-30 share flat rates; 31 and beyond get the floor.

/// SQL CASE fragment mirroring [`ctr_for_position`]; embedded in the DSI
/// queries so traffic estimation happens in one pass over `serp_results`.
pub(crate) const CTR_CASE_SQL: &str = r"CASE
    WHEN position = 1 THEN 0.2823
    WHEN position = 2 THEN 0.1572
    WHEN position = 3 THEN 0.1073
    WHEN position = 4 THEN 0.0775
    WHEN position = 5 THEN 0.0588
    WHEN position = 6 THEN 0.0459
    WHEN position = 7 THEN 0.0369
    WHEN position = 8 THEN 0.0302
    WHEN position = 9 THEN 0.0252
    WHEN position = 10 THEN 0.0214
    WHEN position <= 20 THEN 0.0150
    WHEN position <= 30 THEN 0.0080
    ELSE 0.0050
END";

/// Click-through rate for an organic SERP position. The SQL fragment above
/// is the load-bearing copy; this one backs the boundary tests.
#[allow(dead_code)]
#[must_use]
pub(crate) fn ctr_for_position(position: i32) -> f64 {
    match position {
        i32::MIN..=0 => 0.0050,
        1 => 0.2823,
        2 => 0.1572,
        3 => 0.1073,
        4 => 0.0775,
        5 => 0.0588,
        6 => 0.0459,
        7 => 0.0369,
        8 => 0.0302,
        9 => 0.0252,
        10 => 0.0214,
        11..=20 => 0.0150,
        21..=30 => 0.0080,
        _ => 0.0050,
    }
}

/// Estimated monthly traffic for one result. Missing search volume defaults
/// to 1000.
#[allow(dead_code)]
#[must_use]
pub(crate) fn estimated_traffic(avg_monthly_searches: Option<i64>, position: i32) -> f64 {
    let volume = avg_monthly_searches.unwrap_or(1000).max(0) as f64;
    volume * ctr_for_position(position)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_positions_match_the_curve() {
        assert!((ctr_for_position(1) - 0.2823).abs() < f64::EPSILON);
        assert!((ctr_for_position(10) - 0.0214).abs() < f64::EPSILON);
        assert!((ctr_for_position(11) - 0.0150).abs() < f64::EPSILON);
        assert!((ctr_for_position(20) - 0.0150).abs() < f64::EPSILON);
        assert!((ctr_for_position(21) - 0.0080).abs() < f64::EPSILON);
        assert!((ctr_for_position(30) - 0.0080).abs() < f64::EPSILON);
        assert!((ctr_for_position(31) - 0.0050).abs() < f64::EPSILON);
        assert!((ctr_for_position(500) - 0.0050).abs() < f64::EPSILON);
    }

    #[test]
    fn rates_stay_in_documented_range() {
        for position in 1..=100 {
            let rate = ctr_for_position(position);
            assert!((0.005..=0.2823).contains(&rate));
        }
    }

    #[test]
    fn traffic_defaults_missing_volume_to_1000() {
        assert!((estimated_traffic(None, 1) - 282.3).abs() < 1e-9);
        assert!((estimated_traffic(Some(2000), 10) - 42.8).abs() < 1e-9);
        assert!((estimated_traffic(Some(-5), 1) - 0.0).abs() < f64::EPSILON);
    }
}
