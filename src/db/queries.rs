pub const SELECT_ALERTS: &str = r#"
SELECT * FROM alerts WHERE TRUE
"#;

pub const COUNT_ALERTS: &str = r#"
SELECT COUNT(*) FROM alerts WHERE TRUE
"#;

pub const SELECT_ALERT_BY_ID: &str = r#"
SELECT * FROM alerts WHERE id = $1;
"#;

pub const INSERT_ALERT: &str = r#"
INSERT INTO alerts (
    id, created_at, updated_at,
    title, description, category, sub_category, target_audiences,
    impact_level, priority, recommended_action, mitigation,
    origin_city, origin_country, origin_latitude, origin_longitude, impact_locations,
    expected_start, expected_end,
    confidence, source_name, source_url, created_by, duplicate_of,
    status, is_update_of, previous_version_notes, update_history, update_count,
    last_update_at, last_auto_update_check_at,
    auto_update_suppressed, suppressed_by, suppressed_at, suppressed_reason,
    followers, follow_count
) VALUES (
    $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19,
    $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, $36, $37
);
"#;

/// Binds in the same order as `INSERT_ALERT`.
pub const UPDATE_ALERT: &str = r#"
UPDATE alerts
SET created_at = $2,
    updated_at = $3,
    title = $4,
    description = $5,
    category = $6,
    sub_category = $7,
    target_audiences = $8,
    impact_level = $9,
    priority = $10,
    recommended_action = $11,
    mitigation = $12,
    origin_city = $13,
    origin_country = $14,
    origin_latitude = $15,
    origin_longitude = $16,
    impact_locations = $17,
    expected_start = $18,
    expected_end = $19,
    confidence = $20,
    source_name = $21,
    source_url = $22,
    created_by = $23,
    duplicate_of = $24,
    status = $25,
    is_update_of = $26,
    previous_version_notes = $27,
    update_history = $28,
    update_count = $29,
    last_update_at = $30,
    last_auto_update_check_at = $31,
    auto_update_suppressed = $32,
    suppressed_by = $33,
    suppressed_at = $34,
    suppressed_reason = $35,
    followers = $36,
    follow_count = $37
WHERE id = $1;
"#;

pub const STAMP_UPDATE_CHECK: &str = r#"
UPDATE alerts SET last_auto_update_check_at = $2 WHERE id = $1;
"#;

pub const LINK_UPDATE: &str = r#"
UPDATE alerts
SET update_history = array_append(update_history, $2),
    update_count = update_count + 1,
    last_update_at = $3,
    updated_at = $3
WHERE id = $1 AND NOT ($2 = ANY(update_history))
RETURNING update_count;
"#;

pub const SELECT_UPDATE_COUNT: &str = r#"
SELECT update_count FROM alerts WHERE id = $1;
"#;
