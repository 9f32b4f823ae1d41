//! Static safety and complexity checks on generated SQL. This is a textual
//! denylist plus structural heuristics, not a SQL parser: it can over-reject
//! benign queries and under-reject obfuscated ones, and must not be treated
//! as a security boundary. Known limitation, kept for predictability.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub estimated_cost: ResourceEstimate,
}

/// Advisory heuristic derived from the complexity band via fixed
/// multipliers. Not a query-planner estimate.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEstimate {
    pub complexity: ComplexityBand,
    pub estimated_rows: u64,
    pub estimated_latency_ms: u64,
    pub cpu_units: u32,
    pub memory_units: u32,
    pub io_units: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComplexityBand {
    Low,
    Medium,
    High,
    VeryHigh,
}

struct DenyRule {
    pattern: Regex,
    message: &'static str,
}

static DENY_RULES: LazyLock<Vec<DenyRule>> = LazyLock::new(|| {
    let rules = [
        (
            r"(?i);\s*(drop|delete|insert|update|alter|create|truncate|grant|revoke)\b",
            "statement chaining into DDL/DML is not allowed",
        ),
        (
            r"(?i)\bunion\s+(all\s+)?select\b",
            "UNION SELECT pattern is not allowed",
        ),
        (
            r"(?i)\b(exec|execute|call)\s+\w",
            "stored procedure invocation is not allowed",
        ),
        (r"(?i)\bxp_\w+", "extended procedure invocation is not allowed"),
    ];
    rules
        .into_iter()
        .map(|(pattern, message)| DenyRule {
            // Patterns are fixed literals, compile cannot fail
            pattern: Regex::new(pattern).unwrap(),
            message,
        })
        .collect()
});

static STRUCTURAL: LazyLock<StructuralPatterns> = LazyLock::new(|| StructuralPatterns {
    join: Regex::new(r"(?i)\bjoin\b").unwrap(),
    nested_select: Regex::new(r"(?i)\(\s*select\b").unwrap(),
    group_by: Regex::new(r"(?i)\bgroup\s+by\b").unwrap(),
    having: Regex::new(r"(?i)\bhaving\b").unwrap(),
    window: Regex::new(r"(?i)\bover\s*\(").unwrap(),
});

struct StructuralPatterns {
    join: Regex,
    nested_select: Regex,
    group_by: Regex,
    having: Regex,
    window: Regex,
}

/// Validates candidate SQL without touching the database.
pub fn validate(sql: &str) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let trimmed = sql.trim();

    if trimmed.is_empty() {
        errors.push("query is empty".to_string());
    } else {
        let upper = trimmed.to_uppercase();
        if !upper.starts_with("SELECT") && !upper.starts_with("WITH") {
            errors.push("only read-only SELECT queries are allowed".to_string());
        }
    }

    for rule in DENY_RULES.iter() {
        if rule.pattern.is_match(trimmed) {
            errors.push(format!("unsafe SQL: {}", rule.message));
        }
    }

    let band = complexity_band(trimmed);
    if band == ComplexityBand::VeryHigh {
        warnings.push(
            "query is very complex and may be slow; consider narrowing the question".to_string(),
        );
    }

    ValidationResult {
        is_valid: errors.is_empty(),
        errors,
        warnings,
        estimated_cost: estimate_cost(band),
    }
}

fn complexity_band(sql: &str) -> ComplexityBand {
    let p = &*STRUCTURAL;
    let score = p.join.find_iter(sql).count() * 2
        + p.nested_select.find_iter(sql).count() * 3
        + p.group_by.find_iter(sql).count()
        + p.having.find_iter(sql).count()
        + p.window.find_iter(sql).count() * 2;

    match score {
        0..=2 => ComplexityBand::Low,
        3..=5 => ComplexityBand::Medium,
        6..=9 => ComplexityBand::High,
        _ => ComplexityBand::VeryHigh,
    }
}

fn estimate_cost(band: ComplexityBand) -> ResourceEstimate {
    let multiplier = match band {
        ComplexityBand::Low => 1,
        ComplexityBand::Medium => 4,
        ComplexityBand::High => 12,
        ComplexityBand::VeryHigh => 40,
    };
    ResourceEstimate {
        complexity: band,
        estimated_rows: 100 * multiplier,
        estimated_latency_ms: 50 * multiplier,
        cpu_units: (2 * multiplier) as u32,
        memory_units: (4 * multiplier) as u32,
        io_units: multiplier as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_chained_drop() {
        let result = validate("SELECT * FROM sales; DROP TABLE sales;");
        assert!(!result.is_valid);
        assert!(result.errors.iter().any(|e| e.contains("unsafe SQL")));
    }

    #[test]
    fn rejects_chained_delete_and_update() {
        assert!(!validate("SELECT 1; DELETE FROM sales").is_valid);
        assert!(!validate("SELECT 1; UPDATE stores SET region = 'x'").is_valid);
    }

    #[test]
    fn rejects_union_select_shape() {
        let result = validate("SELECT id FROM sales UNION SELECT password FROM users");
        assert!(!result.is_valid);
        let result = validate("SELECT id FROM sales UNION ALL SELECT 1");
        assert!(!result.is_valid);
    }

    #[test]
    fn rejects_procedure_invocation() {
        assert!(!validate("SELECT 1; EXEC sp_who").is_valid);
        assert!(!validate("SELECT xp_cmdshell('dir')").is_valid);
    }

    #[test]
    fn rejects_non_select_statements() {
        let result = validate("DELETE FROM sales");
        assert!(!result.is_valid);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("read-only")));
        assert!(!validate("").is_valid);
    }

    #[test]
    fn accepts_plain_select_and_cte() {
        assert!(validate("SELECT region, SUM(total_amount) FROM sales GROUP BY region").is_valid);
        assert!(validate("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_valid);
    }

    #[test]
    fn complexity_bands_scale_with_structure() {
        assert_eq!(
            validate("SELECT * FROM sales").estimated_cost.complexity,
            ComplexityBand::Low
        );
        let medium = "SELECT s.region, SUM(f.total_amount) FROM sales f \
                      JOIN stores s ON f.store_id = s.store_id GROUP BY s.region";
        assert_eq!(
            validate(medium).estimated_cost.complexity,
            ComplexityBand::Medium
        );
        let very_high = "SELECT * FROM sales a JOIN stores b ON a.store_id = b.store_id \
                         JOIN stores c ON a.store_id = c.store_id \
                         WHERE a.id IN (SELECT id FROM sales) \
                         AND a.store_id IN (SELECT store_id FROM stores) \
                         GROUP BY a.id HAVING COUNT(*) > 1";
        let result = validate(very_high);
        assert_eq!(result.estimated_cost.complexity, ComplexityBand::VeryHigh);
        // Very-high is a warning, never a rejection
        assert!(result.is_valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn cost_estimate_tracks_band() {
        let low = validate("SELECT 1").estimated_cost;
        let high = validate(
            "SELECT * FROM a JOIN b ON a.x = b.x JOIN c ON a.x = c.x GROUP BY a.x HAVING COUNT(*) > 1",
        )
        .estimated_cost;
        assert!(high.estimated_latency_ms > low.estimated_latency_ms);
        assert!(high.estimated_rows > low.estimated_rows);
    }
}
