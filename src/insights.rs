use rusqlite::{Connection, Row};
use serde::Serialize;
use tracing::debug;

use crate::error::Result;

/// Analytical views, in creation order. Later views read earlier ones.
pub const VIEWS: &[&str] = &[
    "vw_financial_health_scorecard",
    "vw_spending_recommendations",
    "vw_budget_alerts",
    "vw_category_insights",
    "vw_lifestyle_improvement_plan",
];

const SCORECARD_SQL: &str = "
CREATE VIEW vw_financial_health_scorecard AS
WITH latest AS (
    SELECT MAX(snapshot_version) AS v FROM curated_spending_snapshots WHERE is_latest = 1
),
person AS (
    SELECT
        person_name,
        COUNT(*) AS months_tracked,
        AVG(total_spending) AS avg_monthly_spending,
        SUM(total_spending) AS total_spending,
        SUM(essential_spending) AS essential,
        SUM(discretionary_spending) AS discretionary,
        AVG(discretionary_spending) AS avg_monthly_discretionary,
        SUM(weekend_spending) AS weekend,
        AVG(mom_percent_change) AS avg_mom_change,
        SUM(transaction_count) AS transactions,
        SUM(xlarge_transactions_count) AS xlarge
    FROM dst_person_analytics
    WHERE snapshot_version_source = (SELECT v FROM latest)
    GROUP BY person_name
),
shares AS (
    SELECT
        *,
        COALESCE(essential * 100.0 / NULLIF(total_spending, 0), 0) AS essential_pct,
        COALESCE(discretionary * 100.0 / NULLIF(total_spending, 0), 0) AS discretionary_pct,
        COALESCE(weekend * 100.0 / NULLIF(total_spending, 0), 0) AS weekend_pct,
        COALESCE(xlarge * 100.0 / NULLIF(transactions, 0), 0) AS xlarge_pct
    FROM person
),
scored AS (
    SELECT
        *,
        100
        - CASE WHEN discretionary_pct > 50 THEN 30 WHEN discretionary_pct > 40 THEN 20
               WHEN discretionary_pct > 30 THEN 10 ELSE 0 END
        - CASE WHEN weekend_pct > 40 THEN 15 WHEN weekend_pct > 30 THEN 5 ELSE 0 END
        - CASE WHEN COALESCE(avg_mom_change, 0) > 20 THEN 15
               WHEN COALESCE(avg_mom_change, 0) > 10 THEN 5 ELSE 0 END
        - CASE WHEN xlarge_pct > 10 THEN 10 ELSE 0 END AS health_score
    FROM shares
)
SELECT
    person_name,
    months_tracked,
    ROUND(avg_monthly_spending, 2) AS avg_monthly_spending,
    ROUND(essential_pct, 2) AS essential_percent,
    ROUND(discretionary_pct, 2) AS discretionary_percent,
    ROUND(weekend_pct, 2) AS weekend_percent,
    ROUND(avg_mom_change, 2) AS avg_mom_change_percent,
    health_score,
    CASE WHEN health_score >= 85 THEN 'Excellent'
         WHEN health_score >= 70 THEN 'Good'
         WHEN health_score >= 50 THEN 'Fair'
         ELSE 'Needs Attention' END AS health_grade,
    ROUND(avg_monthly_discretionary * 0.20, 2) AS potential_monthly_savings
FROM scored
";

const RECOMMENDATIONS_SQL: &str = "
CREATE VIEW vw_spending_recommendations AS
WITH latest AS (
    SELECT MAX(snapshot_version) AS v FROM curated_spending_snapshots WHERE is_latest = 1
),
monthly AS (
    SELECT * FROM dst_monthly_spending_summary WHERE snapshot_version_source = (SELECT v FROM latest)
),
months AS (
    SELECT person_name, COUNT(DISTINCT year * 100 + month) AS n FROM monthly GROUP BY person_name
),
categories AS (
    SELECT m.person_name, m.category_name, m.category_group, SUM(m.total_spending) / mo.n AS avg_monthly
    FROM monthly m
    JOIN months mo ON mo.person_name = m.person_name
    WHERE m.category_group IN ('Discretionary', 'Other')
    GROUP BY m.person_name, m.category_name, m.category_group
)
SELECT
    person_name,
    ROW_NUMBER() OVER (PARTITION BY person_name ORDER BY avg_monthly DESC, category_name) AS priority,
    category_name,
    category_group,
    ROUND(avg_monthly, 2) AS avg_monthly_spending,
    'Reduce ' || category_name || ' spending' AS title,
    ROUND(avg_monthly * 0.15, 2) AS potential_monthly_savings
FROM categories
";

const ALERTS_SQL: &str = "
CREATE VIEW vw_budget_alerts AS
WITH latest AS (
    SELECT MAX(snapshot_version) AS v FROM curated_spending_snapshots WHERE is_latest = 1
),
person AS (
    SELECT * FROM dst_person_analytics WHERE snapshot_version_source = (SELECT v FROM latest)
),
latest_month AS (
    SELECT p.* FROM person p
    WHERE p.year * 100 + p.month = (
        SELECT MAX(p2.year * 100 + p2.month) FROM person p2 WHERE p2.person_name = p.person_name
    )
)
SELECT person_name, year, month, 'SPENDING_SPIKE' AS alert_type,
       CASE WHEN mom_percent_change > 50 THEN 'HIGH' ELSE 'MEDIUM' END AS severity,
       'Spending up ' || ROUND(mom_percent_change, 1) || '% on the previous month' AS message,
       mom_percent_change AS metric_value
FROM latest_month WHERE mom_percent_change > 20
UNION ALL
SELECT person_name, year, month, 'WEEKEND_SPENDING', 'LOW',
       ROUND(weekend_spending_percent, 1) || '% of spending fell on weekends',
       weekend_spending_percent
FROM latest_month WHERE weekend_spending_percent > 50
UNION ALL
SELECT person_name, year, month, 'HIGH_DISCRETIONARY', 'MEDIUM',
       ROUND(discretionary_percent, 1) || '% of spending was discretionary',
       discretionary_percent
FROM latest_month WHERE discretionary_percent > 50
";

const CATEGORY_INSIGHTS_SQL: &str = "
CREATE VIEW vw_category_insights AS
WITH latest AS (
    SELECT MAX(snapshot_version) AS v FROM curated_spending_snapshots WHERE is_latest = 1
),
trends AS (
    SELECT * FROM dst_category_trends WHERE snapshot_version_source = (SELECT v FROM latest)
),
grand AS (
    SELECT SUM(total_spending) AS total FROM trends
),
agg AS (
    SELECT category_name, MAX(category_group) AS category_group, SUM(total_spending) AS total_spending,
           COUNT(*) AS months_active, SUM(transaction_count) AS transaction_count
    FROM trends GROUP BY category_name
),
latest_month AS (
    SELECT t.category_name, t.mom_trend_direction FROM trends t
    WHERE t.year * 100 + t.month = (
        SELECT MAX(t2.year * 100 + t2.month) FROM trends t2 WHERE t2.category_name = t.category_name
    )
),
shared AS (
    SELECT a.*, c.mom_trend_direction AS latest_trend,
           COALESCE(a.total_spending * 100.0 / NULLIF(g.total, 0), 0) AS share
    FROM agg a
    JOIN latest_month c ON c.category_name = a.category_name
    CROSS JOIN grand g
)
SELECT
    category_name,
    category_group,
    ROUND(total_spending, 2) AS total_spending,
    ROUND(total_spending / months_active, 2) AS avg_monthly_spending,
    months_active,
    transaction_count,
    latest_trend,
    ROUND(share, 2) AS percent_of_total,
    ROUND(
        CASE category_group WHEN 'Discretionary' THEN 50 WHEN 'Other' THEN 30 ELSE 10 END
        + CASE latest_trend WHEN 'INCREASING' THEN 30 WHEN 'STABLE' THEN 10 ELSE 0 END
        + MIN(20, share), 2) AS opportunity_score
FROM shared
";

const IMPROVEMENT_PLAN_SQL: &str = "
CREATE VIEW vw_lifestyle_improvement_plan AS
WITH top AS (
    SELECT * FROM vw_spending_recommendations WHERE priority <= 3
)
SELECT
    s.person_name,
    s.health_score,
    s.health_grade,
    (SELECT title FROM top t WHERE t.person_name = s.person_name AND t.priority = 1) AS action_1,
    (SELECT title FROM top t WHERE t.person_name = s.person_name AND t.priority = 2) AS action_2,
    (SELECT title FROM top t WHERE t.person_name = s.person_name AND t.priority = 3) AS action_3,
    ROUND(COALESCE((SELECT SUM(potential_monthly_savings) FROM top t WHERE t.person_name = s.person_name), 0), 2)
        AS monthly_savings_potential,
    ROUND(COALESCE((SELECT SUM(potential_monthly_savings) FROM top t WHERE t.person_name = s.person_name), 0) * 12, 2)
        AS annual_savings_potential
FROM vw_financial_health_scorecard s
";

/// Drop and recreate every analytical view.
pub fn deploy_views(conn: &Connection) -> Result<()> {
    for view in VIEWS.iter().rev() {
        conn.execute_batch(&format!("DROP VIEW IF EXISTS {view}"))?;
    }
    for sql in [
        SCORECARD_SQL,
        RECOMMENDATIONS_SQL,
        ALERTS_SQL,
        CATEGORY_INSIGHTS_SQL,
        IMPROVEMENT_PLAN_SQL,
    ] {
        conn.execute_batch(sql)?;
    }
    debug!(views = VIEWS.len(), "views deployed");
    Ok(())
}

// ---------------------------------------------------------------------------
// Readers
// ---------------------------------------------------------------------------

fn read<T>(conn: &Connection, sql: &str, map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], map)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Serialize)]
pub struct Scorecard {
    pub person_name: String,
    pub months_tracked: i64,
    pub avg_monthly_spending: f64,
    pub essential_percent: f64,
    pub discretionary_percent: f64,
    pub weekend_percent: f64,
    pub avg_mom_change_percent: Option<f64>,
    pub health_score: i64,
    pub health_grade: String,
    pub potential_monthly_savings: f64,
}

pub fn scorecard(conn: &Connection) -> Result<Vec<Scorecard>> {
    read(
        conn,
        "SELECT person_name, months_tracked, avg_monthly_spending, essential_percent, discretionary_percent,
                weekend_percent, avg_mom_change_percent, health_score, health_grade, potential_monthly_savings
         FROM vw_financial_health_scorecard ORDER BY health_score DESC, person_name",
        |r| {
            Ok(Scorecard {
                person_name: r.get(0)?,
                months_tracked: r.get(1)?,
                avg_monthly_spending: r.get(2)?,
                essential_percent: r.get(3)?,
                discretionary_percent: r.get(4)?,
                weekend_percent: r.get(5)?,
                avg_mom_change_percent: r.get(6)?,
                health_score: r.get(7)?,
                health_grade: r.get(8)?,
                potential_monthly_savings: r.get::<_, Option<f64>>(9)?.unwrap_or(0.0),
            })
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub person_name: String,
    pub priority: i64,
    pub category_name: String,
    pub category_group: String,
    pub avg_monthly_spending: f64,
    pub title: String,
    pub potential_monthly_savings: f64,
}

pub fn recommendations(conn: &Connection) -> Result<Vec<Recommendation>> {
    read(
        conn,
        "SELECT person_name, priority, category_name, category_group, avg_monthly_spending, title,
                potential_monthly_savings
         FROM vw_spending_recommendations ORDER BY person_name, priority",
        |r| {
            Ok(Recommendation {
                person_name: r.get(0)?,
                priority: r.get(1)?,
                category_name: r.get(2)?,
                category_group: r.get(3)?,
                avg_monthly_spending: r.get(4)?,
                title: r.get(5)?,
                potential_monthly_savings: r.get(6)?,
            })
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub person_name: String,
    pub year: i32,
    pub month: u32,
    pub alert_type: String,
    pub severity: String,
    pub message: String,
    pub metric_value: f64,
}

pub fn alerts(conn: &Connection) -> Result<Vec<BudgetAlert>> {
    read(
        conn,
        "SELECT person_name, year, month, alert_type, severity, message, metric_value
         FROM vw_budget_alerts
         ORDER BY CASE severity WHEN 'HIGH' THEN 0 WHEN 'MEDIUM' THEN 1 ELSE 2 END, person_name, alert_type",
        |r| {
            Ok(BudgetAlert {
                person_name: r.get(0)?,
                year: r.get(1)?,
                month: r.get(2)?,
                alert_type: r.get(3)?,
                severity: r.get(4)?,
                message: r.get(5)?,
                metric_value: r.get(6)?,
            })
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryInsight {
    pub category_name: String,
    pub category_group: Option<String>,
    pub total_spending: f64,
    pub avg_monthly_spending: f64,
    pub months_active: i64,
    pub transaction_count: i64,
    pub latest_trend: String,
    pub percent_of_total: f64,
    pub opportunity_score: f64,
}

pub fn category_insights(conn: &Connection) -> Result<Vec<CategoryInsight>> {
    read(
        conn,
        "SELECT category_name, category_group, total_spending, avg_monthly_spending, months_active,
                transaction_count, latest_trend, percent_of_total, opportunity_score
         FROM vw_category_insights ORDER BY opportunity_score DESC, category_name",
        |r| {
            Ok(CategoryInsight {
                category_name: r.get(0)?,
                category_group: r.get(1)?,
                total_spending: r.get(2)?,
                avg_monthly_spending: r.get(3)?,
                months_active: r.get(4)?,
                transaction_count: r.get(5)?,
                latest_trend: r.get(6)?,
                percent_of_total: r.get(7)?,
                opportunity_score: r.get(8)?,
            })
        },
    )
}

#[derive(Debug, Clone, Serialize)]
pub struct ImprovementPlan {
    pub person_name: String,
    pub health_score: i64,
    pub health_grade: String,
    pub actions: Vec<String>,
    pub monthly_savings_potential: f64,
    pub annual_savings_potential: f64,
}

pub fn improvement_plans(conn: &Connection) -> Result<Vec<ImprovementPlan>> {
    read(
        conn,
        "SELECT person_name, health_score, health_grade, action_1, action_2, action_3,
                monthly_savings_potential, annual_savings_potential
         FROM vw_lifestyle_improvement_plan ORDER BY monthly_savings_potential DESC, person_name",
        |r| {
            let actions = [r.get::<_, Option<String>>(3)?, r.get(4)?, r.get(5)?]
                .into_iter()
                .flatten()
                .collect();
            Ok(ImprovementPlan {
                person_name: r.get(0)?,
                health_score: r.get(1)?,
                health_grade: r.get(2)?,
                actions,
                monthly_savings_potential: r.get(6)?,
                annual_savings_potential: r.get(7)?,
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use crate::curated::create_snapshot;
    use crate::marts::{populate_all, tests::snapshot_fixture};
    use crate::settings::Settings;
    use crate::stg_transform::tests::insert_src;
    use crate::stg_transform::transform_and_load;

    fn deployed() -> (tempfile::TempDir, Connection) {
        let (dir, conn) = test_db();
        snapshot_fixture(&conn);
        populate_all(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_views_empty_without_marts() {
        let (_dir, conn) = test_db();
        assert!(scorecard(&conn).unwrap().is_empty());
        assert!(alerts(&conn).unwrap().is_empty());
        assert!(improvement_plans(&conn).unwrap().is_empty());
    }

    #[test]
    fn test_redeploy_is_idempotent() {
        let (_dir, conn) = test_db();
        deploy_views(&conn).unwrap();
        deploy_views(&conn).unwrap();
    }

    #[test]
    fn test_scorecard_penalties() {
        let (_dir, conn) = deployed();
        let cards = scorecard(&conn).unwrap();
        assert_eq!(cards.len(), 2);

        let bob = &cards[0];
        assert_eq!(bob.person_name, "Bob");
        assert_eq!(bob.health_score, 100);
        assert_eq!(bob.health_grade, "Excellent");
        assert_eq!(bob.potential_monthly_savings, 0.0);

        // discretionary 66% (-30), weekend 67% (-15), MoM 655% (-15), xlarge 20% (-10)
        let alice = &cards[1];
        assert_eq!(alice.months_tracked, 3);
        assert_eq!(alice.health_score, 30);
        assert_eq!(alice.health_grade, "Needs Attention");
        assert_eq!(alice.avg_monthly_spending, 301.67);
        assert_eq!(alice.potential_monthly_savings, 40.0);
    }

    #[test]
    fn test_recommendations_and_plan() {
        let (_dir, conn) = deployed();
        let recs = recommendations(&conn).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].title, "Reduce Shopping spending");
        assert_eq!(recs[0].priority, 1);
        assert_eq!(recs[0].avg_monthly_spending, 200.0);
        assert_eq!(recs[0].potential_monthly_savings, 30.0);

        let plans = improvement_plans(&conn).unwrap();
        assert_eq!(plans[0].person_name, "Alice");
        assert_eq!(plans[0].actions, vec!["Reduce Shopping spending".to_string()]);
        assert_eq!(plans[0].annual_savings_potential, 360.0);
        assert!(plans[1].actions.is_empty());
    }

    #[test]
    fn test_alerts_for_latest_month() {
        let (_dir, conn) = deployed();
        let found = alerts(&conn).unwrap();
        let kinds: Vec<(&str, &str)> = found
            .iter()
            .map(|a| (a.alert_type.as_str(), a.severity.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![("SPENDING_SPIKE", "HIGH"), ("HIGH_DISCRETIONARY", "MEDIUM"), ("WEEKEND_SPENDING", "LOW")]
        );
        assert!(found.iter().all(|a| a.person_name == "Alice" && a.month == 4));
    }

    #[test]
    fn test_category_opportunity_scores() {
        let (_dir, conn) = deployed();
        let cats = category_insights(&conn).unwrap();
        let names: Vec<&str> = cats.iter().map(|c| c.category_name.as_str()).collect();
        assert_eq!(names, vec!["Shopping", "Food", "Transport"]);
        assert_eq!(cats[0].opportunity_score, 70.0);
        assert_eq!(cats[1].opportunity_score, 60.0);
        assert_eq!(cats[1].latest_trend, "INCREASING");
        assert_eq!(cats[2].opportunity_score, 15.24);
    }

    /// Carol grows 0% then 30% with about 38% discretionary and weekend spend;
    /// Dan has one month at 45% discretionary and 45% weekend.
    fn moderate() -> (tempfile::TempDir, Connection) {
        let (dir, conn) = test_db();
        let row = |person, date, category, amount| {
            [Some(person), Some(date), Some(category), Some(amount), Some("Mall"), Some("x"), Some("Cash")]
        };
        insert_src(
            &conn,
            &[
                row("Carol", "2024-02-05", "Food", "60"),
                row("Carol", "2024-02-10", "Shopping", "40"),
                row("Carol", "2024-03-04", "Food", "60"),
                row("Carol", "2024-03-09", "Shopping", "40"),
                row("Carol", "2024-04-01", "Food", "85"),
                row("Carol", "2024-04-06", "Shopping", "45"),
                row("Dan", "2024-04-01", "Food", "55"),
                row("Dan", "2024-04-06", "Shopping", "45"),
            ],
        );
        transform_and_load(&conn, &Settings::default()).unwrap();
        create_snapshot(&conn).unwrap();
        populate_all(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_scorecard_middle_bands() {
        let (_dir, conn) = moderate();
        let cards = scorecard(&conn).unwrap();
        assert_eq!(cards.len(), 2);

        // discretionary 37.88% (-10), weekend 37.88% (-5), avg MoM 15% (-5)
        let carol = &cards[0];
        assert_eq!(carol.person_name, "Carol");
        assert_eq!(carol.discretionary_percent, 37.88);
        assert_eq!(carol.weekend_percent, 37.88);
        assert_eq!(carol.avg_mom_change_percent, Some(15.0));
        assert_eq!(carol.health_score, 80);
        assert_eq!(carol.health_grade, "Good");

        // discretionary 45% (-20), weekend 45% (-15), no previous month
        let dan = &cards[1];
        assert_eq!(dan.person_name, "Dan");
        assert_eq!(dan.avg_mom_change_percent, None);
        assert_eq!(dan.health_score, 65);
        assert_eq!(dan.health_grade, "Fair");
    }

    #[test]
    fn test_moderate_spike_is_medium() {
        let (_dir, conn) = moderate();
        let found = alerts(&conn).unwrap();
        assert_eq!(found.len(), 1, "{found:?}");
        let spike = &found[0];
        assert_eq!(spike.person_name, "Carol");
        assert_eq!((spike.alert_type.as_str(), spike.severity.as_str()), ("SPENDING_SPIKE", "MEDIUM"));
        assert_eq!((spike.year, spike.month), (2024, 4));
        assert_eq!(spike.metric_value, 30.0);
    }
}
