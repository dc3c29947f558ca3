use colored::Colorize;
use comfy_table::{Cell, Table};

use crate::error::{EtlError, Result};
use crate::fmt::{money, opt_pct, pct};
use crate::insights;

use super::open_db;

pub fn deploy() -> Result<()> {
    let conn = open_db()?;
    insights::deploy_views(&conn)?;
    for view in insights::VIEWS {
        println!("  {view}");
    }
    println!("{} {} views", "Deployed".green().bold(), insights::VIEWS.len());
    Ok(())
}

fn severity(s: &str) -> Cell {
    match s {
        "HIGH" => Cell::new(s.red().bold()),
        "MEDIUM" => Cell::new(s.yellow()),
        _ => Cell::new(s),
    }
}

pub fn show(view: &str) -> Result<()> {
    let conn = open_db()?;
    let mut table = Table::new();
    match view {
        "scorecard" => {
            table.set_header(vec![
                "Person", "Months", "Avg/month", "Essential", "Discretionary", "Weekend", "MoM", "Score", "Grade",
                "Savings/month",
            ]);
            for s in insights::scorecard(&conn)? {
                table.add_row(vec![
                    Cell::new(s.person_name),
                    Cell::new(s.months_tracked),
                    Cell::new(money(s.avg_monthly_spending)),
                    Cell::new(pct(s.essential_percent)),
                    Cell::new(pct(s.discretionary_percent)),
                    Cell::new(pct(s.weekend_percent)),
                    Cell::new(opt_pct(s.avg_mom_change_percent)),
                    Cell::new(s.health_score),
                    Cell::new(s.health_grade),
                    Cell::new(money(s.potential_monthly_savings)),
                ]);
            }
        }
        "recommendations" => {
            table.set_header(vec!["Person", "#", "Category", "Group", "Avg/month", "Recommendation", "Savings/month"]);
            for r in insights::recommendations(&conn)? {
                table.add_row(vec![
                    Cell::new(r.person_name),
                    Cell::new(r.priority),
                    Cell::new(r.category_name),
                    Cell::new(r.category_group),
                    Cell::new(money(r.avg_monthly_spending)),
                    Cell::new(r.title),
                    Cell::new(money(r.potential_monthly_savings)),
                ]);
            }
        }
        "alerts" => {
            table.set_header(vec!["Person", "Month", "Alert", "Severity", "Value", "Message"]);
            for a in insights::alerts(&conn)? {
                table.add_row(vec![
                    Cell::new(a.person_name),
                    Cell::new(format!("{}-{:02}", a.year, a.month)),
                    Cell::new(&a.alert_type),
                    severity(&a.severity),
                    Cell::new(format!("{:.2}", a.metric_value)),
                    Cell::new(textwrap::fill(&a.message, 50)),
                ]);
            }
        }
        "categories" => {
            table.set_header(vec![
                "Category", "Group", "Total", "Avg/month", "Months", "Txns", "Trend", "Share", "Opportunity",
            ]);
            for c in insights::category_insights(&conn)? {
                table.add_row(vec![
                    Cell::new(c.category_name),
                    Cell::new(c.category_group.unwrap_or_default()),
                    Cell::new(money(c.total_spending)),
                    Cell::new(money(c.avg_monthly_spending)),
                    Cell::new(c.months_active),
                    Cell::new(c.transaction_count),
                    Cell::new(c.latest_trend),
                    Cell::new(pct(c.percent_of_total)),
                    Cell::new(format!("{:.2}", c.opportunity_score)),
                ]);
            }
        }
        "plans" => {
            table.set_header(vec!["Person", "Score", "Grade", "Actions", "Monthly", "Annual"]);
            for p in insights::improvement_plans(&conn)? {
                let actions = p
                    .actions
                    .iter()
                    .map(|a| textwrap::fill(a, 50))
                    .collect::<Vec<_>>()
                    .join("\n");
                table.add_row(vec![
                    Cell::new(p.person_name),
                    Cell::new(p.health_score),
                    Cell::new(p.health_grade),
                    Cell::new(actions),
                    Cell::new(money(p.monthly_savings_potential)),
                    Cell::new(money(p.annual_savings_potential)),
                ]);
            }
        }
        other => {
            return Err(EtlError::Other(format!(
                "Unknown view '{other}'. Choose one of: scorecard, recommendations, alerts, categories, plans"
            )))
        }
    }
    if table.row_iter().next().is_none() {
        println!("No rows. Populate the marts with `spendflow dst populate` first.");
    } else {
        println!("{table}");
    }
    Ok(())
}
