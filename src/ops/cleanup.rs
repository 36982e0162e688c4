//! Composite cleanup operations. Both run a deterministic sequence of
//! searches followed by conditional writes; with `dry_run` (the default)
//! every write is suppressed and the report counts what would have gone.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::odoo::client::OdooApi;
use crate::odoo::types::OdooResult;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupOptions {
    pub remove_test_data: Option<bool>,
    pub remove_inactive_records: Option<bool>,
    pub cleanup_drafts: Option<bool>,
    pub days_threshold: Option<i64>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeepCleanupOptions {
    pub dry_run: Option<bool>,
    pub keep_company_defaults: Option<bool>,
    pub keep_user_accounts: Option<bool>,
    pub keep_menus: Option<bool>,
    pub keep_groups: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupStep {
    pub operation: String,
    pub model: String,
    pub records_affected: i64,
    pub details: String,
    pub status: String, // success | error
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub removed: i64,
    pub dry_run: bool,
    pub timestamp: String,
    pub details: Vec<CleanupStep>,
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub retained: Vec<String>,
}

impl CleanupReport {
    fn new(dry_run: bool) -> Self {
        Self {
            removed: 0,
            dry_run,
            timestamp: Utc::now().to_rfc3339(),
            details: Vec::new(),
            errors: Vec::new(),
            retained: Vec::new(),
        }
    }
}

enum Action {
    Unlink,
    Archive,
}

/// One search + conditional write step. Step-level failures land in the
/// report; they do not abort the sequence.
async fn purge_step(
    client: &dyn OdooApi,
    report: &mut CleanupReport,
    operation: &str,
    model: &str,
    domain: Value,
    action: Action,
    dry_run: bool,
) {
    let ids = match client
        .search(model, Some(domain), None, None, None, None)
        .await
    {
        Ok(ids) => ids,
        Err(e) => {
            report.errors.push(format!("{operation} {model}: {e}"));
            return;
        }
    };
    if ids.is_empty() {
        return;
    }
    let count = ids.len() as i64;
    report.removed += count;

    if dry_run {
        report.details.push(CleanupStep {
            operation: operation.to_string(),
            model: model.to_string(),
            records_affected: count,
            details: format!("[DRY RUN] Would affect {count} records"),
            status: "success".to_string(),
        });
        return;
    }

    let outcome = match action {
        Action::Unlink => client.unlink(model, ids, None).await,
        Action::Archive => {
            client
                .write(model, ids, json!({ "active": false }), None)
                .await
        }
    };
    let (status, details) = match outcome {
        Ok(true) => ("success", format!("Affected {count} records")),
        Ok(false) => ("error", format!("Server refused for {count} records")),
        Err(e) => {
            report.errors.push(format!("{operation} {model}: {e}"));
            ("error", e.to_string())
        }
    };
    report.details.push(CleanupStep {
        operation: operation.to_string(),
        model: model.to_string(),
        records_affected: count,
        details,
        status: status.to_string(),
    });
}

/// Routine hygiene: test/demo data, stale records, drafts, orphans, old
/// logs and attachments.
pub async fn database_cleanup(
    client: &dyn OdooApi,
    options: CleanupOptions,
) -> OdooResult<CleanupReport> {
    let dry_run = options.dry_run.unwrap_or(true);
    let days = options.days_threshold.unwrap_or(180);
    let mut report = CleanupReport::new(dry_run);

    let cutoff_date = (Utc::now() - Duration::days(days))
        .date_naive()
        .format("%Y-%m-%d")
        .to_string();

    if options.remove_test_data.unwrap_or(true) {
        for (model, domain) in [
            ("res.partner", json!([["name", "like", "Test%"]])),
            ("res.partner", json!([["name", "like", "Demo%"]])),
            ("sale.order", json!([["name", "like", "%TEST%"]])),
            ("account.move", json!([["ref", "like", "%TEST%"]])),
        ] {
            purge_step(
                client,
                &mut report,
                "remove_test_data",
                model,
                domain,
                Action::Unlink,
                dry_run,
            )
            .await;
        }
    }

    if options.remove_inactive_records.unwrap_or(true) {
        for model in ["res.partner", "sale.order", "account.move"] {
            let domain = json!([
                ["write_date", "<", cutoff_date],
                ["active", "=", true]
            ]);
            purge_step(
                client,
                &mut report,
                "archive_inactive",
                model,
                domain,
                Action::Archive,
                dry_run,
            )
            .await;
        }
    }

    if options.cleanup_drafts.unwrap_or(true) {
        for model in ["sale.order", "account.move", "purchase.order"] {
            purge_step(
                client,
                &mut report,
                "cleanup_drafts",
                model,
                json!([["state", "=", "draft"]]),
                Action::Unlink,
                dry_run,
            )
            .await;
        }
    }

    for (model, domain) in [
        ("sale.order.line", json!([["order_id", "=", false]])),
        ("account.move.line", json!([["move_id", "=", false]])),
    ] {
        purge_step(
            client,
            &mut report,
            "remove_orphans",
            model,
            domain,
            Action::Unlink,
            dry_run,
        )
        .await;
    }

    for (model, domain) in [
        (
            "mail.message",
            json!([["create_date", "<", cutoff_date]]),
        ),
        (
            "mail.activity",
            json!([["create_date", "<", cutoff_date], ["state", "=", "done"]]),
        ),
        (
            "ir.attachment",
            json!([["create_date", "<", cutoff_date]]),
        ),
    ] {
        purge_step(
            client,
            &mut report,
            "cleanup_logs",
            model,
            domain,
            Action::Unlink,
            dry_run,
        )
        .await;
    }

    Ok(report)
}

/// Destructive reset of transactional data, keeping company defaults, user
/// accounts, menus and groups unless told otherwise.
pub async fn deep_cleanup(
    client: &dyn OdooApi,
    options: DeepCleanupOptions,
) -> OdooResult<CleanupReport> {
    let dry_run = options.dry_run.unwrap_or(true);
    let keep_defaults = options.keep_company_defaults.unwrap_or(true);
    let keep_users = options.keep_user_accounts.unwrap_or(true);
    let keep_menus = options.keep_menus.unwrap_or(true);
    let keep_groups = options.keep_groups.unwrap_or(true);
    let mut report = CleanupReport::new(dry_run);

    let mut steps: Vec<(&str, Value)> = vec![
        ("sale.order", json!([])),
        ("account.move", json!([])),
        ("purchase.order", json!([])),
        ("stock.move", json!([])),
        ("crm.lead", json!([])),
        ("project.task", json!([])),
        ("project.project", json!([])),
        ("calendar.attendee", json!([])),
        ("calendar.event", json!([])),
        ("product.product", json!([])),
        ("mail.message", json!([])),
        ("mail.activity", json!([])),
        ("ir.attachment", json!([["res_model", "!=", false]])),
    ];

    let partner_domain = if keep_defaults {
        report.retained.push("company default partner".to_string());
        json!([["id", "!=", 1]])
    } else {
        json!([])
    };
    steps.push(("res.partner", partner_domain));

    let employee_domain = if keep_users {
        report.retained.push("user-linked employees".to_string());
        json!([["user_id", "=", false]])
    } else {
        json!([])
    };
    steps.push(("hr.employee", employee_domain));
    steps.push(("hr.department", json!([["parent_id", "!=", false]])));

    if keep_menus {
        report.retained.push("menus".to_string());
    } else {
        steps.push(("ir.ui.menu", json!([["parent_id", "!=", false]])));
    }
    if keep_groups {
        report.retained.push("security groups".to_string());
    } else {
        steps.push(("res.groups", json!([["category_id", "!=", false]])));
    }

    for (model, domain) in steps {
        purge_step(
            client,
            &mut report,
            "deep_cleanup",
            model,
            domain,
            Action::Unlink,
            dry_run,
        )
        .await;
    }

    Ok(report)
}
