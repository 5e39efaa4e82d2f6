//! Status command

use super::Context;
use anyhow::Result;
use tabled::Tabled;
use visitgate_client::{VisitorApi, VisitorStatus};

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Field")]
    field: String,
    #[tabled(rename = "Value")]
    value: String,
}

fn rows(status: &VisitorStatus) -> Vec<StatusRow> {
    let mut rows = vec![StatusRow {
        field: "checked in".into(),
        value: if status.is_active { "yes" } else { "no" }.into(),
    }];
    rows.extend(
        status
            .text_fields()
            .into_iter()
            .map(|(field, value)| StatusRow { field, value }),
    );
    rows
}

pub async fn handle(
    ctx: &Context,
    company_id: Option<String>,
    label: &str,
    number: &str,
) -> Result<()> {
    let company_id = ctx.company_id(company_id)?;
    let status = ctx
        .api()?
        .visitor_status(&company_id, label, number)
        .await?
        .unwrap_or_else(VisitorStatus::inactive);
    ctx.format.print(&status, rows(&status));
    Ok(())
}
