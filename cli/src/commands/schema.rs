//! Schema command

use super::Context;
use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;
use visitgate_client::schema::SchemaLoader;
use visitgate_client::{CompanyInfo, FieldDefinition};

#[derive(Debug, Serialize)]
struct SchemaView {
    company_id: String,
    company: Option<CompanyInfo>,
    logo_url: Option<String>,
    fields: Vec<FieldDefinition>,
}

#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "Pos")]
    position: i64,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Type")]
    field_type: &'static str,
    #[tabled(rename = "Length")]
    bounds: String,
    #[tabled(rename = "OTP")]
    otp: &'static str,
}

impl From<&FieldDefinition> for FieldRow {
    fn from(field: &FieldDefinition) -> Self {
        Self {
            position: field.position,
            label: field.label.clone(),
            field_type: field.field_type.as_str(),
            bounds: field
                .input_bounds()
                .map(|b| format!("{}-{}", b.min, b.max))
                .unwrap_or_else(|| "-".into()),
            otp: if field.otp_required { "yes" } else { "" },
        }
    }
}

pub async fn handle(ctx: &Context, company_id: Option<String>) -> Result<()> {
    let company_id = ctx.company_id(company_id)?;
    let loader = SchemaLoader::new(Arc::new(ctx.api()?));
    let schema = loader.load(&company_id).await;
    if schema.is_not_found() {
        bail!("Form not found for company {}", company_id);
    }

    let logo_url = schema
        .company
        .as_ref()
        .and_then(|c| c.logo_url(&ctx.client.api_url));
    let rows: Vec<FieldRow> = schema.fields.iter().map(FieldRow::from).collect();
    let view = SchemaView {
        company_id,
        company: schema.company,
        logo_url,
        fields: schema.fields,
    };

    if rows.is_empty() && ctx.format == crate::output::OutputFormat::Table {
        println!("No custom fields configured yet.");
        return Ok(());
    }
    ctx.format.print(&view, rows);
    Ok(())
}
