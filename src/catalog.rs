//! Provisioning steps as data.
//!
//! The built-in catalog bootstraps a Canadian (HST 13%, CAD) subcontracting
//! tenant. Custom catalogs use the same JSON schema. String values may
//! contain `{company}`, substituted when the catalog is rendered.
use crate::gateway::Verb;
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

pub const INSERT: &str = "frappe.client.insert";
pub const SAVE: &str = "frappe.client.save";
pub const GET_LIST: &str = "frappe.client.get_list";

const COMPANY_PLACEHOLDER: &str = "{company}";

/// One unit of provisioning work. Immutable once the catalog is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisioningStep {
    pub name: String,
    pub action: StepAction,
    pub on_success: String,
    pub on_failure: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    /// A single remote method call.
    Call {
        operation: String,
        #[serde(default = "default_verb")]
        verb: Verb,
        payload: Value,
    },
    /// Insert `payload` as `doc` unless a `doctype` record called `name`
    /// exists. Existing records are left untouched.
    Ensure {
        doctype: String,
        name: String,
        payload: Value,
    },
    /// Merge `fields` into the first `doctype` record and save it.
    /// Fails when the doctype has no records.
    UpdateFirst { doctype: String, fields: Value },
}

fn default_verb() -> Verb {
    Verb::Post
}

/// The built-in catalog with `{company}` rendered.
pub fn builtin(company: &str) -> Vec<ProvisioningStep> {
    render(builtin_template(), company)
}

/// Load a JSON array of steps and render `{company}`.
pub fn load(path: &Path, company: &str) -> Result<Vec<ProvisioningStep>> {
    let bytes = fs::read(path).with_context(|| format!("read catalog {}", path.display()))?;
    let steps: Vec<ProvisioningStep> = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse catalog JSON {}", path.display()))?;
    validate(&steps).with_context(|| format!("invalid catalog {}", path.display()))?;
    Ok(render(steps, company))
}

/// Reject catalogs the runner cannot execute meaningfully.
pub fn validate(steps: &[ProvisioningStep]) -> Result<()> {
    if steps.is_empty() {
        return Err(anyhow!("catalog has no steps"));
    }
    let mut seen = BTreeSet::new();
    for (idx, step) in steps.iter().enumerate() {
        if step.name.trim().is_empty() {
            return Err(anyhow!("step {idx} has an empty name"));
        }
        if !seen.insert(step.name.as_str()) {
            return Err(anyhow!("duplicate step name {:?}", step.name));
        }
        match &step.action {
            StepAction::Call {
                operation, payload, ..
            } => {
                if operation.trim().is_empty() {
                    return Err(anyhow!("step {:?}: operation must be non-empty", step.name));
                }
                if !(payload.is_object() || payload.is_null()) {
                    return Err(anyhow!("step {:?}: payload must be an object", step.name));
                }
            }
            StepAction::Ensure {
                doctype,
                name,
                payload,
            } => {
                if doctype.trim().is_empty() || name.trim().is_empty() {
                    return Err(anyhow!(
                        "step {:?}: ensure needs doctype and name",
                        step.name
                    ));
                }
                if !payload.is_object() {
                    return Err(anyhow!("step {:?}: payload must be an object", step.name));
                }
            }
            StepAction::UpdateFirst { doctype, fields } => {
                if doctype.trim().is_empty() {
                    return Err(anyhow!("step {:?}: doctype must be non-empty", step.name));
                }
                if !fields.is_object() {
                    return Err(anyhow!("step {:?}: fields must be an object", step.name));
                }
            }
        }
    }
    Ok(())
}

/// Substitute `{company}` in every string of every step.
pub fn render(steps: Vec<ProvisioningStep>, company: &str) -> Vec<ProvisioningStep> {
    steps
        .into_iter()
        .map(|mut step| {
            step.name = step.name.replace(COMPANY_PLACEHOLDER, company);
            step.on_success = step.on_success.replace(COMPANY_PLACEHOLDER, company);
            step.on_failure = step.on_failure.replace(COMPANY_PLACEHOLDER, company);
            match &mut step.action {
                StepAction::Call { payload, .. } => substitute(payload, company),
                StepAction::Ensure { name, payload, .. } => {
                    *name = name.replace(COMPANY_PLACEHOLDER, company);
                    substitute(payload, company);
                }
                StepAction::UpdateFirst { fields, .. } => substitute(fields, company),
            }
            step
        })
        .collect()
}

fn substitute(value: &mut Value, company: &str) {
    match value {
        Value::String(text) if text.contains(COMPANY_PLACEHOLDER) => {
            *text = text.replace(COMPANY_PLACEHOLDER, company);
        }
        Value::Array(items) => items.iter_mut().for_each(|item| substitute(item, company)),
        Value::Object(map) => map
            .values_mut()
            .for_each(|item| substitute(item, company)),
        _ => {}
    }
}

/// An insert step; the server reads the new record from `doc`.
fn insert(name: String, on_success: String, on_failure: String, doc: Value) -> ProvisioningStep {
    ProvisioningStep {
        name,
        action: StepAction::Call {
            operation: INSERT.to_string(),
            verb: Verb::Post,
            payload: json!({ "doc": doc }),
        },
        on_success,
        on_failure,
    }
}

fn builtin_template() -> Vec<ProvisioningStep> {
    let mut steps = vec![ProvisioningStep {
        name: "company settings".to_string(),
        action: StepAction::UpdateFirst {
            doctype: "Company".to_string(),
            fields: json!({
                "country": "Canada",
                "time_zone": "America/Vancouver",
                "default_currency": "CAD",
                "currency": "CAD",
                "date_format": "dd-mm-yyyy",
                "time_format": "12 Hour",
                "number_format": "1,234.56"
            }),
        },
        on_success: "Company settings updated for Canada/PST/CAD".to_string(),
        on_failure: "Failed to update company settings".to_string(),
    }];

    for currency in ["USD", "GBP", "EUR"] {
        steps.push(ProvisioningStep {
            name: format!("currency: {currency}"),
            action: StepAction::Ensure {
                doctype: "Currency".to_string(),
                name: currency.to_string(),
                payload: json!({
                    "doctype": "Currency",
                    "currency_name": currency,
                    "enabled": 1
                }),
            },
            on_success: format!("Currency ready: {currency}"),
            on_failure: format!("Failed to create currency: {currency}"),
        });
    }

    for (kind, title) in [("Sales", "HST 13%"), ("Purchase", "HST 13% Purchase")] {
        steps.push(insert(
            format!("tax template: {title}"),
            format!("Created {title} {} tax template", kind.to_lowercase()),
            format!("Failed to create {} tax template", kind.to_lowercase()),
            json!({
                "doctype": format!("{kind} Taxes and Charges Template"),
                "title": title,
                "is_default": 1,
                "company": COMPANY_PLACEHOLDER,
                "taxes": [{
                    "doctype": format!("{kind} Taxes and Charges"),
                    "charge_type": "On Net Total",
                    "account_head": "HST - {company}",
                    "rate": 13.0,
                    "description": "Harmonized Sales Tax 13%"
                }]
            }),
        ));
    }

    for (label, warehouse_type) in [
        ("Raw Materials", "Raw Material"),
        ("Finished Goods", "Finished Goods"),
        ("Vendor", "Vendor"),
    ] {
        let warehouse = format!("{label} - {COMPANY_PLACEHOLDER}");
        steps.push(insert(
            format!("warehouse: {warehouse}"),
            format!("Created warehouse: {warehouse}"),
            format!("Failed to create warehouse: {warehouse}"),
            json!({
                "doctype": "Warehouse",
                "warehouse_name": warehouse,
                "warehouse_type": warehouse_type,
                "is_group": 0,
                "parent_warehouse": "All Warehouses - {company}"
            }),
        ));
    }

    for group in ["Raw Materials", "Finished Goods", "Subcontracted Items"] {
        steps.push(insert(
            format!("item group: {group}"),
            format!("Created item group: {group}"),
            format!("Failed to create item group: {group}"),
            json!({
                "doctype": "Item Group",
                "item_group_name": group,
                "is_group": 0,
                "parent_item_group": "All Item Groups"
            }),
        ));
    }

    for uom in ["Nos", "Kg", "Ltr", "Meter", "Box", "Set"] {
        steps.push(insert(
            format!("uom: {uom}"),
            format!("Created UOM: {uom}"),
            format!("Failed to create UOM: {uom}"),
            json!({
                "doctype": "UOM",
                "uom_name": uom,
                "must_be_whole_number": 0
            }),
        ));
    }

    let items = [
        json!({
            "doctype": "Item",
            "item_code": "RAW-001",
            "item_name": "Raw Material 1",
            "item_group": "Raw Materials",
            "stock_uom": "Nos",
            "is_stock_item": 1,
            "is_purchase_item": 1,
            "is_sales_item": 0
        }),
        json!({
            "doctype": "Item",
            "item_code": "FG-001",
            "item_name": "Finished Good 1",
            "item_group": "Finished Goods",
            "stock_uom": "Nos",
            "is_stock_item": 1,
            "is_purchase_item": 0,
            "is_sales_item": 1,
            "is_sub_contracted_item": 1
        }),
    ];
    for item in items {
        let code = item["item_code"].as_str().unwrap_or_default().to_string();
        steps.push(insert(
            format!("item: {code}"),
            format!("Created item: {code}"),
            format!("Failed to create item: {code}"),
            item,
        ));
    }

    steps.push(insert(
        "bom: FG-001".to_string(),
        "Created sample BOM for subcontracting".to_string(),
        "Failed to create sample BOM".to_string(),
        json!({
            "doctype": "BOM",
            "item": "FG-001",
            "item_name": "Finished Good 1",
            "is_active": 1,
            "is_default": 1,
            "with_operations": 0,
            "items": [{
                "doctype": "BOM Item",
                "item_code": "RAW-001",
                "qty": 2.0,
                "rate": 10.0
            }]
        }),
    ));

    steps
}
