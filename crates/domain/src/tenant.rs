use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named isolation boundary. Every instance, run, usage record and audit
/// entry belongs to exactly one tenant partition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tenant {
    pub tenant_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Name of the logical partition (directory / database) for this tenant.
    pub partition: String,
    #[serde(default = "d_true")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Admin request to register a tenant.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NewTenant {
    pub tenant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

impl Tenant {
    pub fn from_request(req: NewTenant, partition_prefix: &str) -> Result<Self> {
        validate_id("tenant_id", &req.tenant_id)?;
        Ok(Self {
            partition: format!("{partition_prefix}{}", req.tenant_id),
            tenant_id: req.tenant_id,
            display_name: req.display_name,
            customer_name: req.customer_name,
            description: req.description,
            active: true,
            created_at: Utc::now(),
            created_by: req.created_by,
        })
    }
}

/// Identifiers double as path segments for partitions, so keep them to a
/// conservative character set.
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(Error::Validation(format!(
            "{field} must be 1..=128 characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        || id.starts_with('.')
    {
        return Err(Error::Validation(format!(
            "{field} may only contain ASCII letters, digits, '-', '_' and '.'"
        )));
    }
    Ok(())
}

fn d_true() -> bool {
    true
}
