use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};

use crate::inference::Label;
use crate::sensing::{Method, ScanCase};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn optional_u64(value: Option<i64>, field: &str) -> Result<Option<u64>> {
    value.map(|raw| to_u64(raw, field)).transpose()
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_label(value: &str) -> Result<Label> {
    match value {
        "benign" => Ok(Label::Benign),
        "malicious" => Ok(Label::Malicious),
        "error" => Ok(Label::Error),
        other => Err(anyhow!("unknown label {other}")),
    }
}

pub fn parse_method(value: &str) -> Result<Method> {
    match value {
        "whitelist" => Ok(Method::Whitelist),
        "model" => Ok(Method::Model),
        "user_override" => Ok(Method::UserOverride),
        other => Err(anyhow!("unknown classification method {other}")),
    }
}

pub fn parse_case(value: &str) -> Result<ScanCase> {
    match value {
        "whitelisted" => Ok(ScanCase::Whitelisted),
        "no_prior_hash" => Ok(ScanCase::NoPriorHash),
        "hash_changed" => Ok(ScanCase::HashChanged),
        "hash_stable" => Ok(ScanCase::HashStable),
        other => Err(anyhow!("unknown scan case {other}")),
    }
}
