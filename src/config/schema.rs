use crate::tls::{LeafKeyAlgorithm, SignerOptions, DEFAULT_ORGANIZATION};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Directory holding `*.conf` ACL files and `*.passwd` user files
    pub policy_dir: PathBuf,
    pub ca: CaConfig,
    #[serde(default)]
    pub signer: SignerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerConfig {
    /// Subject organization written into issued leaves
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default)]
    pub leaf_key: LeafKeyAlgorithm,
    #[serde(default = "default_not_before")]
    pub not_before: NaiveDate,
    #[serde(default = "default_not_after")]
    pub not_after: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_organization() -> String {
    DEFAULT_ORGANIZATION.to_string()
}

fn default_not_before() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn default_not_after() -> NaiveDate {
    NaiveDate::from_ymd_opt(2049, 12, 31).unwrap_or_default()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            organization: default_organization(),
            leaf_key: LeafKeyAlgorithm::default(),
            not_before: default_not_before(),
            not_after: default_not_after(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl SignerConfig {
    pub fn to_options(&self) -> SignerOptions {
        SignerOptions {
            organization: self.organization.clone(),
            leaf_key: self.leaf_key,
            not_before: to_datetime(self.not_before),
            not_after: to_datetime(self.not_after),
        }
    }
}

fn to_datetime(date: NaiveDate) -> time::OffsetDateTime {
    rcgen::date_time_ymd(date.year(), date.month() as u8, date.day() as u8)
}
