// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backup repository storage types.

use std::fmt;

use opflow_core::CoreError;

/// Where a pgBackRest repository lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageType {
    Local,
    S3,
}

impl StorageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "local" => Some(Self::Local),
            "s3" => Some(Self::S3),
            _ => None,
        }
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a comma-separated list. An empty list means local only.
pub fn parse_storage_types(raw: &str) -> Result<Vec<StorageType>, CoreError> {
    let mut types = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let storage = StorageType::parse(part).ok_or_else(|| {
            CoreError::precondition(format!(
                "\"{}\" is not a valid storage type, choose from \"local\" or \"s3\"",
                part
            ))
        })?;
        if !types.contains(&storage) {
            types.push(storage);
        }
    }
    if types.is_empty() {
        types.push(StorageType::Local);
    }
    Ok(types)
}

/// Check a requested storage type against what the cluster was provisioned with.
///
/// An empty request uses the cluster's setting. When `single` is set the
/// request may name only one storage type, as restores and clones do.
/// Returns the storage types to use, comma-joined.
pub fn validate_storage_request(
    requested: &str,
    cluster_setting: &str,
    single: bool,
) -> Result<String, CoreError> {
    let enabled = parse_storage_types(cluster_setting)?;

    if requested.trim().is_empty() {
        if single && enabled.len() > 1 {
            // multi-repository clusters restore from their first repository
            return Ok(enabled[0].to_string());
        }
        return Ok(join(&enabled));
    }

    let wanted = parse_storage_types(requested)?;
    if single && wanted.len() > 1 {
        return Err(CoreError::precondition(
            "you must select only one storage type for this operation",
        ));
    }
    for storage in &wanted {
        if !enabled.contains(storage) {
            return Err(CoreError::precondition(format!(
                "storage type \"{}\" is not enabled for this cluster (enabled: {})",
                storage,
                join(&enabled)
            )));
        }
    }
    Ok(join(&wanted))
}

fn join(types: &[StorageType]) -> String {
    types
        .iter()
        .map(StorageType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use opflow_core::ErrorCategory;

    #[test]
    fn test_empty_setting_means_local() {
        assert_eq!(parse_storage_types("").unwrap(), vec![StorageType::Local]);
        assert_eq!(validate_storage_request("", "", false).unwrap(), "local");
        assert_eq!(validate_storage_request("local", "", true).unwrap(), "local");
    }

    #[test]
    fn test_s3_rejected_when_not_provisioned() {
        let err = validate_storage_request("s3", "local", false).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::PreconditionFailed);
        assert!(err.to_string().contains("not enabled"));
    }

    #[test]
    fn test_backup_may_use_several() {
        assert_eq!(
            validate_storage_request("local,s3", "s3,local", false).unwrap(),
            "local,s3"
        );
    }

    #[test]
    fn test_restore_must_use_one() {
        let err = validate_storage_request("local,s3", "local,s3", true).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::PreconditionFailed);
        assert_eq!(validate_storage_request("", "s3,local", true).unwrap(), "s3");
    }

    #[test]
    fn test_unknown_type() {
        let err = validate_storage_request("gcs", "local", false).unwrap_err();
        assert!(err.to_string().contains("not a valid storage type"));
    }
}
