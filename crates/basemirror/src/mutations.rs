//! Record mutations: validate, check permission, apply optimistically, send.
//!
//! A mutation that passes validation and the host's permission check is
//! written into the local snapshot at once (for data that is loaded) and then
//! handed to the host. Failure of the remote write is reported through the
//! returned [`MutationCompletion`]; the optimistic state is left in place.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::LocalBoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::dispatcher::ModelUpdate;
use crate::error::{Error, HostError, ModelKind, Result};
use crate::host::PermissionCheckResult;
use crate::models::{ModelNode, Table};

const DEFAULT_DENIED_REASON: &str = "You do not have permission to perform this action";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordCellValues {
    pub id: String,
    pub cell_values_by_field_id: Map<String, Value>,
}

/// A write to a table's records, as sent to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Mutation {
    SetMultipleRecordsCellValues {
        table_id: String,
        records: Vec<RecordCellValues>,
    },
    CreateMultipleRecords {
        table_id: String,
        records: Vec<RecordCellValues>,
    },
    DeleteMultipleRecords {
        table_id: String,
        record_ids: Vec<String>,
    },
}

impl Mutation {
    pub fn table_id(&self) -> &str {
        match self {
            Mutation::SetMultipleRecordsCellValues { table_id, .. }
            | Mutation::CreateMultipleRecords { table_id, .. }
            | Mutation::DeleteMultipleRecords { table_id, .. } => table_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialRecordCellValues {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_values_by_field_id: Option<Map<String, Value>>,
}

/// A mutation whose details may be unknown, for asking "could I?" before
/// the user has decided what to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum PartialMutation {
    SetMultipleRecordsCellValues {
        table_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        records: Option<Vec<PartialRecordCellValues>>,
    },
    CreateMultipleRecords {
        table_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        records: Option<Vec<PartialRecordCellValues>>,
    },
    DeleteMultipleRecords {
        table_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record_ids: Option<Vec<String>>,
    },
}

impl From<&RecordCellValues> for PartialRecordCellValues {
    fn from(record: &RecordCellValues) -> Self {
        Self {
            id: Some(record.id.clone()),
            cell_values_by_field_id: Some(record.cell_values_by_field_id.clone()),
        }
    }
}

impl From<&Mutation> for PartialMutation {
    fn from(mutation: &Mutation) -> Self {
        match mutation {
            Mutation::SetMultipleRecordsCellValues { table_id, records } => {
                PartialMutation::SetMultipleRecordsCellValues {
                    table_id: table_id.clone(),
                    records: Some(records.iter().map(Into::into).collect()),
                }
            }
            Mutation::CreateMultipleRecords { table_id, records } => {
                PartialMutation::CreateMultipleRecords {
                    table_id: table_id.clone(),
                    records: Some(records.iter().map(Into::into).collect()),
                }
            }
            Mutation::DeleteMultipleRecords {
                table_id,
                record_ids,
            } => PartialMutation::DeleteMultipleRecords {
                table_id: table_id.clone(),
                record_ids: Some(record_ids.clone()),
            },
        }
    }
}

/// A remote write the host rejected. Carries the mutation so a caller can
/// compensate.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("WRITE_FAILED: {error}")]
pub struct WriteFailure {
    pub mutation: Mutation,
    pub error: HostError,
}

/// Resolves when the host has accepted or rejected the write.
///
/// The local snapshot already reflects the mutation by the time this is
/// returned, so awaiting it is optional.
pub struct MutationCompletion {
    mutation: Mutation,
    write: LocalBoxFuture<'static, Result<(), HostError>>,
}

impl std::fmt::Debug for MutationCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationCompletion")
            .field("mutation", &self.mutation)
            .finish_non_exhaustive()
    }
}

impl MutationCompletion {
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    /// Ids assigned to records created by this mutation.
    pub fn created_record_ids(&self) -> Vec<String> {
        match &self.mutation {
            Mutation::CreateMultipleRecords { records, .. } => {
                records.iter().map(|record| record.id.clone()).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Future for MutationCompletion {
    type Output = Result<(), WriteFailure>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match this.write.as_mut().poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(error)) => {
                warn!(table_id = %this.mutation.table_id(), %error, "remote write failed");
                Poll::Ready(Err(WriteFailure {
                    mutation: this.mutation.clone(),
                    error,
                }))
            }
        }
    }
}

pub(crate) fn apply_mutation(table: &Table, mutation: Mutation) -> Result<MutationCompletion> {
    let partial = PartialMutation::from(&mutation);
    validate(table, &partial)?;
    let core = table.core();
    let permission = core.host.check_permission(&partial);
    if !permission.has_permission {
        return Err(Error::Permission {
            reason: permission
                .reason_display_string
                .unwrap_or_else(|| DEFAULT_DENIED_REASON.to_string()),
        });
    }

    let updates = optimistic_updates(table, &mutation);
    if !updates.is_empty() {
        debug!(table_id = %table.id(), updates = updates.len(), "applying optimistic updates");
        core.dispatcher.apply(&updates);
    }
    let write = core.host.write(&mutation);
    Ok(MutationCompletion { mutation, write })
}

pub(crate) fn check_permissions(table: &Table, mutation: &PartialMutation) -> PermissionCheckResult {
    if let Err(err) = validate(table, mutation) {
        let reason = err
            .display_reason()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        return PermissionCheckResult::denied(reason);
    }
    table.core().host.check_permission(mutation)
}

fn validate(table: &Table, mutation: &PartialMutation) -> Result<()> {
    if table.is_deleted() {
        return Err(Error::deleted(ModelKind::Table, table.id()));
    }
    match mutation {
        PartialMutation::SetMultipleRecordsCellValues { records, .. } => {
            let Some(records) = records else {
                return Ok(());
            };
            check_batch_size(table, records.len())?;
            for record in records {
                if let Some(id) = &record.id {
                    check_record_exists(table, id)?;
                }
                if let Some(cells) = &record.cell_values_by_field_id {
                    validate_cells(table, cells)?;
                }
            }
        }
        PartialMutation::CreateMultipleRecords { records, .. } => {
            let Some(records) = records else {
                return Ok(());
            };
            check_batch_size(table, records.len())?;
            for cells in records.iter().filter_map(|r| r.cell_values_by_field_id.as_ref()) {
                validate_cells(table, cells)?;
            }
        }
        PartialMutation::DeleteMultipleRecords { record_ids, .. } => {
            let Some(record_ids) = record_ids else {
                return Ok(());
            };
            check_batch_size(table, record_ids.len())?;
            for id in record_ids {
                check_record_exists(table, id)?;
            }
        }
    }
    Ok(())
}

fn check_batch_size(table: &Table, count: usize) -> Result<()> {
    let max = table.core().config.max_records_per_mutation;
    if count > max {
        return Err(Error::validation(format!(
            "Request exceeds maximum batch size limit of {max} records"
        )));
    }
    Ok(())
}

/// Existence can only be checked once record data is local.
fn check_record_exists(table: &Table, record_id: &str) -> Result<()> {
    if table.is_record_data_loaded() && !table.record_store().has_record(record_id) {
        return Err(Error::validation(format!(
            "Record {record_id} does not exist in table {}",
            table.id()
        )));
    }
    Ok(())
}

fn validate_cells(table: &Table, cells: &Map<String, Value>) -> Result<()> {
    let types = &table.core().types;
    for (field_id, value) in cells {
        let field = table.get_field_by_id_if_exists(field_id).ok_or_else(|| {
            Error::validation(format!(
                "Field {field_id} does not exist in table {}",
                table.id()
            ))
        })?;
        let field_type = field.field_type()?;
        if types.is_computed(&field_type) {
            return Err(Error::validation(format!(
                "Field '{}' is computed and cannot be set",
                field.name()?
            )));
        }
        let options = field.options()?;
        types
            .validate_cell_value_for_update(&field_type, options.as_ref(), value)
            .map_err(|reason| {
                Error::validation(format!("Field '{}': {reason}", field.name().unwrap_or_default()))
            })?;
    }
    Ok(())
}

/// Snapshot writes for the parts of `mutation` that are loaded locally.
fn optimistic_updates(table: &Table, mutation: &Mutation) -> Vec<ModelUpdate> {
    let store = table.record_store();
    let record_path = |record_id: &str| -> Vec<String> {
        vec![
            "tablesById".to_string(),
            table.id().to_string(),
            "recordsById".to_string(),
            record_id.to_string(),
        ]
    };
    let mut updates = Vec::new();
    match mutation {
        Mutation::SetMultipleRecordsCellValues { records, .. } => {
            for record in records {
                if !store.has_record(&record.id) {
                    continue;
                }
                for (field_id, value) in &record.cell_values_by_field_id {
                    if !store.is_field_loaded(field_id) {
                        continue;
                    }
                    let mut path = record_path(&record.id);
                    path.push("cellValuesByFieldId".to_string());
                    path.push(field_id.clone());
                    let value = (!value.is_null()).then(|| value.clone());
                    updates.push(ModelUpdate::new(path, value));
                }
            }
        }
        Mutation::CreateMultipleRecords { records, .. } => {
            if !table.is_record_data_loaded() {
                return updates;
            }
            for record in records {
                let cells: Map<String, Value> = record
                    .cell_values_by_field_id
                    .iter()
                    .filter(|(_, value)| !value.is_null())
                    .map(|(field_id, value)| (field_id.clone(), value.clone()))
                    .collect();
                updates.push(ModelUpdate::set_at(
                    &record_path(&record.id),
                    json!({
                        "id": record.id,
                        "cellValuesByFieldId": cells,
                        "commentCount": 0,
                    }),
                ));
            }
        }
        Mutation::DeleteMultipleRecords { record_ids, .. } => {
            for record_id in record_ids {
                if store.has_record(record_id) {
                    updates.push(ModelUpdate::delete_at(&record_path(record_id)));
                }
            }
        }
    }
    updates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutation_wire_shape() {
        let mutation = Mutation::SetMultipleRecordsCellValues {
            table_id: "tbl1".to_string(),
            records: vec![RecordCellValues {
                id: "recA".to_string(),
                cell_values_by_field_id: json!({"fld1": 5}).as_object().cloned().unwrap(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&mutation).unwrap(),
            json!({
                "type": "setMultipleRecordsCellValues",
                "tableId": "tbl1",
                "records": [{"id": "recA", "cellValuesByFieldId": {"fld1": 5}}]
            })
        );
    }

    #[test]
    fn test_partial_from_full() {
        let mutation = Mutation::DeleteMultipleRecords {
            table_id: "tbl1".to_string(),
            record_ids: vec!["recA".to_string()],
        };
        let partial = PartialMutation::from(&mutation);
        assert_eq!(
            serde_json::to_value(&partial).unwrap(),
            json!({"type": "deleteMultipleRecords", "tableId": "tbl1", "recordIds": ["recA"]})
        );
        let unknown = PartialMutation::CreateMultipleRecords {
            table_id: "tbl1".to_string(),
            records: None,
        };
        assert_eq!(
            serde_json::to_value(&unknown).unwrap(),
            json!({"type": "createMultipleRecords", "tableId": "tbl1"})
        );
    }

    #[test]
    fn test_write_failure_message() {
        let failure = WriteFailure {
            mutation: Mutation::DeleteMultipleRecords {
                table_id: "tbl1".to_string(),
                record_ids: vec![],
            },
            error: HostError::new("offline"),
        };
        assert_eq!(failure.to_string(), "WRITE_FAILED: HOST_ERROR: offline");
    }

    #[test]
    fn test_completion_reports_failure() {
        let mutation = Mutation::DeleteMultipleRecords {
            table_id: "tbl1".to_string(),
            record_ids: vec!["recA".to_string()],
        };
        let completion = MutationCompletion {
            mutation: mutation.clone(),
            write: Box::pin(async { Err(HostError::new("rejected")) }),
        };
        let failure = futures::executor::block_on(completion).unwrap_err();
        assert_eq!(failure.mutation, mutation);
        assert_eq!(failure.error, HostError::new("rejected"));
    }
}
