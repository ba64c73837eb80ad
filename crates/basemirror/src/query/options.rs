use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Field, Table, View};

/// A field given by id, by name, or by either (id first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldRef {
    Id(String),
    Name(String),
    IdOrName(String),
}

impl FieldRef {
    fn label(&self) -> &str {
        match self {
            FieldRef::Id(s) | FieldRef::Name(s) | FieldRef::IdOrName(s) => s,
        }
    }
}

impl From<&str> for FieldRef {
    fn from(value: &str) -> Self {
        FieldRef::IdOrName(value.to_string())
    }
}

impl From<String> for FieldRef {
    fn from(value: String) -> Self {
        FieldRef::IdOrName(value)
    }
}

impl From<&Field> for FieldRef {
    fn from(field: &Field) -> Self {
        FieldRef::Id(field.id().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewRef {
    Id(String),
    Name(String),
    IdOrName(String),
}

impl ViewRef {
    fn label(&self) -> &str {
        match self {
            ViewRef::Id(s) | ViewRef::Name(s) | ViewRef::IdOrName(s) => s,
        }
    }
}

impl From<&str> for ViewRef {
    fn from(value: &str) -> Self {
        ViewRef::IdOrName(value.to_string())
    }
}

impl From<String> for ViewRef {
    fn from(value: String) -> Self {
        ViewRef::IdOrName(value)
    }
}

impl From<&View> for ViewRef {
    fn from(view: &View) -> Self {
        ViewRef::Id(view.id().to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: FieldRef,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: impl Into<FieldRef>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<FieldRef>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// How a query colors its records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RecordColorMode {
    #[default]
    None,
    /// The color of the record's choice in a single select field.
    BySelectField(FieldRef),
    /// The color a view assigns to the record.
    ByView(ViewRef),
}

/// What to select. Built with the chained setters:
///
/// ```
/// use basemirror::query::{RecordQueryOptions, SortSpec};
///
/// let options = RecordQueryOptions::new()
///     .fields(["Name", "Status"])
///     .sort(SortSpec::desc("Priority"));
/// assert_eq!(options.sorts.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQueryOptions {
    /// `None` selects every field.
    pub fields: Option<Vec<FieldRef>>,
    pub sorts: Vec<SortSpec>,
    pub record_color_mode: RecordColorMode,
}

impl RecordQueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, F>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = F>,
        F: Into<FieldRef>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn sorts(mut self, sorts: impl IntoIterator<Item = SortSpec>) -> Self {
        self.sorts = sorts.into_iter().collect();
        self
    }

    pub fn record_color_mode(mut self, mode: RecordColorMode) -> Self {
        self.record_color_mode = mode;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedSort {
    pub field_id: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NormalizedColorMode {
    None,
    BySelectField {
        #[serde(rename = "selectFieldId")]
        field_id: String,
    },
    ByView {
        #[serde(rename = "viewId")]
        view_id: String,
    },
}

/// Options with every reference resolved to an id. Two selects with equal
/// normalized options can share one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedQueryOptions {
    pub field_ids_or_null: Option<Vec<String>>,
    pub sorts: Vec<NormalizedSort>,
    pub record_color_mode: NormalizedColorMode,
}

impl NormalizedQueryOptions {
    /// Canonical string form, used as the pool fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|err| Error::InvalidOptions(err.to_string()))
    }

    pub fn sort_field_ids(&self) -> impl Iterator<Item = &str> {
        self.sorts.iter().map(|sort| sort.field_id.as_str())
    }

    pub fn color_field_id(&self) -> Option<&str> {
        match &self.record_color_mode {
            NormalizedColorMode::BySelectField { field_id } => Some(field_id),
            _ => None,
        }
    }

    /// Fields whose data must be loaded: the projection plus anything sorts
    /// or coloring read. `None` means every field.
    pub fn fields_to_load(&self) -> Option<Vec<String>> {
        let mut ids = self.field_ids_or_null.clone()?;
        for id in self.sort_field_ids().chain(self.color_field_id()) {
            if !ids.iter().any(|existing| existing == id) {
                ids.push(id.to_string());
            }
        }
        Some(ids)
    }
}

pub(crate) fn normalize(
    table: &Table,
    options: &RecordQueryOptions,
) -> Result<NormalizedQueryOptions> {
    let resolve = |field: &FieldRef| {
        table
            .resolve_field(field)
            .map(|f| f.id().to_string())
            .ok_or_else(|| {
                Error::InvalidOptions(format!(
                    "no field matching '{}' in table {}",
                    field.label(),
                    table.id()
                ))
            })
    };

    let field_ids_or_null = match &options.fields {
        None => None,
        Some(fields) => {
            let mut ids: Vec<String> = Vec::with_capacity(fields.len());
            for field in fields {
                let id = resolve(field)?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            Some(ids)
        }
    };

    let sorts = options
        .sorts
        .iter()
        .map(|sort| {
            Ok(NormalizedSort {
                field_id: resolve(&sort.field)?,
                direction: sort.direction,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let record_color_mode = match &options.record_color_mode {
        RecordColorMode::None => NormalizedColorMode::None,
        RecordColorMode::BySelectField(field) => NormalizedColorMode::BySelectField {
            field_id: resolve(field)?,
        },
        RecordColorMode::ByView(view) => NormalizedColorMode::ByView {
            view_id: table
                .resolve_view(view)
                .map(|v| v.id().to_string())
                .ok_or_else(|| {
                    Error::InvalidOptions(format!(
                        "no view matching '{}' in table {}",
                        view.label(),
                        table.id()
                    ))
                })?,
        },
    };

    Ok(NormalizedQueryOptions {
        field_ids_or_null,
        sorts,
        record_color_mode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let options = RecordQueryOptions::new()
            .fields(["Name", "fldStatus"])
            .sort(SortSpec::asc("Priority"))
            .sort(SortSpec::desc(FieldRef::Id("fldDue".to_string())))
            .record_color_mode(RecordColorMode::BySelectField("Status".into()));
        assert_eq!(
            options.fields,
            Some(vec![
                FieldRef::IdOrName("Name".to_string()),
                FieldRef::IdOrName("fldStatus".to_string())
            ])
        );
        assert_eq!(options.sorts[1].direction, SortDirection::Desc);
    }

    #[test]
    fn test_fingerprint_is_canonical_json() {
        let normalized = NormalizedQueryOptions {
            field_ids_or_null: None,
            sorts: vec![NormalizedSort {
                field_id: "fld1".to_string(),
                direction: SortDirection::Desc,
            }],
            record_color_mode: NormalizedColorMode::ByView {
                view_id: "viw1".to_string(),
            },
        };
        assert_eq!(
            normalized.fingerprint().unwrap(),
            r#"{"fieldIdsOrNull":null,"sorts":[{"fieldId":"fld1","direction":"desc"}],"recordColorMode":{"type":"byView","viewId":"viw1"}}"#
        );
    }

    #[test]
    fn test_fields_to_load_adds_sort_and_color_fields() {
        let normalized = NormalizedQueryOptions {
            field_ids_or_null: Some(vec!["fld1".to_string()]),
            sorts: vec![NormalizedSort {
                field_id: "fld2".to_string(),
                direction: SortDirection::Asc,
            }],
            record_color_mode: NormalizedColorMode::BySelectField {
                field_id: "fld1".to_string(),
            },
        };
        assert_eq!(
            normalized.fields_to_load(),
            Some(vec!["fld1".to_string(), "fld2".to_string()])
        );
        let all = NormalizedQueryOptions {
            field_ids_or_null: None,
            ..normalized
        };
        assert_eq!(all.fields_to_load(), None);
    }
}
