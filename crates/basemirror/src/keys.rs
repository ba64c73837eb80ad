//! Closed sets of watch keys, one enum per watchable type.
//!
//! Every key has a stable string form (`"recordIds"`,
//! `"cellValuesInField:fldX"`) so string-keyed callers can go through
//! [`FromStr`]; a parse failure is the invalid-key case.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown watch key '{0}'")]
pub struct UnknownWatchKey(pub String);

/// Bound shared by every watch key enum.
pub trait WatchKey: Clone + Eq + Hash + fmt::Debug + fmt::Display + FromStr {}

impl<T> WatchKey for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + FromStr {}

macro_rules! watch_keys {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $text:literal),+
            $(; field $field_variant:ident => $prefix:literal)?
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            $($field_variant(String),)?
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    $($name::$variant => f.write_str($text),)+
                    $($name::$field_variant(id) => write!(f, "{}:{}", $prefix, id),)?
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownWatchKey;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => return Ok($name::$variant),)+
                    _ => {}
                }
                $(
                    if let Some(id) = s.strip_prefix(concat!($prefix, ":")) {
                        if !id.is_empty() {
                            return Ok($name::$field_variant(id.to_string()));
                        }
                    }
                )?
                Err(UnknownWatchKey(s.to_string()))
            }
        }

        $(
            impl $name {
                /// Field id of a field-scoped key.
                pub fn field_id(&self) -> Option<&str> {
                    match self {
                        $name::$field_variant(id) => Some(id),
                        _ => None,
                    }
                }
            }
        )?
    };
}

watch_keys! {
    BaseKey {
        Name => "name",
        PermissionLevel => "permissionLevel",
        Tables => "tables",
        Collaborators => "collaborators",
        Schema => "schema",
    }
}

watch_keys! {
    SessionKey {
        CurrentUser => "currentUser",
        PermissionLevel => "permissionLevel",
    }
}

watch_keys! {
    TableKey {
        Name => "name",
        Description => "description",
        PrimaryField => "primaryField",
        Fields => "fields",
        Views => "views",
        Schema => "schema",
    }
}

watch_keys! {
    ViewKey {
        Name => "name",
        Type => "type",
        IsLocked => "isLocked",
    }
}

watch_keys! {
    FieldKey {
        Name => "name",
        Type => "type",
        Options => "options",
        Description => "description",
        IsComputed => "isComputed",
    }
}

watch_keys! {
    RecordKey {
        Name => "name",
        CellValues => "cellValues",
        CommentCount => "commentCount";
        field CellValuesInField => "cellValuesInField",
    }
}

watch_keys! {
    RecordStoreKey {
        Records => "records",
        RecordIds => "recordIds",
        CellValues => "cellValues";
        field CellValuesInField => "cellValuesInField",
    }
}

watch_keys! {
    ViewDataKey {
        VisibleRecordIds => "visibleRecordIds",
        RecordColors => "recordColors",
        AllFieldIds => "allFieldIds",
        VisibleFieldIds => "visibleFieldIds",
    }
}

watch_keys! {
    RecordQueryKey {
        RecordIds => "recordIds",
        CellValues => "cellValues",
        RecordColors => "recordColors";
        field CellValuesInField => "cellValuesInField",
    }
}

watch_keys! {
    ViewMetadataKey {
        AllFields => "allFields",
        VisibleFields => "visibleFields",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_keys_round_trip() {
        for key in [TableKey::Name, TableKey::PrimaryField, TableKey::Schema] {
            assert_eq!(key.to_string().parse::<TableKey>(), Ok(key));
        }
        assert_eq!("isLocked".parse::<ViewKey>(), Ok(ViewKey::IsLocked));
    }

    #[test]
    fn test_field_scoped_key() {
        let key: RecordQueryKey = "cellValuesInField:fldAbc".parse().unwrap();
        assert_eq!(key, RecordQueryKey::CellValuesInField("fldAbc".to_string()));
        assert_eq!(key.field_id(), Some("fldAbc"));
        assert_eq!(key.to_string(), "cellValuesInField:fldAbc");
        assert_eq!(RecordQueryKey::RecordIds.field_id(), None);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert_eq!(
            "recordIds".parse::<ViewKey>(),
            Err(UnknownWatchKey("recordIds".to_string()))
        );
        assert!("cellValuesInField:".parse::<RecordKey>().is_err());
        assert!("cellValuesInField:fld1".parse::<ViewDataKey>().is_err());
    }
}
