use basemirror::{FieldOrder, ViewData};
use serde_json::{json, Map, Value};

use super::host::FakeHost;
use super::ids;

pub const TASKS: &str = "tblTasks";
pub const GRID: &str = "viwGrid";
pub const BOARD: &str = "viwBoard";

pub const NAME: &str = "fldName";
pub const PRIORITY: &str = "fldPriority";
pub const STATUS: &str = "fldStatus";
pub const TOTAL: &str = "fldTotal";

/// Base metadata with one table and no record data.
pub fn snapshot() -> Value {
    json!({
        "id": "appTest",
        "name": "Project tracker",
        "permissionLevel": "create",
        "currentUserId": "usrAda",
        "collaboratorsById": {
            "usrAda": {"id": "usrAda", "name": "Ada", "email": "ada@example.com"},
            "usrBob": {"id": "usrBob", "name": "Bob", "email": "bob@example.com"}
        },
        "activeCollaboratorIds": ["usrAda"],
        "tableOrder": [TASKS],
        "tablesById": {
            TASKS: {
                "id": TASKS,
                "name": "Tasks",
                "primaryFieldId": NAME,
                "fieldsById": {
                    NAME: {"id": NAME, "name": "Name", "type": "singleLineText"},
                    PRIORITY: {"id": PRIORITY, "name": "Priority", "type": "number"},
                    STATUS: {
                        "id": STATUS,
                        "name": "Status",
                        "type": "singleSelect",
                        "options": {"choices": [
                            {"name": "Todo", "color": "blue"},
                            {"name": "Done", "color": "green"}
                        ]}
                    },
                    TOTAL: {"id": TOTAL, "name": "Total", "type": "formula"}
                },
                "viewOrder": [GRID, BOARD],
                "viewsById": {
                    GRID: {"id": GRID, "name": "Grid", "type": "grid"},
                    BOARD: {"id": BOARD, "name": "Board", "type": "kanban", "isLocked": true}
                }
            }
        }
    })
}

pub fn record(id: &str, name: &str, priority: i64, status: &str) -> Value {
    json!({
        "id": id,
        "commentCount": 0,
        "cellValuesByFieldId": {
            NAME: name,
            PRIORITY: priority,
            STATUS: {"name": status, "color": if status == "Done" { "green" } else { "blue" }}
        }
    })
}

/// recA (3), recB (1), recC (2), inserted in that order.
pub fn records() -> Value {
    json!({
        "recA": record("recA", "Write report", 3, "Todo"),
        "recB": record("recB", "Book venue", 1, "Done"),
        "recC": record("recC", "Call caterer", 2, "Todo")
    })
}

pub fn grid_data() -> ViewData {
    let mut colors = Map::new();
    colors.insert("recA".to_string(), json!("red"));
    colors.insert("recC".to_string(), json!("yellow"));
    ViewData {
        visible_record_ids: ids(&["recC", "recA"]),
        field_order: FieldOrder {
            field_ids: ids(&[NAME, STATUS, PRIORITY, TOTAL]),
            visible_field_count: 2,
        },
        colors_by_record_id: Some(colors),
    }
}

/// The standard host: fixture metadata, three records, grid view data.
pub fn host() -> FakeHost {
    FakeHost::new(snapshot())
        .with_records(TASKS, records())
        .with_view_data(GRID, grid_data())
}
