use std::collections::HashMap;

use crate::{
    error::OakError,
    storage::schema::Schema,
    types::Pod,
    utils::HandyRwLock,
    BTreeTable,
};

/// Table registry: resolves a table id to the table object owning the
/// backing file.
pub struct Catalog {
    table_map: HashMap<u32, Pod<BTreeTable>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            table_map: HashMap::new(),
        }
    }

    pub fn add_table(&mut self, table: Pod<BTreeTable>) {
        let table_id = table.rl().get_id();
        self.table_map.insert(table_id, table);
    }

    pub fn get_table(&self, table_id: &u32) -> Result<Pod<BTreeTable>, OakError> {
        match self.table_map.get(table_id) {
            Some(pod) => Ok(pod.clone()),
            None => Err(OakError::invalid(&format!(
                "table {} not found in catalog",
                table_id
            ))),
        }
    }

    pub fn get_schema(&self, table_id: &u32) -> Result<Schema, OakError> {
        let table = self.get_table(table_id)?;
        let schema = table.rl().tuple_scheme.clone();
        Ok(schema)
    }

    pub fn clear(&mut self) {
        self.table_map.clear();
    }
}
