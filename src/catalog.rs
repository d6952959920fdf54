//! The catalog: maps table ids to their heap files and schemas, and loads
//! table definitions from a catalog file.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;

use crate::errors::{Error, Result};
use crate::heap_file::HeapFile;
use crate::tuple::{Column, FieldType, Schema};

#[derive(Default)]
struct CatalogInner {
    files: HashMap<u32, Arc<HeapFile>>,
    names: HashMap<u32, String>,
    primary_keys: HashMap<u32, String>,
    ids_by_name: HashMap<String, u32>,
}

/// The table registry. Name conflicts resolve last-wins: registering a
/// new table under an existing name drops the old table.
#[derive(Default)]
pub struct Catalog {
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table under `name`. `primary_key` may be empty.
    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) {
        let mut inner = self.inner.write();
        let table_id = file.id();
        let displaced = inner.ids_by_name.get(name).copied();
        if let Some(old_id) = displaced {
            if old_id != table_id {
                inner.files.remove(&old_id);
                inner.names.remove(&old_id);
                inner.primary_keys.remove(&old_id);
            }
        }
        inner.files.insert(table_id, file);
        inner.names.insert(table_id, name.to_string());
        inner.primary_keys.insert(table_id, primary_key.to_string());
        inner.ids_by_name.insert(name.to_string(), table_id);
    }

    pub fn table(&self, table_id: u32) -> Result<Arc<HeapFile>> {
        self.inner
            .read()
            .files
            .get(&table_id)
            .cloned()
            .ok_or(Error::NoSuchTable(table_id))
    }

    pub fn schema_of(&self, table_id: u32) -> Result<Arc<Schema>> {
        Ok(self.table(table_id)?.schema().clone())
    }

    pub fn table_id(&self, name: &str) -> Option<u32> {
        self.inner.read().ids_by_name.get(name).copied()
    }

    pub fn table_name(&self, table_id: u32) -> Option<String> {
        self.inner.read().names.get(&table_id).cloned()
    }

    pub fn primary_key(&self, table_id: u32) -> Option<String> {
        self.inner.read().primary_keys.get(&table_id).cloned()
    }

    pub fn table_ids(&self) -> Vec<u32> {
        self.inner.read().files.keys().copied().collect()
    }

    /// Loads table definitions from a catalog file, one per line:
    ///
    /// ```text
    /// name (field1 type1, field2 type2 pk, ...)
    /// ```
    ///
    /// with `type` one of `int`, `string`. Each table's data file is
    /// `<name>.dat` beside the catalog file. Returns the ids of the
    /// tables added.
    pub fn load_schema<P: AsRef<Path>>(&self, catalog_path: P) -> Result<Vec<u32>> {
        let catalog_path = catalog_path.as_ref();
        let base = catalog_path.parent().unwrap_or_else(|| Path::new("."));
        let text = fs::read_to_string(catalog_path)?;

        let mut added = Vec::new();
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let bad = |what: &str| Error::Schema(format!("line {}: {what}", lineno + 1));

            let (name, rest) = line.split_once('(').ok_or_else(|| bad("expected '('"))?;
            let name = name.trim();
            if name.is_empty() {
                return Err(bad("missing table name"));
            }
            let body = rest
                .trim()
                .strip_suffix(')')
                .ok_or_else(|| bad("expected ')'"))?;

            let mut columns = Vec::new();
            let mut primary_key = String::new();
            for field_def in body.split(',') {
                let parts: Vec<&str> = field_def.split_whitespace().collect();
                match parts.as_slice() {
                    [field, ty] => {
                        columns.push(Column::new(*field, FieldType::parse(&ty.to_lowercase())?));
                    }
                    [field, ty, pk] if pk.eq_ignore_ascii_case("pk") => {
                        columns.push(Column::new(*field, FieldType::parse(&ty.to_lowercase())?));
                        primary_key = (*field).to_string();
                    }
                    _ => return Err(bad(&format!("bad field definition '{}'", field_def.trim()))),
                }
            }
            if columns.is_empty() {
                return Err(bad("table has no fields"));
            }

            let file = HeapFile::open(
                base.join(format!("{name}.dat")),
                Arc::new(Schema::new(columns)),
            )?;
            let table_id = file.id();
            debug!("loaded table '{name}' (id {table_id}) with {} fields", file.schema().len());
            self.add_table(Arc::new(file), name, &primary_key);
            added.push(table_id);
        }
        Ok(added)
    }
}
