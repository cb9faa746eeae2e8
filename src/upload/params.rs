//! Request parameters and endpoints, global or per file

use super::FileId;
use std::collections::{BTreeMap, HashMap};

pub type Params = BTreeMap<String, String>;

/// Parameter sets sent with each request.
///
/// A file with its own set uses it instead of the global one, not merged.
#[derive(Debug, Clone, Default)]
pub struct ParamsStore {
    global: Params,
    per_file: HashMap<FileId, Params>,
}

impl ParamsStore {
    pub fn new(global: Params) -> Self {
        Self {
            global,
            per_file: HashMap::new(),
        }
    }

    /// Replace the global set (`None`) or the set of one file
    pub fn set(&mut self, params: Params, id: Option<FileId>) {
        match id {
            Some(id) => {
                self.per_file.insert(id, params);
            }
            None => self.global = params,
        }
    }

    /// Copy of the parameters that apply to `id`
    pub fn get(&self, id: FileId) -> Params {
        self.per_file
            .get(&id)
            .unwrap_or(&self.global)
            .clone()
    }

    pub fn remove(&mut self, id: FileId) {
        self.per_file.remove(&id);
    }

    /// Forget per-file sets. The global set stays.
    pub fn reset(&mut self) {
        self.per_file.clear();
    }
}

/// Upload endpoints, global or per file
#[derive(Debug, Clone)]
pub struct EndpointStore {
    global: String,
    per_file: HashMap<FileId, String>,
}

impl EndpointStore {
    pub fn new(global: impl Into<String>) -> Self {
        Self {
            global: global.into(),
            per_file: HashMap::new(),
        }
    }

    pub fn set(&mut self, endpoint: impl Into<String>, id: Option<FileId>) {
        match id {
            Some(id) => {
                self.per_file.insert(id, endpoint.into());
            }
            None => self.global = endpoint.into(),
        }
    }

    pub fn get(&self, id: FileId) -> &str {
        self.per_file.get(&id).unwrap_or(&self.global)
    }

    pub fn remove(&mut self, id: FileId) {
        self.per_file.remove(&id);
    }

    pub fn reset(&mut self) {
        self.per_file.clear();
    }
}
