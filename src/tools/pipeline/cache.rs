use crate::tools::types::ToolResult;
use std::collections::HashMap;
use std::sync::Mutex;

/// Result cache keyed on (tool name, argument fingerprint).
///
/// The pipeline stores successful results only; a hit short-circuits the
/// inner layers entirely.
#[derive(Debug, Default)]
pub struct ToolCache {
    map: Mutex<HashMap<(String, String), ToolResult>>,
}

impl ToolCache {
    pub fn new() -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, tool: &str, fingerprint: &str) -> Option<ToolResult> {
        self.lock()
            .get(&(tool.to_string(), fingerprint.to_string()))
            .cloned()
    }

    pub fn insert(&self, tool: &str, fingerprint: &str, result: ToolResult) {
        self.lock()
            .insert((tool.to_string(), fingerprint.to_string()), result);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), ToolResult>> {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
