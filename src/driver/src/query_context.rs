// Copyright 2025 Snowflake Computing Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-session query context cache.
//!
//! The server hands back opaque context entries with every response and
//! expects them echoed on the next request; they let it route follow-up
//! statements to warm state. The cache is bounded: entries keep their
//! server-assigned priority and the lowest-priority entries fall off.

use std::sync::Mutex;

const DEFAULT_CAPACITY: usize = 5;

/// A bounded, opaque map the server asks the driver to round-trip.
#[derive(Debug)]
pub struct QueryContextCache {
    entries: Mutex<Vec<serde_json::Value>>,
    capacity: usize,
    disabled: bool,
}

impl QueryContextCache {
    pub fn new(disabled: bool) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            capacity: DEFAULT_CAPACITY,
            disabled,
        }
    }

    /// Absorbs the `queryContext` object of a response.
    pub fn update(&self, context: Option<&serde_json::Value>) {
        if self.disabled {
            return;
        }
        let Some(incoming) = context.and_then(|c| c.get("entries")).and_then(|e| e.as_array())
        else {
            return;
        };
        let mut entries = self.entries.lock().expect("query context lock is poisoned");
        *entries = incoming.clone();
        entries.sort_by_key(|e| e.get("priority").and_then(|p| p.as_i64()).unwrap_or(i64::MAX));
        entries.truncate(self.capacity);
    }

    /// The `queryContextDTO` to attach to the next request.
    pub fn dto(&self) -> Option<serde_json::Value> {
        if self.disabled {
            return None;
        }
        let entries = self.entries.lock().expect("query context lock is poisoned");
        if entries.is_empty() {
            return None;
        }
        Some(serde_json::json!({ "entries": entries.clone() }))
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .expect("query context lock is poisoned")
            .clear();
    }
}
