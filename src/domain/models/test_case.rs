use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::address::Address;

/// A single test definition. Properties are injected into the workload and
/// are opaque here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: String,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl TestCase {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// The set of tests run together in one coordinator run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSuite {
    pub test_cases: Vec<TestCase>,
}

impl TestSuite {
    pub fn new(test_cases: Vec<TestCase>) -> Self {
        Self { test_cases }
    }
}

/// A test instance registered for the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    pub test_index: u32,
    pub address: Address,
    pub test_case: TestCase,
}

impl TestRecord {
    pub const fn new(test_index: u32, test_case: TestCase) -> Self {
        Self {
            test_index,
            address: Address::test(0, 0, test_index),
            test_case,
        }
    }

    pub fn id(&self) -> &str {
        &self.test_case.id
    }
}
