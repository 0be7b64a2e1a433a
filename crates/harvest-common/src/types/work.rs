use serde::{Deserialize, Serialize};

/// Inclusive page window passed through to the harvester
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

/// Smallest addressable piece of harvesting work, e.g. a topic id.
///
/// Work files may list plain ids (`"1402"`) or objects
/// (`{"id": "1402", "pages": {"start": 1, "end": 5}}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "WorkUnitRepr")]
pub struct WorkUnit {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRange>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WorkUnitRepr {
    Id(String),
    Number(u64),
    Full {
        id: String,
        #[serde(default)]
        pages: Option<PageRange>,
    },
}

impl From<WorkUnitRepr> for WorkUnit {
    fn from(repr: WorkUnitRepr) -> Self {
        match repr {
            WorkUnitRepr::Id(id) => WorkUnit::new(id),
            WorkUnitRepr::Number(n) => WorkUnit::new(n.to_string()),
            WorkUnitRepr::Full { id, pages } => WorkUnit { id, pages },
        }
    }
}

impl WorkUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            pages: None,
        }
    }

    pub fn with_pages(mut self, pages: PageRange) -> Self {
        self.pages = Some(pages);
        self
    }
}

/// Ordered group of work units dispatched to one harvester invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based position in the partition
    pub index: usize,
    pub units: Vec<WorkUnit>,
    /// Source-level page window, applied to units without their own
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<PageRange>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.id.as_str())
    }
}
