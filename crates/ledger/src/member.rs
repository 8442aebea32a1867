use serde::{Deserialize, Serialize};

use splitledger_core::{Entity, LedgerError, LedgerResult, MemberId};

/// A person who can pay for and share in expenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    id: MemberId,
    name: String,
}

impl Member {
    /// New member with a fresh id. The display name must not be blank.
    pub fn new(name: impl Into<String>) -> LedgerResult<Self> {
        Self::with_id(MemberId::new(), name)
    }

    pub fn with_id(id: MemberId, name: impl Into<String>) -> LedgerResult<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(LedgerError::validation("member name must not be empty"));
        }
        Ok(Self { id, name })
    }

    pub fn id_typed(&self) -> MemberId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Entity for Member {
    type Id = MemberId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
