use serde::{Deserialize, Serialize};

/// A person who receives emergency alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

/// A contact as entered by the user, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContact {
    pub name: String,
    pub phone: String,
    pub relationship: String,
}

impl NewContact {
    pub fn into_contact(self, id: String) -> Contact {
        Contact {
            id,
            name: self.name,
            phone: self.phone,
            relationship: self.relationship,
        }
    }
}
