use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_newtype!(RequestId);
id_newtype!(CompanyRequestId);
id_newtype!(ChatBoxId);
id_newtype!(NotificationId);
id_newtype!(UserId);
id_newtype!(FileId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Company,
    Designer,
}

/// Lifecycle states of a revision request, serialized exactly as the
/// backend spells them (including the space in "PRICE PROPOSED").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "PRICE PROPOSED")]
    PriceProposed,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "DELIVERED")]
    Delivered,
    #[serde(rename = "COMPLETED")]
    Completed,
    #[serde(rename = "REJECTED")]
    Rejected,
}

impl RevisionStatus {
    /// Completed is the only status with no outgoing transition for any
    /// revision type. Rejected still allows bug-fix rework re-entry.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RevisionType {
    #[serde(rename = "Bug Fix")]
    BugFix,
    #[serde(rename = "Modification")]
    Modification,
    #[serde(rename = "Additional Features")]
    AdditionalFeatures,
}

impl RevisionType {
    /// Bug fixes skip price negotiation entirely.
    pub fn is_priced(self) -> bool {
        !matches!(self, Self::BugFix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Message,
    Request,
    /// The backend may introduce kinds this client does not know about.
    Other,
}

impl Serialize for NotificationKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let text = match self {
            Self::Message => "Message",
            Self::Request => "Request",
            Self::Other => "Other",
        };
        serializer.serialize_str(text)
    }
}

impl<'de> Deserialize<'de> for NotificationKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(match text.as_str() {
            "Message" => Self::Message,
            "Request" => Self::Request,
            _ => Self::Other,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationStatus {
    Unread,
    Read,
}
