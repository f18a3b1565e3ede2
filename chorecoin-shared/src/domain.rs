use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Who a new task is assigned to: a single kid, or every kid of the parent.
///
/// On the wire this is either the string `"all"` or a kid id (number or
/// numeric string).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assignee {
    All,
    Kid(i32),
}

impl fmt::Display for Assignee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assignee::All => f.write_str("all"),
            Assignee::Kid(id) => id.fmt(f),
        }
    }
}

impl Serialize for Assignee {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Assignee::All => serializer.serialize_str("all"),
            Assignee::Kid(id) => serializer.serialize_i32(*id),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AssigneeRepr {
    Id(i32),
    Text(String),
}

impl<'de> Deserialize<'de> for Assignee {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match AssigneeRepr::deserialize(deserializer)? {
            AssigneeRepr::Id(id) => Ok(Assignee::Kid(id)),
            AssigneeRepr::Text(s) => {
                let s = s.trim();
                if s.eq_ignore_ascii_case("all") {
                    Ok(Assignee::All)
                } else {
                    s.parse::<i32>().map(Assignee::Kid).map_err(|_| {
                        serde::de::Error::custom(format!(
                            "assignee must be \"all\" or a kid id, got {s:?}"
                        ))
                    })
                }
            }
        }
    }
}
