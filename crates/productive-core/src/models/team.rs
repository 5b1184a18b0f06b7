use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: i64,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub users: Vec<TeamMember>,
}

impl Team {
    pub fn has_member(&self, user_id: i64) -> bool {
        self.users.iter().any(|u| u.id == user_id)
    }

    pub fn member_names(&self) -> String {
        self.users
            .iter()
            .map(|u| u.username.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Body for creating or replacing a team
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewTeam {
    pub name: String,
    pub description: String,
    pub user_ids: Vec<i64>,
}
