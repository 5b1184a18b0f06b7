use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A foreign key that the API may render as a bare id or as a nested object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Related {
    Id(i64),
    Object {
        id: i64,
        #[serde(default)]
        name: Option<String>,
    },
}

impl Related {
    pub fn id(&self) -> i64 {
        match self {
            Related::Id(id) | Related::Object { id, .. } => *id,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Related::Id(_) => None,
            Related::Object { name, .. } => name.as_deref(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFile {
    #[serde(default)]
    pub id: Option<i64>,
    pub file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub task_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_urgent: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub category: Option<Related>,
    #[serde(default)]
    pub team: Option<Related>,
    #[serde(default)]
    pub owner: Option<i64>,
    #[serde(default)]
    pub files: Vec<TaskFile>,
}

impl Task {
    pub fn due_date_display(&self) -> String {
        self.due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "Not set".to_string())
    }

    /// True when the task is open and its due date has passed
    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        !self.completed && self.due_date.map(|d| d < today).unwrap_or(false)
    }
}

/// Body for creating or replacing a task
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NewTask {
    pub task_name: String,
    pub description: String,
    pub is_urgent: bool,
    pub completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    pub category: Option<i64>,
    pub team: Option<i64>,
}

impl From<&Task> for NewTask {
    fn from(task: &Task) -> Self {
        Self {
            task_name: task.task_name.clone(),
            description: task.description.clone().unwrap_or_default(),
            is_urgent: task.is_urgent,
            completed: task.completed,
            due_date: task.due_date,
            category: task.category.as_ref().map(Related::id),
            team: task.team.as_ref().map(Related::id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_task_with_nested_relations() {
        let json = r#"{
            "id": 4, "owner": 7, "task_name": "Write report", "description": "Quarterly",
            "is_urgent": true, "completed": false, "due_date": "2024-06-01",
            "category": {"id": 2, "name": "Work"}, "team": 5,
            "files": [{"id": 1, "file": "https://cdn/x.pdf"}]
        }"#;
        let task: Task = serde_json::from_str(json).unwrap();
        assert_eq!(task.category.as_ref().unwrap().name(), Some("Work"));
        assert_eq!(task.team.as_ref().unwrap().id(), 5);
        assert_eq!(task.team.as_ref().unwrap().name(), None);
        assert_eq!(task.due_date_display(), "2024-06-01");
        assert_eq!(task.files.len(), 1);
    }

    #[test]
    fn test_parse_minimal_task() {
        let task: Task =
            serde_json::from_str(r#"{"id": 1, "task_name": "x", "due_date": null}"#).unwrap();
        assert_eq!(task.due_date_display(), "Not set");
        assert!(task.category.is_none());
    }

    #[test]
    fn test_overdue() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let mut task: Task = serde_json::from_str(
            r#"{"id": 1, "task_name": "x", "due_date": "2024-06-01"}"#,
        )
        .unwrap();
        assert!(task.is_overdue(today));
        task.completed = true;
        assert!(!task.is_overdue(today));
    }

    #[test]
    fn test_new_task_from_existing_flattens_relations() {
        let task: Task = serde_json::from_str(
            r#"{"id": 1, "task_name": "x", "category": {"id": 3, "name": "Home"}, "team": null}"#,
        )
        .unwrap();
        let body = serde_json::to_value(NewTask::from(&task)).unwrap();
        assert_eq!(body["category"], 3);
        assert!(body["team"].is_null());
        assert!(body.get("due_date").is_none());
    }
}
