//! Typed endpoints for tasks, categories, teams and profiles.
//!
//! All of these go through `ApiClient::execute`, so they share the
//! credential and token renewal handling.

use serde::Serialize;

use super::transport::ApiRequest;
use super::{ApiClient, ApiError};
use crate::models::{
    Category, NewCategory, NewTask, NewTeam, Page, PageRequest, Profile, ProfileUpdate, Task,
    Team,
};

const TASKS_PATH: &str = "/api/tasks/";
const CATEGORIES_PATH: &str = "/api/categories/";
const TEAMS_PATH: &str = "/teams/";
const PROFILES_PATH: &str = "/profiles/";

/// Profile of the signed-in user
pub const OWN_PROFILE: &str = "me";

#[derive(Serialize)]
struct CompletedPatch {
    completed: bool,
}

fn item_path(collection: &str, id: impl std::fmt::Display) -> String {
    format!("{}{}/", collection, id)
}

fn paged(request: ApiRequest, page: Option<PageRequest>) -> ApiRequest {
    match page {
        Some(p) => request.query("page", p.page).query("page_size", p.page_size),
        None => request,
    }
}

impl ApiClient {
    // ===== Tasks =====

    pub async fn list_tasks(&self, page: Option<PageRequest>) -> Result<Page<Task>, ApiError> {
        self.fetch(paged(ApiRequest::get(TASKS_PATH), page)).await
    }

    pub async fn get_task(&self, id: i64) -> Result<Task, ApiError> {
        self.fetch(ApiRequest::get(item_path(TASKS_PATH, id))).await
    }

    pub async fn create_task(&self, task: &NewTask) -> Result<Task, ApiError> {
        self.send_json(ApiRequest::post(TASKS_PATH), task).await
    }

    pub async fn update_task(&self, id: i64, task: &NewTask) -> Result<Task, ApiError> {
        self.send_json(ApiRequest::put(item_path(TASKS_PATH, id)), task)
            .await
    }

    /// Mark a task complete or incomplete
    pub async fn set_task_completed(&self, id: i64, completed: bool) -> Result<Task, ApiError> {
        self.send_json(
            ApiRequest::patch(item_path(TASKS_PATH, id)),
            &CompletedPatch { completed },
        )
        .await
    }

    pub async fn delete_task(&self, id: i64) -> Result<(), ApiError> {
        self.send_unit(ApiRequest::delete(item_path(TASKS_PATH, id)))
            .await
    }

    // ===== Categories =====

    pub async fn list_categories(
        &self,
        page: Option<PageRequest>,
    ) -> Result<Page<Category>, ApiError> {
        self.fetch(paged(ApiRequest::get(CATEGORIES_PATH), page))
            .await
    }

    pub async fn get_category(&self, id: i64) -> Result<Category, ApiError> {
        self.fetch(ApiRequest::get(item_path(CATEGORIES_PATH, id)))
            .await
    }

    pub async fn create_category(&self, name: &str) -> Result<Category, ApiError> {
        let body = NewCategory {
            name: name.to_string(),
        };
        self.send_json(ApiRequest::post(CATEGORIES_PATH), &body)
            .await
    }

    pub async fn rename_category(&self, id: i64, name: &str) -> Result<Category, ApiError> {
        let body = NewCategory {
            name: name.to_string(),
        };
        self.send_json(ApiRequest::put(item_path(CATEGORIES_PATH, id)), &body)
            .await
    }

    pub async fn delete_category(&self, id: i64) -> Result<(), ApiError> {
        self.send_unit(ApiRequest::delete(item_path(CATEGORIES_PATH, id)))
            .await
    }

    // ===== Teams =====

    pub async fn list_teams(&self, page: Option<PageRequest>) -> Result<Page<Team>, ApiError> {
        self.fetch(paged(ApiRequest::get(TEAMS_PATH), page)).await
    }

    pub async fn create_team(&self, team: &NewTeam) -> Result<Team, ApiError> {
        self.send_json(ApiRequest::post(TEAMS_PATH), team).await
    }

    pub async fn update_team(&self, id: i64, team: &NewTeam) -> Result<Team, ApiError> {
        self.send_json(ApiRequest::put(item_path(TEAMS_PATH, id)), team)
            .await
    }

    /// Add the signed-in user to a team
    pub async fn join_team(&self, id: i64) -> Result<(), ApiError> {
        self.send_unit(ApiRequest::post(format!("{}{}/join/", TEAMS_PATH, id)))
            .await
    }

    pub async fn delete_team(&self, id: i64) -> Result<(), ApiError> {
        self.send_unit(ApiRequest::delete(item_path(TEAMS_PATH, id)))
            .await
    }

    /// Teams the given user belongs to
    pub async fn teams_for_user(&self, user_id: i64) -> Result<Vec<Team>, ApiError> {
        let teams = self.list_teams(None).await?;
        Ok(teams
            .results
            .into_iter()
            .filter(|t| t.has_member(user_id))
            .collect())
    }

    // ===== Profiles =====

    pub async fn list_profiles(
        &self,
        page: Option<PageRequest>,
    ) -> Result<Page<Profile>, ApiError> {
        self.fetch(paged(ApiRequest::get(PROFILES_PATH), page)).await
    }

    /// Fetch a profile by id, or the caller's own with `None`
    pub async fn get_profile(&self, id: Option<i64>) -> Result<Profile, ApiError> {
        let path = match id {
            Some(id) => item_path(PROFILES_PATH, id),
            None => item_path(PROFILES_PATH, OWN_PROFILE),
        };
        self.fetch(ApiRequest::get(path)).await
    }

    pub async fn update_profile(
        &self,
        id: Option<i64>,
        update: &ProfileUpdate,
    ) -> Result<Profile, ApiError> {
        let path = match id {
            Some(id) => item_path(PROFILES_PATH, id),
            None => item_path(PROFILES_PATH, OWN_PROFILE),
        };
        self.send_json(ApiRequest::put(path), update).await
    }
}
