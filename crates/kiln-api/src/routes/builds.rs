//! Build endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use kiln_core::store::{BuildStore, ProjectStore};
use kiln_core::{Build, Project, ResourceId};
use kiln_scheduler::{TriggerRequest, trigger_build};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/builds/{id}", get(get_build))
        .route(
            "/projects/{id}/builds",
            get(list_project_builds).post(trigger_project_build),
        )
}

async fn get_build(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Build>, ApiError> {
    let build = state
        .builds
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("build {}", id)))?;
    Ok(Json(build))
}

async fn load_project(state: &AppState, id: ResourceId) -> Result<Project, ApiError> {
    state
        .projects
        .get_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project {}", id)))
}

async fn list_project_builds(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
) -> Result<Json<Vec<Build>>, ApiError> {
    let project = load_project(&state, id).await?;
    let builds = state.builds.list_by_project(project.id).await?;
    Ok(Json(builds))
}

async fn trigger_project_build(
    State(state): State<AppState>,
    Path(id): Path<ResourceId>,
    Json(req): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<Build>), ApiError> {
    let project = load_project(&state, id).await?;
    let build = trigger_build(state.builds.as_ref(), state.queue.as_ref(), &project, req).await?;
    Ok((StatusCode::ACCEPTED, Json(build)))
}
