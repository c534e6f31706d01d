use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::core::errors::Result;
use crate::core::paths::resolve_under_root;
use crate::monitor::storage_check::StorageReport;
use crate::sharing::links::{LinkTarget, share_link};
use crate::sharing::ssh::{download_file_name, parse_endpoint_origin, setup_command};
use crate::tooling::installers::{InstallerRecord, list_installers};
use crate::tooling::tools::{ToolRecord, list_tools};

use super::{errors::HttpError, state::HttpState};

const SSH_SHARING_DISABLED: &str =
    "Shared links are disabled. Please download and execute the SSH script manually.";
const MISSING_PATH: &str = "Please provide a valid path via get parameter.";
const MISSING_ORIGIN: &str = "Please provide a valid origin (endpoint url) via get parameter.";

#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LinkQuery {
    path: Option<String>,
    origin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScriptQuery {
    token: Option<String>,
    host: Option<String>,
    port: Option<String>,
    origin: Option<String>,
    download: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct IdentityRequest {
    name: Option<String>,
    email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitRequest {
    file_path: Option<String>,
    commit_msg: Option<String>,
}

/// Run filesystem or subprocess work off the async runtime.
async fn blocking<T, F>(task: F) -> std::result::Result<T, HttpError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(task).await??)
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn json_body<T: for<'de> Deserialize<'de>>(
    body: &Bytes,
    message: &str,
) -> std::result::Result<T, HttpError> {
    serde_json::from_slice(body).map_err(|_| HttpError::bad_request(message))
}

pub async fn ping() -> &'static str {
    "Successful"
}

pub async fn tools(
    State(state): State<HttpState>,
) -> std::result::Result<Json<Vec<ToolRecord>>, HttpError> {
    let dir = state.config.paths.tools_dir();
    blocking(move || list_tools(&dir)).await.map(Json)
}

pub async fn tool_installers(
    State(state): State<HttpState>,
) -> std::result::Result<Json<Vec<InstallerRecord>>, HttpError> {
    let dir = state.config.paths.installers_dir();
    blocking(move || list_installers(&dir)).await.map(Json)
}

pub async fn token(
    State(state): State<HttpState>,
    Query(query): Query<PathQuery>,
) -> std::result::Result<String, HttpError> {
    if !state.config.sharing.enabled {
        return Err(HttpError::bad_request("Shared links are disabled."));
    }
    let path = present(query.path).ok_or_else(|| HttpError::bad_request(MISSING_PATH))?;
    blocking(move || Ok(state.tokens()?.derive(&path))).await
}

pub async fn git_info(
    State(state): State<HttpState>,
    Query(query): Query<PathQuery>,
) -> std::result::Result<impl IntoResponse, HttpError> {
    let path = present(query.path)
        .map(|p| resolve_under_root(&state.config.paths.server_root, &p))
        .transpose()?;
    let info = blocking(move || Ok(state.git.info(path.as_deref()))).await?;
    Ok(Json(info))
}

pub async fn set_git_identity(
    State(state): State<HttpState>,
    Query(query): Query<PathQuery>,
    body: Bytes,
) -> std::result::Result<StatusCode, HttpError> {
    let request: IdentityRequest =
        json_body(&body, "Please provide a valid name and email in body.")?;
    let email =
        present(request.email).ok_or_else(|| HttpError::bad_request("Please provide a valid email."))?;
    let name =
        present(request.name).ok_or_else(|| HttpError::bad_request("Please provide a valid name."))?;
    let path = present(query.path)
        .map(|p| resolve_under_root(&state.config.paths.server_root, &p))
        .transpose()?;

    blocking(move || state.git.set_identity(path.as_deref(), &name, &email)).await?;
    Ok(StatusCode::OK)
}

pub async fn git_commit(
    State(state): State<HttpState>,
    body: Bytes,
) -> std::result::Result<StatusCode, HttpError> {
    let request: CommitRequest = json_body(
        &body,
        "Please provide a valid file path and commit msg in body.",
    )?;
    let file_path = present(request.file_path)
        .ok_or_else(|| HttpError::bad_request("Please provide a valid filePath in body."))?;
    let file = resolve_under_root(&state.config.paths.server_root, &file_path)?;
    let message = present(request.commit_msg);

    blocking(move || state.git.commit_file(&file, message.as_deref(), true)).await?;
    Ok(StatusCode::OK)
}

pub async fn storage_check(
    State(state): State<HttpState>,
) -> std::result::Result<Json<StorageReport>, HttpError> {
    // The refresh handle is dropped; the measurement finishes detached.
    blocking(move || Ok(state.storage.check().report))
        .await
        .map(Json)
}

pub async fn ssh_setup_script(
    State(state): State<HttpState>,
    Query(query): Query<ScriptQuery>,
) -> std::result::Result<Response, HttpError> {
    setup_script_response(state, query).await
}

/// Setup script for holders of the token for this endpoint's path.
pub async fn shared_ssh_setup(
    State(state): State<HttpState>,
    Query(query): Query<ScriptQuery>,
) -> std::result::Result<Response, HttpError> {
    if !state.config.sharing.enabled {
        return Err(HttpError::unauthorized(SSH_SHARING_DISABLED));
    }
    let Some(candidate) = present(query.token.clone()) else {
        return Err(HttpError::shell(
            StatusCode::UNAUTHORIZED,
            "Please provide a token via get parameter.",
        ));
    };

    let setup_path = state.config.server.shared_ssh_setup_path();
    let tokens_state = state.clone();
    let tokens = blocking(move || tokens_state.tokens()).await?;
    if !tokens.validate(&candidate, &setup_path) {
        return Err(HttpError::shell(
            StatusCode::UNAUTHORIZED,
            "The provided token is not valid.",
        ));
    }

    setup_script_response(state, query).await
}

async fn setup_script_response(
    state: HttpState,
    query: ScriptQuery,
) -> std::result::Result<Response, HttpError> {
    let mut host = present(query.host);
    let mut port = present(query.port);
    if (host.is_none() || port.is_none())
        && let Some(origin) = present(query.origin)
    {
        let (origin_host, origin_port) = parse_endpoint_origin(&origin)?;
        host.get_or_insert(origin_host);
        port.get_or_insert_with(|| origin_port.to_string());
    }

    let host = host.ok_or_else(|| {
        HttpError::bad_request(
            "Please provide a host via get parameter. Alternatively, you can also specify an origin with the full endpoint url.",
        )
    })?;
    let port = port.ok_or_else(|| {
        HttpError::bad_request(
            "Please provide a port via get parameter. Alternatively, you can also specify an origin with the full endpoint url.",
        )
    })?;
    let port: u16 = port
        .parse()
        .map_err(|_| HttpError::bad_request(format!("Invalid port: {port}")))?;

    let download = query
        .download
        .is_some_and(|flag| flag.trim().eq_ignore_ascii_case("true"));
    let jumphost = state
        .config
        .sharing
        .ssh_jumphost_target
        .clone()
        .filter(|target| !target.trim().is_empty());

    let script_host = host.clone();
    let script = blocking(move || state.setup_script_builder()?.render(&script_host, port)).await?;

    if download {
        let file_name = download_file_name(&host, port, jumphost.as_deref());
        Ok((
            [
                (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename={file_name}"),
                ),
            ],
            script,
        )
            .into_response())
    } else {
        Ok(script.into_response())
    }
}

pub async fn ssh_setup_command(
    State(state): State<HttpState>,
    Query(query): Query<LinkQuery>,
) -> std::result::Result<String, HttpError> {
    if !state.config.sharing.enabled {
        return Ok(SSH_SHARING_DISABLED.to_string());
    }
    let origin = present(query.origin).ok_or_else(|| HttpError::bad_request(MISSING_ORIGIN))?;
    let (host, port) = parse_endpoint_origin(&origin)?;
    let setup_path = state.config.server.shared_ssh_setup_path();

    blocking(move || {
        let token = state.tokens()?.derive(&setup_path);
        Ok(setup_command(&origin, &setup_path, &token, &host, port))
    })
    .await
}

pub async fn files_link(
    State(state): State<HttpState>,
    Query(query): Query<LinkQuery>,
) -> std::result::Result<String, HttpError> {
    if !state.config.sharing.enabled {
        return Ok("Shared links are disabled. Please download and share the data manually.".to_string());
    }
    let path = present(query.path).ok_or_else(|| HttpError::bad_request(MISSING_PATH))?;
    let origin = present(query.origin).ok_or_else(|| HttpError::bad_request(MISSING_ORIGIN))?;

    blocking(move || {
        let tokens = state.tokens()?;
        share_link(
            &tokens,
            state.share_backend.as_ref(),
            &state.config.paths.server_root,
            &path,
            LinkTarget {
                origin: &origin,
                base_prefix: state.config.server.base_prefix(),
            },
        )
    })
    .await
}
