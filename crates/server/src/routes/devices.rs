use axum::{
    extract::{Path, State},
    response::Json as ResponseJson,
    routing::get,
    Router,
};
use db::models::device::Device;
use utils::response::ApiResponse;

use crate::{error::ApiError, AppState};

pub async fn get_devices(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<Device>>>, ApiError> {
    let devices = Device::list(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(devices)))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(sn): Path<String>,
) -> Result<ResponseJson<ApiResponse<Device>>, ApiError> {
    let device = Device::find_by_sn(&state.db.pool, &sn)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {sn}")))?;
    Ok(ResponseJson(ApiResponse::success(device)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(get_devices))
        .route("/{sn}", get(get_device))
}
