use std::sync::Arc;

use db::DBService;
use services::services::{
    activation::ActivationEngine, directory::Directory, permission::PermissionGate,
};

pub mod error;
pub mod middleware;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub db: DBService,
    pub engine: ActivationEngine,
    pub gate: Arc<PermissionGate>,
    pub directory: Arc<dyn Directory>,
}
