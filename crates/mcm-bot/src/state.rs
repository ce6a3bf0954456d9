use std::sync::Arc;

use crate::commands::CommandRouter;
use crate::server::Server;

#[derive(Clone)]
pub struct AppState {
    pub servers: Arc<[Arc<Server>]>,
    pub commands: CommandRouter,
}
