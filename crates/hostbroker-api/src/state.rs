use std::sync::Arc;

use hostbroker_app::{AppContext, CommandBus, QueryBus};

#[derive(Clone)]
pub struct AppState {
    pub commands: CommandBus,
    pub queries: QueryBus,
    pub auth_token: Arc<String>,
}

impl AppState {
    pub fn new(ctx: Arc<AppContext>, auth_token: Arc<String>) -> Self {
        AppState { commands: CommandBus::new(ctx.clone()), queries: QueryBus::new(ctx), auth_token }
    }
}
