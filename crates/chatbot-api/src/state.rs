use std::sync::Arc;

use chatbot_persist::ThreadManager;

use crate::config::Config;
use crate::generation::ReplyGenerator;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub manager: Arc<ThreadManager>,
    pub generator: Arc<dyn ReplyGenerator>,
}

impl AppState {
    pub fn new(config: Config, manager: ThreadManager, generator: Arc<dyn ReplyGenerator>) -> Self {
        Self {
            config: Arc::new(config),
            manager: Arc::new(manager),
            generator,
        }
    }
}
