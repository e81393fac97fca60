use std::time::{Duration, Instant};

use proxywarp_core::cache::ResolverCache;
use proxywarp_core::config::Settings;
use proxywarp_core::directory::TokenDirectory;

pub struct AppState {
    pub settings: Settings,
    pub directory: TokenDirectory,
    pub cache: ResolverCache,
    pub http_client: reqwest::Client,
    pub started: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> color_eyre::Result<Self> {
        let directory = TokenDirectory::open(settings.directory.clone());
        let cache = ResolverCache::new(settings.cache.ttl());
        let http_client = reqwest::Client::builder()
            .user_agent(settings.proxy.user_agent.clone())
            .timeout(settings.proxy.request_timeout())
            .read_timeout(settings.proxy.request_timeout())
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;
        Ok(Self {
            settings,
            directory,
            cache,
            http_client,
            started: Instant::now(),
        })
    }
}
