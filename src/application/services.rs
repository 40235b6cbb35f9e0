//! Wiring of every cache and service from resolved settings.
//!
//! Each cache is built once here and shared by `Arc`; the cron sweeper and
//! the ops surface see the same instances as the request path.

use std::sync::Arc;

use crate::{
    application::{
        blocks::BlocksService,
        feed::FeedService,
        jobs::{CacheSweeper, RescoreContext},
        link_preview::{LinkPreview, LinkPreviewService, PreviewFetcher},
        login_attempts::LoginAttemptLimiter,
        presence::PresenceTracker,
        repos::{BlocksRepo, FeedItemsRepo, SearchRepo},
        search::SearchService,
        weather::{CoordinateKey, WeatherProvider, WeatherReport, WeatherService},
    },
    cache::{CacheConfig, QueryCache, SharedClock, TtlCache},
    config::Settings,
};

/// Outbound adapters the services depend on.
pub struct Adapters<R> {
    pub repos: Arc<R>,
    pub previews: Arc<dyn PreviewFetcher>,
    pub weather: Arc<dyn WeatherProvider>,
}

#[derive(Clone)]
pub struct CoreServices {
    pub clock: SharedClock,
    pub queries: Arc<QueryCache>,
    pub preview_cache: Arc<TtlCache<String, LinkPreview>>,
    pub weather_cache: Arc<TtlCache<CoordinateKey, WeatherReport>>,
    pub feed: Arc<FeedService>,
    pub blocks: Arc<BlocksService>,
    pub search: Arc<SearchService>,
    pub login: LoginAttemptLimiter,
    pub link_preview: LinkPreviewService,
    pub weather: WeatherService,
    pub presence: PresenceTracker,
}

impl CoreServices {
    pub fn build<R>(settings: &Settings, adapters: Adapters<R>, clock: SharedClock) -> Self
    where
        R: FeedItemsRepo + BlocksRepo + SearchRepo + 'static,
    {
        let cache_config = CacheConfig::from(settings);
        let queries = Arc::new(QueryCache::new(&cache_config, clock.clone()));
        let preview_cache = Arc::new(TtlCache::new(
            "link_preview",
            cache_config.preview_capacity_non_zero(),
            clock.clone(),
        ));
        let weather_cache = Arc::new(TtlCache::new(
            "weather",
            cache_config.weather_capacity_non_zero(),
            clock.clone(),
        ));
        let presence_cache = Arc::new(TtlCache::new(
            "presence",
            cache_config.presence_capacity_non_zero(),
            clock.clone(),
        ));

        let feed_repo: Arc<dyn FeedItemsRepo> = adapters.repos.clone();
        let blocks_repo: Arc<dyn BlocksRepo> = adapters.repos.clone();
        let search_repo: Arc<dyn SearchRepo> = adapters.repos;

        let feed = Arc::new(FeedService::new(
            feed_repo,
            settings.scoring.weights,
            settings.scoring.retention,
            clock.clone(),
        ));
        let blocks = Arc::new(
            BlocksService::new(blocks_repo, queries.clone(), clock.clone())
                .with_recent_days(settings.queries.blocks_recent_days),
        );
        let search = Arc::new(
            SearchService::new(search_repo, queries.clone())
                .with_limit(settings.queries.search_limit.get()),
        );
        let login = LoginAttemptLimiter::new(
            settings.login.block_limit.get(),
            settings.login.block_window,
            clock.clone(),
        );
        let link_preview = LinkPreviewService::new(
            adapters.previews,
            preview_cache.clone(),
            cache_config.preview_ttl,
        );
        let weather = WeatherService::new(
            adapters.weather,
            weather_cache.clone(),
            cache_config.weather_ttl,
        );
        let presence = PresenceTracker::new(presence_cache, cache_config.presence_ttl);

        Self {
            clock,
            queries,
            preview_cache,
            weather_cache,
            feed,
            blocks,
            search,
            login,
            link_preview,
            weather,
            presence,
        }
    }

    pub fn sweeper(&self) -> CacheSweeper {
        CacheSweeper {
            queries: self.queries.clone(),
            previews: self.preview_cache.clone(),
            weather: self.weather_cache.clone(),
            presence: self.presence.clone(),
            login: self.login.clone(),
        }
    }

    pub fn rescore_context(&self) -> RescoreContext {
        RescoreContext {
            feed: self.feed.clone(),
        }
    }
}
